//! Locators name a module and one of its exports: `module#export`, optionally followed by a
//! `[...]` scope suffix that is ignored here.

use crate::attributes::DEFAULT_EXPORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
	pub url: String,
	pub export: String,
}

/// Splits `locator` into module URL and export name.
///
/// Never fails. Missing parts become an empty URL or the `"default"` export respectively.
#[must_use]
pub fn parse(locator: &str) -> Locator {
	let reference = locator.split('[').next().unwrap_or_default();
	if reference.is_empty() {
		return Locator { url: String::new(), export: DEFAULT_EXPORT.to_owned() };
	}

	match reference.rfind('#') {
		None => Locator { url: reference.to_owned(), export: DEFAULT_EXPORT.to_owned() },
		Some(hash) => {
			let export = &reference[hash + 1..];
			Locator {
				url: reference[..hash].to_owned(),
				export: if export.is_empty() { DEFAULT_EXPORT } else { export }.to_owned(),
			}
		}
	}
}

/// Formats the locator of `export` in `module`.
#[must_use]
pub fn create_locator(module: &str, export: Option<&str>) -> String {
	format!("{}#{}", module, export.unwrap_or(DEFAULT_EXPORT))
}
