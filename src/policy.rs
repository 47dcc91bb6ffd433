//! Which module URLs may be loaded dynamically.

use crate::error::LoadKind;
use std::rc::Rc;
use url::Url;

/// Decides whether a resolved module URL may be loaded for the given [`LoadKind`].
pub type ModuleUrlPolicy = Rc<dyn Fn(&str, LoadKind) -> bool>;

const BLOCKED_SCHEMES: [&str; 2] = ["data", "javascript"];

/// The policy in effect unless replaced.
///
/// Outside a browser context (`location` is [`None`]) everything is allowed.
/// In a browser, `data:` and `javascript:` URLs as well as cross-origin URLs are rejected, as is anything that doesn't parse relative to the page.
#[must_use]
pub fn default_policy(location: Option<&Url>, resolved_url: &str) -> bool {
	let location = match location {
		Some(location) => location,
		None => return true,
	};

	let target = match location.join(resolved_url) {
		Ok(target) => target,
		Err(_) => return false,
	};
	if BLOCKED_SCHEMES.contains(&target.scheme()) {
		return false;
	}

	target.origin() == location.origin()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn page() -> Url {
		Url::parse("https://app.example/islands/index.html").unwrap()
	}

	#[test]
	fn permissive_outside_browser() {
		assert!(default_policy(None, "https://elsewhere.example/widget.js"));
		assert!(default_policy(None, "data:text/javascript,export default 1"));
	}

	#[test]
	fn same_origin_only_in_browser() {
		let page = page();
		assert!(default_policy(Some(&page), "/assets/widget.js"));
		assert!(default_policy(Some(&page), "./widget.js"));
		assert!(default_policy(Some(&page), "https://app.example/assets/widget.js"));
		assert!(!default_policy(Some(&page), "https://elsewhere.example/widget.js"));
		assert!(!default_policy(Some(&page), "http://app.example/widget.js"));
	}

	#[test]
	fn blocked_schemes() {
		let page = page();
		assert!(!default_policy(Some(&page), "data:text/javascript,export default 1"));
		assert!(!default_policy(Some(&page), "javascript:alert(1)"));
	}

	#[test]
	fn malformed() {
		assert!(!default_policy(Some(&page()), "http://[::1"));
	}
}
