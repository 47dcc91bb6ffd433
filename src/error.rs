use core::{fmt, time::Duration};
use thiserror::Error;

/// What a module is being loaded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadKind {
	Component,
	Action,
}

impl fmt::Display for LoadKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			LoadKind::Component => "component",
			LoadKind::Action => "action",
		})
	}
}

/// Failures while resolving, loading or invoking island code.
///
/// All of these are caught where they originate and reported through [`tracing`].
/// None of them reach the host application's event handlers or effects.
///
/// [`Clone`] so that one failed shared load can be handed to every requester awaiting it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
	#[error("{kind} locator {locator:?} is missing a module URL")]
	MissingModuleUrl { kind: LoadKind, locator: String },

	#[error("blocked {kind} module URL {url:?} by security policy. Use `Context::set_module_url_policy` to allow trusted non-default sources")]
	Blocked { kind: LoadKind, url: String },

	#[error("export {export:?} from {url:?} is not a callable {kind}")]
	NotCallable { kind: LoadKind, export: String, url: String },

	#[error("failed to load module {url:?}: {reason}")]
	Load { url: String, reason: String },

	#[error("module {url:?} failed to load {failures} time(s); cooldown active for another {remaining:?}")]
	Cooldown { url: String, failures: u32, remaining: Duration },

	#[error("action {locator:?} failed: {reason}")]
	Action { locator: String, reason: String },
}
