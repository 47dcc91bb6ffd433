//! Process-scoped island state.
//!
//! Module caches, retry bookkeeping, cached action handlers, the module URL policy, the manifest
//! override and the loader slots are shared by every island and loader created from the same
//! [`Context`]. This way a broken module costs one cooldown window in total rather than one per host.

use crate::{
	error::{Error, LoadKind},
	locator::{self, Locator},
	module::{Component, Export, ModuleLoader, ModuleSlot},
	platform::{ElementId, Platform},
	policy::{self, ModuleUrlPolicy},
	props::Callback,
	retry::Backoff,
	root::Renderer,
};
use core::{cell::RefCell, fmt, time::Duration};
use futures::{
	future::{self, LocalBoxFuture},
	FutureExt as _,
};
use hashbrown::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use tracing::{instrument, trace};

/// Which of the two component loader slots a load goes through.
///
/// They are independent so programmatic islands and the attribute-driven loader can be given
/// different loaders (and see different failure sequences) without affecting each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ComponentPath {
	Island,
	Loader,
}

pub(crate) struct Inner {
	platform: Rc<dyn Platform>,
	renderer: Rc<dyn Renderer>,
	backoff: Backoff,
	manifest: RefCell<Option<HashMap<String, String>>>,
	policy: RefCell<Option<ModuleUrlPolicy>>,
	island_modules: ModuleSlot,
	loader_modules: ModuleSlot,
	action_modules: ModuleSlot,
	pub(crate) action_handlers: RefCell<HashMap<String, Callback>>,
	/// Hosts owned by an active programmatic island.
	claimed_hosts: RefCell<HashSet<ElementId>>,
}

/// Shared island runtime state. Cheap to clone.
#[derive(Clone)]
pub struct Context(Rc<Inner>);

impl fmt::Debug for Context {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Context")
			.field("platform", &self.0.platform)
			.field("renderer", &self.0.renderer)
			.field("backoff", &self.0.backoff)
			.field("island_modules", &self.0.island_modules)
			.field("loader_modules", &self.0.loader_modules)
			.field("action_modules", &self.0.action_modules)
			.finish_non_exhaustive()
	}
}

impl Context {
	#[must_use]
	pub fn new(platform: Rc<dyn Platform>, renderer: Rc<dyn Renderer>) -> Self {
		Self::with_backoff(platform, renderer, Backoff::default())
	}

	#[must_use]
	pub fn with_backoff(platform: Rc<dyn Platform>, renderer: Rc<dyn Renderer>, backoff: Backoff) -> Self {
		Self(Rc::new(Inner {
			island_modules: ModuleSlot::new(LoadKind::Component, Rc::clone(&platform), backoff),
			loader_modules: ModuleSlot::new(LoadKind::Component, Rc::clone(&platform), backoff),
			action_modules: ModuleSlot::new(LoadKind::Action, Rc::clone(&platform), backoff),
			platform,
			renderer,
			backoff,
			manifest: RefCell::default(),
			policy: RefCell::default(),
			action_handlers: RefCell::default(),
			claimed_hosts: RefCell::default(),
		}))
	}

	#[must_use]
	pub fn platform(&self) -> &Rc<dyn Platform> {
		&self.0.platform
	}

	#[must_use]
	pub fn renderer(&self) -> &Rc<dyn Renderer> {
		&self.0.renderer
	}

	#[must_use]
	pub fn backoff(&self) -> Backoff {
		self.0.backoff
	}

	pub(crate) fn downgrade(&self) -> WeakContext {
		WeakContext(Rc::downgrade(&self.0))
	}

	pub(crate) fn inner(&self) -> &Inner {
		&self.0
	}

	/// Replaces the build manifest consulted by [`Context::resolve_module_url`].
	///
	/// While unset, the environment's manifest ([`Platform::manifest_entry`]) is used.
	pub fn set_manifest(&self, manifest: Option<HashMap<String, String>>) {
		*self.0.manifest.borrow_mut() = manifest;
	}

	/// Maps a module URL through the build manifest, if it has a (non-empty) entry for it.
	#[must_use]
	pub fn resolve_module_url(&self, url: &str) -> String {
		let mapped = match &*self.0.manifest.borrow() {
			Some(manifest) => manifest.get(url).cloned(),
			None => self.0.platform.manifest_entry(url),
		};
		match mapped {
			Some(mapped) if !mapped.is_empty() => mapped,
			_ => url.to_owned(),
		}
	}

	/// Replaces the module URL policy. [`None`] restores [`policy::default_policy`].
	pub fn set_module_url_policy(&self, policy: Option<ModuleUrlPolicy>) {
		*self.0.policy.borrow_mut() = policy;
	}

	#[must_use]
	pub fn is_module_url_allowed(&self, resolved_url: &str, kind: LoadKind) -> bool {
		let custom = self.0.policy.borrow().clone();
		match custom {
			Some(policy) => policy(resolved_url, kind),
			None => policy::default_policy(self.0.platform.location().as_ref(), resolved_url),
		}
	}

	/// # Errors
	///
	/// [`Error::Blocked`] iff [`Context::is_module_url_allowed`] returns `false`.
	pub fn assert_module_url_allowed(&self, resolved_url: &str, kind: LoadKind) -> Result<(), Error> {
		if self.is_module_url_allowed(resolved_url, kind) {
			Ok(())
		} else {
			Err(Error::Blocked { kind, url: resolved_url.to_owned() })
		}
	}

	/// Replaces the module loader used by [`reactify_by_locator`](`crate::island::reactify_by_locator`) islands.
	///
	/// [`None`] restores the default. Either way, that slot's module cache is cleared.
	pub fn set_island_module_loader(&self, loader: Option<ModuleLoader>) {
		self.0.island_modules.set(loader);
	}

	pub fn reset_island_module_loader(&self) {
		self.set_island_module_loader(None);
	}

	/// Replaces the module loader used by the attribute-driven [`loader`](`crate::loader`).
	///
	/// [`None`] restores the default. Either way, that slot's module cache is cleared.
	pub fn set_loader_module_loader(&self, loader: Option<ModuleLoader>) {
		self.0.loader_modules.set(loader);
	}

	pub fn reset_loader_module_loader(&self) {
		self.set_loader_module_loader(None);
	}

	/// Replaces the module loader used to invoke [`ActionRef`](`crate::action::ActionRef`)s.
	///
	/// [`None`] restores the default. Either way, action caches are cleared.
	pub fn set_action_module_loader(&self, loader: Option<ModuleLoader>) {
		self.0.action_modules.set(loader);
		self.0.action_handlers.borrow_mut().clear();
	}

	/// Forgets materialized action handlers, loaded action modules and their cooldowns.
	pub fn reset_action_caches(&self) {
		self.set_action_module_loader(None);
	}

	/// Restores the default policy, manifest and loaders and clears every cache.
	pub fn reset(&self) {
		self.set_manifest(None);
		self.set_module_url_policy(None);
		self.reset_island_module_loader();
		self.reset_loader_module_loader();
		self.reset_action_caches();
	}

	/// Marks `host` as owned by a programmatic island, so loaders leave it alone.
	pub(crate) fn claim_host(&self, host: ElementId) {
		self.0.claimed_hosts.borrow_mut().insert(host);
	}

	pub(crate) fn release_host(&self, host: ElementId) {
		self.0.claimed_hosts.borrow_mut().remove(&host);
	}

	/// Whether a programmatic island of this context currently owns `host`.
	#[must_use]
	pub fn is_host_claimed(&self, host: ElementId) -> bool {
		self.0.claimed_hosts.borrow().contains(&host)
	}

	pub(crate) fn action_modules(&self) -> &ModuleSlot {
		&self.0.action_modules
	}

	fn component_modules(&self, path: ComponentPath) -> &ModuleSlot {
		match path {
			ComponentPath::Island => &self.0.island_modules,
			ComponentPath::Loader => &self.0.loader_modules,
		}
	}

	/// Resolves, checks and loads the component `locator` names.
	///
	/// Precondition failures are returned as an already completed future so that every failure
	/// reaches the caller the same way.
	#[instrument(level = "trace", skip(self))]
	pub(crate) fn load_component(&self, path: ComponentPath, locator: &str) -> LocalBoxFuture<'static, Result<Component, Error>> {
		let Locator { url, export } = locator::parse(locator);
		if url.is_empty() {
			return future::ready(Err(Error::MissingModuleUrl {
				kind: LoadKind::Component,
				locator: locator.to_owned(),
			}))
			.boxed_local();
		}

		let resolved = self.resolve_module_url(&url);
		if let Err(error) = self.assert_module_url_allowed(&resolved, LoadKind::Component) {
			return future::ready(Err(error)).boxed_local();
		}

		trace!("Loading component {:?} from {:?}.", export, resolved);
		let module = self.component_modules(path).load(&resolved);
		async move {
			match module.await?.resolve(&export) {
				Some(Export::Component(component)) => Ok(component.clone()),
				_ => Err(Error::NotCallable {
					kind: LoadKind::Component,
					export,
					url: resolved,
				}),
			}
		}
		.boxed_local()
	}

	/// How long the module behind `locator` still cools down on `path`.
	pub(crate) fn component_cooldown(&self, path: ComponentPath, locator: &str) -> Option<Duration> {
		let url = locator::parse(locator).url;
		if url.is_empty() {
			return None;
		}
		self.component_modules(path).cache().cooldown_remaining(&self.resolve_module_url(&url))
	}
}

#[derive(Clone)]
pub(crate) struct WeakContext(Weak<Inner>);

impl WeakContext {
	pub(crate) fn upgrade(&self) -> Option<Context> {
		self.0.upgrade().map(Context)
	}
}
