//! Modules, their exports, and the swappable loaders that fetch them.

use crate::{
	error::{Error, LoadKind},
	platform::Platform,
	retry::{Backoff, RetryCache},
};
use core::{any::Any, cell::RefCell, fmt};
use futures::{
	future::{self, LocalBoxFuture},
	FutureExt as _,
};
use hashbrown::HashMap;
use serde_json::Value;
use std::rc::Rc;

/// An opaque component handed to the [`Renderer`](`crate::root::Renderer`).
///
/// What a component *is* is up to the renderer, which can [`Component::downcast_ref`] it.
#[derive(Clone)]
pub struct Component {
	inner: Rc<dyn Any>,
	type_name: &'static str,
}

impl Component {
	pub fn new<T: Any>(component: T) -> Self {
		Self {
			inner: Rc::new(component),
			type_name: core::any::type_name::<T>(),
		}
	}

	#[must_use]
	pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
		self.inner.downcast_ref()
	}

	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		core::ptr::addr_eq(Rc::as_ptr(&self.inner), Rc::as_ptr(&other.inner))
	}
}

impl fmt::Debug for Component {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Component").field(&self.type_name).finish()
	}
}

/// A callable action export.
///
/// The returned error message is reported through [`Error::Action`].
#[derive(Clone)]
pub struct Action(Rc<dyn Fn(Vec<Value>) -> LocalBoxFuture<'static, Result<(), String>>>);

impl Action {
	pub fn new(action: impl 'static + Fn(Vec<Value>) -> LocalBoxFuture<'static, Result<(), String>>) -> Self {
		Self(Rc::new(action))
	}

	/// An action that completes synchronously.
	pub fn from_fn(action: impl 'static + Fn(Vec<Value>)) -> Self {
		Self::new(move |args| {
			action(args);
			future::ready(Ok(())).boxed_local()
		})
	}

	pub fn call(&self, args: Vec<Value>) -> LocalBoxFuture<'static, Result<(), String>> {
		(self.0)(args)
	}
}

impl fmt::Debug for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Action(..)")
	}
}

#[derive(Debug, Clone)]
pub enum Export {
	Component(Component),
	Action(Action),
	/// Anything that isn't callable.
	Value(Value),
}

#[derive(Debug, Clone, Default)]
pub struct Module {
	exports: HashMap<String, Export>,
}

impl Module {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, name: impl Into<String>, export: Export) -> Option<Export> {
		self.exports.insert(name.into(), export)
	}

	#[must_use]
	pub fn with_component(mut self, name: impl Into<String>, component: Component) -> Self {
		self.insert(name, Export::Component(component));
		self
	}

	#[must_use]
	pub fn with_action(mut self, name: impl Into<String>, action: Action) -> Self {
		self.insert(name, Export::Action(action));
		self
	}

	#[must_use]
	pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
		self.insert(name, Export::Value(value));
		self
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<&Export> {
		self.exports.get(name)
	}

	/// The export `name`, falling back to the `default` export if there is none by that name.
	#[must_use]
	pub fn resolve(&self, name: &str) -> Option<&Export> {
		self.get(name).or_else(|| self.get(crate::attributes::DEFAULT_EXPORT))
	}
}

/// Fetches the module at a resolved URL.
pub type ModuleLoader = Rc<dyn Fn(&str) -> LocalBoxFuture<'static, Result<Rc<Module>, Error>>>;

/// The loader used unless replaced: dynamic `import()` in browsers, unavailable elsewhere.
#[must_use]
pub fn default_loader(kind: LoadKind) -> ModuleLoader {
	#[cfg(target_arch = "wasm32")]
	{
		crate::web::import_loader(kind)
	}

	#[cfg(not(target_arch = "wasm32"))]
	{
		Rc::new(move |url: &str| {
			future::ready(Err(Error::Load {
				url: url.to_owned(),
				reason: format!("dynamic {} module import is only available in browsers", kind),
			}))
			.boxed_local()
		})
	}
}

/// Modules compiled into the same binary, registered under the URLs locators resolve to.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
	modules: Rc<RefCell<HashMap<String, Rc<Module>>>>,
}

impl ModuleRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with(self, url: impl Into<String>, module: Module) -> Self {
		self.register(url, module);
		self
	}

	pub fn register(&self, url: impl Into<String>, module: Module) {
		self.modules.borrow_mut().insert(url.into(), Rc::new(module));
	}

	#[must_use]
	pub fn loader(&self) -> ModuleLoader {
		let modules = Rc::clone(&self.modules);
		Rc::new(move |url: &str| {
			let result = modules.borrow().get(url).cloned().ok_or_else(|| Error::Load {
				url: url.to_owned(),
				reason: "no module is registered at this URL".to_owned(),
			});
			future::ready(result).boxed_local()
		})
	}
}

/// One independently replaceable loader together with its shared module cache.
pub(crate) struct ModuleSlot {
	kind: LoadKind,
	loader: RefCell<ModuleLoader>,
	cache: RetryCache<Rc<Module>>,
}

impl fmt::Debug for ModuleSlot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModuleSlot").field("kind", &self.kind).field("cache", &self.cache).finish_non_exhaustive()
	}
}

impl ModuleSlot {
	pub(crate) fn new(kind: LoadKind, platform: Rc<dyn Platform>, backoff: Backoff) -> Self {
		Self {
			kind,
			loader: RefCell::new(default_loader(kind)),
			cache: RetryCache::new(platform, backoff),
		}
	}

	/// Replaces the loader ([`None`] restores the default) and forgets cached modules.
	pub(crate) fn set(&self, loader: Option<ModuleLoader>) {
		*self.loader.borrow_mut() = loader.unwrap_or_else(|| default_loader(self.kind));
		self.cache.clear();
	}

	pub(crate) fn load(&self, resolved_url: &str) -> LocalBoxFuture<'static, Result<Rc<Module>, Error>> {
		let loader = self.loader.borrow().clone();
		self.cache.load(resolved_url, || loader(resolved_url))
	}

	pub(crate) fn cache(&self) -> &RetryCache<Rc<Module>> {
		&self.cache
	}
}
