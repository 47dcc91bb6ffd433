//! The attribute-driven island loader.
//!
//! [`install_loader`] scans a document for island hosts (elements carrying a
//! [`LOCATOR`](`crate::attributes::LOCATOR`) attribute by default), gives each one a runtime, and
//! keeps the runtimes in sync with the document through a mutation observer.
//!
//! Per host, the markup is the only input: the locator, strategy, SSR flag, identifier prefix,
//! mount events and action prop names are read when the runtime is constructed, while the props
//! payload is re-read on every render.

use crate::{
	action,
	attributes::{ACTION_PROPS, CLIENT, DEFAULT_VISIBLE_ROOT_MARGIN, EVENT, IMMUTABLE, LOCATOR, MOUNTED, PREFIX, PROPS, SSR},
	context::{ComponentPath, Context},
	module::Component,
	platform::{Disposer, Document, ElementId, ElementRef, MutationRecord},
	root::{mount_root, ComponentElement, MountOptions, MountedRoot},
	serialization::{decode_action_props, decode_props, normalize_mount_events},
	strategy::{self, ClientStrategy, ScheduleOptions},
};
use core::{
	cell::{Cell, RefCell},
	fmt,
};
use hashbrown::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use tracing::{error, instrument, level_filters::STATIC_MAX_LEVEL, trace, trace_span, warn, Level};

#[derive(Debug, Clone)]
pub struct LoaderOptions {
	/// Defaults to the platform's document.
	pub document: Option<Rc<dyn Document>>,
	/// Which elements are island hosts.
	pub selector: String,
	/// Whether to follow document mutations after the initial scan.
	pub observe: bool,
	/// Used when a host's strategy attribute is missing or invalid.
	pub default_strategy: ClientStrategy,
	pub visible_root_margin: String,
}

impl Default for LoaderOptions {
	fn default() -> Self {
		Self {
			document: None,
			selector: format!("[{}]", LOCATOR),
			observe: true,
			default_strategy: ClientStrategy::default(),
			visible_root_margin: DEFAULT_VISIBLE_ROOT_MARGIN.to_owned(),
		}
	}
}

/// A running loader.
///
/// Dropping it stops tracking the document and cancels pending mounts, but leaves mounted islands
/// in place. Call [`Loader::stop`] to also unmount them.
#[must_use = "Dropping a `Loader` stops it without unmounting its islands."]
pub struct Loader {
	state: Rc<LoaderState>,
	observer: Option<Disposer>,
}

impl fmt::Debug for Loader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Loader").field("hosts", &self.len()).field("observing", &self.observer.is_some()).finish()
	}
}

impl Drop for Loader {
	fn drop(&mut self) {
		if let Some(observer) = self.observer.take() {
			observer.dispose();
		}
		// Runtimes release their schedules as they drop.
		self.state.runtimes.borrow_mut().clear();
	}
}

impl Loader {
	/// Stops observing and disposes every island runtime.
	pub fn stop(mut self) {
		if let Some(observer) = self.observer.take() {
			observer.dispose();
		}
		let runtimes: Vec<_> = self.state.runtimes.borrow_mut().drain().map(|(_, runtime)| runtime).collect();
		for runtime in runtimes {
			runtime.dispose();
		}
	}

	/// Whether `host` currently has a runtime.
	#[must_use]
	pub fn is_tracking(&self, host: &ElementRef) -> bool {
		self.state.runtimes.borrow().contains_key(&host.id())
	}

	/// The attributes of `host` whose changes were ignored since its runtime was set up, sorted.
	#[must_use]
	pub fn ignored_changes(&self, host: &ElementRef) -> Vec<String> {
		let mut ignored: Vec<_> = self.state.runtime(host).map_or_else(Vec::new, |runtime| runtime.ignored.borrow().iter().cloned().collect());
		ignored.sort();
		ignored
	}

	/// The number of hosts that currently have a runtime.
	#[must_use]
	pub fn len(&self) -> usize {
		self.state.runtimes.borrow().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Discovers, mounts and tracks the island hosts of a document.
#[instrument(level = "trace", skip(cx))]
pub fn install_loader(cx: &Context, options: LoaderOptions) -> Loader {
	let state = Rc::new(LoaderState {
		cx: cx.clone(),
		selector: options.selector,
		default_strategy: options.default_strategy,
		visible_root_margin: options.visible_root_margin,
		runtimes: RefCell::default(),
	});

	let Some(document) = options.document.or_else(|| cx.platform().document()) else {
		trace!("No document, so there is nothing to load.");
		return Loader { state, observer: None };
	};

	if let Some(root) = document.document_element() {
		state.scan(&root);
	}

	let observer = options.observe.then(|| {
		let weak = Rc::downgrade(&state);
		document.observe_mutations(Box::new(move |records| {
			if let Some(state) = weak.upgrade() {
				state.reconcile(records);
			}
		}))
	});

	Loader { state, observer }
}

struct LoaderState {
	cx: Context,
	selector: String,
	default_strategy: ClientStrategy,
	visible_root_margin: String,
	runtimes: RefCell<HashMap<ElementId, Rc<HostRuntime>>>,
}

impl LoaderState {
	fn runtime(&self, host: &ElementRef) -> Option<Rc<HostRuntime>> {
		self.runtimes.borrow().get(&host.id()).cloned()
	}

	/// Tracks `root` and its descendants that match the selector.
	fn scan(self: &Rc<Self>, root: &ElementRef) {
		if root.matches(&self.selector) {
			self.track(root);
		}
		for host in root.query_selector_all(&self.selector) {
			self.track(&host);
		}
	}

	fn track(self: &Rc<Self>, host: &ElementRef) {
		if self.runtimes.borrow().contains_key(&host.id()) {
			return;
		}
		if self.cx.is_host_claimed(host.id()) {
			trace!("Host {:?} belongs to a programmatic island.", host.id());
			return;
		}
		let Some(runtime) = HostRuntime::new(self, host) else { return };
		self.runtimes.borrow_mut().insert(host.id(), Rc::clone(&runtime));
		runtime.start();
	}

	fn untrack(&self, host: &ElementRef) {
		let runtime = self.runtimes.borrow_mut().remove(&host.id());
		if let Some(runtime) = runtime {
			runtime.dispose();
		}
	}

	fn reconcile(self: &Rc<Self>, records: Vec<MutationRecord>) {
		let _span = trace_span!("reconcile", records = records.len()).entered();
		let mut removed_any = false;
		for record in records {
			match record {
				MutationRecord::Attribute { target, name } => self.attribute_changed(&target, &name),
				MutationRecord::ChildList { added, removed } => {
					removed_any |= !removed.is_empty();
					for node in added {
						if node.is_connected() {
							self.scan(&node);
						}
					}
				}
			}
		}
		if removed_any {
			self.sweep();
		}
	}

	fn attribute_changed(self: &Rc<Self>, host: &ElementRef, name: &str) {
		if name == LOCATOR {
			self.untrack(host);
			if host.is_connected() && host.matches(&self.selector) {
				self.track(host);
			}
		} else if name == PROPS {
			if let Some(runtime) = self.runtime(host) {
				runtime.refresh();
			}
		} else if name == ACTION_PROPS {
			if let Some(runtime) = self.runtime(host) {
				runtime.warn_immutable(name);
				runtime.refresh();
			}
		} else if IMMUTABLE.contains(&name) {
			if let Some(runtime) = self.runtime(host) {
				runtime.warn_immutable(name);
			}
		}
	}

	/// Disposes the runtimes of hosts that left the document.
	fn sweep(&self) {
		let orphaned: Vec<_> = {
			let mut runtimes = self.runtimes.borrow_mut();
			let ids: Vec<_> = runtimes.iter().filter(|(_, runtime)| !runtime.host.is_connected()).map(|(id, _)| *id).collect();
			ids.into_iter().filter_map(|id| runtimes.remove(&id)).collect()
		};
		for runtime in orphaned {
			trace!("Host {:?} left the document.", runtime.host.id());
			runtime.dispose();
		}
	}
}

/// The state of one island host, for one locator.
struct HostRuntime {
	this: Weak<HostRuntime>,
	loader: Weak<LoaderState>,
	cx: Context,
	host: ElementRef,
	locator: String,
	strategy: ClientStrategy,
	hydrate: bool,
	identifier_prefix: Option<String>,
	events: Vec<String>,
	action_props: Vec<String>,
	visible_root_margin: String,
	disposed: Cell<bool>,
	root: RefCell<Option<MountedRoot>>,
	component: RefCell<Option<Component>>,
	loading: Cell<bool>,
	failures: Cell<u32>,
	schedule: RefCell<Option<Disposer>>,
	retry: RefCell<Option<Disposer>>,
	ignored: RefCell<HashSet<String>>,
}

impl Drop for HostRuntime {
	fn drop(&mut self) {
		self.release();
	}
}

impl HostRuntime {
	fn new(loader: &Rc<LoaderState>, host: &ElementRef) -> Option<Rc<Self>> {
		let locator = host.attribute(LOCATOR).filter(|locator| !locator.trim().is_empty())?;

		let strategy = match host.attribute(CLIENT) {
			Some(client) => client.parse::<ClientStrategy>().unwrap_or_else(|error| {
				trace!("{}, using {}.", error, loader.default_strategy);
				loader.default_strategy
			}),
			None => loader.default_strategy,
		};

		Some(Rc::new_cyclic(|this| Self {
			this: this.clone(),
			loader: Rc::downgrade(loader),
			cx: loader.cx.clone(),
			host: Rc::clone(host),
			hydrate: host.attribute(SSR).as_deref() == Some("1") && strategy != ClientStrategy::Only,
			identifier_prefix: host.attribute(PREFIX).filter(|prefix| !prefix.is_empty()),
			events: host.attribute(EVENT).map_or_else(Vec::new, |events| normalize_mount_events([events.as_str()])),
			action_props: decode_action_props(host.attribute(ACTION_PROPS).as_deref()),
			visible_root_margin: loader.visible_root_margin.clone(),
			locator,
			strategy,
			disposed: Cell::new(false),
			root: RefCell::default(),
			component: RefCell::default(),
			loading: Cell::new(false),
			failures: Cell::new(0),
			schedule: RefCell::default(),
			retry: RefCell::default(),
			ignored: RefCell::default(),
		}))
	}

	fn start(&self) {
		if self.strategy == ClientStrategy::Signal {
			if cfg!(debug_assertions) && STATIC_MAX_LEVEL >= Level::WARN {
				warn!(
					"Island host {:?} ({:?}) uses the `signal` strategy, which only programmatic islands support.\n\
					It won't be mounted.",
					self.host.id(),
					self.locator,
				);
			}
			return;
		}

		let this = self.this.clone();
		let disposer = strategy::schedule(
			self.cx.platform(),
			self.strategy,
			&self.host,
			move || {
				if let Some(runtime) = this.upgrade() {
					runtime.mount();
				}
			},
			&ScheduleOptions {
				visible_root_margin: self.visible_root_margin.clone(),
				events: self.events.clone(),
			},
		);
		*self.schedule.borrow_mut() = Some(disposer);
	}

	fn mount(&self) {
		if self.disposed.get() || self.root.borrow().is_some() || self.yield_to_island() {
			return;
		}
		let component = self.component.borrow().clone();
		match component {
			Some(component) => self.attach(component),
			None => self.load(),
		}
	}

	fn load(&self) {
		if self.loading.replace(true) {
			return;
		}

		let load = self.cx.load_component(ComponentPath::Loader, &self.locator);
		let this = self.this.clone();
		self.cx.platform().spawn_local(Box::pin(async move {
			let result = load.await;
			let Some(runtime) = this.upgrade() else { return };
			runtime.loading.set(false);
			match result {
				Ok(component) => {
					runtime.failures.set(0);
					*runtime.component.borrow_mut() = Some(component.clone());
					if !runtime.disposed.get() && runtime.root.borrow().is_none() && !runtime.yield_to_island() {
						runtime.attach(component);
					}
				}
				Err(error) => {
					error!("Failed to mount island {:?}: {}", runtime.locator, error);
					runtime.retry_later();
				}
			}
		}));
	}

	fn retry_later(&self) {
		let failures = self.failures.get() + 1;
		self.failures.set(failures);
		if self.disposed.get() || self.root.borrow().is_some() {
			return;
		}

		let backoff = self.cx.backoff();
		if failures >= backoff.max_attempts {
			warn!("Giving up on island {:?} after {} failed attempt(s).", self.locator, failures);
			return;
		}

		let delay = backoff.delay(failures).max(self.cx.component_cooldown(ComponentPath::Loader, &self.locator).unwrap_or_default());
		trace!("Retrying island {:?} in {:?}.", self.locator, delay);
		let this = self.this.clone();
		let timer = self.cx.platform().set_timeout(
			delay,
			Box::new(move || {
				if let Some(runtime) = this.upgrade() {
					runtime.retry.borrow_mut().take();
					runtime.mount();
				}
			}),
		);
		let previous = self.retry.borrow_mut().replace(timer);
		if let Some(previous) = previous {
			previous.dispose();
		}
	}

	/// Stops tracking the host if a programmatic island claimed it after it was discovered.
	fn yield_to_island(&self) -> bool {
		if !self.cx.is_host_claimed(self.host.id()) {
			return false;
		}
		trace!("Host {:?} was claimed by a programmatic island.", self.host.id());
		match self.loader.upgrade() {
			Some(loader) => loader.untrack(&self.host),
			None => {
				self.disposed.set(true);
				self.release();
			}
		}
		true
	}

	/// The component with the host's current, materialized props.
	fn element(&self, component: Component) -> ComponentElement {
		let encoded = self.host.attribute(PROPS);
		let props = Rc::new(decode_props(encoded.as_deref()));
		if cfg!(feature = "dangerous-logging") {
			trace!("Props of {:?}: {:?}", self.host.id(), props);
		} else {
			trace!("Props of {:?}: {} key(s) from {} byte(s)", self.host.id(), props.len(), encoded.map_or(0, |encoded| encoded.len()));
		}
		ComponentElement {
			component,
			props: action::materialize(&self.cx, &props, &self.action_props),
		}
	}

	fn attach(&self, component: Component) {
		let _span = trace_span!("attach_host", host = ?self.host.id(), locator = self.locator.as_str()).entered();
		let element = self.element(component);
		let root = mount_root(
			&**self.cx.renderer(),
			&self.host,
			element,
			&MountOptions {
				hydrate: self.hydrate,
				identifier_prefix: self.identifier_prefix.clone(),
			},
		);
		*self.root.borrow_mut() = Some(root);
		self.host.set_attribute(MOUNTED, "1");
	}

	/// Re-renders with freshly read props, if mounted.
	fn refresh(&self) {
		if self.disposed.get() {
			return;
		}
		let component = self.component.borrow().clone();
		let Some(component) = component else { return };
		if self.root.borrow().is_none() {
			return;
		}
		let element = self.element(component);
		if let Some(root) = &mut *self.root.borrow_mut() {
			root.render(element);
		}
	}

	fn dispose(&self) {
		if self.disposed.replace(true) {
			return;
		}
		self.release();
		let root = self.root.borrow_mut().take();
		if let Some(mut root) = root {
			root.unmount();
			self.host.remove_attribute(MOUNTED);
		}
	}

	/// Cancels the pending mount and retry, leaving any mounted root alone.
	fn release(&self) {
		let schedule = self.schedule.borrow_mut().take();
		if let Some(schedule) = schedule {
			schedule.dispose();
		}
		let retry = self.retry.borrow_mut().take();
		if let Some(retry) = retry {
			retry.dispose();
		}
	}

	/// Records that a change to `name` is ignored, warning the first time.
	fn warn_immutable(&self, name: &str) {
		if self.ignored.borrow_mut().insert(name.to_owned()) && cfg!(debug_assertions) && STATIC_MAX_LEVEL >= Level::WARN {
			warn!(
				"Attribute {} of island host {:?} ({:?}) changed after the island was set up.\n\
				This change is ignored. Change the locator attribute to recreate the island instead.",
				name,
				self.host.id(),
				self.locator,
			);
		}
	}
}
