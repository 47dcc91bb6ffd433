//! Programmatic islands.
//!
//! An island renders to a single host element (described by a [`HostDescriptor`] that the
//! surrounding framework turns into a real element) and mounts a component root into it on the
//! client, as its [`ClientStrategy`] dictates.
//!
//! The reactive host framework is abstracted as [`ReactiveScope`]: islands register one effect
//! that re-reads props, plus mount and cleanup callbacks.

use crate::{
	action,
	attributes::{ACTION_PROPS, CLIENT, DEFAULT_TAG_NAME, DEFAULT_VISIBLE_ROOT_MARGIN, EVENT, HOST, LOCATOR, MOUNTED, PREFIX, PROPS, SSR},
	context::{ComponentPath, Context},
	locator::create_locator,
	module::Component,
	platform::{Disposer, ElementRef},
	props::{PropValue, Props},
	root::{mount_root, ComponentElement, MountOptions, MountedRoot},
	serialization::{encode_action_props, encode_props, normalize_mount_events, normalize_names},
	strategy::{self, ClientStrategy, ScheduleOptions},
};
use core::{
	cell::{Cell, RefCell},
	fmt,
};
use indexmap::IndexMap;
use std::rc::{Rc, Weak};
use tracing::{error, instrument, trace, trace_span, warn};

/// The reactive runtime an island is rendered in.
pub trait ReactiveScope {
	/// Runs `effect` now and again whenever anything it read changes.
	fn create_effect(&self, effect: Box<dyn FnMut()>);
	/// Runs `callback` once the rendered host element is attached.
	fn on_mount(&self, callback: Box<dyn FnOnce()>);
	fn on_cleanup(&self, callback: Box<dyn FnOnce()>);
	/// Whether this is a server render, in which case only effects-free markup is produced.
	fn is_server(&self) -> bool;
}

/// Reads the current props. Reading should subscribe the calling effect to them.
pub type PropsAccessor = Rc<dyn Fn() -> Props>;

/// Drives [`ClientStrategy::Signal`] mounts.
#[derive(Clone)]
pub enum SignalSource {
	Constant(bool),
	Accessor(Rc<dyn Fn() -> bool>),
}

impl SignalSource {
	pub fn accessor(accessor: impl 'static + Fn() -> bool) -> Self {
		Self::Accessor(Rc::new(accessor))
	}

	#[must_use]
	pub fn read(&self) -> bool {
		match self {
			SignalSource::Constant(value) => *value,
			SignalSource::Accessor(accessor) => accessor(),
		}
	}
}

impl fmt::Debug for SignalSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SignalSource::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
			SignalSource::Accessor(_) => f.write_str("Accessor(..)"),
		}
	}
}

impl From<bool> for SignalSource {
	fn from(value: bool) -> Self {
		Self::Constant(value)
	}
}

#[derive(Debug, Clone)]
pub struct IslandOptions {
	/// Whether to server-render and later hydrate. Always off for [`ClientStrategy::Only`].
	pub ssr: bool,
	pub client: ClientStrategy,
	pub visible_root_margin: String,
	pub identifier_prefix: Option<String>,
	/// Host element tag. Blank means `div`.
	pub tag_name: String,
	/// Prop names to materialize as actions in addition to `on[A-Z]…`.
	pub action_props: Vec<String>,
	/// Mount events for [`ClientStrategy::Event`]. Items may be comma-separated lists or JSON arrays.
	pub event: Vec<String>,
	pub signal: Option<SignalSource>,
}

impl Default for IslandOptions {
	fn default() -> Self {
		Self {
			ssr: true,
			client: ClientStrategy::default(),
			visible_root_margin: DEFAULT_VISIBLE_ROOT_MARGIN.to_owned(),
			identifier_prefix: None,
			tag_name: DEFAULT_TAG_NAME.to_owned(),
			action_props: Vec::new(),
			event: Vec::new(),
			signal: None,
		}
	}
}

#[derive(Debug)]
struct Normalized {
	ssr: bool,
	client: ClientStrategy,
	visible_root_margin: String,
	identifier_prefix: Option<String>,
	tag_name: String,
	action_props: Vec<String>,
	events: Vec<String>,
	signal: Option<SignalSource>,
}

impl From<&IslandOptions> for Normalized {
	fn from(options: &IslandOptions) -> Self {
		let tag_name = options.tag_name.trim();
		Self {
			ssr: options.ssr && options.client != ClientStrategy::Only,
			client: options.client,
			visible_root_margin: options.visible_root_margin.clone(),
			identifier_prefix: options.identifier_prefix.clone().filter(|prefix| !prefix.is_empty()),
			tag_name: if tag_name.is_empty() { DEFAULT_TAG_NAME } else { tag_name }.to_owned(),
			action_props: normalize_names(options.action_props.iter().map(String::as_str)),
			events: normalize_mount_events(options.event.iter().map(String::as_str)),
			signal: options.signal.clone(),
		}
	}
}

/// Where the host framework puts the element it created from a [`HostDescriptor`].
#[derive(Debug, Clone, Default)]
pub struct HostSlot(Rc<RefCell<Option<ElementRef>>>);

impl HostSlot {
	pub fn attach(&self, host: ElementRef) {
		*self.0.borrow_mut() = Some(host);
	}

	pub fn detach(&self) {
		self.0.borrow_mut().take();
	}

	#[must_use]
	pub fn get(&self) -> Option<ElementRef> {
		self.0.borrow().clone()
	}
}

/// The host element an island renders to.
#[derive(Debug, Clone)]
pub struct HostDescriptor {
	pub tag_name: String,
	pub attributes: IndexMap<String, String>,
	/// Server-rendered markup, if any.
	pub inner_html: Option<String>,
	/// Must be filled with the created element before the scope's mount callbacks run.
	pub host: HostSlot,
}

/// A component wrapped as an island, ready to be rendered any number of times.
#[derive(Debug, Clone)]
pub struct IslandComponent {
	cx: Context,
	component: Option<Component>,
	locator: Option<String>,
	options: IslandOptions,
}

impl IslandComponent {
	/// The locator lazily loaded components are fetched by.
	#[must_use]
	pub fn locator(&self) -> Option<&str> {
		self.locator.as_deref()
	}

	#[must_use]
	pub fn options(&self) -> &IslandOptions {
		&self.options
	}

	/// Renders one instance of the island in `scope`.
	///
	/// `props` is re-read (minus any `key`) whenever the effect re-runs.
	pub fn render(&self, scope: &dyn ReactiveScope, props: impl 'static + Fn() -> Props) -> HostDescriptor {
		create_host(&self.cx, scope, self.component.clone(), self.locator.clone(), Rc::new(move || props().without_key()), &self.options)
	}
}

/// Wraps a directly referenced component.
#[must_use]
pub fn reactify(cx: &Context, component: Component, options: IslandOptions) -> IslandComponent {
	IslandComponent {
		cx: cx.clone(),
		component: Some(component),
		locator: None,
		options,
	}
}

#[derive(Debug, Clone, Default)]
pub struct LocatorIslandOptions {
	pub module: String,
	/// Defaults to `default`.
	pub export: Option<String>,
	/// Skips the module load, for server rendering or co-located components.
	pub component: Option<Component>,
	pub options: IslandOptions,
}

/// Wraps a component that is loaded by locator once the island mounts.
#[must_use]
pub fn reactify_by_locator(cx: &Context, options: LocatorIslandOptions) -> IslandComponent {
	IslandComponent {
		cx: cx.clone(),
		component: options.component,
		locator: Some(create_locator(&options.module, options.export.as_deref())),
		options: options.options,
	}
}

#[derive(Clone)]
pub enum IslandPropsInput {
	Static(Props),
	Accessor(PropsAccessor),
}

impl Default for IslandPropsInput {
	fn default() -> Self {
		Self::Static(Props::new())
	}
}

impl fmt::Debug for IslandPropsInput {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			IslandPropsInput::Static(props) => f.debug_tuple("Static").field(props).finish(),
			IslandPropsInput::Accessor(_) => f.write_str("Accessor(..)"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct IslandProps {
	pub component: Component,
	pub props: IslandPropsInput,
	/// Passed as the `children` prop unless the props already have one.
	pub children: Option<PropValue>,
	pub options: IslandOptions,
}

/// Renders `component` as an island with explicitly supplied props.
pub fn island(cx: &Context, scope: &dyn ReactiveScope, props: IslandProps) -> HostDescriptor {
	let IslandProps { component, props, children, options } = props;
	let read = Rc::new(move || {
		let mut resolved = match &props {
			IslandPropsInput::Static(props) => props.without_key(),
			IslandPropsInput::Accessor(accessor) => accessor().without_key(),
		};
		if let Some(children) = &children {
			if !resolved.contains_key("children") {
				resolved.insert("children", children.clone());
			}
		}
		resolved
	});
	create_host(cx, scope, Some(component), None, read, &options)
}

struct IslandState {
	cx: Context,
	options: Normalized,
	locator: Option<String>,
	component: RefCell<Option<Component>>,
	read_props: PropsAccessor,
	props: RefCell<Rc<Props>>,
	host: HostSlot,
	root: RefCell<Option<MountedRoot>>,
	schedule: RefCell<Option<Disposer>>,
	retry: RefCell<Option<Disposer>>,
	active: Cell<bool>,
	armed: Cell<bool>,
	loading: Cell<bool>,
	failures: Cell<u32>,
}

#[instrument(level = "trace", skip(cx, scope, component, read_props, options))]
fn create_host(cx: &Context, scope: &dyn ReactiveScope, component: Option<Component>, locator: Option<String>, read_props: PropsAccessor, options: &IslandOptions) -> HostDescriptor {
	let options = Normalized::from(options);
	let props = Rc::new(read_props());

	let mut attributes = IndexMap::new();
	attributes.insert(HOST.to_owned(), String::new());
	if let Some(locator) = &locator {
		attributes.insert(LOCATOR.to_owned(), locator.clone());
	}
	attributes.insert(CLIENT.to_owned(), options.client.as_str().to_owned());
	attributes.insert(SSR.to_owned(), if options.ssr { "1" } else { "0" }.to_owned());
	if locator.is_some() {
		attributes.insert(PROPS.to_owned(), encode_props(&props));
	}
	if let Some(prefix) = &options.identifier_prefix {
		attributes.insert(PREFIX.to_owned(), prefix.clone());
	}
	if !options.action_props.is_empty() {
		attributes.insert(ACTION_PROPS.to_owned(), encode_action_props(&options.action_props));
	}
	if !options.events.is_empty() {
		attributes.insert(EVENT.to_owned(), options.events.join(","));
	}

	let state = Rc::new(IslandState {
		cx: cx.clone(),
		options,
		locator,
		component: RefCell::new(component),
		read_props,
		props: RefCell::new(props),
		host: HostSlot::default(),
		root: RefCell::default(),
		schedule: RefCell::default(),
		retry: RefCell::default(),
		active: Cell::new(true),
		armed: Cell::new(false),
		loading: Cell::new(false),
		failures: Cell::new(0),
	});

	let mut descriptor = HostDescriptor {
		tag_name: state.options.tag_name.clone(),
		attributes,
		inner_html: None,
		host: state.host.clone(),
	};

	if scope.is_server() {
		if state.options.ssr {
			descriptor.inner_html = state.element().map(|element| cx.renderer().render_to_string(&element));
		}
		return descriptor;
	}

	scope.create_effect(Box::new({
		let state = Rc::clone(&state);
		move || state.update()
	}));
	scope.on_mount(Box::new({
		let state = Rc::clone(&state);
		move || state.arm()
	}));
	scope.on_cleanup(Box::new(move || state.cleanup()));

	descriptor
}

impl Drop for IslandState {
	fn drop(&mut self) {
		if let Some(schedule) = self.schedule.get_mut().take() {
			schedule.dispose();
		}
		if let Some(retry) = self.retry.get_mut().take() {
			retry.dispose();
		}
	}
}

impl IslandState {
	fn label(&self) -> &str {
		self.locator.as_deref().unwrap_or("<component>")
	}

	/// The component with current, materialized props.
	fn element(&self) -> Option<ComponentElement> {
		let component = self.component.borrow().clone()?;
		let props = action::materialize(&self.cx, &self.props.borrow(), &self.options.action_props);
		Some(ComponentElement { component, props })
	}

	/// The effect body.
	fn update(self: &Rc<Self>) {
		*self.props.borrow_mut() = Rc::new((self.read_props)());

		if self.locator.is_some() {
			if let Some(host) = self.host.get() {
				host.set_attribute(PROPS, &encode_props(&self.props.borrow()));
			}
		}

		if self.root.borrow().is_none() {
			if self.armed.get() && self.options.client == ClientStrategy::Signal && self.signal() {
				self.mount();
			}
			return;
		}

		if let Some(element) = self.element() {
			if let Some(root) = &mut *self.root.borrow_mut() {
				root.render(element);
			}
		}
	}

	fn signal(&self) -> bool {
		self.options.signal.as_ref().is_some_and(SignalSource::read)
	}

	fn arm(self: &Rc<Self>) {
		let Some(host) = self.host.get() else {
			warn!("Island {:?} was mounted without a host element attached.", self.label());
			return;
		};
		if !self.active.get() {
			return;
		}
		self.cx.claim_host(host.id());
		self.armed.set(true);

		if self.options.client == ClientStrategy::Signal {
			if self.signal() {
				self.mount();
			}
			return;
		}

		let weak = Rc::downgrade(self);
		let disposer = strategy::schedule(
			self.cx.platform(),
			self.options.client,
			&host,
			move || {
				if let Some(state) = weak.upgrade() {
					state.mount();
				}
			},
			&ScheduleOptions {
				visible_root_margin: self.options.visible_root_margin.clone(),
				events: self.options.events.clone(),
			},
		);
		let previous = self.schedule.borrow_mut().replace(disposer);
		if let Some(previous) = previous {
			previous.dispose();
		}
	}

	fn mount(self: &Rc<Self>) {
		if !self.active.get() || self.root.borrow().is_some() {
			return;
		}
		let Some(host) = self.host.get() else { return };

		if self.component.borrow().is_some() {
			self.attach(&host);
		} else {
			self.load();
		}
	}

	fn attach(&self, host: &ElementRef) {
		let Some(element) = self.element() else { return };
		let _span = trace_span!("attach_island", locator = self.label()).entered();
		let root = mount_root(
			&**self.cx.renderer(),
			host,
			element,
			&MountOptions {
				hydrate: self.options.ssr && self.options.client != ClientStrategy::Only,
				identifier_prefix: self.options.identifier_prefix.clone(),
			},
		);
		*self.root.borrow_mut() = Some(root);
		host.set_attribute(MOUNTED, "1");
	}

	fn load(self: &Rc<Self>) {
		let Some(locator) = self.locator.clone() else { return };
		if self.loading.replace(true) {
			return;
		}

		let load = self.cx.load_component(ComponentPath::Island, &locator);
		let weak = Rc::downgrade(self);
		self.cx.platform().spawn_local(Box::pin(async move {
			let result = load.await;
			let Some(state) = weak.upgrade() else { return };
			state.loading.set(false);
			match result {
				Ok(component) => {
					trace!("Loaded island component {:?}.", locator);
					state.failures.set(0);
					*state.component.borrow_mut() = Some(component);
					if state.active.get() && state.root.borrow().is_none() {
						if let Some(host) = state.host.get() {
							state.attach(&host);
						}
					}
				}
				Err(error) => {
					error!("Failed to mount island {:?}: {}", locator, error);
					state.retry_later(&weak);
				}
			}
		}));
	}

	fn retry_later(&self, weak: &Weak<Self>) {
		let failures = self.failures.get() + 1;
		self.failures.set(failures);
		let Some(locator) = &self.locator else { return };
		if !self.active.get() || self.root.borrow().is_some() {
			return;
		}

		let backoff = self.cx.backoff();
		if failures >= backoff.max_attempts {
			warn!("Giving up on island {:?} after {} failed attempt(s).", locator, failures);
			return;
		}

		let delay = backoff.delay(failures).max(self.cx.component_cooldown(ComponentPath::Island, locator).unwrap_or_default());
		trace!("Retrying island {:?} in {:?}.", locator, delay);
		let weak = weak.clone();
		let timer = self.cx.platform().set_timeout(
			delay,
			Box::new(move || {
				if let Some(state) = weak.upgrade() {
					state.retry.borrow_mut().take();
					state.mount();
				}
			}),
		);
		let previous = self.retry.borrow_mut().replace(timer);
		if let Some(previous) = previous {
			previous.dispose();
		}
	}

	fn cleanup(&self) {
		self.active.set(false);
		self.armed.set(false);
		let schedule = self.schedule.borrow_mut().take();
		if let Some(schedule) = schedule {
			schedule.dispose();
		}
		let retry = self.retry.borrow_mut().take();
		if let Some(retry) = retry {
			retry.dispose();
		}
		let root = self.root.borrow_mut().take();
		if let Some(mut root) = root {
			root.unmount();
		}
		if let Some(host) = self.host.get() {
			host.remove_attribute(MOUNTED);
			self.cx.release_host(host.id());
		}
	}
}
