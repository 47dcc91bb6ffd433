//! An in-memory platform, document, renderer and reactive scope.
//!
//! Everything here is deterministic: time only moves through [`FakePlatform::advance`], idle
//! callbacks and intersections are delivered by hand, and microtasks plus spawned futures run in
//! [`FakePlatform::run_until_stalled`].
//!
//! These are test doubles. Methods that can't sensibly continue panic.

use crate::{
	error::Error,
	island::{HostDescriptor, ReactiveScope},
	module::{Component, Module, ModuleLoader},
	platform::{Disposer, Document, DomElement, ElementId, ElementRef, MutationRecord, Platform},
	props::Props,
	root::{ComponentElement, Renderer, Root, RootOptions},
};
use core::{
	any::Any,
	cell::{Cell, RefCell},
	fmt,
	future::Future,
	time::Duration,
};
use futures::{
	channel::oneshot,
	executor::{LocalPool, LocalSpawner},
	future::LocalBoxFuture,
	task::LocalSpawnExt as _,
	FutureExt as _,
};
use hashbrown::HashMap;
use indexmap::IndexMap;
use std::{
	collections::{BTreeMap, VecDeque},
	rc::{Rc, Weak},
};
use tracing::error;
use url::Url;

type IntersectionCallback = Rc<RefCell<Box<dyn FnMut(bool)>>>;

struct Intersection {
	target: ElementId,
	root_margin: String,
	on_entry: IntersectionCallback,
}

/// A [`Platform`] with a virtual clock.
///
/// By default it behaves like a browser window at `https://app.example/` with idle callbacks
/// and intersection observers available.
pub struct FakePlatform {
	this: Weak<FakePlatform>,
	now: Cell<Duration>,
	next_id: Cell<u64>,
	microtasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
	timers: RefCell<BTreeMap<(Duration, u64), Box<dyn FnOnce()>>>,
	idle: RefCell<BTreeMap<u64, Box<dyn FnOnce()>>>,
	intersections: RefCell<BTreeMap<u64, Intersection>>,
	pool: RefCell<LocalPool>,
	spawner: LocalSpawner,
	has_window: Cell<bool>,
	idle_supported: Cell<bool>,
	intersection_supported: Cell<bool>,
	location: RefCell<Option<Url>>,
	manifest: RefCell<HashMap<String, String>>,
	document: RefCell<Option<Rc<dyn Document>>>,
}

impl fmt::Debug for FakePlatform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FakePlatform")
			.field("now", &self.now.get())
			.field("microtasks", &self.microtasks.borrow().len())
			.field("timers", &self.timers.borrow().len())
			.field("idle", &self.idle.borrow().len())
			.field("intersections", &self.intersections.borrow().len())
			.finish_non_exhaustive()
	}
}

impl FakePlatform {
	#[must_use]
	pub fn new() -> Rc<Self> {
		let pool = LocalPool::new();
		let spawner = pool.spawner();
		Rc::new_cyclic(|this| Self {
			this: this.clone(),
			now: Cell::new(Duration::ZERO),
			next_id: Cell::new(0),
			microtasks: RefCell::default(),
			timers: RefCell::default(),
			idle: RefCell::default(),
			intersections: RefCell::default(),
			pool: RefCell::new(pool),
			spawner,
			has_window: Cell::new(true),
			idle_supported: Cell::new(true),
			intersection_supported: Cell::new(true),
			location: RefCell::new(Url::parse("https://app.example/").ok()),
			manifest: RefCell::default(),
			document: RefCell::default(),
		})
	}

	fn next_id(&self) -> u64 {
		let id = self.next_id.get();
		self.next_id.set(id + 1);
		id
	}

	pub fn set_has_window(&self, has_window: bool) {
		self.has_window.set(has_window);
	}

	pub fn set_idle_supported(&self, supported: bool) {
		self.idle_supported.set(supported);
	}

	pub fn set_intersection_supported(&self, supported: bool) {
		self.intersection_supported.set(supported);
	}

	/// [`None`] simulates a non-browser environment.
	pub fn set_location(&self, location: Option<Url>) {
		*self.location.borrow_mut() = location;
	}

	/// Adds an entry to the environment's build manifest.
	pub fn set_manifest_entry(&self, url: impl Into<String>, mapped: impl Into<String>) {
		self.manifest.borrow_mut().insert(url.into(), mapped.into());
	}

	pub(crate) fn set_document(&self, document: Option<Rc<dyn Document>>) {
		*self.document.borrow_mut() = document;
	}

	/// Runs microtasks and spawned futures until neither makes progress.
	pub fn run_until_stalled(&self) {
		loop {
			loop {
				let task = self.microtasks.borrow_mut().pop_front();
				match task {
					Some(task) => task(),
					None => break,
				}
			}

			self.pool.borrow_mut().run_until_stalled();

			if self.microtasks.borrow().is_empty() {
				break;
			}
		}
	}

	/// Moves the clock forward by `by`, running due timers in order.
	pub fn advance(&self, by: Duration) {
		self.run_until_stalled();
		let target = self.now.get() + by;
		loop {
			let due = {
				let mut timers = self.timers.borrow_mut();
				match timers.keys().next().copied() {
					Some(key) if key.0 <= target => timers.remove(&key).map(|task| (key.0, task)),
					_ => None,
				}
			};
			let Some((at, task)) = due else { break };
			self.now.set(self.now.get().max(at));
			task();
			self.run_until_stalled();
		}
		self.now.set(target);
		self.run_until_stalled();
	}

	/// Runs all pending idle callbacks.
	pub fn fire_idle(&self) {
		let tasks = core::mem::take(&mut *self.idle.borrow_mut());
		for task in tasks.into_values() {
			task();
		}
		self.run_until_stalled();
	}

	/// Delivers an intersection entry for `target` to every observer watching it.
	pub fn intersect(&self, target: &ElementRef, is_intersecting: bool) {
		let callbacks: Vec<IntersectionCallback> = self.intersections.borrow().values().filter(|intersection| intersection.target == target.id()).map(|intersection| Rc::clone(&intersection.on_entry)).collect();
		for callback in callbacks {
			(*callback.borrow_mut())(is_intersecting);
		}
		self.run_until_stalled();
	}

	/// Root margins of the currently connected intersection observers.
	#[must_use]
	pub fn observed_root_margins(&self) -> Vec<String> {
		self.intersections.borrow().values().map(|intersection| intersection.root_margin.clone()).collect()
	}

	#[must_use]
	pub fn pending_timers(&self) -> usize {
		self.timers.borrow().len()
	}

	#[must_use]
	pub fn pending_idle_callbacks(&self) -> usize {
		self.idle.borrow().len()
	}

	/// Drives `future` to completion.
	///
	/// # Panics
	///
	/// Iff `future` is still pending once everything stalls.
	pub fn block_on<T: 'static>(&self, future: impl 'static + Future<Output = T>) -> T {
		let output = Rc::new(RefCell::new(None));
		self.spawn_local(Box::pin({
			let output = Rc::clone(&output);
			async move {
				*output.borrow_mut() = Some(future.await);
			}
		}));
		self.run_until_stalled();
		let result = output.borrow_mut().take();
		result.expect("future stalled")
	}
}

impl Platform for FakePlatform {
	fn now(&self) -> Duration {
		self.now.get()
	}

	fn queue_microtask(&self, task: Box<dyn FnOnce()>) {
		self.microtasks.borrow_mut().push_back(task);
	}

	fn set_timeout(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Disposer {
		let key = (self.now.get() + delay, self.next_id());
		self.timers.borrow_mut().insert(key, task);
		let this = self.this.clone();
		Disposer::new(move || {
			if let Some(this) = this.upgrade() {
				let removed = this.timers.borrow_mut().remove(&key);
				drop(removed);
			}
		})
	}

	fn has_window(&self) -> bool {
		self.has_window.get()
	}

	fn supports_idle_callback(&self) -> bool {
		self.idle_supported.get()
	}

	fn request_idle_callback(&self, task: Box<dyn FnOnce()>) -> Disposer {
		let id = self.next_id();
		self.idle.borrow_mut().insert(id, task);
		let this = self.this.clone();
		Disposer::new(move || {
			if let Some(this) = this.upgrade() {
				let removed = this.idle.borrow_mut().remove(&id);
				drop(removed);
			}
		})
	}

	fn supports_intersection_observer(&self) -> bool {
		self.intersection_supported.get()
	}

	fn observe_intersection(&self, target: &ElementRef, root_margin: &str, on_entry: Box<dyn FnMut(bool)>) -> Disposer {
		let id = self.next_id();
		self.intersections.borrow_mut().insert(
			id,
			Intersection {
				target: target.id(),
				root_margin: root_margin.to_owned(),
				on_entry: Rc::new(RefCell::new(on_entry)),
			},
		);
		let this = self.this.clone();
		Disposer::new(move || {
			if let Some(this) = this.upgrade() {
				let removed = this.intersections.borrow_mut().remove(&id);
				drop(removed);
			}
		})
	}

	fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
		if let Err(error) = self.spawner.spawn_local(future) {
			error!("Failed to spawn future: {}", error);
		}
	}

	fn location(&self) -> Option<Url> {
		self.location.borrow().clone()
	}

	fn manifest_entry(&self, url: &str) -> Option<String> {
		self.manifest.borrow().get(url).cloned()
	}

	fn document(&self) -> Option<Rc<dyn Document>> {
		self.document.borrow().clone()
	}
}

type Observer = Rc<RefCell<Box<dyn FnMut(Vec<MutationRecord>)>>>;

struct DocumentInner {
	platform: Weak<FakePlatform>,
	next_element: Cell<u64>,
	root: Rc<Node>,
	body: Rc<Node>,
	observers: RefCell<BTreeMap<u64, Observer>>,
	next_observer: Cell<u64>,
	pending: RefCell<Vec<MutationRecord>>,
}

impl DocumentInner {
	/// Queues `record` for delivery in a microtask, like a `MutationObserver` would.
	fn record(self: &Rc<Self>, record: MutationRecord) {
		if self.observers.borrow().is_empty() {
			return;
		}
		let was_empty = {
			let mut pending = self.pending.borrow_mut();
			pending.push(record);
			pending.len() == 1
		};
		if !was_empty {
			return;
		}
		if let Some(platform) = self.platform.upgrade() {
			let this = Rc::downgrade(self);
			platform.queue_microtask(Box::new(move || {
				if let Some(this) = this.upgrade() {
					this.flush();
				}
			}));
		}
	}

	fn flush(&self) {
		let records = core::mem::take(&mut *self.pending.borrow_mut());
		if records.is_empty() {
			return;
		}
		let observers: Vec<Observer> = self.observers.borrow().values().cloned().collect();
		for observer in observers {
			(*observer.borrow_mut())(records.clone());
		}
	}
}

/// An in-memory document with `<html>` and `<body>` elements.
#[derive(Clone)]
pub struct FakeDocument(Rc<DocumentInner>);

impl fmt::Debug for FakeDocument {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FakeDocument").field("root", &self.root()).finish_non_exhaustive()
	}
}

impl FakeDocument {
	/// Creates a document and makes it `platform`'s [`Platform::document`].
	#[must_use]
	pub fn new(platform: &Rc<FakePlatform>) -> Self {
		let document = Self(Rc::new_cyclic(|this: &Weak<DocumentInner>| {
			let root = Node::new(ElementId(0), "html", this.clone());
			root.is_root.set(true);
			let body = Node::new(ElementId(1), "body", this.clone());
			*body.parent.borrow_mut() = Rc::downgrade(&root);
			root.children.borrow_mut().push(Rc::clone(&body));
			DocumentInner {
				platform: Rc::downgrade(platform),
				next_element: Cell::new(2),
				root,
				body,
				observers: RefCell::default(),
				next_observer: Cell::new(0),
				pending: RefCell::default(),
			}
		}));

		platform.set_document(Some(Rc::new(document.clone())));
		document
	}

	#[must_use]
	pub fn create_element(&self, tag_name: &str) -> FakeElement {
		let id = self.0.next_element.get();
		self.0.next_element.set(id + 1);
		FakeElement(Node::new(ElementId(id), tag_name, Rc::downgrade(&self.0)))
	}

	#[must_use]
	pub fn root(&self) -> FakeElement {
		FakeElement(Rc::clone(&self.0.root))
	}

	#[must_use]
	pub fn body(&self) -> FakeElement {
		FakeElement(Rc::clone(&self.0.body))
	}

	/// The number of active mutation observers.
	#[must_use]
	pub fn observer_count(&self) -> usize {
		self.0.observers.borrow().len()
	}

	/// Creates the element `descriptor` describes, appends it to `parent` and attaches it.
	pub fn render_host(&self, parent: &FakeElement, descriptor: &HostDescriptor) -> FakeElement {
		let host = self.create_element(&descriptor.tag_name);
		for (name, value) in &descriptor.attributes {
			host.set_attribute(name, value);
		}
		if let Some(html) = &descriptor.inner_html {
			host.set_inner_html(html);
		}
		parent.append_child(&host);
		descriptor.host.attach(host.to_ref());
		host
	}
}

impl Document for FakeDocument {
	fn document_element(&self) -> Option<ElementRef> {
		Some(self.root().to_ref())
	}

	fn observe_mutations(&self, on_records: Box<dyn FnMut(Vec<MutationRecord>)>) -> Disposer {
		let id = self.0.next_observer.get();
		self.0.next_observer.set(id + 1);
		self.0.observers.borrow_mut().insert(id, Rc::new(RefCell::new(on_records)));
		let inner = Rc::downgrade(&self.0);
		Disposer::new(move || {
			if let Some(inner) = inner.upgrade() {
				let removed = inner.observers.borrow_mut().remove(&id);
				drop(removed);
			}
		})
	}
}

type Listener = (u64, String, Rc<dyn Fn()>);

struct Node {
	id: ElementId,
	tag_name: String,
	document: Weak<DocumentInner>,
	is_root: Cell<bool>,
	attributes: RefCell<IndexMap<String, String>>,
	parent: RefCell<Weak<Node>>,
	children: RefCell<Vec<Rc<Node>>>,
	inner_html: RefCell<String>,
	listeners: RefCell<Vec<Listener>>,
	next_listener: Cell<u64>,
}

impl Node {
	fn new(id: ElementId, tag_name: &str, document: Weak<DocumentInner>) -> Rc<Self> {
		Rc::new(Self {
			id,
			tag_name: tag_name.to_ascii_lowercase(),
			document,
			is_root: Cell::new(false),
			attributes: RefCell::default(),
			parent: RefCell::default(),
			children: RefCell::default(),
			inner_html: RefCell::default(),
			listeners: RefCell::default(),
			next_listener: Cell::new(0),
		})
	}
}

/// An element of a [`FakeDocument`]. Clones refer to the same element.
#[derive(Clone)]
pub struct FakeElement(Rc<Node>);

impl fmt::Debug for FakeElement {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FakeElement")
			.field("id", &self.0.id)
			.field("tag_name", &self.0.tag_name)
			.field("attributes", &self.0.attributes.borrow())
			.finish_non_exhaustive()
	}
}

impl FakeElement {
	#[must_use]
	pub fn to_ref(&self) -> ElementRef {
		Rc::new(self.clone())
	}

	#[must_use]
	pub fn id(&self) -> ElementId {
		self.0.id
	}

	#[must_use]
	pub fn tag_name(&self) -> &str {
		&self.0.tag_name
	}

	fn record(&self, record: MutationRecord) {
		if let Some(document) = self.0.document.upgrade() {
			document.record(record);
		}
	}

	#[must_use]
	pub fn attribute(&self, name: &str) -> Option<String> {
		self.0.attributes.borrow().get(name).cloned()
	}

	/// Records an attribute mutation if the element is connected.
	pub fn set_attribute(&self, name: &str, value: &str) {
		self.0.attributes.borrow_mut().insert(name.to_owned(), value.to_owned());
		if self.is_connected() {
			self.record(MutationRecord::Attribute { target: self.to_ref(), name: name.to_owned() });
		}
	}

	/// Records an attribute mutation if the attribute existed and the element is connected.
	pub fn remove_attribute(&self, name: &str) {
		let removed = self.0.attributes.borrow_mut().shift_remove(name);
		if removed.is_some() && self.is_connected() {
			self.record(MutationRecord::Attribute { target: self.to_ref(), name: name.to_owned() });
		}
	}

	#[must_use]
	pub fn inner_html(&self) -> String {
		self.0.inner_html.borrow().clone()
	}

	/// Replaces the element's text content. Element children are unaffected.
	pub fn set_inner_html(&self, html: &str) {
		*self.0.inner_html.borrow_mut() = html.to_owned();
	}

	#[must_use]
	pub fn children(&self) -> Vec<FakeElement> {
		self.0.children.borrow().iter().cloned().map(FakeElement).collect()
	}

	#[must_use]
	pub fn parent(&self) -> Option<FakeElement> {
		self.0.parent.borrow().upgrade().map(FakeElement)
	}

	#[must_use]
	pub fn is_connected(&self) -> bool {
		let mut current = Rc::clone(&self.0);
		loop {
			if current.is_root.get() {
				return true;
			}
			let parent = current.parent.borrow().upgrade();
			match parent {
				Some(parent) => current = parent,
				None => return false,
			}
		}
	}

	/// Moves `child` to the end of this element's children.
	pub fn append_child(&self, child: &FakeElement) {
		child.remove();
		*child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
		self.0.children.borrow_mut().push(Rc::clone(&child.0));
		if self.is_connected() {
			self.record(MutationRecord::ChildList {
				added: vec![child.to_ref()],
				removed: Vec::new(),
			});
		}
	}

	/// Detaches this element from its parent, if any.
	pub fn remove(&self) {
		let Some(parent) = self.parent() else { return };
		let was_connected = parent.is_connected();
		parent.0.children.borrow_mut().retain(|child| !Rc::ptr_eq(child, &self.0));
		*self.0.parent.borrow_mut() = Weak::new();
		if was_connected {
			parent.record(MutationRecord::ChildList {
				added: Vec::new(),
				removed: vec![self.to_ref()],
			});
		}
	}

	/// Calls the listeners registered for `event`, then runs microtasks.
	pub fn dispatch_event(&self, event: &str) {
		let listeners: Vec<Rc<dyn Fn()>> = self.0.listeners.borrow().iter().filter(|(_, name, _)| name == event).map(|(_, _, listener)| Rc::clone(listener)).collect();
		for listener in listeners {
			listener();
		}
		if let Some(platform) = self.0.document.upgrade().and_then(|document| document.platform.upgrade()) {
			platform.run_until_stalled();
		}
	}

	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.0.listeners.borrow().len()
	}

	fn descendants(&self, out: &mut Vec<FakeElement>) {
		for child in self.children() {
			out.push(child.clone());
			child.descendants(out);
		}
	}

	fn matches_compound(&self, selector: &str) -> bool {
		fn is_delimiter(c: char) -> bool {
			matches!(c, '#' | '.' | '[')
		}

		let selector = selector.trim();
		if selector.is_empty() {
			return false;
		}

		let tag_end = selector.find(is_delimiter).unwrap_or(selector.len());
		let tag = &selector[..tag_end];
		if !(tag.is_empty() || tag == "*" || tag.eq_ignore_ascii_case(&self.0.tag_name)) {
			return false;
		}

		let mut rest = &selector[tag_end..];
		while let Some(first) = rest.chars().next() {
			match first {
				'[' => {
					let Some(end) = rest.find(']') else { return false };
					let inner = &rest[1..end];
					let matched = match inner.split_once('=') {
						Some((name, value)) => self.attribute(name.trim()).as_deref() == Some(value.trim().trim_matches(|c| c == '"' || c == '\'')),
						None => self.attribute(inner.trim()).is_some(),
					};
					if !matched {
						return false;
					}
					rest = &rest[end + 1..];
				}
				'#' | '.' => {
					let body = &rest[1..];
					let end = body.find(is_delimiter).unwrap_or(body.len());
					let name = &body[..end];
					let matched = if first == '#' {
						self.attribute("id").as_deref() == Some(name)
					} else {
						self.attribute("class").is_some_and(|classes| classes.split_whitespace().any(|class| class == name))
					};
					if !matched {
						return false;
					}
					rest = &body[end..];
				}
				_ => return false,
			}
		}
		true
	}
}

impl DomElement for FakeElement {
	fn id(&self) -> ElementId {
		self.0.id
	}

	fn attribute(&self, name: &str) -> Option<String> {
		FakeElement::attribute(self, name)
	}

	fn set_attribute(&self, name: &str, value: &str) {
		FakeElement::set_attribute(self, name, value);
	}

	fn remove_attribute(&self, name: &str) {
		FakeElement::remove_attribute(self, name);
	}

	fn has_rendered_content(&self) -> bool {
		!self.0.children.borrow().is_empty() || !self.0.inner_html.borrow().trim().is_empty()
	}

	fn is_connected(&self) -> bool {
		FakeElement::is_connected(self)
	}

	/// Supports type, `#id`, `.class`, `[attribute]` and `[attribute=value]` selectors,
	/// compounds thereof and comma-separated lists.
	fn matches(&self, selector: &str) -> bool {
		selector.split(',').any(|compound| self.matches_compound(compound))
	}

	fn query_selector_all(&self, selector: &str) -> Vec<ElementRef> {
		let mut descendants = Vec::new();
		self.descendants(&mut descendants);
		descendants.into_iter().filter(|element| DomElement::matches(element, selector)).map(|element| element.to_ref()).collect()
	}

	fn add_event_listener(&self, event: &str, listener: Rc<dyn Fn()>) -> Disposer {
		let id = self.0.next_listener.get();
		self.0.next_listener.set(id + 1);
		self.0.listeners.borrow_mut().push((id, event.to_owned(), listener));
		let node = Rc::downgrade(&self.0);
		Disposer::new(move || {
			if let Some(node) = node.upgrade() {
				let removed: Vec<_> = {
					let mut listeners = node.listeners.borrow_mut();
					let (removed, kept): (Vec<Listener>, Vec<Listener>) = core::mem::take(&mut *listeners).into_iter().partition(|(listener_id, _, _)| *listener_id == id);
					*listeners = kept;
					removed
				};
				drop(removed);
			}
		})
	}

	fn as_any(&self) -> &dyn Any {
		self
	}
}

/// Something a [`FakeRenderer`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
	Created { host: ElementId, identifier_prefix: Option<String> },
	Hydrated { host: ElementId, identifier_prefix: Option<String>, html: String },
	Rendered { host: ElementId, html: String },
	Unmounted { host: ElementId },
}

/// A component for [`FakeRenderer`]: a function from props to markup.
#[derive(Clone)]
pub struct TextComponent(pub Rc<dyn Fn(&Props) -> String>);

impl TextComponent {
	pub fn component(render: impl 'static + Fn(&Props) -> String) -> Component {
		Component::new(Self(Rc::new(render)))
	}
}

#[derive(Default)]
struct RenderLog {
	events: Vec<RenderEvent>,
	props: HashMap<ElementId, Rc<Props>>,
}

/// Renders [`TextComponent`]s by writing their markup into [`FakeElement`] hosts, and logs
/// everything it does.
#[derive(Default)]
pub struct FakeRenderer {
	log: Rc<RefCell<RenderLog>>,
}

impl fmt::Debug for FakeRenderer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FakeRenderer").field("events", &self.log.borrow().events).finish_non_exhaustive()
	}
}

impl FakeRenderer {
	#[must_use]
	pub fn new() -> Rc<Self> {
		Rc::default()
	}

	#[must_use]
	pub fn events(&self) -> Vec<RenderEvent> {
		self.log.borrow().events.clone()
	}

	pub fn take_events(&self) -> Vec<RenderEvent> {
		core::mem::take(&mut self.log.borrow_mut().events)
	}

	/// The props most recently rendered into `host`.
	#[must_use]
	pub fn last_props(&self, host: ElementId) -> Option<Rc<Props>> {
		self.log.borrow().props.get(&host).cloned()
	}

	fn html(element: &ComponentElement) -> String {
		match element.component.downcast_ref::<TextComponent>() {
			Some(TextComponent(render)) => render(&*element.props),
			None => format!("<!-- {:?} -->", element.component),
		}
	}
}

struct FakeRoot {
	host: ElementRef,
	log: Rc<RefCell<RenderLog>>,
}

impl Root for FakeRoot {
	fn render(&mut self, element: ComponentElement) {
		let html = FakeRenderer::html(&element);
		if let Some(host) = self.host.as_any().downcast_ref::<FakeElement>() {
			host.set_inner_html(&html);
		}
		let mut log = self.log.borrow_mut();
		log.props.insert(self.host.id(), element.props);
		log.events.push(RenderEvent::Rendered { host: self.host.id(), html });
	}

	fn unmount(&mut self) {
		if let Some(host) = self.host.as_any().downcast_ref::<FakeElement>() {
			host.set_inner_html("");
		}
		let mut log = self.log.borrow_mut();
		log.props.remove(&self.host.id());
		log.events.push(RenderEvent::Unmounted { host: self.host.id() });
	}
}

impl Renderer for FakeRenderer {
	fn create_root(&self, host: &ElementRef, options: &RootOptions) -> Box<dyn Root> {
		self.log.borrow_mut().events.push(RenderEvent::Created {
			host: host.id(),
			identifier_prefix: options.identifier_prefix.clone(),
		});
		Box::new(FakeRoot {
			host: Rc::clone(host),
			log: Rc::clone(&self.log),
		})
	}

	fn hydrate_root(&self, host: &ElementRef, element: ComponentElement, options: &RootOptions) -> Box<dyn Root> {
		let mut log = self.log.borrow_mut();
		log.events.push(RenderEvent::Hydrated {
			host: host.id(),
			identifier_prefix: options.identifier_prefix.clone(),
			html: Self::html(&element),
		});
		log.props.insert(host.id(), element.props);
		Box::new(FakeRoot {
			host: Rc::clone(host),
			log: Rc::clone(&self.log),
		})
	}

	fn render_to_string(&self, element: &ComponentElement) -> String {
		Self::html(element)
	}
}

/// A [`ReactiveScope`] driven by hand.
///
/// Effects run once when created and again on [`FakeScope::rerun_effects`].
#[derive(Default)]
pub struct FakeScope {
	server: bool,
	effects: RefCell<Vec<Rc<RefCell<Box<dyn FnMut()>>>>>,
	mounts: RefCell<Vec<Box<dyn FnOnce()>>>,
	cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl fmt::Debug for FakeScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FakeScope")
			.field("server", &self.server)
			.field("effects", &self.effects.borrow().len())
			.field("mounts", &self.mounts.borrow().len())
			.field("cleanups", &self.cleanups.borrow().len())
			.finish()
	}
}

impl FakeScope {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn server() -> Self {
		Self { server: true, ..Self::default() }
	}

	pub fn rerun_effects(&self) {
		let effects: Vec<_> = self.effects.borrow().clone();
		for effect in effects {
			(*effect.borrow_mut())();
		}
	}

	/// Runs pending mount callbacks.
	pub fn mount(&self) {
		let mounts = core::mem::take(&mut *self.mounts.borrow_mut());
		for mount in mounts {
			mount();
		}
	}

	/// Runs cleanup callbacks in reverse registration order and drops all effects.
	pub fn dispose(&self) {
		let cleanups = core::mem::take(&mut *self.cleanups.borrow_mut());
		for cleanup in cleanups.into_iter().rev() {
			cleanup();
		}
		self.effects.borrow_mut().clear();
		self.mounts.borrow_mut().clear();
	}
}

impl ReactiveScope for FakeScope {
	fn create_effect(&self, effect: Box<dyn FnMut()>) {
		let effect = Rc::new(RefCell::new(effect));
		(*effect.borrow_mut())();
		self.effects.borrow_mut().push(effect);
	}

	fn on_mount(&self, callback: Box<dyn FnOnce()>) {
		self.mounts.borrow_mut().push(callback);
	}

	fn on_cleanup(&self, callback: Box<dyn FnOnce()>) {
		self.cleanups.borrow_mut().push(callback);
	}

	fn is_server(&self) -> bool {
		self.server
	}
}

/// A module loader whose one module arrives only once it's sent through the returned channel.
///
/// Loads after the first fail, as does the first one if the sender is dropped.
#[must_use]
pub fn deferred_loader() -> (ModuleLoader, oneshot::Sender<Rc<Module>>) {
	let (sender, receiver) = oneshot::channel();
	let receiver = RefCell::new(Some(receiver));
	let loader: ModuleLoader = Rc::new(move |url: &str| {
		let url = url.to_owned();
		let receiver = receiver.borrow_mut().take();
		async move {
			match receiver {
				Some(receiver) => receiver.await.map_err(|oneshot::Canceled| Error::Load {
					url,
					reason: "the deferred module was never sent".to_owned(),
				}),
				None => Err(Error::Load {
					url,
					reason: "the deferred module was already requested".to_owned(),
				}),
			}
		}
		.boxed_local()
	});
	(loader, sender)
}
