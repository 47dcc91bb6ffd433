//! Capabilities consumed from the environment.
//!
//! The runtime never touches a browser API directly. Everything it needs from the event loop and
//! the document goes through the traits in this module, implemented by
//! [`web`](`crate::web`) on `wasm32` and by [`testing`](`crate::testing`) everywhere.

use core::{any::Any, fmt, time::Duration};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use url::Url;

/// A cleanup action, usually returned from something that registers a listener, timer or observer.
///
/// Unlike a guard, dropping a [`Disposer`] does **not** run it.
#[must_use = "Dropping a `Disposer` does not run it."]
pub struct Disposer(Option<Box<dyn FnOnce()>>);

impl Disposer {
	pub fn new(dispose: impl 'static + FnOnce()) -> Self {
		Self(Some(Box::new(dispose)))
	}

	pub fn noop() -> Self {
		Self(None)
	}

	/// Combines several disposers into one that runs them in order.
	pub fn all(disposers: Vec<Disposer>) -> Self {
		Self::new(move || {
			for disposer in disposers {
				disposer.dispose();
			}
		})
	}

	pub fn dispose(mut self) {
		self.run();
	}

	/// Runs the cleanup action if it hasn't run yet.
	pub fn run(&mut self) {
		if let Some(dispose) = self.0.take() {
			dispose();
		}
	}
}

impl fmt::Debug for Disposer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Disposer").field(&if self.0.is_some() { "pending" } else { "spent" }).finish()
	}
}

/// Identity of a DOM element, stable for the element's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// An element of the document, as far as islands are concerned.
pub trait DomElement: fmt::Debug {
	fn id(&self) -> ElementId;

	fn attribute(&self, name: &str) -> Option<String>;
	fn set_attribute(&self, name: &str, value: &str);
	fn remove_attribute(&self, name: &str);
	fn has_attribute(&self, name: &str) -> bool {
		self.attribute(name).is_some()
	}

	/// Whether the element has child nodes and non-whitespace inner markup.
	fn has_rendered_content(&self) -> bool;

	fn is_connected(&self) -> bool;

	fn matches(&self, selector: &str) -> bool;

	/// Descendants (not including `self`) matching `selector`, in document order.
	fn query_selector_all(&self, selector: &str) -> Vec<ElementRef>;

	/// Registers `listener` for `event` on this element. The returned [`Disposer`] removes it again.
	fn add_event_listener(&self, event: &str, listener: Rc<dyn Fn()>) -> Disposer;

	/// Allows [`Renderer`](`crate::root::Renderer`)s to reach the concrete element type.
	fn as_any(&self) -> &dyn Any;
}

pub type ElementRef = Rc<dyn DomElement>;

/// One change observed in a [`Document`].
#[derive(Debug, Clone)]
pub enum MutationRecord {
	Attribute { target: ElementRef, name: String },
	/// Only element nodes are reported.
	ChildList { added: Vec<ElementRef>, removed: Vec<ElementRef> },
}

pub trait Document: fmt::Debug {
	fn document_element(&self) -> Option<ElementRef>;

	/// Observes attribute and child list changes of the whole subtree.
	///
	/// Records are delivered in batches, after the mutating task, like a
	/// [***MutationObserver***](https://developer.mozilla.org/en-US/docs/Web/API/MutationObserver) would.
	fn observe_mutations(&self, on_records: Box<dyn FnMut(Vec<MutationRecord>)>) -> Disposer;
}

/// Event loop and window capabilities.
pub trait Platform: fmt::Debug {
	/// Monotonic time since an arbitrary origin.
	fn now(&self) -> Duration;

	fn queue_microtask(&self, task: Box<dyn FnOnce()>);

	fn set_timeout(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Disposer;

	/// Whether there is a window-like context at all.
	fn has_window(&self) -> bool;

	fn supports_idle_callback(&self) -> bool;

	/// Only called if [`Platform::supports_idle_callback`] returned `true`.
	fn request_idle_callback(&self, task: Box<dyn FnOnce()>) -> Disposer;

	fn supports_intersection_observer(&self) -> bool;

	/// Only called if [`Platform::supports_intersection_observer`] returned `true`.
	///
	/// `on_entry` receives `isIntersecting` of each entry for `target`.
	/// The returned [`Disposer`] disconnects the observer.
	fn observe_intersection(&self, target: &ElementRef, root_margin: &str, on_entry: Box<dyn FnMut(bool)>) -> Disposer;

	fn spawn_local(&self, future: LocalBoxFuture<'static, ()>);

	/// The page location in browser contexts, [`None`] elsewhere.
	fn location(&self) -> Option<Url>;

	/// Looks `url` up in the build manifest provided by the environment, if any.
	fn manifest_entry(&self, url: &str) -> Option<String> {
		let _ = url;
		None
	}

	/// The document islands are discovered in by default.
	fn document(&self) -> Option<Rc<dyn Document>>;
}
