//! The browser backend, built on [`web_sys`].
//!
//! [`WebPlatform`], [`WebDocument`] and [`WebElement`] implement the [`platform`](`crate::platform`)
//! traits on top of the real event loop and DOM, and [`import_loader`] loads modules through
//! [***import()***](https://developer.mozilla.org/en-US/docs/Web/JavaScript/Reference/Operators/import).
//!
//! Components loaded this way are [`JsComponent`]s, which a [`Renderer`](`crate::root::Renderer`)
//! for the page's component library can [`downcast_ref`](`Component::downcast_ref`) to.

use crate::{
	attributes::MANIFEST_GLOBAL,
	context::Context,
	error::{Error, LoadKind},
	module::{Action, Component, Export, Module, ModuleLoader},
	platform::{Disposer, Document, DomElement, ElementId, ElementRef, MutationRecord, Platform},
	root::Renderer,
};
use core::{any::Any, cell::Cell, time::Duration};
use futures::{future::LocalBoxFuture, FutureExt as _};
use js_sys::{Array, Function, Object, Promise, Reflect, WeakMap};
use serde_json::Value;
use std::rc::Rc;
use tracing::{error, trace, warn};
use url::Url;
use wasm_bindgen::{closure::Closure, prelude::wasm_bindgen, JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{IntersectionObserver, IntersectionObserverEntry, IntersectionObserverInit, MutationObserver, MutationObserverInit, NodeList, Window};

#[wasm_bindgen(inline_js = "export function import_module(url) { return import(url); }")]
extern "C" {
	#[wasm_bindgen(catch)]
	fn import_module(url: &str) -> Result<Promise, JsValue>;
}

#[wasm_bindgen]
extern "C" {
	#[wasm_bindgen(js_name = setTimeout)]
	fn set_timeout(handler: &JsValue, timeout: f64) -> JsValue;

	#[wasm_bindgen(js_name = clearTimeout)]
	fn clear_timeout(handle: &JsValue);
}

fn describe(error: &JsValue) -> String {
	error
		.dyn_ref::<js_sys::Error>()
		.map(|error| String::from(error.message()))
		.or_else(|| error.as_string())
		.unwrap_or_else(|| format!("{:?}", error))
}

fn has_global(target: &JsValue, name: &str) -> bool {
	Reflect::has(target, &JsValue::from_str(name)).unwrap_or(false)
}

fn js_to_json(value: &JsValue) -> Value {
	js_sys::JSON::stringify(value)
		.ok()
		.and_then(|json| json.as_string())
		.and_then(|json| serde_json::from_str(&json).ok())
		.unwrap_or(Value::Null)
}

fn json_to_js(value: &Value) -> JsValue {
	serde_json::to_string(value).ok().and_then(|json| js_sys::JSON::parse(&json).ok()).unwrap_or(JsValue::UNDEFINED)
}

thread_local! {
	static ELEMENT_IDS: WeakMap = WeakMap::new();
	static NEXT_ELEMENT_ID: Cell<u64> = Cell::new(0);
}

fn element_id(element: &web_sys::Element) -> ElementId {
	let key: &Object = element.as_ref();
	ELEMENT_IDS.with(|ids| {
		if let Some(id) = ids.get(key).as_f64() {
			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			return ElementId(id as u64);
		}
		let id = NEXT_ELEMENT_ID.with(|next| {
			let id = next.get();
			next.set(id + 1);
			id
		});
		#[allow(clippy::cast_precision_loss)]
		ids.set(key, &JsValue::from_f64(id as f64));
		ElementId(id)
	})
}

/// A DOM element.
#[derive(Debug, Clone)]
pub struct WebElement {
	element: web_sys::Element,
	id: ElementId,
}

impl WebElement {
	#[must_use]
	pub fn new(element: web_sys::Element) -> Self {
		let id = element_id(&element);
		Self { element, id }
	}

	#[must_use]
	pub fn element(&self) -> &web_sys::Element {
		&self.element
	}

	#[must_use]
	pub fn into_ref(self) -> ElementRef {
		Rc::new(self)
	}

	fn elements_of(nodes: &NodeList) -> Vec<ElementRef> {
		(0..nodes.length())
			.filter_map(|i| nodes.item(i))
			.filter_map(|node| node.dyn_into::<web_sys::Element>().ok())
			.map(|element| Self::new(element).into_ref())
			.collect()
	}
}

impl DomElement for WebElement {
	fn id(&self) -> ElementId {
		self.id
	}

	fn attribute(&self, name: &str) -> Option<String> {
		self.element.get_attribute(name)
	}

	fn set_attribute(&self, name: &str, value: &str) {
		if let Err(error) = self.element.set_attribute(name, value) {
			error!("Failed to set attribute {:?}: {}", name, describe(&error));
		}
	}

	fn remove_attribute(&self, name: &str) {
		if let Err(error) = self.element.remove_attribute(name) {
			error!("Failed to remove attribute {:?}: {}", name, describe(&error));
		}
	}

	fn has_attribute(&self, name: &str) -> bool {
		self.element.has_attribute(name)
	}

	fn has_rendered_content(&self) -> bool {
		self.element.has_child_nodes() && !self.element.inner_html().trim().is_empty()
	}

	fn is_connected(&self) -> bool {
		self.element.is_connected()
	}

	fn matches(&self, selector: &str) -> bool {
		self.element.matches(selector).unwrap_or_else(|error| {
			warn!("Invalid selector {:?}: {}", selector, describe(&error));
			false
		})
	}

	fn query_selector_all(&self, selector: &str) -> Vec<ElementRef> {
		match self.element.query_selector_all(selector) {
			Ok(nodes) => Self::elements_of(&nodes),
			Err(error) => {
				warn!("Invalid selector {:?}: {}", selector, describe(&error));
				Vec::new()
			}
		}
	}

	fn add_event_listener(&self, event: &str, listener: Rc<dyn Fn()>) -> Disposer {
		let closure = Closure::<dyn Fn()>::new(move || listener());
		if let Err(error) = self.element.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref()) {
			error!("Failed to add {:?} listener: {}", event, describe(&error));
			return Disposer::noop();
		}

		let element = self.element.clone();
		let event = event.to_owned();
		Disposer::new(move || {
			if let Err(error) = element.remove_event_listener_with_callback(&event, closure.as_ref().unchecked_ref()) {
				error!("Failed to remove {:?} listener: {}", event, describe(&error));
			}
			drop(closure);
		})
	}

	fn as_any(&self) -> &dyn Any {
		self
	}
}

fn web_element(element: &ElementRef) -> Option<&WebElement> {
	element.as_any().downcast_ref::<WebElement>()
}

#[derive(Debug, Clone)]
pub struct WebDocument {
	document: web_sys::Document,
}

impl WebDocument {
	#[must_use]
	pub fn new(document: web_sys::Document) -> Self {
		Self { document }
	}

	fn convert(record: &web_sys::MutationRecord) -> Option<MutationRecord> {
		match record.type_().as_str() {
			"attributes" => Some(MutationRecord::Attribute {
				target: WebElement::new(record.target()?.dyn_into::<web_sys::Element>().ok()?).into_ref(),
				name: record.attribute_name()?,
			}),
			"childList" => Some(MutationRecord::ChildList {
				added: WebElement::elements_of(&record.added_nodes()),
				removed: WebElement::elements_of(&record.removed_nodes()),
			}),
			_ => None,
		}
	}
}

impl Document for WebDocument {
	fn document_element(&self) -> Option<ElementRef> {
		self.document.document_element().map(|element| WebElement::new(element).into_ref())
	}

	fn observe_mutations(&self, mut on_records: Box<dyn FnMut(Vec<MutationRecord>)>) -> Disposer {
		let callback = Closure::<dyn FnMut(Array)>::new(move |records: Array| {
			let records: Vec<_> = records.iter().filter_map(|record| record.dyn_into::<web_sys::MutationRecord>().ok()).filter_map(|record| Self::convert(&record)).collect();
			if !records.is_empty() {
				on_records(records);
			}
		});

		let observer = match MutationObserver::new(callback.as_ref().unchecked_ref()) {
			Ok(observer) => observer,
			Err(error) => {
				error!("Failed to create MutationObserver: {}", describe(&error));
				return Disposer::noop();
			}
		};

		let init = MutationObserverInit::new();
		init.set_attributes(true);
		init.set_child_list(true);
		init.set_subtree(true);
		if let Err(error) = observer.observe_with_options(&self.document, &init) {
			error!("Failed to observe document mutations: {}", describe(&error));
			return Disposer::noop();
		}

		Disposer::new(move || {
			observer.disconnect();
			drop(callback);
		})
	}
}

/// The browser's event loop and window.
#[derive(Debug, Clone)]
pub struct WebPlatform {
	window: Option<Window>,
}

impl WebPlatform {
	#[must_use]
	pub fn new() -> Rc<Self> {
		Rc::new(Self { window: web_sys::window() })
	}

	fn timeout(delay: Duration, task: Box<dyn FnOnce()>) -> Disposer {
		let handle = set_timeout(&Closure::once_into_js(move || task()), delay.as_secs_f64() * 1000.0);
		Disposer::new(move || clear_timeout(&handle))
	}
}

impl Platform for WebPlatform {
	fn now(&self) -> Duration {
		let millis = self.window.as_ref().and_then(Window::performance).map_or_else(js_sys::Date::now, |performance| performance.now());
		Duration::from_secs_f64(millis.max(0.0) / 1000.0)
	}

	fn queue_microtask(&self, task: Box<dyn FnOnce()>) {
		wasm_bindgen_futures::spawn_local(async move { task() });
	}

	fn set_timeout(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Disposer {
		Self::timeout(delay, task)
	}

	fn has_window(&self) -> bool {
		self.window.is_some()
	}

	fn supports_idle_callback(&self) -> bool {
		self.window.as_ref().is_some_and(|window| has_global(window, "requestIdleCallback"))
	}

	fn request_idle_callback(&self, task: Box<dyn FnOnce()>) -> Disposer {
		let Some(window) = self.window.clone() else {
			return Self::timeout(Duration::from_millis(1), task);
		};
		let callback = Closure::once_into_js(move || task());
		match window.request_idle_callback(callback.unchecked_ref::<Function>()) {
			Ok(handle) => Disposer::new(move || window.cancel_idle_callback(handle)),
			Err(error) => {
				error!("`requestIdleCallback` failed: {}", describe(&error));
				let handle = set_timeout(&callback, 1.0);
				Disposer::new(move || clear_timeout(&handle))
			}
		}
	}

	fn supports_intersection_observer(&self) -> bool {
		has_global(&js_sys::global(), "IntersectionObserver")
	}

	fn observe_intersection(&self, target: &ElementRef, root_margin: &str, mut on_entry: Box<dyn FnMut(bool)>) -> Disposer {
		let Some(target) = web_element(target) else {
			error!("Can only observe the intersection of `WebElement`s, but got {:?}.", target);
			return Disposer::noop();
		};

		let callback = Closure::<dyn FnMut(Array)>::new(move |entries: Array| {
			for entry in entries.iter() {
				if let Ok(entry) = entry.dyn_into::<IntersectionObserverEntry>() {
					on_entry(entry.is_intersecting());
				}
			}
		});

		let init = IntersectionObserverInit::new();
		init.set_root_margin(root_margin);
		let observer = match IntersectionObserver::new_with_options(callback.as_ref().unchecked_ref(), &init) {
			Ok(observer) => observer,
			Err(error) => {
				error!("Failed to create IntersectionObserver: {}", describe(&error));
				return Disposer::noop();
			}
		};
		observer.observe(target.element());

		Disposer::new(move || {
			observer.disconnect();
			drop(callback);
		})
	}

	fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
		wasm_bindgen_futures::spawn_local(future);
	}

	fn location(&self) -> Option<Url> {
		let href = self.window.as_ref()?.location().href().ok()?;
		Url::parse(&href).ok()
	}

	fn manifest_entry(&self, url: &str) -> Option<String> {
		let manifest = Reflect::get(&js_sys::global(), &JsValue::from_str(MANIFEST_GLOBAL)).ok().filter(JsValue::is_object)?;
		Reflect::get(&manifest, &JsValue::from_str(url)).ok()?.as_string()
	}

	fn document(&self) -> Option<Rc<dyn Document>> {
		let document = self.window.as_ref()?.document()?;
		Some(Rc::new(WebDocument::new(document)))
	}
}

impl Context {
	/// A [`Context`] for the current page.
	#[must_use]
	pub fn for_window(renderer: Rc<dyn Renderer>) -> Self {
		Self::new(WebPlatform::new(), renderer)
	}
}

/// A function exported by a script module, to be rendered as a component.
#[derive(Debug, Clone)]
pub struct JsComponent(pub Function);

fn js_action(function: Function) -> Action {
	Action::new(move |args| {
		let function = function.clone();
		async move {
			let args: Array = args.iter().map(json_to_js).collect();
			let result = function.apply(&JsValue::UNDEFINED, &args).map_err(|error| describe(&error))?;
			if let Some(promise) = result.dyn_ref::<Promise>() {
				JsFuture::from(promise.clone()).await.map_err(|error| describe(&error))?;
			}
			Ok(())
		}
		.boxed_local()
	})
}

fn module_from_namespace(namespace: &JsValue, kind: LoadKind) -> Module {
	let mut module = Module::new();
	let Some(namespace) = namespace.dyn_ref::<Object>() else {
		return module;
	};

	for entry in Object::entries(namespace).iter() {
		let entry: Array = entry.unchecked_into();
		let Some(name) = entry.get(0).as_string() else { continue };
		let value = entry.get(1);
		let export = match value.dyn_into::<Function>() {
			Ok(function) => match kind {
				LoadKind::Component => Export::Component(Component::new(JsComponent(function))),
				LoadKind::Action => Export::Action(js_action(function)),
			},
			Err(value) => Export::Value(js_to_json(&value)),
		};
		module.insert(name, export);
	}
	module
}

/// Loads modules with a dynamic `import()`.
#[must_use]
pub fn import_loader(kind: LoadKind) -> ModuleLoader {
	Rc::new(move |url: &str| {
		let url = url.to_owned();
		async move {
			trace!("Importing {} module {:?}.", kind, url);
			let load_error = |error: JsValue| Error::Load {
				url: url.clone(),
				reason: describe(&error),
			};
			let promise = import_module(&url).map_err(load_error)?;
			let namespace = JsFuture::from(promise).await.map_err(load_error)?;
			Ok(Rc::new(module_from_namespace(&namespace, kind)))
		}
		.boxed_local()
	})
}
