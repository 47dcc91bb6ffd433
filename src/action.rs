//! Action references: callbacks named by a locator, resolved and invoked lazily on the client.

use crate::{
	context::Context,
	error::{Error, LoadKind},
	locator::{self, Locator},
	module::Export,
	props::{Callback, PropValue, Props},
};
use serde_json::{json, Value};
use std::rc::Rc;
use tracing::{error, instrument, trace, warn};

/// Value of [`MARKER_KEY`] in canonical action markers.
pub const ACTION_MARKER: &str = "fict.react.action.v1";
pub const MARKER_KEY: &str = "__fictReactActionMarker";
pub const LOCATOR_KEY: &str = "__fictReactActionQrl";
/// The only key of the older marker shape.
pub const LEGACY_KEY: &str = "__fictReactAction";

/// A serializable placeholder for a callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionRef {
	locator: String,
}

impl ActionRef {
	pub fn from_locator(locator: impl Into<String>) -> Self {
		Self { locator: locator.into() }
	}

	#[must_use]
	pub fn locator(&self) -> &str {
		&self.locator
	}

	/// The canonical marker object.
	#[must_use]
	pub fn to_marker(&self) -> Value {
		json!({
			MARKER_KEY: ACTION_MARKER,
			LOCATOR_KEY: self.locator,
		})
	}

	/// Recognizes the canonical marker shape only.
	///
	/// Legacy markers stay plain data until [`materialize`] sees them.
	#[must_use]
	pub fn from_marker(value: &Value) -> Option<Self> {
		let object = value.as_object()?;
		if object.get(MARKER_KEY)?.as_str()? != ACTION_MARKER {
			return None;
		}
		object.get(LOCATOR_KEY)?.as_str().map(Self::from_locator)
	}
}

/// Creates a reference to `export_name` (default: `default`) of `module_id`.
#[must_use]
pub fn make_action_reference(module_id: &str, export_name: Option<&str>) -> ActionRef {
	ActionRef::from_locator(locator::create_locator(module_id, export_name))
}

/// The locator of an action marker, canonical or legacy.
///
/// The legacy shape is only recognized with no other keys present.
#[must_use]
pub fn marker_locator(value: &Value) -> Option<&str> {
	let object = value.as_object()?;
	if object.get(MARKER_KEY).and_then(Value::as_str) == Some(ACTION_MARKER) {
		return object.get(LOCATOR_KEY).and_then(Value::as_str);
	}
	match object.get(LEGACY_KEY) {
		Some(Value::String(locator)) if object.len() == 1 => Some(locator),
		_ => None,
	}
}

/// The locator `value` refers to, if it is an action reference in any recognized form.
#[must_use]
pub fn action_locator(value: &PropValue) -> Option<&str> {
	match value {
		PropValue::Action(action) => Some(action.locator()),
		PropValue::Data(value) => marker_locator(value),
		PropValue::Callback(_) | PropValue::Opaque(_) => None,
	}
}

#[must_use]
pub fn is_action_reference(value: &PropValue) -> bool {
	action_locator(value).is_some()
}

/// `on` followed by an uppercase letter, or any name in `action_props`.
#[must_use]
pub fn is_action_prop_name(name: &str, action_props: &[String]) -> bool {
	name.strip_prefix("on").and_then(|rest| rest.chars().next()).is_some_and(|c| c.is_ascii_uppercase())
		|| action_props.iter().any(|listed| listed.trim() == name)
}

/// Replaces action references under action prop names with live [`Callback`]s.
///
/// Returns `props` itself if nothing was replaced. Otherwise, the result is a shallow copy in
/// which every other value is shared with `props`.
///
/// Callbacks are cached per locator on `cx`, so materializing the same reference again yields
/// the same [`Callback`].
#[must_use]
pub fn materialize(cx: &Context, props: &Rc<Props>, action_props: &[String]) -> Rc<Props> {
	let mut next: Option<Props> = None;
	for (name, value) in props.iter() {
		if !is_action_prop_name(name, action_props) {
			continue;
		}
		if let Some(locator) = action_locator(value) {
			let handler = handler(cx, locator);
			next.get_or_insert_with(|| Props::clone(props)).insert(name, handler);
		}
	}

	match next {
		Some(next) => Rc::new(next),
		None => Rc::clone(props),
	}
}

fn handler(cx: &Context, locator: &str) -> Callback {
	let cached = cx.inner().action_handlers.borrow().get(locator).cloned();
	if let Some(cached) = cached {
		return cached;
	}

	let weak = cx.downgrade();
	let owned = locator.to_owned();
	let handler = Callback::new(move |args| {
		let Some(cx) = weak.upgrade() else {
			warn!("Action {:?} was called after its island context was dropped.", owned);
			return;
		};
		let locator = owned.clone();
		let platform = Rc::clone(cx.platform());
		platform.spawn_local(Box::pin(async move {
			if let Err(error) = invoke(&cx, &locator, args).await {
				error!("Failed to execute action: {}", error);
			}
		}));
	});

	cx.inner().action_handlers.borrow_mut().insert(locator.to_owned(), handler.clone());
	handler
}

/// Loads the action `locator` names and calls it with `args`.
///
/// # Errors
///
/// Every step can fail, from locator resolution through policy and loading to the action itself.
#[instrument(level = "trace", skip(cx, args), fields(args.len = args.len()))]
pub async fn invoke(cx: &Context, locator: &str, args: Vec<Value>) -> Result<(), Error> {
	let Locator { url, export } = locator::parse(locator);
	if url.is_empty() {
		return Err(Error::MissingModuleUrl {
			kind: LoadKind::Action,
			locator: locator.to_owned(),
		});
	}

	let resolved = cx.resolve_module_url(&url);
	cx.assert_module_url_allowed(&resolved, LoadKind::Action)?;

	let module = cx.action_modules().load(&resolved).await?;
	let action = match module.resolve(&export) {
		Some(Export::Action(action)) => action.clone(),
		_ => {
			return Err(Error::NotCallable {
				kind: LoadKind::Action,
				export,
				url: resolved,
			})
		}
	};

	trace!("Calling action {:?} from {:?}.", export, resolved);
	action.call(args).await.map_err(|reason| Error::Action {
		locator: locator.to_owned(),
		reason,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{FakePlatform, FakeRenderer};

	fn context() -> Context {
		Context::new(FakePlatform::new(), FakeRenderer::new())
	}

	#[test]
	fn canonical_markers() {
		let action = make_action_reference("/actions.js", Some("save"));
		assert_eq!(action.locator(), "/actions.js#save");
		assert_eq!(ActionRef::from_marker(&action.to_marker()), Some(action.clone()));
		assert_eq!(marker_locator(&action.to_marker()), Some("/actions.js#save"));

		assert_eq!(make_action_reference("/actions.js", None).locator(), "/actions.js#default");
		assert_eq!(ActionRef::from_marker(&json!({ MARKER_KEY: "other", LOCATOR_KEY: "/a.js#b" })), None);
		assert_eq!(ActionRef::from_marker(&json!({ MARKER_KEY: ACTION_MARKER, LOCATOR_KEY: 1 })), None);
	}

	#[test]
	fn legacy_markers_are_narrow() {
		assert_eq!(marker_locator(&json!({ LEGACY_KEY: "/legacy.ts#run" })), Some("/legacy.ts#run"));
		assert_eq!(marker_locator(&json!({ LEGACY_KEY: "/legacy.ts#run", "extra": true })), None);
		assert_eq!(marker_locator(&json!({ LEGACY_KEY: 5 })), None);
		assert_eq!(ActionRef::from_marker(&json!({ LEGACY_KEY: "/legacy.ts#run" })), None);
		assert!(!is_action_reference(&PropValue::data("/legacy.ts#run")));
	}

	#[test]
	fn action_prop_names() {
		assert!(is_action_prop_name("onClick", &[]));
		assert!(!is_action_prop_name("onclick", &[]));
		assert!(!is_action_prop_name("on", &[]));
		assert!(!is_action_prop_name("submitAction", &[]));
		assert!(is_action_prop_name("submitAction", &[" submitAction ".to_owned()]));
	}

	#[test]
	fn materialize_without_matches_keeps_identity() {
		let cx = context();
		let props = Rc::new(Props::new().with("label", json!("x")).with("onSave", json!("not a marker")).with("other", make_action_reference("/a.js", None)));
		assert!(Rc::ptr_eq(&materialize(&cx, &props, &[]), &props));
	}

	#[test]
	fn materialize_replaces_only_action_values() {
		let cx = context();
		let props = Rc::new(
			Props::new()
				.with("nested", json!({ "deep": [1, 2] }))
				.with("onSave", make_action_reference("/a.js", Some("save")))
				.with("submit", json!({ LEGACY_KEY: "/a.js#submit" })),
		);
		let materialized = materialize(&cx, &props, &["submit".to_owned()]);

		assert!(!Rc::ptr_eq(&materialized, &props));
		assert!(materialized.get("nested").unwrap().same(props.get("nested").unwrap()));
		assert!(materialized.get("onSave").unwrap().as_callback().is_some());
		assert!(materialized.get("submit").unwrap().as_callback().is_some());
		assert_eq!(materialized.keys().collect::<Vec<_>>(), ["nested", "onSave", "submit"]);
		assert!(props.get("onSave").unwrap().as_callback().is_none());
	}

	#[test]
	fn handlers_are_cached_per_locator() {
		let cx = context();
		let props = Rc::new(Props::new().with("onSave", make_action_reference("/a.js", Some("save"))));
		let first = materialize(&cx, &props, &[]);
		let second = materialize(&cx, &props, &[]);
		assert!(first.get("onSave").unwrap().same(second.get("onSave").unwrap()));

		cx.reset_action_caches();
		let third = materialize(&cx, &props, &[]);
		assert!(!first.get("onSave").unwrap().same(third.get("onSave").unwrap()));
	}
}
