//! Attribute payload codecs.
//!
//! Props travel as percent-encoded JSON. [`ActionRef`]s become their canonical marker objects and
//! are recognized again when decoding. Anything else that can't be represented as JSON makes
//! encoding degrade to an empty object.

use crate::{
	action::ActionRef,
	props::{PropValue, Props},
};
use core::fmt;
use indexmap::IndexSet;
use serde::{
	de::{MapAccess, Visitor},
	ser::{Error as _, SerializeMap},
	Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;
use std::rc::Rc;
use tracing::{instrument, trace};

impl Serialize for PropValue {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			PropValue::Data(value) => value.serialize(serializer),
			PropValue::Action(action) => action.to_marker().serialize(serializer),
			PropValue::Callback(_) => Err(S::Error::custom("materialized callbacks can't be serialized")),
			PropValue::Opaque(_) => Err(S::Error::custom("opaque host values can't be serialized")),
		}
	}
}

impl Serialize for Props {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.len()))?;
		for (name, value) in self {
			map.serialize_entry(name, value)?;
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for Props {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct PropsVisitor;
		impl<'de> Visitor<'de> for PropsVisitor {
			type Value = Props;

			fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
				formatter.write_str("a props object")
			}

			fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Props, A::Error> {
				let mut props = Props::new();
				while let Some((name, value)) = map.next_entry::<String, Value>()? {
					let value = match ActionRef::from_marker(&value) {
						Some(action) => PropValue::Action(action),
						None => PropValue::Data(Rc::new(value)),
					};
					props.insert(name, value);
				}
				Ok(props)
			}
		}

		deserializer.deserialize_map(PropsVisitor)
	}
}

const EMPTY_OBJECT: &str = "%7B%7D";

/// Encodes `props` for the [`PROPS`](`crate::attributes::PROPS`) attribute.
///
/// Never fails: props that can't be serialized are encoded as an empty object.
#[must_use]
#[instrument(level = "trace", skip(props), fields(props.len = props.len()))]
pub fn encode_props(props: &Props) -> String {
	match serde_json::to_string(props) {
		Ok(json) => urlencoding::encode(&json).into_owned(),
		Err(error) => {
			trace!("Props aren't serializable, encoding an empty object instead: {}", error);
			EMPTY_OBJECT.to_owned()
		}
	}
}

/// Decodes a [`PROPS`](`crate::attributes::PROPS`) attribute value.
///
/// Missing, corrupted and non-object payloads all decode to empty [`Props`].
#[must_use]
pub fn decode_props(encoded: Option<&str>) -> Props {
	let encoded = match encoded {
		Some(encoded) if !encoded.is_empty() => encoded,
		_ => return Props::new(),
	};

	let json = match urlencoding::decode(encoded) {
		Ok(json) => json,
		Err(error) => {
			trace!("Props payload isn't valid UTF-8 after percent-decoding: {}", error);
			return Props::new();
		}
	};

	serde_json::from_str(&json).unwrap_or_else(|error| {
		trace!("Props payload doesn't decode to an object: {}", error);
		Props::new()
	})
}

/// Trims names, drops empty ones and removes duplicates, keeping first occurrences in order.
#[must_use]
pub fn normalize_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
	names.into_iter().map(str::trim).filter(|name| !name.is_empty()).map(str::to_owned).collect::<IndexSet<_>>().into_iter().collect()
}

/// Encodes additional action prop names for the [`ACTION_PROPS`](`crate::attributes::ACTION_PROPS`) attribute.
#[must_use]
pub fn encode_action_props(names: &[String]) -> String {
	let json = serde_json::to_string(names).unwrap_or_else(|_| "[]".to_owned());
	urlencoding::encode(&json).into_owned()
}

/// Decodes an [`ACTION_PROPS`](`crate::attributes::ACTION_PROPS`) attribute value, leniently.
#[must_use]
pub fn decode_action_props(encoded: Option<&str>) -> Vec<String> {
	let json = match encoded.map(urlencoding::decode) {
		Some(Ok(json)) => json,
		_ => return Vec::new(),
	};

	match serde_json::from_str::<Value>(&json) {
		Ok(Value::Array(items)) => normalize_names(items.iter().filter_map(Value::as_str)),
		_ => Vec::new(),
	}
}

/// Normalizes mount event names.
///
/// Each item may itself be a JSON array literal or a comma-separated list.
#[must_use]
pub fn normalize_mount_events<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
	let mut names = Vec::new();
	for item in items {
		push_event_names(item, &mut names);
	}
	normalize_names(names.iter().map(String::as_str))
}

fn push_event_names(raw: &str, out: &mut Vec<String>) {
	let input = raw.trim();
	if input.is_empty() {
		return;
	}

	if input.starts_with('[') {
		if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(input) {
			out.extend(items.iter().filter_map(Value::as_str).map(str::to_owned));
			return;
		}
	}

	out.extend(input.split(',').map(str::to_owned));
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn round_trip() {
		let input = Props::new().with("label", json!("demo")).with("count", json!(3)).with("nested", json!({ "ok": true, "list": [1, "two", null] }));
		assert_eq!(decode_props(Some(encode_props(&input).as_str())), input);
	}

	#[test]
	fn order_is_kept() {
		let input = Props::new().with("z", json!(1)).with("a", json!(2));
		let decoded = decode_props(Some(encode_props(&input).as_str()));
		assert_eq!(decoded.keys().collect::<Vec<_>>(), ["z", "a"]);
	}

	#[test]
	fn invalid_payloads_decode_empty() {
		assert!(decode_props(None).is_empty());
		assert!(decode_props(Some("")).is_empty());
		assert!(decode_props(Some("%")).is_empty());
		assert!(decode_props(Some(&*urlencoding::encode("{not-json"))).is_empty());
		assert!(decode_props(Some(&*urlencoding::encode("123"))).is_empty());
		assert!(decode_props(Some(&*urlencoding::encode("[1,2]"))).is_empty());
		assert!(decode_props(Some("%FF%FE")).is_empty());
	}

	#[test]
	fn unserializable_props_encode_empty() {
		let props = Props::new().with("label", json!("x")).with("onClick", crate::props::Callback::new(|_| ()));
		assert_eq!(encode_props(&props), EMPTY_OBJECT);
		assert!(decode_props(Some(EMPTY_OBJECT)).is_empty());
	}

	#[test]
	fn action_refs_survive() {
		let props = Props::new().with("onSave", ActionRef::from_locator("/actions.js#save"));
		let encoded = encode_props(&props);
		assert!(urlencoding::decode(&encoded).unwrap().contains("fict.react.action.v1"));
		assert_eq!(decode_props(Some(encoded.as_str())).get("onSave"), Some(&PropValue::Action(ActionRef::from_locator("/actions.js#save"))));
	}

	#[test]
	fn action_props_list() {
		let names = normalize_names([" submitAction ", "", "submitAction", "cancel"]);
		assert_eq!(names, ["submitAction", "cancel"]);
		assert_eq!(decode_action_props(Some(encode_action_props(&names).as_str())), names);
		assert!(decode_action_props(Some("%")).is_empty());
		assert!(decode_action_props(None).is_empty());
	}

	#[test]
	fn mount_events() {
		assert_eq!(normalize_mount_events(["custom-ready, keydown", "click", "keydown"]), ["custom-ready", "keydown", "click"]);
		assert_eq!(normalize_mount_events([r#"["a", " b ", 3]"#]), ["a", "b"]);
		assert_eq!(normalize_mount_events(["[broken"]), ["[broken"]);
		assert!(normalize_mount_events(["  ", ","]).is_empty());
	}
}
