//! Island props.
//!
//! Props are an ordered map from names to [`PropValue`]s, a closed sum of plain data,
//! [`ActionRef`] placeholders, materialized [`Callback`]s and opaque host values.
//! Values are reference-counted so that copies of a [`Props`] map share them, which keeps
//! [`materialize`](`crate::action::materialize`) from touching anything it doesn't replace.

use crate::action::ActionRef;
use core::{any::Any, fmt};
use indexmap::IndexMap;
use serde_json::Value;
use std::rc::Rc;

/// A live, invokable callback handed to the rendered component.
///
/// Arguments are passed as JSON values, as they would be when crossing into a script module.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(Vec<Value>)>);

impl Callback {
	pub fn new(f: impl 'static + Fn(Vec<Value>)) -> Self {
		Self(Rc::new(f))
	}

	pub fn call(&self, args: Vec<Value>) {
		(self.0)(args);
	}

	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		core::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
	}
}

impl fmt::Debug for Callback {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Callback").field(&Rc::as_ptr(&self.0).cast::<()>()).finish()
	}
}

#[derive(Clone)]
pub enum PropValue {
	Data(Rc<Value>),
	Action(ActionRef),
	Callback(Callback),
	/// A host framework value that can't be serialized, like `children`.
	Opaque(Rc<dyn Any>),
}

impl PropValue {
	pub fn data(value: impl Into<Value>) -> Self {
		Self::Data(Rc::new(value.into()))
	}

	pub fn opaque(value: impl Any) -> Self {
		Self::Opaque(Rc::new(value))
	}

	#[must_use]
	pub fn as_data(&self) -> Option<&Value> {
		match self {
			PropValue::Data(value) => Some(value),
			_ => None,
		}
	}

	#[must_use]
	pub fn as_callback(&self) -> Option<&Callback> {
		match self {
			PropValue::Callback(callback) => Some(callback),
			_ => None,
		}
	}

	/// Whether both values are the same allocation (or equal [`ActionRef`]s).
	#[must_use]
	pub fn same(&self, other: &Self) -> bool {
		match (self, other) {
			(PropValue::Data(a), PropValue::Data(b)) => Rc::ptr_eq(a, b),
			(PropValue::Action(a), PropValue::Action(b)) => a == b,
			(PropValue::Callback(a), PropValue::Callback(b)) => a.ptr_eq(b),
			(PropValue::Opaque(a), PropValue::Opaque(b)) => core::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
			_ => false,
		}
	}
}

impl PartialEq for PropValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(PropValue::Data(a), PropValue::Data(b)) => a == b,
			_ => self.same(other),
		}
	}
}

impl fmt::Debug for PropValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PropValue::Data(value) => f.debug_tuple("Data").field(value).finish(),
			PropValue::Action(action) => f.debug_tuple("Action").field(action).finish(),
			PropValue::Callback(callback) => callback.fmt(f),
			PropValue::Opaque(_) => f.write_str("Opaque(..)"),
		}
	}
}

impl From<Value> for PropValue {
	fn from(value: Value) -> Self {
		Self::Data(Rc::new(value))
	}
}

impl From<ActionRef> for PropValue {
	fn from(action: ActionRef) -> Self {
		Self::Action(action)
	}
}

impl From<Callback> for PropValue {
	fn from(callback: Callback) -> Self {
		Self::Callback(callback)
	}
}

/// Island props, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props(IndexMap<String, PropValue>);

impl Props {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style [`Props::insert`].
	#[must_use]
	pub fn with(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
		self.insert(name, value);
		self
	}

	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Option<PropValue> {
		self.0.insert(name.into(), value.into())
	}

	pub fn remove(&mut self, name: &str) -> Option<PropValue> {
		self.0.shift_remove(name)
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<&PropValue> {
		self.0.get(name)
	}

	#[must_use]
	pub fn contains_key(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
		self.0.iter().map(|(name, value)| (name.as_str(), value))
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// A copy without the host framework's `key` identity field.
	#[must_use]
	pub fn without_key(&self) -> Self {
		self.iter().filter(|(name, _)| *name != "key").map(|(name, value)| (name.to_owned(), value.clone())).collect()
	}

	/// The props as a JSON object, if they consist of data only.
	#[must_use]
	pub fn to_json(&self) -> Option<Value> {
		serde_json::to_value(self).ok()
	}
}

impl FromIterator<(String, PropValue)> for Props {
	fn from_iter<T: IntoIterator<Item = (String, PropValue)>>(iter: T) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl<'a> IntoIterator for &'a Props {
	type Item = (&'a String, &'a PropValue);
	type IntoIter = indexmap::map::Iter<'a, String, PropValue>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

impl From<serde_json::Map<String, Value>> for Props {
	fn from(map: serde_json::Map<String, Value>) -> Self {
		map.into_iter().map(|(name, value)| (name, PropValue::from(value))).collect()
	}
}
