//! Dynamic value model for broker-returned data.
//!
//! The broker's object model is dynamically typed: a field read can come back
//! as a bool, an integer, a string, a string array — or not come back at all.
//! `DynamicValue::Absent` models the last case as a first-class state. It is
//! deliberately distinct from `String("")` or an empty array: callers probe
//! for the *presence* of fields (e.g. "does this volume have a key protector
//! ID at all"), and collapsing "field not returned" into "field returned
//! empty" breaks those checks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A value read from (or written to) a broker object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DynamicValue {
    /// The broker did not return the field. Not the same as an empty value.
    Absent,
    Bool(bool),
    Int(i64),
    String(String),
    StringArray(Vec<String>),
}

static ABSENT: DynamicValue = DynamicValue::Absent;

impl DynamicValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, DynamicValue::Absent)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DynamicValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynamicValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_array(&self) -> Option<&[String]> {
        match self {
            DynamicValue::StringArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for DynamicValue {
    fn from(b: bool) -> Self {
        DynamicValue::Bool(b)
    }
}

impl From<i64> for DynamicValue {
    fn from(n: i64) -> Self {
        DynamicValue::Int(n)
    }
}

impl From<&str> for DynamicValue {
    fn from(s: &str) -> Self {
        DynamicValue::String(s.to_owned())
    }
}

impl From<String> for DynamicValue {
    fn from(s: String) -> Self {
        DynamicValue::String(s)
    }
}

impl From<Vec<String>> for DynamicValue {
    fn from(v: Vec<String>) -> Self {
        DynamicValue::StringArray(v)
    }
}

impl fmt::Display for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicValue::Absent => write!(f, "<absent>"),
            DynamicValue::Bool(b) => write!(f, "{b}"),
            DynamicValue::Int(n) => write!(f, "{n}"),
            DynamicValue::String(s) => write!(f, "{s}"),
            DynamicValue::StringArray(v) => write!(f, "{}", v.join(",")),
        }
    }
}

/// Named argument map used both as call input and as the declaration of
/// which named outputs a caller wants back. Keys are unique by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentBag(BTreeMap<String, DynamicValue>);

impl ArgumentBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<DynamicValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<DynamicValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Returns `&DynamicValue::Absent` for a name that was never inserted,
    /// so lookups never invent a default value.
    pub fn get(&self, name: &str) -> &DynamicValue {
        self.0.get(name).unwrap_or(&ABSENT)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DynamicValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, DynamicValue)> for ArgumentBag {
    fn from_iter<T: IntoIterator<Item = (String, DynamicValue)>>(iter: T) -> Self {
        ArgumentBag(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_is_not_an_empty_string() {
        let bag = ArgumentBag::new().with("Id", "");
        assert!(!bag.get("Id").is_absent());
        assert_eq!(bag.get("Id").as_str(), Some(""));
        assert!(bag.get("Other").is_absent());
        assert_eq!(bag.get("Other").as_str(), None);
    }

    #[test]
    fn duplicate_insert_keeps_last_value() {
        let bag = ArgumentBag::new().with("N", 1i64).with("N", 2i64);
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("N").as_int(), Some(2));
    }

    #[test]
    fn values_round_trip_through_json() {
        let bag = ArgumentBag::new()
            .with("Flag", true)
            .with("Count", 7i64)
            .with("Ids", vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&bag).unwrap();
        let back: ArgumentBag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bag);
    }
}
