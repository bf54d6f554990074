//! Scalar-leaf trees
//!
//! Cookies, query params, decoded input, and the raw upload encoding are all
//! arbitrarily nested maps whose leaves are null or scalar. [`Value`] models
//! one node of such a tree; [`ValueMap`] keeps insertion order and key
//! identity (integer or string) at every level.

use indexmap::IndexMap;
use serde::ser::{Error as _, Serialize, Serializer};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Ordered map of keys to values; one level of a scalar-leaf tree
pub type ValueMap = IndexMap<Key, Value>;

/// Key of one slot in a [`ValueMap`]
///
/// Strings holding the canonical decimal form of an `i64` convert to
/// [`Key::Index`], so `"0"` and `0` address the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Integer key
    Index(i64),
    /// String key
    Name(String),
}

impl Key {
    /// Get the key as a string slice if it is a name
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Key::Name(name) => Some(name),
            Key::Index(_) => None,
        }
    }

    /// Get the key as an integer if it is an index
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(_) => None,
        }
    }
}

fn canonical_index(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().filter(|n| n.to_string() == s)
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        match canonical_index(s) {
            Some(index) => Key::Index(index),
            None => Key::Name(s.to_string()),
        }
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        match canonical_index(&s) {
            Some(index) => Key::Index(index),
            None => Key::Name(s),
        }
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Key::from(s.as_str())
    }
}

impl From<i64> for Key {
    fn from(index: i64) -> Self {
        Key::Index(index)
    }
}

impl From<i32> for Key {
    fn from(index: i32) -> Self {
        Key::Index(index.into())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index as i64)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{}", index),
            Key::Name(name) => f.write_str(name),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Index(index) => serializer.serialize_i64(*index),
            Key::Name(name) => serializer.serialize_str(name),
        }
    }
}

/// A host value that is neither scalar nor a container
///
/// Objects, resources, and streams handed over by a host end up here. The
/// mutable variant carries them untouched; the frozen variant and the inbound
/// mapper reject them.
#[derive(Clone)]
pub struct Opaque {
    type_name: String,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    /// Wrap a host value, recording its Rust type name
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>().to_string(),
            inner: Arc::new(value),
        }
    }

    /// Wrap a host value under an explicit type name
    pub fn named<T: Any + Send + Sync>(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            inner: Arc::new(value),
        }
    }

    /// Get the recorded type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Borrow the wrapped value as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opaque")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// One node of a scalar-leaf tree
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Floating point scalar
    Float(f64),
    /// String scalar
    String(String),
    /// Nested level
    Map(ValueMap),
    /// Host value that is neither scalar nor container
    Opaque(Opaque),
}

impl Value {
    /// Name of the value's type, as reported in errors
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Map(_) => "map",
            Value::Opaque(opaque) => opaque.type_name(),
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is a scalar (bool, number, or string)
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_)
        )
    }

    /// Get the value as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the value as a nested map
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Get the value as a mutable nested map
    pub fn as_map_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a child of a nested map
    pub fn get(&self, key: impl Into<Key>) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(&key.into()))
    }

    /// Coerce a null or scalar value to its string form
    ///
    /// `Null` and `false` become `""`, `true` becomes `"1"`. Maps and opaque
    /// values have no string form.
    pub fn coerce_string(&self) -> Option<String> {
        match self {
            Value::Null | Value::Bool(false) => Some(String::new()),
            Value::Bool(true) => Some("1".to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::Float(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Map(_) | Value::Opaque(_) => None,
        }
    }

    /// Coerce a null or scalar value to an integer, the way a numeric server
    /// field is read
    pub fn coerce_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(n) => Some(*n as i64),
            Value::String(s) => Some(leading_int(s)),
            Value::Null | Value::Map(_) | Value::Opaque(_) => None,
        }
    }
}

/// Parse the leading integer of a string, yielding 0 when there is none
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

/// Look up a string key in a map
pub fn lookup<'a>(map: &'a ValueMap, key: &str) -> Option<&'a Value> {
    map.get(&Key::from(key))
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(n) => Value::Int(n),
            Err(_) => Value::String(n.to_string()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Value::Opaque(opaque)
    }
}

/// Opaque values have no serialized form and fail with a custom error.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Map(map) => serializer.collect_map(map),
            Value::Opaque(opaque) => Err(S::Error::custom(format!(
                "cannot serialize value of type `{}`",
                opaque.type_name()
            ))),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if n.is_u64() {
                    // integers beyond i64 keep their digits
                    Value::String(n.to_string())
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Map(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| (Key::from(i), Value::from(item)))
                    .collect(),
            ),
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (Key::from(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Build a [`ValueMap`] from `key => value` pairs
///
/// ```
/// use request_interop_core::value_map;
///
/// let map = value_map! { "foo" => "bar", 0 => value_map! { "baz" => 1 } };
/// assert_eq!(map.len(), 2);
/// ```
#[macro_export]
macro_rules! value_map {
    () => {
        $crate::ValueMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::ValueMap::new();
        $( map.insert($crate::Key::from($key), $crate::Value::from($value)); )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_to_json() {
        let map = value_map! {
            "name" => "x",
            0 => value_map! { "on" => true, "n" => 3, "none" => Value::Null },
        };
        assert_eq!(
            serde_json::to_string(&map).unwrap(),
            r#"{"name":"x","0":{"on":true,"n":3,"none":null}}"#
        );

        let opaque = value_map! { "h" => Opaque::named("resource", ()) };
        let err = serde_json::to_string(&opaque).unwrap_err();
        assert!(err.to_string().contains("resource"));
    }

    #[test]
    fn test_numeric_string_keys_become_indexes() {
        assert_eq!(Key::from("0"), Key::Index(0));
        assert_eq!(Key::from("42"), Key::Index(42));
        assert_eq!(Key::from("-7"), Key::Index(-7));
        assert_eq!(Key::from("007"), Key::Name("007".into()));
        assert_eq!(Key::from("-0"), Key::Name("-0".into()));
        assert_eq!(Key::from("1.5"), Key::Name("1.5".into()));
        assert_eq!(Key::from("photo"), Key::Name("photo".into()));
    }

    #[test]
    fn test_coerce_string() {
        assert_eq!(Value::Null.coerce_string().as_deref(), Some(""));
        assert_eq!(Value::Bool(true).coerce_string().as_deref(), Some("1"));
        assert_eq!(Value::Bool(false).coerce_string().as_deref(), Some(""));
        assert_eq!(Value::Int(12).coerce_string().as_deref(), Some("12"));
        assert_eq!(Value::Float(1.5).coerce_string().as_deref(), Some("1.5"));
        assert_eq!(Value::Map(ValueMap::new()).coerce_string(), None);
    }

    #[test]
    fn test_coerce_int_reads_leading_digits() {
        assert_eq!(Value::from("8080").coerce_int(), Some(8080));
        assert_eq!(Value::from("443abc").coerce_int(), Some(443));
        assert_eq!(Value::from("abc").coerce_int(), Some(0));
        assert_eq!(Value::Null.coerce_int(), None);
    }

    #[test]
    fn test_from_json_keeps_order_and_big_ints() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"z": 1, "a": [true, null], "big": 18446744073709551615}"#)
                .unwrap();
        let value = Value::from(json);
        let map = value.as_map().unwrap();

        let keys: Vec<String> = map.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["z", "a", "big"]);
        assert_eq!(value.get("a").and_then(|a| a.get(0)), Some(&Value::Bool(true)));
        assert_eq!(
            lookup(map, "big"),
            Some(&Value::String("18446744073709551615".into()))
        );
    }

    #[test]
    fn test_opaque_reports_type_name() {
        let opaque = Opaque::named("stream", 5u8);
        let value = Value::from(opaque.clone());
        assert_eq!(value.type_name(), "stream");
        assert!(!value.is_scalar());
        assert_eq!(opaque.downcast_ref::<u8>(), Some(&5));
        assert_eq!(value, Value::Opaque(opaque));
    }

    #[test]
    fn test_value_map_macro() {
        let map = value_map! { "foo" => "bar", 1 => Value::Null };
        assert_eq!(lookup(&map, "foo"), Some(&Value::from("bar")));
        assert_eq!(map.get(&Key::Index(1)), Some(&Value::Null));
    }
}
