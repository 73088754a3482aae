//! Template values and the variable store.
//!
//! Values mirror what a resource or an action may produce: scalars, lists,
//! nested mappings (packs), callables and "computed" containers that
//! synthesize a value for any key (`number:42`, `string:abc`).

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

/// Nested name → value mapping.
pub type Map = IndexMap<String, Value>;

/// Formatting context handed to every action call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionOptions {
    /// Indent of the owning echo block
    pub indent: String,
    /// Line break used by the owning echo block
    pub line_breaks: String,
}

impl ActionOptions {
    pub fn new<I: Into<String>, L: Into<String>>(indent: I, line_breaks: L) -> Self {
        Self { indent: indent.into(), line_breaks: line_breaks.into() }
    }
}

/// Invocation context of a [`Function`].
#[derive(Debug, Clone, Copy)]
pub struct Call<'c> {
    pub options: &'c ActionOptions,
    /// The mapping the function was read from, if any
    pub this: Option<&'c Map>,
}

type Callable = dyn Fn(&Call<'_>, Vec<Value>) -> anyhow::Result<Value> + Send + Sync;

/// A callable value: a pipeline action, a pack getter or a module export.
#[derive(Clone)]
pub struct Function(Arc<Callable>);

impl Function {
    /// Wraps a callable receiving the call context and the arguments.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Call<'_>, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wraps a callable that ignores the call context.
    pub fn action<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(move |_, args| f(args))
    }

    /// Wraps a zero-argument callable that reads its sibling entries.
    pub fn getter<F>(f: F) -> Self
    where
        F: Fn(Option<&Map>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(move |call, _| f(call.this))
    }

    pub fn call(&self, call: &Call<'_>, args: Vec<Value>) -> anyhow::Result<Value> {
        (self.0)(call, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function")
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A container that matches any property, synthesizing the value from the key.
#[derive(Clone, Copy)]
pub struct Computed(pub fn(&str) -> Value);

impl Computed {
    pub fn get(&self, key: &str) -> Value {
        (self.0)(key)
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Computed")
    }
}

impl PartialEq for Computed {
    fn eq(&self, other: &Self) -> bool {
        self.0 as usize == other.0 as usize
    }
}

/// A resolved template value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// No value. Rendered as an empty string.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(Map),
    Function(Function),
    Computed(Computed),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Whether `key` can be read from this value.
    pub fn has_key(&self, key: &str) -> bool {
        match self {
            Value::Map(map) => map.contains_key(key),
            Value::Computed(_) => true,
            Value::List(items) => key.parse::<usize>().is_ok_and(|i| i < items.len()),
            _ => false,
        }
    }

    /// Reads `key` from a container. Scalars have no keys.
    pub fn get_key(&self, key: &str) -> Option<Cow<'_, Value>> {
        match self {
            Value::Map(map) => map.get(key).map(Cow::Borrowed),
            Value::Computed(computed) => Some(Cow::Owned(computed.get(key))),
            Value::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)).map(Cow::Borrowed),
            _ => None,
        }
    }

    /// JSON form following `JSON.stringify`: undefined and functions have none,
    /// non-finite numbers become `null`.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::Function(_) => None,
            Value::Null => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Number(n) => Some(number_to_json(*n)),
            Value::String(s) => Some(Json::String(s.clone())),
            Value::List(items) => Some(Json::Array(
                items.iter().map(|v| v.to_json().unwrap_or(Json::Null)).collect(),
            )),
            Value::Map(map) => Some(Json::Object(
                map.iter().filter_map(|(k, v)| v.to_json().map(|j| (k.clone(), j))).collect(),
            )),
            Value::Computed(_) => Some(Json::Object(serde_json::Map::new())),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        serde_json::Value::Null
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

/// Formats a number the way JavaScript stringifies it for common values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// `Number(text)`: blank is zero, `0x`/`0o`/`0b` prefixes are honored,
/// anything unparsable is `NaN`.
pub fn js_number(text: &str) -> f64 {
    let s = text.trim();
    if s.is_empty() {
        return 0.0;
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = s.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix).map_or(f64::NAN, |v| v as f64);
        }
    }
    match s.trim_start_matches(['+', '-']) {
        "Infinity" if s.len() - "Infinity".len() <= 1 => {
            if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY }
        }
        _ if s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) => {
            s.parse().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

impl fmt::Display for Value {
    /// `String(value)` semantics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !matches!(item, Value::Undefined | Value::Null) {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Value::Map(_) | Value::Computed(_) => f.write_str("[object Object]"),
            Value::Function(_) => f.write_str("function"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Value::Function(value)
    }
}

/// Result of a path lookup: the value and the mapping it was read from.
#[derive(Debug, Clone)]
pub struct Lookup<'v> {
    pub value: Cow<'v, Value>,
    pub parent: Option<&'v Map>,
}

/// The variable store of one processing pass.
#[derive(Debug, Clone)]
pub struct Vars {
    root: Value,
}

impl Default for Vars {
    fn default() -> Self {
        Self { root: Value::Map(Map::new()) }
    }
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map) -> Self {
        Self { root: Value::Map(map) }
    }

    fn map(&self) -> &Map {
        match &self.root {
            Value::Map(map) => map,
            _ => unreachable!("variable store root is always a map"),
        }
    }

    fn map_mut(&mut self) -> &mut Map {
        match &mut self.root {
            Value::Map(map) => map,
            _ => unreachable!("variable store root is always a map"),
        }
    }

    pub fn insert<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) {
        self.map_mut().insert(name.into(), value.into());
    }

    pub fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, entries: I) {
        self.map_mut().extend(entries);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map().get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map().contains_key(name)
    }

    pub fn as_map(&self) -> &Map {
        self.map()
    }

    /// Reads a colon-joined path such as `cfg:server:port`.
    pub fn read(&self, path: &str) -> Option<Lookup<'_>> {
        let keys: Vec<&str> = path.split(':').map(|k| k.trim_matches([' ', '\t'])).collect();
        self.lookup(&keys)
    }

    /// Walks `keys` from the store root through mappings, lists and computed
    /// containers.
    ///
    /// A key written `..name` is an indirection: when the top-level variable
    /// `name` holds a string or number that is a key of the current container,
    /// that value is read instead.
    pub fn lookup(&self, keys: &[&str]) -> Option<Lookup<'_>> {
        if keys.is_empty() {
            return None;
        }
        self.descend(&self.root, keys)
    }

    fn descend<'v>(&'v self, container: &'v Value, keys: &[&str]) -> Option<Lookup<'v>> {
        let key = self.indirect(container, keys[0]);
        let child = container.get_key(&key)?;
        if keys.len() == 1 {
            return Some(Lookup { value: child, parent: container.as_map() });
        }
        match child {
            Cow::Borrowed(value) => self.descend(value, &keys[1..]),
            Cow::Owned(value) => self
                .descend_owned(value, &keys[1..])
                .map(|value| Lookup { value: Cow::Owned(value), parent: None }),
        }
    }

    fn descend_owned(&self, container: Value, keys: &[&str]) -> Option<Value> {
        let key = self.indirect(&container, keys[0]);
        let child = container.get_key(&key)?.into_owned();
        if keys.len() == 1 {
            return Some(child);
        }
        self.descend_owned(child, &keys[1..])
    }

    fn indirect<'k>(&self, container: &Value, key: &'k str) -> Cow<'k, str> {
        let Some(name) = key.strip_prefix("..") else {
            return Cow::Borrowed(key);
        };
        let candidate = match self.map().get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => format_number(*n),
            _ => return Cow::Borrowed(key),
        };
        if container.has_key(&candidate) {
            Cow::Owned(candidate)
        } else {
            Cow::Borrowed(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_js_number() {
        assert_eq!(js_number(" 42 "), 42.0);
        assert_eq!(js_number(""), 0.0);
        assert_eq!(js_number("0x1F"), 31.0);
        assert_eq!(js_number("-Infinity"), f64::NEG_INFINITY);
        assert!(js_number("inf").is_nan());
        assert!(js_number("12px").is_nan());
    }

    #[test]
    fn test_list_display() {
        let list = Value::List(vec![Value::from(1.0), Value::Null, Value::from("a")]);
        assert_eq!(list.to_string(), "1,,a");
    }
}
