use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// A single step into a structured value. Names index objects, numbers
/// index arrays.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Key {
    Index(usize),
    Name(String),
}

/// Either one key or an ordered sequence of keys.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum KeyPath {
    Single(Key),
    Multiple(Vec<Key>),
}

impl KeyPath {
    pub fn keys(&self) -> &[Key] {
        match self {
            KeyPath::Single(key) => std::slice::from_ref(key),
            KeyPath::Multiple(keys) => keys,
        }
    }

    /// Builds a path from a macro argument: a string or a list of
    /// strings/numbers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(name) => Some(KeyPath::Single(Key::Name(name.clone()))),
            Value::Number(n) => n.as_u64().map(|i| KeyPath::Single(Key::Index(i as usize))),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(name) => Some(Key::Name(name.clone())),
                    Value::Number(n) => n.as_u64().map(|i| Key::Index(i as usize)),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(KeyPath::Multiple),
            _ => None,
        }
    }
}

impl From<&str> for KeyPath {
    fn from(name: &str) -> Self {
        KeyPath::Single(Key::Name(name.to_string()))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{i}"),
            Key::Name(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(key) => write!(f, "{key}"),
            KeyPath::Multiple(keys) => {
                let keys: Vec<String> = keys.iter().map(Key::to_string).collect();
                write!(f, "[{}]", keys.join(", "))
            }
        }
    }
}

/// Walks `value` along `keys`. Returns `None` when a step does not exist,
/// which is different from `Some(&Value::Null)` for a field that is present
/// but null.
pub fn extract<'a>(value: &'a Value, keys: &[Key]) -> Option<&'a Value> {
    let Some((first, rest)) = keys.split_first() else {
        return Some(value);
    };

    let next = match (first, value) {
        (Key::Name(name), Value::Object(map)) => map.get(name),
        (Key::Index(i), Value::Array(items)) => items.get(*i),
        // TOML and macro callers may spell an array index as a string
        (Key::Name(name), Value::Array(items)) => {
            name.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        (Key::Index(i), Value::Object(map)) => map.get(&i.to_string()),
        _ => None,
    }?;

    extract(next, rest)
}
