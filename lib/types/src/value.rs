use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use indexmap::IndexMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single element of an attribute stream.
///
/// Values are plain data and cheap to clone relative to the I/O that produced
/// them. `Error` is a regular stream element: a policy information point that
/// cannot compute a value right now publishes the failure as data instead of
/// tearing the stream down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// The attribute is not defined for the requested entity.
    Undefined,
    Null,
    Bool(bool),
    Number(BigDecimal),
    Text(String),
    Array(Vec<AttributeValue>),
    /// Mapping with insertion order preserved.
    Object(IndexMap<String, AttributeValue>),
    /// A value-level error. Does not terminate the stream it travels on.
    Error(String),
}

impl AttributeValue {
    pub fn error(message: impl Into<String>) -> Self {
        AttributeValue::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AttributeValue::Error(_))
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, AttributeValue::Undefined)
    }

    /// Converts to a JSON value. `Undefined` and `Error` have no JSON
    /// representation and yield `None`. Numbers that do not fit a JSON number
    /// are rendered through `f64` and may lose precision.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            AttributeValue::Undefined | AttributeValue::Error(_) => None,
            AttributeValue::Null => Some(serde_json::Value::Null),
            AttributeValue::Bool(b) => Some(serde_json::Value::Bool(*b)),
            AttributeValue::Number(n) => {
                let number = if n.is_integer() {
                    n.to_i64().map(serde_json::Number::from)
                } else {
                    None
                };
                number
                    .or_else(|| n.to_f64().and_then(serde_json::Number::from_f64))
                    .map(serde_json::Value::Number)
            }
            AttributeValue::Text(s) => Some(serde_json::Value::String(s.clone())),
            AttributeValue::Array(items) => items
                .iter()
                .map(AttributeValue::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            AttributeValue::Object(map) => map
                .iter()
                .map(|(key, value)| value.to_json().map(|json| (key.clone(), json)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(serde_json::Value::Object),
        }
    }
}

impl From<serde_json::Value> for AttributeValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(b),
            serde_json::Value::Number(n) => {
                // `serde_json` numbers are finite decimals, possibly in
                // scientific notation; both forms parse as `BigDecimal`.
                let decimal = n
                    .to_string()
                    .parse::<BigDecimal>()
                    .expect("JSON numbers are valid decimals");
                AttributeValue::Number(decimal)
            }
            serde_json::Value::String(s) => AttributeValue::Text(s),
            serde_json::Value::Array(items) => {
                AttributeValue::Array(items.into_iter().map(AttributeValue::from).collect())
            }
            serde_json::Value::Object(map) => AttributeValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, AttributeValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Number(BigDecimal::from(value))
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        AttributeValue::Number(BigDecimal::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        BigDecimal::from_f64(value)
            .map(AttributeValue::Number)
            .unwrap_or(AttributeValue::Undefined)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

// `IndexMap` equality ignores insertion order, so `Object` must hash
// order-independently too. Entries are hashed in sorted key order.
impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            AttributeValue::Undefined | AttributeValue::Null => {}
            AttributeValue::Bool(b) => b.hash(state),
            AttributeValue::Number(n) => n.hash(state),
            AttributeValue::Text(s) => s.hash(state),
            AttributeValue::Error(m) => m.hash(state),
            AttributeValue::Array(items) => {
                items.len().hash(state);
                for item in items {
                    item.hash(state);
                }
            }
            AttributeValue::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort_unstable();
                keys.len().hash(state);
                for key in keys {
                    key.hash(state);
                    map[key.as_str()].hash(state);
                }
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Undefined => write!(f, "undefined"),
            AttributeValue::Null => write!(f, "null"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::Text(s) => write!(f, "{s:?}"),
            AttributeValue::Error(m) => write!(f, "error({m:?})"),
            AttributeValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            AttributeValue::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{key:?}:{value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
