//! Call arguments.
//!
//! Every argument of a declared method is converted into an [`Argument`]
//! before the request is built. Structured values travel as JSON, binary
//! payloads (multipart uploads) are carried through opaquely.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::Result;

/// Opaque binary payload for multipart uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPart {
    /// Raw content.
    pub bytes: Bytes,
    /// File name announced in the part's `Content-Disposition`.
    pub file_name: Option<String>,
    /// Part content type, `application/octet-stream` when absent.
    pub content_type: Option<String>,
}

impl BinaryPart {
    /// Create a binary part from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            file_name: None,
            content_type: None,
        }
    }

    /// Set the file name.
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Set the content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One actual argument of a declared method call.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A structured value.
    Value(Value),
    /// A binary payload.
    Binary(BinaryPart),
}

impl Argument {
    /// Serialize any value into an argument.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }

    /// The null argument.
    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    /// Wrap raw bytes as a binary argument.
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Self::Binary(BinaryPart::new(bytes))
    }

    /// Check whether the argument is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// Get the argument as a key/value object.
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Value(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// Get the structured value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Binary(_) => None,
        }
    }

    /// Render the argument as text.
    ///
    /// Returns `Ok(None)` for null, `Err(())` for binary payloads.
    pub(crate) fn render(&self) -> std::result::Result<Option<String>, ()> {
        match self {
            Self::Value(value) => Ok(render_value(value)),
            Self::Binary(_) => Err(()),
        }
    }
}

/// Render a JSON value as text: strings verbatim, scalars via `Display`,
/// containers as compact JSON, null as nothing.
pub(crate) fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Map<String, Value>> for Argument {
    fn from(map: Map<String, Value>) -> Self {
        Self::Value(Value::Object(map))
    }
}

impl From<Vec<Value>> for Argument {
    fn from(values: Vec<Value>) -> Self {
        Self::Value(Value::Array(values))
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<&String> for Argument {
    fn from(value: &String) -> Self {
        Self::Value(Value::String(value.clone()))
    }
}

impl From<bool> for Argument {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

macro_rules! number_argument {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Argument {
                fn from(value: $ty) -> Self {
                    Self::Value(Value::from(value))
                }
            }
        )+
    };
}

number_argument!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl From<Bytes> for Argument {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(BinaryPart::new(bytes))
    }
}

impl From<Vec<u8>> for Argument {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(BinaryPart::new(bytes))
    }
}

impl From<BinaryPart> for Argument {
    fn from(part: BinaryPart) -> Self {
        Self::Binary(part)
    }
}

impl<T: Into<Argument>> From<Option<T>> for Argument {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Argument::null)
    }
}

impl<K: Into<String>, V: Into<Value>> From<HashMap<K, V>> for Argument {
    fn from(map: HashMap<K, V>) -> Self {
        Self::Value(Value::Object(
            map.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}

impl<K: Into<String>, V: Into<Value>> From<BTreeMap<K, V>> for Argument {
    fn from(map: BTreeMap<K, V>) -> Self {
        Self::Value(Value::Object(
            map.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}
