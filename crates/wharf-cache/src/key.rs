//! Cache key formatting: `<namespace>[:<field>:<value>]*`.

use std::borrow::Cow;
use std::fmt;

use crate::error::CacheError;

/// A key field value. Only integers and strings are representable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue<'a> {
    /// Rendered in decimal.
    Int(i64),
    /// Interpolated raw.
    Str(Cow<'a, str>),
}

impl fmt::Display for KeyValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for KeyValue<'_> {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for KeyValue<'_> {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for KeyValue<'_> {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl<'a> From<&'a str> for KeyValue<'a> {
    fn from(v: &'a str) -> Self {
        Self::Str(Cow::Borrowed(v))
    }
}

impl<'a> From<&'a String> for KeyValue<'a> {
    fn from(v: &'a String) -> Self {
        Self::Str(Cow::Borrowed(v.as_str()))
    }
}

impl From<String> for KeyValue<'_> {
    fn from(v: String) -> Self {
        Self::Str(Cow::Owned(v))
    }
}

impl<'a> TryFrom<&'a serde_json::Value> for KeyValue<'a> {
    type Error = CacheError;

    fn try_from(value: &'a serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(s) => Ok(Self::Str(Cow::Borrowed(s))),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int).ok_or_else(|| {
                CacheError::bad_value(format!("key value {n} is not an integer"))
            }),
            other => Err(CacheError::bad_value(format!(
                "key value {other} is neither an integer nor a string"
            ))),
        }
    }
}

/// Formats keys under a fixed namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormatter {
    namespace: String,
}

impl KeyFormatter {
    /// Creates a formatter for `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the prefix shared by every key of the namespace.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    /// Formats `namespace:field:value[:field:value]*`.
    #[must_use]
    pub fn format(&self, fields: &[(&str, KeyValue<'_>)]) -> String {
        let mut key = self.namespace.clone();
        for (field, value) in fields {
            key.push(':');
            key.push_str(field);
            key.push(':');
            key.push_str(&value.to_string());
        }
        key
    }

    /// Formats a single `field:value` key.
    #[must_use]
    pub fn one<'a>(&self, field: &str, value: impl Into<KeyValue<'a>>) -> String {
        self.format(&[(field, value.into())])
    }

    /// Formats a key from dynamically typed alternating field/value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::BadValue`] when a field is not a string, a
    /// value is neither integer nor string, or a value is missing.
    pub fn format_dynamic(&self, parts: &[serde_json::Value]) -> Result<String, CacheError> {
        if parts.len() % 2 != 0 {
            return Err(CacheError::bad_value("key fields must come in field/value pairs"));
        }
        let mut fields = Vec::with_capacity(parts.len() / 2);
        for pair in parts.chunks_exact(2) {
            let field = pair[0]
                .as_str()
                .ok_or_else(|| CacheError::bad_value(format!("key field {} is not a string", pair[0])))?;
            fields.push((field, KeyValue::try_from(&pair[1])?));
        }
        Ok(self.format(&fields))
    }
}
