use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Name of a field, tag or metric. Static literals are stored without allocating.
pub type FieldKey = Cow<'static, str>;

/// An error that can render its text straight into a byte buffer.
///
/// Implementing this lets formatters emit the error without first building a
/// `String` through `Display`.
pub trait ErrorAppender: fmt::Debug + Send + Sync {
    fn append_error(&self, buf: &mut Vec<u8>);
}

/// Opaque error attached to a record or carried as a field value.
#[derive(Clone)]
pub enum ErrorValue {
    Appender(Arc<dyn ErrorAppender>),
    Error(Arc<dyn std::error::Error + Send + Sync>),
}

impl ErrorValue {
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ErrorValue::Error(Arc::new(err))
    }

    pub fn from_appender<A>(appender: A) -> Self
    where
        A: ErrorAppender + 'static,
    {
        ErrorValue::Appender(Arc::new(appender))
    }

    /// Appends the error text to `buf`.
    ///
    /// Plain `std::error::Error` values go through a single `to_string()`
    /// conversion; this is the one allocation the formatting path accepts.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            ErrorValue::Appender(appender) => appender.append_error(buf),
            ErrorValue::Error(err) => buf.extend_from_slice(err.to_string().as_bytes()),
        }
    }
}

impl fmt::Debug for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorValue::Appender(appender) => f.debug_tuple("Appender").field(appender).finish(),
            ErrorValue::Error(err) => f.debug_tuple("Error").field(&err.to_string()).finish(),
        }
    }
}

/// Closed set of value types a field can hold.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Arc<str>),
    StaticStr(&'static str),
    Bytes(Arc<[u8]>),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Null,
    Error(ErrorValue),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn bytes(b: &[u8]) -> Self {
        Value::Bytes(Arc::from(b))
    }

    pub fn error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Value::Error(ErrorValue::from_error(err))
    }

    /// Text-like payload of string and byte values.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(s) => Some(s.as_bytes()),
            Value::StaticStr(s) => Some(s.as_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::StaticStr(s) => Some(s),
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&'static str> for Value {
    fn from(s: &'static str) -> Self {
        Value::StaticStr(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Arc::from(b))
    }
}

impl From<ErrorValue> for Value {
    fn from(e: ErrorValue) -> Self {
        Value::Error(e)
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i64)
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Uint(v as u64)
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64, isize);
impl_from_unsigned!(u8, u16, u32, u64, usize);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Field name to value mapping.
///
/// Backed by a vector so that clearing keeps its capacity for the next record.
/// Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default)]
pub struct Fields {
    entries: Vec<(FieldKey, Value)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, key: impl Into<FieldKey>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.swap_remove(idx).1)
    }

    /// Layers `other` on top of `self`; keys present in both take `other`'s value.
    pub fn merge(&mut self, other: &Fields) {
        for (k, v) in &other.entries {
            self.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<FieldKey>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        fields.extend(iter);
        fields
    }
}

impl<K, V> Extend<(K, V)> for Fields
where
    K: Into<FieldKey>,
    V: Into<Value>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}
