//! Typed values for every wire type.
//!
//! A [`Value`] is always complete: it knows its own [`Type`]. Decoding takes
//! the target `Type` and produces a `Value`; see [`codec`] for the binary
//! representation and [`eval`] for conversion into plain data.

pub mod codec;
pub mod eval;

use crate::error::{Error, Result};
use crate::path::ObjectPath;
use crate::signature::{
    Signature, Type, TY_BOOLEAN, TY_BYTE, TY_INT16, TY_INT32, TY_INT64, TY_UINT16, TY_UINT32,
    TY_UINT64, TY_UNIX_FD,
};

use std::fmt::{self, Display};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    /// An index into the out-of-band file descriptor list.
    UnixFd(u32),
    String(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    Array(Array),
    Struct(Struct),
    DictEntry(DictEntry),
    Variant(Box<Value>),
}

impl Value {
    /// Builds an integer of the type named by `code`, checking its range.
    pub fn integer(code: u8, value: i128) -> Result<Value> {
        fn fit<T: TryFrom<i128>>(code: u8, value: i128) -> Result<T> {
            T::try_from(value).map_err(|_| Error::IntegerOutOfRange {
                code: code as char,
                value,
            })
        }
        let v = match code {
            TY_BYTE => Value::Byte(fit(code, value)?),
            TY_INT16 => Value::Int16(fit(code, value)?),
            TY_UINT16 => Value::Uint16(fit(code, value)?),
            TY_INT32 => Value::Int32(fit(code, value)?),
            TY_UINT32 => Value::Uint32(fit(code, value)?),
            TY_INT64 => Value::Int64(fit(code, value)?),
            TY_UINT64 => Value::Uint64(fit(code, value)?),
            TY_UNIX_FD => Value::UnixFd(fit(code, value)?),
            TY_BOOLEAN => match value {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                _ => {
                    return Err(Error::IntegerOutOfRange {
                        code: code as char,
                        value,
                    })
                }
            },
            other => return Err(Error::NotAnInteger(other as char)),
        };
        Ok(v)
    }

    /// A STRING, rejecting interior NUL bytes.
    pub fn string(s: impl Into<String>) -> Result<Value> {
        let s = s.into();
        if s.contains('\0') {
            return Err(Error::InteriorNul);
        }
        Ok(Value::String(s))
    }

    pub fn object_path(path: &str) -> Result<Value> {
        Ok(Value::ObjectPath(ObjectPath::new(path)?))
    }

    pub fn signature_value(sig: &str) -> Result<Value> {
        Ok(Value::Signature(Signature::new(sig)?))
    }

    pub fn variant(inner: impl Into<Value>) -> Value {
        Value::Variant(Box::new(inner.into()))
    }

    pub fn value_type(&self) -> Type {
        match self {
            Value::Byte(_) => Type::Byte,
            Value::Boolean(_) => Type::Boolean,
            Value::Int16(_) => Type::Int16,
            Value::Uint16(_) => Type::Uint16,
            Value::Int32(_) => Type::Int32,
            Value::Uint32(_) => Type::Uint32,
            Value::Int64(_) => Type::Int64,
            Value::Uint64(_) => Type::Uint64,
            Value::Double(_) => Type::Double,
            Value::UnixFd(_) => Type::UnixFd,
            Value::String(_) => Type::String,
            Value::ObjectPath(_) => Type::ObjectPath,
            Value::Signature(_) => Type::Signature,
            Value::Variant(_) => Type::Variant,
            Value::Array(a) => Type::Array(Box::new(a.element.clone())),
            Value::Struct(s) => Type::Struct(s.fields.iter().map(Value::value_type).collect()),
            Value::DictEntry(e) => Type::DictEntry(
                Box::new(e.key.value_type()),
                Box::new(e.value.value_type()),
            ),
        }
    }

    pub fn signature(&self) -> String {
        self.value_type().signature()
    }

    /// The leading character of the signature, without building it.
    pub fn code(&self) -> u8 {
        match self {
            Value::Array(_) => b'a',
            Value::Struct(_) => b'(',
            Value::DictEntry(_) => b'{',
            basic => basic.value_type().code(),
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            Value::Array(_) => 4,
            Value::Struct(_) | Value::DictEntry(_) => 8,
            basic => basic.value_type().alignment(),
        }
    }

    /// Removes any number of VARIANT wrappers.
    pub fn unwrap_variant(&self) -> &Value {
        let mut v = self;
        while let Value::Variant(inner) = v {
            v = inner;
        }
        v
    }

    pub fn into_unwrapped(self) -> Value {
        match self {
            Value::Variant(inner) => inner.into_unwrapped(),
            other => other,
        }
    }

    /// The text of a STRING, OBJECT_PATH or SIGNATURE.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::ObjectPath(p) => Some(p.as_str()),
            Value::Signature(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint32(v) | Value::UnixFd(v) => Some(*v),
            _ => None,
        }
    }

    /// Any integer type, widened.
    pub fn as_i128(&self) -> Option<i128> {
        let v = match self {
            Value::Byte(v) => *v as i128,
            Value::Int16(v) => *v as i128,
            Value::Uint16(v) => *v as i128,
            Value::Int32(v) => *v as i128,
            Value::Uint32(v) => *v as i128,
            Value::Int64(v) => *v as i128,
            Value::Uint64(v) => *v as i128,
            Value::UnixFd(v) => *v as i128,
            _ => return None,
        };
        Some(v)
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Byte(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Uint16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Uint32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Uint64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::UnixFd(v) => write!(f, "fd#{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::ObjectPath(v) => write!(f, "{}", v),
            Value::Signature(v) => write!(f, "<{}>", v),
            Value::Array(a) => {
                f.write_str("[")?;
                for (ix, item) in a.items.iter().enumerate() {
                    if ix > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Struct(s) => {
                f.write_str("(")?;
                for (ix, field) in s.fields.iter().enumerate() {
                    if ix > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                f.write_str(")")
            }
            Value::DictEntry(e) => write!(f, "{}: {}", e.key, e.value),
            Value::Variant(v) => write!(f, "<{}: {}>", v.signature(), v),
        }
    }
}

macro_rules! value_from {
    ($type:ty, $variant:ident) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Value {
                Value::$variant(v)
            }
        }
    };
}

value_from!(u8, Byte);
value_from!(bool, Boolean);
value_from!(i16, Int16);
value_from!(u16, Uint16);
value_from!(i32, Int32);
value_from!(u32, Uint32);
value_from!(i64, Int64);
value_from!(u64, Uint64);
value_from!(f64, Double);
value_from!(String, String);
value_from!(ObjectPath, ObjectPath);
value_from!(Signature, Signature);
value_from!(Array, Array);
value_from!(Struct, Struct);
value_from!(DictEntry, DictEntry);

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(v.to_owned())
    }
}

/// A homogeneous ARRAY. The element type is fixed at construction and every
/// pushed item must match it exactly.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    element: Type,
    items: Vec<Value>,
}

impl Array {
    /// An empty array of `element`. Dict entries are only valid here.
    pub fn new(element: Type) -> Result<Self> {
        Signature::from_types([&Type::Array(Box::new(element.clone()))])?;
        Ok(Self {
            element,
            items: Vec::new(),
        })
    }

    pub fn with_signature(element: &str, items: Vec<Value>) -> Result<Self> {
        let mut array = Self::new(Type::parse_single(element)?)?;
        for item in items {
            array.push(item)?;
        }
        Ok(array)
    }

    /// Infers the element type from the first item.
    pub fn from_values(items: Vec<Value>) -> Result<Self> {
        let element = match items.first() {
            Some(first) => first.value_type(),
            None => return Err(Error::EmptyArrayLiteral),
        };
        let mut array = Self::new(element)?;
        for item in items {
            array.push(item)?;
        }
        Ok(array)
    }

    /// An `a{kv}` built from key/value pairs.
    pub fn dict(
        key: Type,
        value: Type,
        entries: impl IntoIterator<Item = (Value, Value)>,
    ) -> Result<Self> {
        let mut array = Self::new(Type::DictEntry(Box::new(key), Box::new(value)))?;
        for (k, v) in entries {
            array.push(Value::DictEntry(DictEntry::new(k, v)?))?;
        }
        Ok(array)
    }

    pub fn push(&mut self, item: Value) -> Result<()> {
        let found = item.value_type();
        if found != self.element {
            return Err(Error::MismatchSignature(
                self.element.signature(),
                found.signature(),
            ));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn element_type(&self) -> &Type {
        &self.element
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn is_dict(&self) -> bool {
        matches!(self.element, Type::DictEntry(..))
    }

    /// Key/value pairs of an `a{..}` array, in encoded order.
    pub fn dict_entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.items.iter().filter_map(|item| match item {
            Value::DictEntry(e) => Some((&*e.key, &*e.value)),
            _ => None,
        })
    }

    /// First value stored under a string-like `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.dict_entries()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

/// A STRUCT with at least one field.
#[derive(Clone, Debug, PartialEq)]
pub struct Struct {
    fields: Vec<Value>,
}

impl Struct {
    pub fn new(fields: Vec<Value>) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::EmptyStruct);
        }
        Ok(Self { fields })
    }

    /// Builds a struct field by field against `signature`, e.g. `"(isv)"`.
    pub fn builder(signature: &str) -> Result<StructBuilder> {
        match Type::parse_single(signature)? {
            Type::Struct(expected) => Ok(StructBuilder {
                expected,
                fields: Vec::new(),
            }),
            other => Err(Error::MismatchSignature(
                "(...)".to_owned(),
                other.signature(),
            )),
        }
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Value> {
        self.fields
    }
}

pub struct StructBuilder {
    expected: Vec<Type>,
    fields: Vec<Value>,
}

impl StructBuilder {
    pub fn push(&mut self, field: impl Into<Value>) -> Result<&mut Self> {
        let field = field.into();
        let ix = self.fields.len();
        let expected = self
            .expected
            .get(ix)
            .ok_or(Error::IndexOutOfBounds(ix))?;
        let found = field.value_type();
        if &found != expected {
            return Err(Error::MismatchSignature(
                expected.signature(),
                found.signature(),
            ));
        }
        self.fields.push(field);
        Ok(self)
    }

    pub fn finish(self) -> Result<Struct> {
        if self.fields.len() != self.expected.len() {
            let found = Type::Struct(self.fields.iter().map(Value::value_type).collect());
            return Err(Error::MismatchSignature(
                Type::Struct(self.expected).signature(),
                found.signature(),
            ));
        }
        Struct::new(self.fields)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DictEntry {
    key: Box<Value>,
    value: Box<Value>,
}

impl DictEntry {
    pub fn new(key: Value, value: Value) -> Result<Self> {
        if !key.value_type().is_basic() {
            return Err(Error::DictKeyNotBasic(key.signature()));
        }
        Ok(Self {
            key: Box::new(key),
            value: Box::new(value),
        })
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_pair(self) -> (Value, Value) {
        (*self.key, *self.value)
    }
}
