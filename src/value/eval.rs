//! Lowering of typed values into plain data.

use super::Value;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq, SerializeTuple};
use serde::{Serialize, Serializer};

/// What a [`Value`] evaluates to once the wire types are forgotten.
#[derive(Clone, Debug, PartialEq)]
pub enum Plain {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    List(Vec<Plain>),
    /// A dict with string-like keys, in first-insertion order.
    Map(IndexMap<String, Plain>),
    /// A dict with any other basic key type.
    Pairs(Vec<(Plain, Plain)>),
}

impl Value {
    pub fn eval(&self) -> Plain {
        match self {
            Value::Byte(v) => Plain::Uint(*v as u64),
            Value::Boolean(v) => Plain::Bool(*v),
            Value::Int16(v) => Plain::Int(*v as i64),
            Value::Uint16(v) => Plain::Uint(*v as u64),
            Value::Int32(v) => Plain::Int(*v as i64),
            Value::Uint32(v) | Value::UnixFd(v) => Plain::Uint(*v as u64),
            Value::Int64(v) => Plain::Int(*v),
            Value::Uint64(v) => Plain::Uint(*v),
            Value::Double(v) => Plain::Double(*v),
            Value::String(_) | Value::ObjectPath(_) | Value::Signature(_) => {
                Plain::String(self.as_str().unwrap_or_default().to_owned())
            }
            Value::Variant(inner) => inner.eval(),
            Value::Struct(s) => Plain::List(s.fields().iter().map(Value::eval).collect()),
            Value::DictEntry(e) => Plain::List(vec![e.key().eval(), e.value().eval()]),
            Value::Array(a) if a.is_dict() => {
                let string_keys = match a.element_type() {
                    crate::signature::Type::DictEntry(key, _) => key.is_string_like(),
                    _ => false,
                };
                if string_keys {
                    let mut map = IndexMap::with_capacity(a.len());
                    for (k, v) in a.dict_entries() {
                        map.insert(k.as_str().unwrap_or_default().to_owned(), v.eval());
                    }
                    Plain::Map(map)
                } else {
                    Plain::Pairs(a.dict_entries().map(|(k, v)| (k.eval(), v.eval())).collect())
                }
            }
            Value::Array(a) => Plain::List(a.iter().map(Value::eval).collect()),
        }
    }
}

impl Serialize for Plain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Plain::Bool(v) => serializer.serialize_bool(*v),
            Plain::Int(v) => serializer.serialize_i64(*v),
            Plain::Uint(v) => serializer.serialize_u64(*v),
            Plain::Double(v) => serializer.serialize_f64(*v),
            Plain::String(v) => serializer.serialize_str(v),
            Plain::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Plain::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Plain::Pairs(pairs) => {
                let mut seq = serializer.serialize_seq(Some(pairs.len()))?;
                for pair in pairs {
                    seq.serialize_element(&PairRef(&pair.0, &pair.1))?;
                }
                seq.end()
            }
        }
    }
}

struct PairRef<'a>(&'a Plain, &'a Plain);

impl Serialize for PairRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(self.0)?;
        tuple.serialize_element(self.1)?;
        tuple.end()
    }
}
