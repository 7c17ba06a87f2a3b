//! Conversion of [`Value`]s into any `Deserialize` type.
//!
//! Deserialization cannot be substantially customized; it boils down to
//! [`from_value`] and [`from_body`]. It is liberal in what it accepts:
//! variants are unwrapped wherever they appear, and a struct with named
//! fields can be read from either a STRUCT (fields in order) or an `a{sv}`
//! dictionary (fields by name, missing `Option` fields are `None`). Enums
//! are read from a variant index (`u`), a variant name (`s`), or a
//! single-entry dictionary naming the variant.
//!
//! Everything borrows from the value, so `&str` fields work.

use crate::error::{Error, Result};
use crate::value::Value;

use serde::de::value::{
    BorrowedStrDeserializer, SeqAccessDeserializer, U32Deserializer, UnitDeserializer,
};
use serde::de::{
    self, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess, VariantAccess,
    Visitor,
};
use serde::forward_to_deserialize_any;
use serde::Deserialize;

pub fn from_value<'de, T: Deserialize<'de>>(value: &'de Value) -> Result<T> {
    T::deserialize(Deserializer::new(value))
}

/// Reads a whole message body. A single argument is read on its own, several
/// arguments as a tuple, and an empty body as `()`.
pub fn from_body<'de, T: Deserialize<'de>>(body: &'de [Value]) -> Result<T> {
    match body {
        [] => {
            let unit: UnitDeserializer<Error> = ().into_deserializer();
            T::deserialize(unit)
        }
        [single] => from_value(single),
        many => T::deserialize(SeqAccessDeserializer::new(SeqDeserializer::new(many))),
    }
}

pub struct Deserializer<'de> {
    value: &'de Value,
}

impl<'de> Deserializer<'de> {
    pub fn new(value: &'de Value) -> Self {
        Self {
            value: value.unwrap_variant(),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        Error::Deserializing(format!(
            "expected {}, found '{}'",
            expected,
            self.value.signature()
        ))
    }
}

impl<'de> de::Deserializer<'de> for Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Byte(v) => visitor.visit_u8(*v),
            Value::Boolean(v) => visitor.visit_bool(*v),
            Value::Int16(v) => visitor.visit_i16(*v),
            Value::Uint16(v) => visitor.visit_u16(*v),
            Value::Int32(v) => visitor.visit_i32(*v),
            Value::Uint32(v) | Value::UnixFd(v) => visitor.visit_u32(*v),
            Value::Int64(v) => visitor.visit_i64(*v),
            Value::Uint64(v) => visitor.visit_u64(*v),
            Value::Double(v) => visitor.visit_f64(*v),
            Value::String(_) | Value::ObjectPath(_) | Value::Signature(_) => {
                match self.value.as_str() {
                    Some(s) => visitor.visit_borrowed_str(s),
                    None => Err(self.unexpected("a string")),
                }
            }
            Value::Array(array) if array.is_dict() => visitor.visit_map(MapDeserializer {
                entries: Box::new(array.dict_entries()),
                value: None,
            }),
            Value::Array(array) => visitor.visit_seq(SeqDeserializer::new(array.items())),
            Value::Struct(s) => visitor.visit_seq(SeqDeserializer::new(s.fields())),
            Value::DictEntry(entry) => {
                visitor.visit_seq(PairDeserializer(Some(entry.key()), Some(entry.value())))
            }
            Value::Variant(inner) => Deserializer::new(inner).deserialize_any(visitor),
        }
    }

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Uint32(v) => match char::from_u32(*v) {
                Some(c) => visitor.visit_char(c),
                None => Err(Error::Deserializing(format!("{} is not a char", v))),
            },
            _ => self.deserialize_any(visitor),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V>(self, _: &'static str, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V>(self, _: &'static str, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _: &'static str,
        _: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        match self.value {
            Value::Uint32(index) => {
                let index: U32Deserializer<Error> = (*index).into_deserializer();
                visitor.visit_enum(index)
            }
            Value::String(name) => visitor.visit_enum(BorrowedStrDeserializer::<Error>::new(name)),
            Value::Array(array) if array.is_dict() && array.len() == 1 => {
                match array.dict_entries().next() {
                    Some((key, value)) => match key.as_str() {
                        Some(name) => visitor.visit_enum(EnumDeserializer { name, value }),
                        None => Err(self.unexpected("a variant name")),
                    },
                    None => Err(self.unexpected("an enum")),
                }
            }
            _ => Err(self.unexpected("an enum")),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 str string
        bytes byte_buf seq tuple tuple_struct map struct identifier ignored_any
    }
}

struct SeqDeserializer<'de> {
    iter: std::slice::Iter<'de, Value>,
}

impl<'de> SeqDeserializer<'de> {
    fn new(items: &'de [Value]) -> Self {
        Self { iter: items.iter() }
    }
}

impl<'de> SeqAccess<'de> for SeqDeserializer<'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        self.iter
            .next()
            .map(|value| seed.deserialize(Deserializer::new(value)))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

/// A lone dict entry read as a two-element sequence.
struct PairDeserializer<'de>(Option<&'de Value>, Option<&'de Value>);

impl<'de> SeqAccess<'de> for PairDeserializer<'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        match self.0.take().or_else(|| self.1.take()) {
            Some(value) => seed.deserialize(Deserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }
}

struct MapDeserializer<'de> {
    entries: Box<dyn Iterator<Item = (&'de Value, &'de Value)> + 'de>,
    value: Option<&'de Value>,
}

impl<'de> MapAccess<'de> for MapDeserializer<'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        match self.entries.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(Deserializer::new(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        let value = self
            .value
            .take()
            .ok_or_else(|| Error::Deserializing("map value requested before its key".to_owned()))?;
        seed.deserialize(Deserializer::new(value))
    }
}

struct EnumDeserializer<'de> {
    name: &'de str,
    value: &'de Value,
}

impl<'de> EnumAccess<'de> for EnumDeserializer<'de> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, Self::Variant)>
    where
        V: DeserializeSeed<'de>,
    {
        seed.deserialize(BorrowedStrDeserializer::<Error>::new(self.name))
            .map(|v| (v, self))
    }
}

impl<'de> VariantAccess<'de> for EnumDeserializer<'de> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T>(self, seed: T) -> Result<T::Value>
    where
        T: DeserializeSeed<'de>,
    {
        seed.deserialize(Deserializer::new(self.value))
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        de::Deserializer::deserialize_any(Deserializer::new(self.value), visitor)
    }

    fn struct_variant<V>(self, _fields: &'static [&'static str], visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        de::Deserializer::deserialize_any(Deserializer::new(self.value), visitor)
    }
}
