//! Conversion of any `Serialize` type into a [`Value`].
//!
//! The entry point is [`to_value`]. Tuples and tuple structs become
//! STRUCTs, e.g. `("Hi", 0.2f64)` becomes `(sd)`. Structs with named fields
//! are, under the default policy, serialized in dictionary style as `a{sv}`:
//! the keys are the field names and the values are the field values wrapped
//! in variants, which is DBus's mechanism for type erasure. Fields that are
//! `None` are left out of the dictionary entirely.
//!
//! To always use struct-style serialization, as `zvariant` does, use
//! [`to_value_with_policy`] with [`StronglyTypedSerializerPolicy`]. To decide
//! struct by struct, implement [`SerializerPolicy`].
//!
//! Sequences become arrays of their element type when every element has the
//! same type, and `av` otherwise (including when empty). Maps become `a{kv}`
//! with variant values.
//!
//! [`StronglyTypedSerializerPolicy`]: serializer_policy::StronglyTypedSerializerPolicy
//! [`SerializerPolicy`]: serializer_policy::SerializerPolicy

use crate::error::{Error, Result};
use crate::signature::Type;
use crate::value::{Array, Struct, Value};

use serde::{ser, Serialize};

pub mod serializer_policy;

use serializer_policy::{DefaultSerializerPolicy, SerializerPolicy, StructSerializationStyle};

pub fn to_value_with_policy(value: impl Serialize, policy: impl SerializerPolicy) -> Result<Value> {
    value
        .serialize(Serializer { policy })?
        .ok_or_else(|| Error::Serializing("value serializes to nothing".to_owned()))
}

/// [`to_value_with_policy`] with the default policy.
pub fn to_value(value: impl Serialize) -> Result<Value> {
    to_value_with_policy(value, DefaultSerializerPolicy)
}

/// Absent values (`None`, `()`) serialize to `Ok(None)`; whoever holds them
/// decides whether that is allowed.
struct Serializer<C: SerializerPolicy> {
    policy: C,
}

fn required(value: Option<Value>) -> Result<Value> {
    value.ok_or_else(|| Error::Serializing("absent value in a position that needs one".to_owned()))
}

fn single_entry_dict(name: &str, value: Value) -> Result<Option<Value>> {
    let dict = Array::dict(
        Type::String,
        Type::Variant,
        [(Value::from(name), Value::variant(value))],
    )?;
    Ok(Some(Value::Array(dict)))
}

/// A homogeneous array when possible, `av` when not.
fn sequence(items: Vec<Value>) -> Result<Value> {
    let homogeneous = match items.first() {
        Some(first) => {
            let ty = first.value_type();
            items.iter().all(|item| item.value_type() == ty)
        }
        None => false,
    };
    let array = if homogeneous {
        Array::from_values(items)?
    } else {
        let mut array = Array::new(Type::Variant)?;
        for item in items {
            array.push(Value::variant(item))?;
        }
        array
    };
    Ok(Value::Array(array))
}

fn structure(fields: Vec<Value>) -> Result<Option<Value>> {
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(Value::Struct(Struct::new(fields)?)))
}

fn dict(entries: Vec<(&str, Value)>) -> Result<Value> {
    let entries = entries
        .into_iter()
        .map(|(name, value)| (Value::from(name), Value::variant(value)));
    Ok(Value::Array(Array::dict(Type::String, Type::Variant, entries)?))
}

impl<C: SerializerPolicy> Serializer<C> {
    fn child(&self) -> Serializer<C> {
        Serializer {
            policy: self.policy.clone(),
        }
    }
}

impl<C: SerializerPolicy> ser::Serializer for Serializer<C> {
    type Ok = Option<Value>;
    type Error = Error;

    type SerializeSeq = SerializeSeq<C>;
    type SerializeTuple = SerializeSeq<C>;
    type SerializeTupleStruct = SerializeSeq<C>;
    type SerializeTupleVariant = SerializeSeq<C>;
    type SerializeMap = SerializeMap<C>;
    type SerializeStruct = SerializeStruct<C>;
    type SerializeStructVariant = SerializeStruct<C>;

    fn serialize_bool(self, val: bool) -> Result<Option<Value>> {
        Ok(Some(Value::Boolean(val)))
    }

    fn serialize_i8(self, val: i8) -> Result<Option<Value>> {
        Ok(Some(Value::Int16(val as i16)))
    }

    fn serialize_i16(self, val: i16) -> Result<Option<Value>> {
        Ok(Some(Value::Int16(val)))
    }

    fn serialize_i32(self, val: i32) -> Result<Option<Value>> {
        Ok(Some(Value::Int32(val)))
    }

    fn serialize_i64(self, val: i64) -> Result<Option<Value>> {
        Ok(Some(Value::Int64(val)))
    }

    fn serialize_u8(self, val: u8) -> Result<Option<Value>> {
        Ok(Some(Value::Byte(val)))
    }

    fn serialize_u16(self, val: u16) -> Result<Option<Value>> {
        Ok(Some(Value::Uint16(val)))
    }

    fn serialize_u32(self, val: u32) -> Result<Option<Value>> {
        Ok(Some(Value::Uint32(val)))
    }

    fn serialize_u64(self, val: u64) -> Result<Option<Value>> {
        Ok(Some(Value::Uint64(val)))
    }

    fn serialize_f32(self, val: f32) -> Result<Option<Value>> {
        Ok(Some(Value::Double(val as f64)))
    }

    fn serialize_f64(self, val: f64) -> Result<Option<Value>> {
        Ok(Some(Value::Double(val)))
    }

    fn serialize_char(self, val: char) -> Result<Option<Value>> {
        Ok(Some(Value::Uint32(val as u32)))
    }

    fn serialize_str(self, val: &str) -> Result<Option<Value>> {
        Value::string(val).map(Some)
    }

    fn serialize_bytes(self, val: &[u8]) -> Result<Option<Value>> {
        let mut array = Array::new(Type::Byte)?;
        for b in val {
            array.push(Value::Byte(*b))?;
        }
        Ok(Some(Value::Array(array)))
    }

    fn serialize_none(self) -> Result<Option<Value>> {
        Ok(None)
    }

    fn serialize_some<T>(self, val: &T) -> Result<Option<Value>>
    where
        T: Serialize + ?Sized,
    {
        val.serialize(self)
    }

    fn serialize_unit(self) -> Result<Option<Value>> {
        Ok(None)
    }

    fn serialize_unit_struct(self, _: &'static str) -> Result<Option<Value>> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _: &'static str,
        variant_index: u32,
        _: &'static str,
    ) -> Result<Option<Value>> {
        Ok(Some(Value::Uint32(variant_index)))
    }

    fn serialize_newtype_struct<T>(self, _: &'static str, value: &T) -> Result<Option<Value>>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Option<Value>>
    where
        T: Serialize + ?Sized,
    {
        let value = required(value.serialize(self.child())?)?;
        single_entry_dict(variant, value)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq> {
        Ok(SerializeSeq {
            items: Vec::with_capacity(len.unwrap_or(0)),
            variant: None,
            policy: self.policy,
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _: &'static str, len: usize) -> Result<Self::SerializeTupleStruct> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Ok(SerializeSeq {
            items: Vec::with_capacity(len),
            variant: Some(variant),
            policy: self.policy,
        })
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self::SerializeMap> {
        Ok(SerializeMap {
            entries: Vec::new(),
            key: None,
            policy: self.policy,
        })
    }

    fn serialize_struct(self, name: &'static str, len: usize) -> Result<Self::SerializeStruct> {
        let style = self.policy.query_struct_name(name);
        Ok(SerializeStruct {
            style,
            fields: Vec::with_capacity(len),
            variant: None,
            policy: self.policy,
        })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        let mut ser = self.serialize_struct(name, len)?;
        ser.variant = Some(variant);
        Ok(ser)
    }
}

/// Sequences, tuples and tuple variants. Sequences and tuples only differ in
/// how they finish.
struct SerializeSeq<C: SerializerPolicy> {
    items: Vec<Value>,
    variant: Option<&'static str>,
    policy: C,
}

impl<C: SerializerPolicy> SerializeSeq<C> {
    fn push<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let item = value.serialize(Serializer {
            policy: self.policy.clone(),
        })?;
        self.items.push(required(item)?);
        Ok(())
    }

    fn finish_tuple(self) -> Result<Option<Value>> {
        match self.variant {
            Some(variant) => {
                let value = required(structure(self.items)?)?;
                single_entry_dict(variant, value)
            }
            None => structure(self.items),
        }
    }
}

impl<C: SerializerPolicy> ser::SerializeSeq for SerializeSeq<C> {
    type Ok = Option<Value>;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.push(value)
    }

    fn end(self) -> Result<Option<Value>> {
        sequence(self.items).map(Some)
    }
}

impl<C: SerializerPolicy> ser::SerializeTuple for SerializeSeq<C> {
    type Ok = Option<Value>;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.push(value)
    }

    fn end(self) -> Result<Option<Value>> {
        self.finish_tuple()
    }
}

impl<C: SerializerPolicy> ser::SerializeTupleStruct for SerializeSeq<C> {
    type Ok = Option<Value>;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.push(value)
    }

    fn end(self) -> Result<Option<Value>> {
        self.finish_tuple()
    }
}

impl<C: SerializerPolicy> ser::SerializeTupleVariant for SerializeSeq<C> {
    type Ok = Option<Value>;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.push(value)
    }

    fn end(self) -> Result<Option<Value>> {
        self.finish_tuple()
    }
}

struct SerializeMap<C: SerializerPolicy> {
    entries: Vec<(Value, Value)>,
    key: Option<Value>,
    policy: C,
}

impl<C: SerializerPolicy> ser::SerializeMap for SerializeMap<C> {
    type Ok = Option<Value>;
    type Error = Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let key = required(key.serialize(Serializer {
            policy: self.policy.clone(),
        })?)?;
        if !key.value_type().is_basic() {
            return Err(Error::DictKeyNotBasic(key.signature()));
        }
        self.key = Some(key);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let key = self
            .key
            .take()
            .ok_or_else(|| Error::Serializing("map value without a key".to_owned()))?;
        let value = value.serialize(Serializer {
            policy: self.policy.clone(),
        })?;
        if let Some(value) = value {
            self.entries.push((key, Value::variant(value)));
        }
        Ok(())
    }

    fn end(self) -> Result<Option<Value>> {
        let key_type = match self.entries.first() {
            Some((key, _)) => key.value_type(),
            None => Type::String,
        };
        let dict = Array::dict(key_type, Type::Variant, self.entries)?;
        Ok(Some(Value::Array(dict)))
    }
}

/// Named-field structs and struct variants, in the style the policy picked.
struct SerializeStruct<C: SerializerPolicy> {
    style: StructSerializationStyle,
    fields: Vec<(&'static str, Option<Value>)>,
    variant: Option<&'static str>,
    policy: C,
}

impl<C: SerializerPolicy> SerializeStruct<C> {
    fn push<T>(&mut self, name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let value = value.serialize(Serializer {
            policy: self.policy.clone(),
        })?;
        self.fields.push((name, value));
        Ok(())
    }

    fn finish(self) -> Result<Option<Value>> {
        let value = match self.style {
            StructSerializationStyle::Dict => dict(
                self.fields
                    .into_iter()
                    .filter_map(|(name, value)| value.map(|v| (name, v)))
                    .collect(),
            )?,
            StructSerializationStyle::StronglyTyped => {
                let fields = self
                    .fields
                    .into_iter()
                    .map(|(_, value)| required(value))
                    .collect::<Result<Vec<_>>>()?;
                match structure(fields)? {
                    Some(value) => value,
                    None => return Ok(None),
                }
            }
        };
        match self.variant {
            Some(variant) => single_entry_dict(variant, value),
            None => Ok(Some(value)),
        }
    }
}

impl<C: SerializerPolicy> ser::SerializeStruct for SerializeStruct<C> {
    type Ok = Option<Value>;
    type Error = Error;

    fn serialize_field<T>(&mut self, name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.push(name, value)
    }

    fn end(self) -> Result<Option<Value>> {
        self.finish()
    }
}

impl<C: SerializerPolicy> ser::SerializeStructVariant for SerializeStruct<C> {
    type Ok = Option<Value>;
    type Error = Error;

    fn serialize_field<T>(&mut self, name: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.push(name, value)
    }

    fn end(self) -> Result<Option<Value>> {
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::serializer_policy::StronglyTypedSerializerPolicy;
    use crate::value::codec::Endianness;
    use serde::Serialize;
    use std::collections::BTreeMap;
    use test_log::test;

    #[derive(Clone, Debug, Serialize)]
    struct StructSerialize {
        pub a: String,
        pub b: f64,
        pub c: (String, f64),
    }

    fn sample() -> StructSerialize {
        StructSerialize {
            a: "Hi".to_owned(),
            b: 0.2,
            c: ("Hello".to_owned(), 8.3),
        }
    }

    #[test]
    fn serialize_int() -> Result<()> {
        assert_eq!(to_value(37i32)?, Value::Int32(37));
        assert_eq!(to_value(-3i8)?, Value::Int16(-3));
        assert_eq!(to_value('A')?, Value::Uint32(65));
        Ok(())
    }

    #[test]
    fn serialize_tuple() -> Result<()> {
        let value = to_value(("Hi", 0.2f64, ("Hello", 8.3f64)))?;
        assert_eq!(value.signature(), "(sd(sd))");
        let mut buf = Vec::new();
        value.marshal(&mut buf, Endianness::Little)?;
        assert_eq!(
            buf,
            vec![
                2u8, 0u8, 0u8, 0u8, 72u8, 105u8, 0u8, 0u8, 154u8, 153u8, 153u8, 153u8, 153u8,
                153u8, 201u8, 63u8, 5u8, 0u8, 0u8, 0u8, 72u8, 101u8, 108u8, 108u8, 111u8, 0u8, 0u8,
                0u8, 0u8, 0u8, 0u8, 0u8, 154u8, 153u8, 153u8, 153u8, 153u8, 153u8, 32u8, 64u8,
            ]
        );
        Ok(())
    }

    #[test]
    fn serialize_dict_simpler() -> Result<()> {
        #[derive(Clone, Debug, Serialize)]
        struct StructSerialize {
            pub a: String,
            pub b: f64,
        }

        let value = to_value(StructSerialize {
            a: "Hi".to_owned(),
            b: 0.2,
        })?;
        assert_eq!(value.signature(), "a{sv}");
        let mut buf = Vec::new();
        value.marshal(&mut buf, Endianness::Little)?;
        assert_eq!(
            buf,
            vec![
                48, 0, 0, 0, // 48 bytes of array
                0, 0, 0, 0, // pad to 8 to start kv pair
                1, 0, 0, 0, // key string is 1 byte
                97, 0, // 'a' with terminating null
                1, // value signature is 1 byte
                115, 0, // 's' for string with terminating null
                0, 0, 0, // padding to begin string length
                2, 0, 0, 0, // string in question is 2 bytes
                72, 105, 0, // "Hi" plus terminating null
                0, 0, 0, 0, 0, // pad to 8 to start kv pair
                1, 0, 0, 0, // key string is 1 byte
                98, 0, // 'b' with terminating null
                1, // signature is 1 byte
                100, 0, // 'd' with terminating null
                0, 0, 0, 0, 0, 0, 0, // pad to 8 for double value
                154, 153, 153, 153, 153, 153, 201, 63, // 0.2
            ]
        );
        Ok(())
    }

    #[test]
    fn tuple_vs_struct() -> Result<()> {
        let strongly_typed = to_value_with_policy(sample(), StronglyTypedSerializerPolicy)?;
        let tuple = to_value(("Hi", 0.2, ("Hello", 8.3)))?;
        assert_eq!(strongly_typed, tuple);
        assert_eq!(to_value(sample())?.signature(), "a{sv}");
        Ok(())
    }

    #[test]
    fn optional_fields() -> Result<()> {
        #[derive(Clone, Debug, Serialize)]
        struct WithOptionalField {
            a: String,
            b: Option<String>,
            c: String,
        }

        #[derive(Clone, Debug, Serialize)]
        struct WithoutOptionalField {
            a: String,
            c: String,
        }

        let with = WithOptionalField {
            a: "a".to_owned(),
            b: None,
            c: "c".to_owned(),
        };
        let without = WithoutOptionalField {
            a: "a".to_owned(),
            c: "c".to_owned(),
        };
        assert_eq!(to_value(&with)?, to_value(&without)?);
        assert!(to_value_with_policy(&with, StronglyTypedSerializerPolicy).is_err());
        Ok(())
    }

    #[test]
    fn sequences() -> Result<()> {
        assert_eq!(to_value(vec![1u32, 2, 3])?.signature(), "au");
        assert_eq!(to_value(Vec::<u32>::new())?.signature(), "av");
        let mixed = vec![serde_json::json!(1), serde_json::json!("x")];
        assert_eq!(to_value(mixed)?.signature(), "av");
        assert_eq!(to_value(vec![vec![1u8], vec![]])?.signature(), "av");
        Ok(())
    }

    #[test]
    fn maps_and_enums() -> Result<()> {
        let mut map = BTreeMap::new();
        map.insert(1u32, "one");
        map.insert(2u32, "two");
        assert_eq!(to_value(&map)?.signature(), "a{uv}");
        assert_eq!(to_value(BTreeMap::<String, u8>::new())?.signature(), "a{sv}");
        assert!(matches!(
            to_value(BTreeMap::from([((1u8, 2u8), 3u8)])),
            Err(Error::DictKeyNotBasic(_))
        ));

        #[derive(Serialize)]
        enum Shape {
            Dot,
            Circle(f64),
            Rect { w: u32, h: u32 },
        }
        assert_eq!(to_value(Shape::Dot)?, Value::Uint32(0));
        let circle = to_value(Shape::Circle(1.5))?;
        assert_eq!(
            circle.as_array().and_then(|a| a.get("Circle")),
            Some(&Value::variant(1.5))
        );
        assert_eq!(to_value(Shape::Rect { w: 1, h: 2 })?.signature(), "a{sv}");
        Ok(())
    }

    #[test]
    fn nothing_to_serialize() {
        assert!(to_value(()).is_err());
        assert!(to_value(None::<u32>).is_err());
        assert!(to_value(vec![Some(1u32), None]).is_err());
    }
}
