//! How named-field structs are laid out by [`to_value_with_policy`].
//!
//! [`to_value_with_policy`]: crate::ser::to_value_with_policy()

use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructSerializationStyle {
    /// A STRUCT of the field values, in declaration order.
    StronglyTyped,
    /// An `a{sv}` keyed by field name.
    Dict,
}

pub trait SerializerPolicy: Clone {
    /// Called with the Rust type name of each struct being serialized.
    fn query_struct_name(&self, name: &str) -> StructSerializationStyle;
}

#[derive(Clone, Debug)]
pub struct DefaultSerializerPolicy;

impl SerializerPolicy for DefaultSerializerPolicy {
    fn query_struct_name(&self, _: &str) -> StructSerializationStyle {
        StructSerializationStyle::Dict
    }
}

#[derive(Clone, Debug)]
pub struct StronglyTypedSerializerPolicy;

impl SerializerPolicy for StronglyTypedSerializerPolicy {
    fn query_struct_name(&self, _: &str) -> StructSerializationStyle {
        StructSerializationStyle::StronglyTyped
    }
}

/// Dictionary style except for the listed struct names.
#[derive(Clone, Debug, Default)]
pub struct StronglyTypedStructs {
    names: HashSet<&'static str>,
}

impl StronglyTypedStructs {
    pub fn new(names: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }
}

impl SerializerPolicy for StronglyTypedStructs {
    fn query_struct_name(&self, name: &str) -> StructSerializationStyle {
        if self.names.contains(name) {
            StructSerializationStyle::StronglyTyped
        } else {
            StructSerializationStyle::Dict
        }
    }
}
