//! Interface schemas.
//!
//! Interfaces are described declaratively, as JSON:
//!
//! ```json
//! {
//!   "name": "org.example.Counter",
//!   "methods": [
//!     { "name": "Add", "args": [
//!         { "name": "amount", "type": "u" },
//!         { "name": "total", "type": "u", "direction": "out" } ] }
//!   ],
//!   "properties": [ { "name": "Total", "type": "u", "access": "read" } ],
//!   "signals": [ { "name": "Overflowed", "args": [ { "type": "u" } ] } ]
//! }
//! ```
//!
//! [`normalize_interface`] validates such a document and fills in defaults.

use crate::error::InterfaceError;
use crate::names;
use crate::signature::Type;

use serde_json::{Map, Value as Json};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::ReadWrite => "readwrite",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub ty: Type,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Method {
    pub name: String,
    pub args: Vec<Arg>,
    pub optional: bool,
}

impl Method {
    pub fn in_args(&self) -> impl Iterator<Item = &Arg> {
        self.args.iter().filter(|a| a.direction == Direction::In)
    }

    /// The concatenated types of the "in" arguments.
    pub fn in_signature(&self) -> String {
        let mut sig = String::new();
        for arg in self.in_args() {
            arg.ty.write_signature(&mut sig);
        }
        sig
    }

    pub fn out_arg(&self) -> Option<&Arg> {
        self.args.iter().find(|a| a.direction == Direction::Out)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: String,
    pub ty: Type,
    pub access: Access,
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub name: String,
    pub args: Vec<Arg>,
}

impl Signal {
    pub fn signature(&self) -> String {
        let mut sig = String::new();
        for arg in &self.args {
            arg.ty.write_signature(&mut sig);
        }
        sig
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    pub name: String,
    pub methods: Vec<Method>,
    pub properties: Vec<Property>,
    pub signals: Vec<Signal>,
}

impl Interface {
    pub fn from_json(raw: &Json) -> Result<Self, InterfaceError> {
        normalize_interface(raw)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name == name)
    }
}

type Object = Map<String, Json>;

fn as_object<'a>(raw: &'a Json, field: &str) -> Result<&'a Object, InterfaceError> {
    raw.as_object().ok_or_else(|| InterfaceError::NotAnObject {
        field: field.to_owned(),
    })
}

fn required_str<'a>(obj: &'a Object, key: &str, path: &str) -> Result<&'a str, InterfaceError> {
    let field = format!("{}.{}", path, key);
    match obj.get(key) {
        None | Some(Json::Null) => Err(InterfaceError::NotDefined { field }),
        Some(Json::String(s)) => Ok(s),
        Some(_) => Err(InterfaceError::NotAString { field }),
    }
}

fn optional_str<'a>(
    obj: &'a Object,
    key: &str,
    path: &str,
) -> Result<Option<&'a str>, InterfaceError> {
    match obj.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) => Ok(Some(s)),
        Some(_) => Err(InterfaceError::NotAString {
            field: format!("{}.{}", path, key),
        }),
    }
}

fn optional_bool(obj: &Object, key: &str, path: &str) -> Result<bool, InterfaceError> {
    match obj.get(key) {
        None | Some(Json::Null) => Ok(false),
        Some(Json::Bool(b)) => Ok(*b),
        Some(_) => Err(InterfaceError::NotABoolean {
            field: format!("{}.{}", path, key),
        }),
    }
}

fn optional_list<'a>(obj: &'a Object, key: &str, path: &str) -> Result<&'a [Json], InterfaceError> {
    match obj.get(key) {
        None | Some(Json::Null) => Ok(&[]),
        Some(Json::Array(items)) => Ok(items),
        Some(_) => Err(InterfaceError::NotAnArray {
            field: format!("{}.{}", path, key),
        }),
    }
}

fn member_name<'a>(obj: &'a Object, path: &str) -> Result<&'a str, InterfaceError> {
    let name = required_str(obj, "name", path)?;
    if !names::is_valid_member_name(name) {
        return Err(InterfaceError::InvalidName {
            field: format!("{}.name", path),
            name: name.to_owned(),
        });
    }
    Ok(name)
}

fn single_type(obj: &Object, path: &str) -> Result<Type, InterfaceError> {
    let sig = required_str(obj, "type", path)?;
    Type::parse_single(sig).map_err(|_| InterfaceError::NotASingleCompleteType {
        field: format!("{}.type", path),
        signature: sig.to_owned(),
    })
}

fn normalize_arg(raw: &Json, path: &str, signal: bool) -> Result<Arg, InterfaceError> {
    let obj = as_object(raw, path)?;
    let name = optional_str(obj, "name", path)?.map(str::to_owned);
    let ty = single_type(obj, path)?;
    let direction = match (optional_str(obj, "direction", path)?, signal) {
        (None, false) | (Some("in"), false) => Direction::In,
        (None, true) | (Some("out"), _) => Direction::Out,
        (Some(other), _) => {
            return Err(InterfaceError::InvalidEnumValue {
                field: format!("{}.direction", path),
                value: other.to_owned(),
                expected: if signal { "out" } else { "in, out" },
            })
        }
    };
    Ok(Arg {
        name,
        ty,
        direction,
    })
}

fn normalize_args(obj: &Object, path: &str, signal: bool) -> Result<Vec<Arg>, InterfaceError> {
    optional_list(obj, "args", path)?
        .iter()
        .enumerate()
        .map(|(ix, raw)| normalize_arg(raw, &format!("{}.args[{}]", path, ix), signal))
        .collect()
}

fn normalize_method(raw: &Json, path: &str) -> Result<Method, InterfaceError> {
    let obj = as_object(raw, path)?;
    let name = member_name(obj, path)?.to_owned();
    let args = normalize_args(obj, path, false)?;
    if args.iter().filter(|a| a.direction == Direction::Out).count() > 1 {
        return Err(InterfaceError::MultipleOutArgs { method: name });
    }
    Ok(Method {
        name,
        args,
        optional: optional_bool(obj, "optional", path)?,
    })
}

fn normalize_property(raw: &Json, path: &str) -> Result<Property, InterfaceError> {
    let obj = as_object(raw, path)?;
    let name = member_name(obj, path)?.to_owned();
    let ty = single_type(obj, path)?;
    let access = match optional_str(obj, "access", path)? {
        None | Some("readwrite") => Access::ReadWrite,
        Some("read") => Access::Read,
        Some("write") => Access::Write,
        Some(other) => {
            return Err(InterfaceError::InvalidEnumValue {
                field: format!("{}.access", path),
                value: other.to_owned(),
                expected: "read, write, readwrite",
            })
        }
    };
    Ok(Property {
        name,
        ty,
        access,
        optional: optional_bool(obj, "optional", path)?,
    })
}

fn normalize_signal(raw: &Json, path: &str) -> Result<Signal, InterfaceError> {
    let obj = as_object(raw, path)?;
    Ok(Signal {
        name: member_name(obj, path)?.to_owned(),
        args: normalize_args(obj, path, true)?,
    })
}

/// Validates a raw interface description and fills in its defaults.
///
/// Every failure names the offending field, e.g. `methods[0].args[1].type`.
pub fn normalize_interface(raw: &Json) -> Result<Interface, InterfaceError> {
    let obj = as_object(raw, "interface")?;
    let name = required_str(obj, "name", "interface")?;
    if !names::is_valid_interface_name(name) {
        return Err(InterfaceError::InvalidName {
            field: "interface.name".to_owned(),
            name: name.to_owned(),
        });
    }

    let methods = optional_list(obj, "methods", "interface")?
        .iter()
        .enumerate()
        .map(|(ix, m)| normalize_method(m, &format!("methods[{}]", ix)))
        .collect::<Result<Vec<_>, _>>()?;
    let properties = optional_list(obj, "properties", "interface")?
        .iter()
        .enumerate()
        .map(|(ix, p)| normalize_property(p, &format!("properties[{}]", ix)))
        .collect::<Result<Vec<_>, _>>()?;
    let signals = optional_list(obj, "signals", "interface")?
        .iter()
        .enumerate()
        .map(|(ix, s)| normalize_signal(s, &format!("signals[{}]", ix)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    let member_names = methods
        .iter()
        .map(|m| &m.name)
        .chain(properties.iter().map(|p| &p.name))
        .chain(signals.iter().map(|s| &s.name));
    for member in member_names {
        if !seen.insert(member) {
            return Err(InterfaceError::DuplicateMemberName {
                name: member.clone(),
            });
        }
    }

    Ok(Interface {
        name: name.to_owned(),
        methods,
        properties,
        signals,
    })
}
