//! Messages as they travel the bus: a kind, flags, typed header fields and a
//! body of zero or more values.
//!
//! Encoding to and decoding from bytes lives in [`wire`](crate::wire).

use crate::error::{names as error_names, Error, MethodError, Result};
use crate::names::{self, check};
use crate::path::ObjectPath;
use crate::signature::{Signature, Type};
use crate::value::codec::Endianness;
use crate::value::Value;

use serde::de::Deserialize;
use std::fmt::{self, Display};
use std::ops::BitOr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    MethodCall = 1,
    MethodReturn = 2,
    Error = 3,
    Signal = 4,
}

impl MessageKind {
    pub fn from_u8(kind: u8) -> Result<Self> {
        match kind {
            1 => Ok(MessageKind::MethodCall),
            2 => Ok(MessageKind::MethodReturn),
            3 => Ok(MessageKind::Error),
            4 => Ok(MessageKind::Signal),
            other => Err(Error::UnknownMessageKind(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::MethodCall => "method call",
            MessageKind::MethodReturn => "method return",
            MessageKind::Error => "error",
            MessageKind::Signal => "signal",
        }
    }
}

/// Header flag bits. Unknown bits received from a peer are kept and ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const NO_REPLY_EXPECTED: Flags = Flags(0x1);
    pub const NO_AUTO_START: Flags = Flags(0x2);
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: Flags = Flags(0x4);

    pub fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaderField {
    Path = 1,
    Interface = 2,
    Member = 3,
    ErrorName = 4,
    ReplySerial = 5,
    Destination = 6,
    Sender = 7,
    Signature = 8,
    UnixFds = 9,
}

impl HeaderField {
    pub fn from_code(code: u8) -> Option<Self> {
        let field = match code {
            1 => HeaderField::Path,
            2 => HeaderField::Interface,
            3 => HeaderField::Member,
            4 => HeaderField::ErrorName,
            5 => HeaderField::ReplySerial,
            6 => HeaderField::Destination,
            7 => HeaderField::Sender,
            8 => HeaderField::Signature,
            9 => HeaderField::UnixFds,
            _ => return None,
        };
        Some(field)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            HeaderField::Path => "PATH",
            HeaderField::Interface => "INTERFACE",
            HeaderField::Member => "MEMBER",
            HeaderField::ErrorName => "ERROR_NAME",
            HeaderField::ReplySerial => "REPLY_SERIAL",
            HeaderField::Destination => "DESTINATION",
            HeaderField::Sender => "SENDER",
            HeaderField::Signature => "SIGNATURE",
            HeaderField::UnixFds => "UNIX_FDS",
        }
    }

    pub fn value_type(self) -> Type {
        match self {
            HeaderField::Path => Type::ObjectPath,
            HeaderField::ReplySerial | HeaderField::UnixFds => Type::Uint32,
            HeaderField::Signature => Type::Signature,
            _ => Type::String,
        }
    }
}

/// The typed contents of the header field array.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeaderFields {
    pub path: Option<ObjectPath>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub error_name: Option<String>,
    pub reply_serial: Option<u32>,
    pub destination: Option<String>,
    pub sender: Option<String>,
    pub signature: Option<Signature>,
    pub unix_fds: Option<u32>,
}

impl HeaderFields {
    /// Stores `value` under `field`, which must carry the field's fixed type.
    pub fn set(&mut self, field: HeaderField, value: Value) -> Result<()> {
        match (field, value) {
            (HeaderField::Path, Value::ObjectPath(p)) => self.path = Some(p),
            (HeaderField::Interface, Value::String(s)) => self.interface = Some(s),
            (HeaderField::Member, Value::String(s)) => self.member = Some(s),
            (HeaderField::ErrorName, Value::String(s)) => self.error_name = Some(s),
            (HeaderField::ReplySerial, Value::Uint32(v)) => self.reply_serial = Some(v),
            (HeaderField::Destination, Value::String(s)) => self.destination = Some(s),
            (HeaderField::Sender, Value::String(s)) => self.sender = Some(s),
            (HeaderField::Signature, Value::Signature(s)) => self.signature = Some(s),
            (HeaderField::UnixFds, Value::Uint32(v)) => self.unix_fds = Some(v),
            (field, value) => {
                return Err(Error::HeaderFieldType {
                    field: field.name(),
                    expected: field.value_type().signature(),
                    found: value.signature(),
                })
            }
        }
        Ok(())
    }

    pub fn get(&self, field: HeaderField) -> Option<Value> {
        match field {
            HeaderField::Path => self.path.clone().map(Value::ObjectPath),
            HeaderField::Interface => self.interface.clone().map(Value::String),
            HeaderField::Member => self.member.clone().map(Value::String),
            HeaderField::ErrorName => self.error_name.clone().map(Value::String),
            HeaderField::ReplySerial => self.reply_serial.map(Value::Uint32),
            HeaderField::Destination => self.destination.clone().map(Value::String),
            HeaderField::Sender => self.sender.clone().map(Value::String),
            HeaderField::Signature => self.signature.clone().map(Value::Signature),
            HeaderField::UnixFds => self.unix_fds.map(Value::Uint32),
        }
    }

    /// Present fields in code order.
    pub fn to_values(&self) -> Vec<(HeaderField, Value)> {
        (1..=9)
            .filter_map(HeaderField::from_code)
            .filter_map(|field| self.get(field).map(|v| (field, v)))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub endianness: Endianness,
    pub kind: MessageKind,
    pub flags: Flags,
    /// Zero until the message is sent or after it is received.
    pub serial: u32,
    pub fields: HeaderFields,
    pub body: Vec<Value>,
}

impl Message {
    fn new(kind: MessageKind, fields: HeaderFields) -> Self {
        Self {
            endianness: Endianness::native(),
            kind,
            flags: Flags::NONE,
            serial: 0,
            fields,
            body: Vec::new(),
        }
    }

    pub fn method_call(
        destination: Option<&str>,
        path: &str,
        interface: Option<&str>,
        member: &str,
    ) -> Result<Self> {
        if let Some(destination) = destination {
            check("bus name", destination, names::is_valid_bus_name)?;
        }
        if let Some(interface) = interface {
            check("interface name", interface, names::is_valid_interface_name)?;
        }
        check("member name", member, names::is_valid_member_name)?;
        Ok(Self::new(
            MessageKind::MethodCall,
            HeaderFields {
                path: Some(ObjectPath::new(path)?),
                interface: interface.map(str::to_owned),
                member: Some(member.to_owned()),
                destination: destination.map(str::to_owned),
                ..HeaderFields::default()
            },
        ))
    }

    pub fn signal(path: &str, interface: &str, member: &str) -> Result<Self> {
        check("interface name", interface, names::is_valid_interface_name)?;
        check("member name", member, names::is_valid_member_name)?;
        Ok(Self::new(
            MessageKind::Signal,
            HeaderFields {
                path: Some(ObjectPath::new(path)?),
                interface: Some(interface.to_owned()),
                member: Some(member.to_owned()),
                ..HeaderFields::default()
            },
        ))
    }

    /// A successful reply to `call`, addressed back to its sender.
    pub fn method_return(call: &Message) -> Self {
        let mut reply = Self::new(
            MessageKind::MethodReturn,
            HeaderFields {
                reply_serial: Some(call.serial),
                destination: call.fields.sender.clone(),
                ..HeaderFields::default()
            },
        );
        reply.endianness = call.endianness;
        reply
    }

    pub fn error(call: &Message, error: &MethodError) -> Self {
        let mut reply = Self::new(
            MessageKind::Error,
            HeaderFields {
                error_name: Some(error.wire_name().to_owned()),
                reply_serial: Some(call.serial),
                destination: call.fields.sender.clone(),
                ..HeaderFields::default()
            },
        );
        reply.endianness = call.endianness;
        if let Some(message) = &error.message {
            reply.body.push(Value::String(message.replace('\0', "")));
        }
        reply
    }

    pub fn with_body(mut self, body: Vec<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.body.push(arg.into());
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn path(&self) -> Option<&ObjectPath> {
        self.fields.path.as_ref()
    }

    pub fn interface(&self) -> Option<&str> {
        self.fields.interface.as_deref()
    }

    pub fn member(&self) -> Option<&str> {
        self.fields.member.as_deref()
    }

    pub fn error_name(&self) -> Option<&str> {
        self.fields.error_name.as_deref()
    }

    pub fn reply_serial(&self) -> Option<u32> {
        self.fields.reply_serial
    }

    pub fn destination(&self) -> Option<&str> {
        self.fields.destination.as_deref()
    }

    pub fn sender(&self) -> Option<&str> {
        self.fields.sender.as_deref()
    }

    pub fn no_reply_expected(&self) -> bool {
        self.flags.contains(Flags::NO_REPLY_EXPECTED)
    }

    /// The signature of the body as it is, not as the header claims.
    pub fn body_signature(&self) -> String {
        let mut sig = String::new();
        for value in &self.body {
            value.value_type().write_signature(&mut sig);
        }
        sig
    }

    /// Checks that the header fields required by the message kind are set.
    pub fn validate(&self) -> Result<()> {
        let missing = |field: HeaderField| Error::MissingHeaderField {
            kind: self.kind.name(),
            field: field.name(),
        };
        let required: &[HeaderField] = match self.kind {
            MessageKind::MethodCall => &[HeaderField::Path, HeaderField::Member],
            MessageKind::Signal => &[
                HeaderField::Path,
                HeaderField::Interface,
                HeaderField::Member,
            ],
            MessageKind::Error => &[HeaderField::ErrorName, HeaderField::ReplySerial],
            MessageKind::MethodReturn => &[HeaderField::ReplySerial],
        };
        for field in required {
            if self.fields.get(*field).is_none() {
                return Err(missing(*field));
            }
        }
        Ok(())
    }

    /// The protocol error an ERROR message carries.
    pub fn to_method_error(&self) -> MethodError {
        MethodError {
            name: self
                .error_name()
                .unwrap_or(error_names::FAILED)
                .to_owned(),
            message: self
                .body
                .first()
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }

    /// Deserializes the body; see [`from_body`](crate::de::from_body).
    pub fn body_as<'de, T: Deserialize<'de>>(&'de self) -> Result<T> {
        crate::de::from_body(&self.body)
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind.name(), self.serial)?;
        if let Some(reply_serial) = self.reply_serial() {
            write!(f, " reply to #{}", reply_serial)?;
        }
        if let Some(path) = self.path() {
            write!(f, " {}", path)?;
        }
        match (self.interface(), self.member()) {
            (Some(i), Some(m)) => write!(f, " {}.{}", i, m)?,
            (None, Some(m)) => write!(f, " {}", m)?,
            _ => (),
        }
        if let Some(name) = self.error_name() {
            write!(f, " {}", name)?;
        }
        write!(f, " ({})", self.body_signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn header_fields_are_type_checked() -> Result<()> {
        let mut fields = HeaderFields::default();
        fields.set(HeaderField::ReplySerial, Value::Uint32(4))?;
        assert_eq!(
            fields.set(HeaderField::Path, Value::from("/not/typed")),
            Err(Error::HeaderFieldType {
                field: "PATH",
                expected: "o".to_owned(),
                found: "s".to_owned(),
            })
        );
        fields.set(HeaderField::Path, Value::object_path("/a")?)?;
        assert_eq!(
            fields.to_values(),
            vec![
                (HeaderField::Path, Value::object_path("/a")?),
                (HeaderField::ReplySerial, Value::Uint32(4)),
            ]
        );
        Ok(())
    }

    #[test]
    fn required_fields_per_kind() -> Result<()> {
        let call = Message::method_call(None, "/a", None, "Ping")?;
        call.validate()?;
        let mut broken = call.clone();
        broken.fields.member = None;
        assert_eq!(
            broken.validate(),
            Err(Error::MissingHeaderField {
                kind: "method call",
                field: "MEMBER"
            })
        );
        let mut error = Message::error(&call, &MethodError::failed("no"));
        error.validate()?;
        error.fields.error_name = None;
        assert!(error.validate().is_err());
        Ok(())
    }

    #[test]
    fn constructors_validate_names() {
        assert!(Message::method_call(Some("not a name"), "/a", None, "M").is_err());
        assert!(Message::method_call(None, "/a", Some("nodots"), "M").is_err());
        assert!(Message::method_call(None, "a", None, "M").is_err());
        assert!(Message::signal("/a", "org.example.I", "Bad.Member").is_err());
    }

    #[test]
    fn replies_point_back_at_the_call() -> Result<()> {
        let mut call = Message::method_call(None, "/a", Some("org.example.I"), "M")?;
        call.serial = 12;
        call.fields.sender = Some(":1.5".to_owned());
        let reply = Message::method_return(&call).with_arg(1u32);
        assert_eq!(reply.reply_serial(), Some(12));
        assert_eq!(reply.destination(), Some(":1.5"));
        assert_eq!(reply.body_signature(), "u");
        let error = Message::error(&call, &MethodError::new("bad name", "oops"));
        assert_eq!(error.error_name(), Some(error_names::FAILED));
        assert_eq!(
            error.to_method_error(),
            MethodError::new(error_names::FAILED, "oops")
        );
        Ok(())
    }

    #[test]
    fn flags() {
        let mut flags = Flags::NO_REPLY_EXPECTED | Flags::NO_AUTO_START;
        assert!(flags.contains(Flags::NO_AUTO_START));
        flags.remove(Flags::NO_AUTO_START);
        assert_eq!(flags.bits(), 1);
        assert!(Flags::from_bits(0x80).contains(Flags::NONE));
    }
}
