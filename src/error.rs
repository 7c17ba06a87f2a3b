use std;
use std::fmt::{self, Display};

use serde::{de, ser};

pub type Result<T> = std::result::Result<T, Error>;

/// Error names peers pattern-match on.
pub mod names {
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const INVALID_SIGNATURE: &str = "org.freedesktop.DBus.Error.InvalidSignature";
    pub const NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Error serializing: {0}")]
    Serializing(String),
    #[error("Error deserializing: {0}")]
    Deserializing(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Interface(#[from] InterfaceError),
    #[error("invalid object path {0:?}")]
    InvalidObjectPath(String),
    #[error("invalid {kind} {name:?}")]
    InvalidName { kind: &'static str, name: String },
    #[error("value {value} is out of range for type '{code}'")]
    IntegerOutOfRange { code: char, value: i128 },
    #[error("'{0}' is not an integer type code")]
    NotAnInteger(char),
    #[error("boolean value was {0}, expected 0 or 1")]
    InvalidBoolValue(u32),
    #[error("unexpected end of data at index {0}")]
    IndexOutOfBounds(usize),
    #[error("array elements overran the declared length: at {0}, end was {1}")]
    ArrayElementOverrun(usize, usize),
    #[error("array of {0} bytes exceeds the maximum array length")]
    ArrayTooLong(usize),
    #[error("expected signature {0:?}, found {1:?}")]
    MismatchSignature(String, String),
    #[error("cannot infer the element type of an empty array")]
    EmptyArrayLiteral,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("string contains an interior nul byte")]
    InteriorNul,
    #[error("string is not nul-terminated")]
    MissingNulTerminator,
    #[error("a struct must contain at least one field")]
    EmptyStruct,
    #[error("dict entry key of type {0:?} is not a basic type")]
    DictKeyNotBasic(String),
    #[error("containers are nested too deeply")]
    DepthExceeded,
    #[error("{0} bytes of data left over")]
    LeftoverData(usize),
    #[error("invalid endianness marker {0:#04x}")]
    InvalidEndianness(u8),
    #[error("unsupported protocol version {0}")]
    InvalidProtocolVersion(u8),
    #[error("unknown message type {0}")]
    UnknownMessageKind(u8),
    #[error("message serial must not be zero")]
    ZeroSerial,
    #[error("message of {0} bytes exceeds the maximum message length")]
    MessageTooLong(usize),
    #[error("message has a body of {0} bytes but no signature header")]
    BodyWithoutSignature(u32),
    #[error("message declares signature {0:?} but has an empty body")]
    SignatureWithoutBody(String),
    #[error("header field {field} must have type '{expected}', found '{found}'")]
    HeaderFieldType {
        field: &'static str,
        expected: String,
        found: String,
    },
    #[error("{kind} message is missing the {field} header field")]
    MissingHeaderField {
        kind: &'static str,
        field: &'static str,
    },
    #[error(transparent)]
    Call(#[from] MethodError),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("cannot await a reply to a {0} message")]
    NotAMethodCall(&'static str),
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("invalid bus address {0:?}")]
    InvalidAddress(String),
    #[error("no supported transport in bus address {0:?}")]
    UnsupportedAddress(String),
    #[error("environment variable {0} is not set")]
    MissingEnvironment(&'static str),
    #[error("a node is already registered at {0}")]
    NodeExists(String),
    #[error("no node is registered at {0}")]
    UnknownNode(String),
    #[error("interface {0} is already registered")]
    InterfaceExists(String),
    #[error("interface {0} is not registered")]
    UnknownInterface(String),
    #[error("node {path} already implements {interface}")]
    DuplicateImplementation { path: String, interface: String },
}

impl ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Serializing(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::Deserializing(msg.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

/// Malformed type signatures. `position` is the byte offset into the
/// signature where the problem was detected.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is empty")]
    Empty,
    #[error("signature of {0} bytes is longer than 255 bytes")]
    TooLong(usize),
    #[error("unknown type code {code:?} at position {position}")]
    UnknownTypeCode { code: char, position: usize },
    #[error("array at position {0} has no element type")]
    MissingArrayElement(usize),
    #[error("struct opened at position {0} is not closed")]
    UnterminatedStruct(usize),
    #[error("struct at position {0} has no fields")]
    EmptyStruct(usize),
    #[error("unmatched {delimiter:?} at position {position}")]
    UnmatchedDelimiter { delimiter: char, position: usize },
    #[error("dict entry at position {0} is not an array element")]
    DictEntryOutsideArray(usize),
    #[error("dict entry opened at position {0} is not closed")]
    UnterminatedDictEntry(usize),
    #[error("dict entry at position {0} must contain exactly two types")]
    DictEntryArity(usize),
    #[error("dict entry at position {0} has a key that is not a basic type")]
    DictEntryKeyNotBasic(usize),
    #[error("containers nested too deeply at position {0}")]
    TooDeep(usize),
    #[error("{0:?} is not a single complete type")]
    NotSingleCompleteType(String),
    #[error("range {start}..{end} is outside of signature of length {len}")]
    BadRange { start: usize, end: usize, len: usize },
}

/// Schema and implementation validation failures. Each variant names the
/// offending field so callers can tell them apart.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InterfaceError {
    #[error("{field} is not an object")]
    NotAnObject { field: String },
    #[error("{field} is not a string")]
    NotAString { field: String },
    #[error("{field} is not an array")]
    NotAnArray { field: String },
    #[error("{field} is not a boolean")]
    NotABoolean { field: String },
    #[error("{field} is not defined")]
    NotDefined { field: String },
    #[error("{field} has invalid value {value:?}, expected one of: {expected}")]
    InvalidEnumValue {
        field: String,
        value: String,
        expected: &'static str,
    },
    #[error("method {method} has more than one out argument")]
    MultipleOutArgs { method: String },
    #[error("member name {name} is used more than once")]
    DuplicateMemberName { name: String },
    #[error("{field} ({signature:?}) is not a single complete type")]
    NotASingleCompleteType { field: String, signature: String },
    #[error("{field} ({name:?}) is not a valid name")]
    InvalidName { field: String, name: String },
    #[error("implementation of {interface} is missing method {method}")]
    MissingMethod { interface: String, method: String },
    #[error("implementation of {interface} is missing property {property}")]
    MissingProperty { interface: String, property: String },
    #[error("property {property} of {interface} must have type {expected:?}, found {found:?}")]
    PropertyType {
        interface: String,
        property: String,
        expected: String,
        found: String,
    },
    #[error("{interface} does not declare a method named {member}")]
    UndeclaredMethod { interface: String, member: String },
    #[error("{interface} does not declare a property named {member}")]
    UndeclaredProperty { interface: String, member: String },
}

/// A namespaced protocol error: what handlers fail with and what remote peers
/// reply with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodError {
    pub name: String,
    pub message: Option<String>,
}

impl MethodError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(names::FAILED, message)
    }

    pub fn unknown_object(path: &str) -> Self {
        Self::new(names::UNKNOWN_OBJECT, format!("No such object path '{}'", path))
    }

    pub fn unknown_interface(interface: &str) -> Self {
        Self::new(
            names::UNKNOWN_INTERFACE,
            format!("No such interface '{}'", interface),
        )
    }

    pub fn unknown_method(interface: &str, member: &str) -> Self {
        Self::new(
            names::UNKNOWN_METHOD,
            format!("No such method '{}' on interface '{}'", member, interface),
        )
    }

    pub fn unknown_property(interface: &str, property: &str) -> Self {
        Self::new(
            names::UNKNOWN_PROPERTY,
            format!("No such property '{}' on interface '{}'", property, interface),
        )
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(names::INVALID_ARGS, message)
    }

    /// The error name as it goes on the wire: the handler's own name when it
    /// is a well-formed error name, `Failed` otherwise.
    pub fn wire_name(&self) -> &str {
        if crate::names::is_valid_error_name(&self.name) {
            &self.name
        } else {
            names::FAILED
        }
    }
}

impl Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.name, msg),
            None => write!(f, "{}", self.name),
        }
    }
}

impl std::error::Error for MethodError {}

impl From<Error> for MethodError {
    fn from(e: Error) -> Self {
        match e {
            Error::Call(e) => e,
            other => MethodError::failed(other.to_string()),
        }
    }
}
