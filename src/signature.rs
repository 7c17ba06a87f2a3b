//! Type signatures: parsing, splitting into single complete types, and the
//! closed [`Type`] enum every codec operation dispatches on.

use crate::error::SignatureError;

use std::fmt::{self, Display};
use std::ops::Range;
use std::str::FromStr;

pub const TY_BYTE: u8 = b'y';
pub const TY_BOOLEAN: u8 = b'b';
pub const TY_INT16: u8 = b'n';
pub const TY_UINT16: u8 = b'q';
pub const TY_INT32: u8 = b'i';
pub const TY_UINT32: u8 = b'u';
pub const TY_INT64: u8 = b'x';
pub const TY_UINT64: u8 = b't';
pub const TY_DOUBLE: u8 = b'd';
pub const TY_UNIX_FD: u8 = b'h';
pub const TY_STRING: u8 = b's';
pub const TY_OBJECT_PATH: u8 = b'o';
pub const TY_SIGNATURE: u8 = b'g';
pub const TY_ARRAY: u8 = b'a';
pub const TY_VARIANT: u8 = b'v';
pub const TY_STRUCT_BEGIN: u8 = b'(';
pub const TY_STRUCT_END: u8 = b')';
pub const TY_DICT_ENTRY_BEGIN: u8 = b'{';
pub const TY_DICT_ENTRY_END: u8 = b'}';

pub const MAX_SIGNATURE_LEN: usize = 255;
const MAX_ARRAY_DEPTH: usize = 32;
const MAX_STRUCT_DEPTH: usize = 32;

/// One single complete type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    UnixFd,
    String,
    ObjectPath,
    Signature,
    Variant,
    Array(Box<Type>),
    Struct(Vec<Type>),
    DictEntry(Box<Type>, Box<Type>),
}

impl Type {
    /// The table of single-character types, keyed by type code.
    pub fn from_code(code: u8) -> Option<Type> {
        let ty = match code {
            TY_BYTE => Type::Byte,
            TY_BOOLEAN => Type::Boolean,
            TY_INT16 => Type::Int16,
            TY_UINT16 => Type::Uint16,
            TY_INT32 => Type::Int32,
            TY_UINT32 => Type::Uint32,
            TY_INT64 => Type::Int64,
            TY_UINT64 => Type::Uint64,
            TY_DOUBLE => Type::Double,
            TY_UNIX_FD => Type::UnixFd,
            TY_STRING => Type::String,
            TY_OBJECT_PATH => Type::ObjectPath,
            TY_SIGNATURE => Type::Signature,
            TY_VARIANT => Type::Variant,
            _ => return None,
        };
        Some(ty)
    }

    /// The leading character of this type's signature.
    pub fn code(&self) -> u8 {
        match self {
            Type::Byte => TY_BYTE,
            Type::Boolean => TY_BOOLEAN,
            Type::Int16 => TY_INT16,
            Type::Uint16 => TY_UINT16,
            Type::Int32 => TY_INT32,
            Type::Uint32 => TY_UINT32,
            Type::Int64 => TY_INT64,
            Type::Uint64 => TY_UINT64,
            Type::Double => TY_DOUBLE,
            Type::UnixFd => TY_UNIX_FD,
            Type::String => TY_STRING,
            Type::ObjectPath => TY_OBJECT_PATH,
            Type::Signature => TY_SIGNATURE,
            Type::Variant => TY_VARIANT,
            Type::Array(_) => TY_ARRAY,
            Type::Struct(_) => TY_STRUCT_BEGIN,
            Type::DictEntry(..) => TY_DICT_ENTRY_BEGIN,
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            Type::Byte | Type::Signature | Type::Variant => 1,
            Type::Int16 | Type::Uint16 => 2,
            Type::Boolean
            | Type::Int32
            | Type::Uint32
            | Type::UnixFd
            | Type::String
            | Type::ObjectPath
            | Type::Array(_) => 4,
            Type::Int64 | Type::Uint64 | Type::Double | Type::Struct(_) | Type::DictEntry(..) => 8,
        }
    }

    /// Encoded size for fixed-size types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Type::Byte => Some(1),
            Type::Int16 | Type::Uint16 => Some(2),
            Type::Boolean | Type::Int32 | Type::Uint32 | Type::UnixFd => Some(4),
            Type::Int64 | Type::Uint64 | Type::Double => Some(8),
            _ => None,
        }
    }

    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            Type::Variant | Type::Array(_) | Type::Struct(_) | Type::DictEntry(..)
        )
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, Type::String | Type::ObjectPath | Type::Signature)
    }

    pub fn write_signature(&self, out: &mut String) {
        match self {
            Type::Array(element) => {
                out.push(TY_ARRAY as char);
                element.write_signature(out);
            }
            Type::Struct(fields) => {
                out.push(TY_STRUCT_BEGIN as char);
                for field in fields {
                    field.write_signature(out);
                }
                out.push(TY_STRUCT_END as char);
            }
            Type::DictEntry(key, value) => {
                out.push(TY_DICT_ENTRY_BEGIN as char);
                key.write_signature(out);
                value.write_signature(out);
                out.push(TY_DICT_ENTRY_END as char);
            }
            basic => out.push(basic.code() as char),
        }
    }

    pub fn signature(&self) -> String {
        let mut out = String::new();
        self.write_signature(&mut out);
        out
    }

    /// Parses a signature that must contain exactly one complete type.
    pub fn parse_single(sig: &str) -> Result<Type, SignatureError> {
        let mut types = Self::parse_many(sig)?;
        match types.len() {
            0 => Err(SignatureError::Empty),
            1 => Ok(types.remove(0)),
            _ => Err(SignatureError::NotSingleCompleteType(sig.to_owned())),
        }
    }

    /// Parses a signature of zero or more complete types.
    pub fn parse_many(sig: &str) -> Result<Vec<Type>, SignatureError> {
        let mut parser = Parser::new(sig)?;
        let mut types = Vec::new();
        while !parser.eof() {
            types.push(parser.parse_one(false)?);
        }
        Ok(types)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

struct Parser<'a> {
    sig: &'a [u8],
    pos: usize,
    array_depth: usize,
    struct_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(sig: &'a str) -> Result<Self, SignatureError> {
        if sig.len() > MAX_SIGNATURE_LEN {
            return Err(SignatureError::TooLong(sig.len()));
        }
        Ok(Self {
            sig: sig.as_bytes(),
            pos: 0,
            array_depth: 0,
            struct_depth: 0,
        })
    }

    fn eof(&self) -> bool {
        self.pos >= self.sig.len()
    }

    fn peek(&self) -> Option<u8> {
        self.sig.get(self.pos).copied()
    }

    fn parse_one(&mut self, array_element: bool) -> Result<Type, SignatureError> {
        let start = self.pos;
        let code = match self.peek() {
            Some(c) => c,
            None => return Err(SignatureError::Empty),
        };
        self.pos += 1;
        if let Some(ty) = Type::from_code(code) {
            return Ok(ty);
        }
        match code {
            TY_ARRAY => {
                self.array_depth += 1;
                if self.array_depth > MAX_ARRAY_DEPTH {
                    return Err(SignatureError::TooDeep(start));
                }
                match self.peek() {
                    None | Some(TY_STRUCT_END) | Some(TY_DICT_ENTRY_END) => {
                        return Err(SignatureError::MissingArrayElement(start))
                    }
                    _ => (),
                }
                let element = self.parse_one(true)?;
                self.array_depth -= 1;
                Ok(Type::Array(Box::new(element)))
            }
            TY_STRUCT_BEGIN => {
                self.enter_struct(start)?;
                let mut fields = Vec::new();
                loop {
                    match self.peek() {
                        None => return Err(SignatureError::UnterminatedStruct(start)),
                        Some(TY_STRUCT_END) => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => fields.push(self.parse_one(false)?),
                    }
                }
                if fields.is_empty() {
                    return Err(SignatureError::EmptyStruct(start));
                }
                self.struct_depth -= 1;
                Ok(Type::Struct(fields))
            }
            TY_DICT_ENTRY_BEGIN => {
                if !array_element {
                    return Err(SignatureError::DictEntryOutsideArray(start));
                }
                self.enter_struct(start)?;
                let key = self.dict_entry_field(start)?;
                if !key.is_basic() {
                    return Err(SignatureError::DictEntryKeyNotBasic(start));
                }
                let value = self.dict_entry_field(start)?;
                match self.peek() {
                    None => return Err(SignatureError::UnterminatedDictEntry(start)),
                    Some(TY_DICT_ENTRY_END) => self.pos += 1,
                    Some(_) => return Err(SignatureError::DictEntryArity(start)),
                }
                self.struct_depth -= 1;
                Ok(Type::DictEntry(Box::new(key), Box::new(value)))
            }
            TY_STRUCT_END | TY_DICT_ENTRY_END => Err(SignatureError::UnmatchedDelimiter {
                delimiter: code as char,
                position: start,
            }),
            other => Err(SignatureError::UnknownTypeCode {
                code: other as char,
                position: start,
            }),
        }
    }

    fn enter_struct(&mut self, start: usize) -> Result<(), SignatureError> {
        self.struct_depth += 1;
        if self.struct_depth > MAX_STRUCT_DEPTH {
            return Err(SignatureError::TooDeep(start));
        }
        Ok(())
    }

    fn dict_entry_field(&mut self, start: usize) -> Result<Type, SignatureError> {
        match self.peek() {
            None => Err(SignatureError::UnterminatedDictEntry(start)),
            Some(TY_DICT_ENTRY_END) => Err(SignatureError::DictEntryArity(start)),
            Some(_) => self.parse_one(false),
        }
    }
}

/// Splits a signature into its single complete types.
pub fn split_signature(sig: &str) -> Result<Vec<&str>, SignatureError> {
    let mut parser = Parser::new(sig)?;
    let mut parts = Vec::new();
    while !parser.eof() {
        let start = parser.pos;
        parser.parse_one(false)?;
        parts.push(&sig[start..parser.pos]);
    }
    Ok(parts)
}

/// Like [`split_signature`], restricted to `range` of `sig`.
pub fn split_signature_range(
    sig: &str,
    range: Range<usize>,
) -> Result<Vec<&str>, SignatureError> {
    let Range { start, end } = range;
    if start > end || end > sig.len() || !sig.is_char_boundary(start) || !sig.is_char_boundary(end)
    {
        return Err(SignatureError::BadRange {
            start,
            end,
            len: sig.len(),
        });
    }
    split_signature(&sig[start..end])
}

/// A validated signature of zero or more complete types.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(String);

impl Signature {
    pub fn new(sig: impl Into<String>) -> Result<Self, SignatureError> {
        let sig = sig.into();
        Type::parse_many(&sig)?;
        Ok(Self(sig))
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn from_types<'a>(types: impl IntoIterator<Item = &'a Type>) -> Result<Self, SignatureError> {
        let mut sig = String::new();
        for ty in types {
            ty.write_signature(&mut sig);
        }
        Self::new(sig)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn types(&self) -> Result<Vec<Type>, SignatureError> {
        Type::parse_many(&self.0)
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Signature {
    type Error = SignatureError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn split_header_signature() -> Result<(), SignatureError> {
        assert_eq!(
            split_signature("yyyyuua(yv)")?,
            vec!["y", "y", "y", "y", "u", "u", "a(yv)"]
        );
        Ok(())
    }

    #[test]
    fn split_dict() -> Result<(), SignatureError> {
        assert_eq!(split_signature("oa{sv}")?, vec!["o", "a{sv}"]);
        assert_eq!(split_signature("")?, Vec::<&str>::new());
        Ok(())
    }

    #[test]
    fn split_range() -> Result<(), SignatureError> {
        assert_eq!(split_signature_range("yyyyuua(yv)", 6..11)?, vec!["a(yv)"]);
        assert!(matches!(
            split_signature_range("yy", 1..5),
            Err(SignatureError::BadRange { .. })
        ));
        Ok(())
    }

    #[test]
    fn bare_array_fails() {
        assert_eq!(
            split_signature("a"),
            Err(SignatureError::MissingArrayElement(0))
        );
        assert_eq!(
            split_signature("(a)"),
            Err(SignatureError::MissingArrayElement(1))
        );
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(
            split_signature("z"),
            Err(SignatureError::UnknownTypeCode {
                code: 'z',
                position: 0
            })
        );
        assert_eq!(split_signature("(ii"), Err(SignatureError::UnterminatedStruct(0)));
        assert_eq!(
            split_signature("ii)"),
            Err(SignatureError::UnmatchedDelimiter {
                delimiter: ')',
                position: 2
            })
        );
        assert_eq!(split_signature("()"), Err(SignatureError::EmptyStruct(0)));
        assert_eq!(
            split_signature("{sv}"),
            Err(SignatureError::DictEntryOutsideArray(0))
        );
        assert_eq!(
            split_signature("(i{sv})"),
            Err(SignatureError::DictEntryOutsideArray(2))
        );
        assert_eq!(
            split_signature("a{vs}"),
            Err(SignatureError::DictEntryKeyNotBasic(1))
        );
        assert_eq!(split_signature("a{s}"), Err(SignatureError::DictEntryArity(1)));
        assert_eq!(split_signature("a{sss}"), Err(SignatureError::DictEntryArity(1)));
        assert_eq!(
            split_signature("a{sv"),
            Err(SignatureError::UnterminatedDictEntry(1))
        );
    }

    #[test]
    fn depth_limits() {
        let deep_arrays = "a".repeat(33) + "y";
        assert!(matches!(
            split_signature(&deep_arrays),
            Err(SignatureError::TooDeep(_))
        ));
        let ok_arrays = "a".repeat(32) + "y";
        assert!(split_signature(&ok_arrays).is_ok());
        let too_long = "y".repeat(256);
        assert_eq!(split_signature(&too_long), Err(SignatureError::TooLong(256)));
    }

    #[test]
    fn parse_single_requires_one_type() {
        assert_eq!(
            Type::parse_single("a{sv}"),
            Ok(Type::Array(Box::new(Type::DictEntry(
                Box::new(Type::String),
                Box::new(Type::Variant)
            ))))
        );
        assert_eq!(
            Type::parse_single("ii"),
            Err(SignatureError::NotSingleCompleteType("ii".to_owned()))
        );
        assert_eq!(Type::parse_single(""), Err(SignatureError::Empty));
    }

    #[test]
    fn signature_round_trips_through_type() -> Result<(), SignatureError> {
        for sig in ["y", "a(yv)", "a{oa{sa{sv}}}", "(sd(sd))", "aai"] {
            assert_eq!(Type::parse_single(sig)?.signature(), sig);
        }
        Ok(())
    }

    #[test]
    fn alignment_and_sizes() {
        assert_eq!(Type::Byte.alignment(), 1);
        assert_eq!(Type::Boolean.fixed_size(), Some(4));
        assert_eq!(Type::Struct(vec![Type::Byte]).alignment(), 8);
        assert_eq!(Type::Variant.alignment(), 1);
        assert_eq!(Type::String.fixed_size(), None);
        assert!(Type::ObjectPath.is_basic());
        assert!(!Type::Variant.is_basic());
    }

    #[test]
    fn signature_newtype_validates() {
        assert!(Signature::new("a{sv}").is_ok());
        assert!(Signature::new("").is_ok());
        assert!(Signature::new("a{").is_err());
        assert_eq!("ss".parse::<Signature>().map(|s| s.len()), Ok(2));
    }
}
