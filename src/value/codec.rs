//! Binary marshaling of [`Value`]s.
//!
//! Offsets are always relative to the start of the buffer, which is the start
//! of the message: alignment depends on where in the message a value lands.

use super::{Array, DictEntry, Struct, Value};
use crate::align::{align, pad_vec};
use crate::error::{Error, Result, SignatureError};
use crate::path::ObjectPath;
use crate::primitives::DbusPrimitive;
use crate::signature::{Signature, Type, MAX_SIGNATURE_LEN};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::trace;
use std::marker::PhantomData;
use std::str::from_utf8;

/// Arrays may not hold more than 64 MiB of element data.
pub const MAX_ARRAY_LEN: usize = 1 << 26;

/// Containers nested deeper than this are refused in both directions.
pub const MAX_DEPTH: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    /// The first byte of every message.
    pub fn marker(self) -> u8 {
        match self {
            Endianness::Little => b'l',
            Endianness::Big => b'B',
        }
    }

    pub fn from_marker(marker: u8) -> Result<Self> {
        match marker {
            b'l' => Ok(Endianness::Little),
            b'B' => Ok(Endianness::Big),
            other => Err(Error::InvalidEndianness(other)),
        }
    }

    pub(crate) fn read_u32(self, input: &[u8]) -> u32 {
        match self {
            Endianness::Little => LittleEndian::read_u32(input),
            Endianness::Big => BigEndian::read_u32(input),
        }
    }
}

impl Default for Endianness {
    fn default() -> Self {
        Self::native()
    }
}

impl Value {
    /// Appends the encoding of `self` to `buf` and returns the new length.
    pub fn marshal(&self, buf: &mut Vec<u8>, endianness: Endianness) -> Result<usize> {
        match endianness {
            Endianness::Little => Writer::<LittleEndian>::new(buf).write_value(self, 0)?,
            Endianness::Big => Writer::<BigEndian>::new(buf).write_value(self, 0)?,
        }
        Ok(buf.len())
    }

    /// Decodes one value of type `ty` starting at `offset`. Returns the value
    /// and the offset just past it.
    pub fn unmarshal(
        ty: &Type,
        buf: &[u8],
        offset: usize,
        endianness: Endianness,
    ) -> Result<(Value, usize)> {
        match endianness {
            Endianness::Little => {
                let mut reader = Reader::<LittleEndian>::new(buf, offset);
                let value = reader.read_value(ty, 0)?;
                Ok((value, reader.pos))
            }
            Endianness::Big => {
                let mut reader = Reader::<BigEndian>::new(buf, offset);
                let value = reader.read_value(ty, 0)?;
                Ok((value, reader.pos))
            }
        }
    }
}

pub(crate) struct Writer<'a, B: ByteOrder> {
    buf: &'a mut Vec<u8>,
    phantom: PhantomData<B>,
}

impl<'a, B: ByteOrder> Writer<'a, B> {
    pub(crate) fn new(buf: &'a mut Vec<u8>) -> Self {
        Self {
            buf,
            phantom: PhantomData,
        }
    }

    fn align(&mut self, alignment: usize) {
        pad_vec(self.buf, alignment);
    }

    fn write_primitive<T: DbusPrimitive>(&mut self, val: T) {
        self.align(T::alignment());
        let start = self.buf.len();
        self.buf.resize(start + T::size(), 0);
        val.write::<B>(&mut self.buf[start..]);
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        if s.as_bytes().contains(&0) {
            return Err(Error::InteriorNul);
        }
        self.write_primitive(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn write_signature(&mut self, sig: &str) -> Result<()> {
        if sig.len() > MAX_SIGNATURE_LEN {
            return Err(SignatureError::TooLong(sig.len()).into());
        }
        self.buf.push(sig.len() as u8);
        self.buf.extend_from_slice(sig.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    pub(crate) fn write_value(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::DepthExceeded);
        }
        trace!(
            "{:indent$}marshal '{}' at {}",
            "",
            value.code() as char,
            self.buf.len(),
            indent = depth * 2
        );
        match value {
            Value::Byte(v) => self.write_primitive(*v),
            Value::Boolean(v) => self.write_primitive(*v as u32),
            Value::Int16(v) => self.write_primitive(*v),
            Value::Uint16(v) => self.write_primitive(*v),
            Value::Int32(v) => self.write_primitive(*v),
            Value::Uint32(v) | Value::UnixFd(v) => self.write_primitive(*v),
            Value::Int64(v) => self.write_primitive(*v),
            Value::Uint64(v) => self.write_primitive(*v),
            Value::Double(v) => self.write_primitive(*v),
            Value::String(s) => self.write_str(s)?,
            Value::ObjectPath(p) => self.write_str(p.as_str())?,
            Value::Signature(s) => self.write_signature(s.as_str())?,
            Value::Array(a) => self.write_array(a, depth)?,
            Value::Struct(s) => {
                self.align(8);
                for field in s.fields() {
                    self.write_value(field, depth + 1)?;
                }
            }
            Value::DictEntry(e) => {
                self.align(8);
                self.write_value(e.key(), depth + 1)?;
                self.write_value(e.value(), depth + 1)?;
            }
            Value::Variant(inner) => {
                self.write_signature(&inner.signature())?;
                self.write_value(inner, depth + 1)?;
            }
        }
        Ok(())
    }

    fn write_array(&mut self, array: &Array, depth: usize) -> Result<()> {
        self.write_primitive(0u32);
        let length_at = self.buf.len() - 4;
        // The padding after the length is present even when there are no
        // elements, and is not part of the length.
        self.align(array.element_type().alignment());
        let begin = self.buf.len();
        for item in array.items() {
            self.write_value(item, depth + 1)?;
        }
        let len = self.buf.len() - begin;
        if len > MAX_ARRAY_LEN {
            return Err(Error::ArrayTooLong(len));
        }
        B::write_u32(&mut self.buf[length_at..length_at + 4], len as u32);
        Ok(())
    }
}

pub(crate) struct Reader<'a, B: ByteOrder> {
    data: &'a [u8],
    pos: usize,
    phantom: PhantomData<B>,
}

impl<'a, B: ByteOrder> Reader<'a, B> {
    pub(crate) fn new(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos,
            phantom: PhantomData,
        }
    }

    fn align_reader(&mut self, alignment: usize) -> Result<()> {
        let aligned = align(self.pos, alignment);
        if aligned > self.data.len() {
            return Err(Error::IndexOutOfBounds(aligned));
        }
        self.pos = aligned;
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(Error::IndexOutOfBounds(usize::MAX))?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(Error::IndexOutOfBounds(end))?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_primitive<T: DbusPrimitive>(&mut self) -> Result<T> {
        self.align_reader(T::alignment())?;
        let bytes = self.read(T::size())?;
        Ok(T::read::<B>(bytes))
    }

    fn read_terminated(&mut self, len: usize) -> Result<&'a str> {
        let bytes = self.read(len + 1)?;
        let (text, nul) = bytes.split_at(len);
        if nul != [0] {
            return Err(Error::MissingNulTerminator);
        }
        if text.contains(&0) {
            return Err(Error::InteriorNul);
        }
        Ok(from_utf8(text)?)
    }

    fn read_str(&mut self) -> Result<&'a str> {
        let len = self.read_primitive::<u32>()? as usize;
        self.read_terminated(len)
    }

    fn read_signature(&mut self) -> Result<&'a str> {
        let len = self.read_primitive::<u8>()? as usize;
        self.read_terminated(len)
    }

    pub(crate) fn read_value(&mut self, ty: &Type, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Error::DepthExceeded);
        }
        trace!(
            "{:indent$}unmarshal '{}' at {}",
            "",
            ty.code() as char,
            self.pos,
            indent = depth * 2
        );
        let value = match ty {
            Type::Byte => Value::Byte(self.read_primitive()?),
            Type::Boolean => match self.read_primitive::<u32>()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => return Err(Error::InvalidBoolValue(other)),
            },
            Type::Int16 => Value::Int16(self.read_primitive()?),
            Type::Uint16 => Value::Uint16(self.read_primitive()?),
            Type::Int32 => Value::Int32(self.read_primitive()?),
            Type::Uint32 => Value::Uint32(self.read_primitive()?),
            Type::Int64 => Value::Int64(self.read_primitive()?),
            Type::Uint64 => Value::Uint64(self.read_primitive()?),
            Type::Double => Value::Double(self.read_primitive()?),
            Type::UnixFd => Value::UnixFd(self.read_primitive()?),
            Type::String => Value::String(self.read_str()?.to_owned()),
            Type::ObjectPath => Value::ObjectPath(ObjectPath::new(self.read_str()?)?),
            Type::Signature => Value::Signature(Signature::new(self.read_signature()?)?),
            Type::Array(element) => Value::Array(self.read_array(element, depth)?),
            Type::Struct(fields) => {
                self.align_reader(8)?;
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.read_value(field, depth + 1)?);
                }
                Value::Struct(Struct::new(values)?)
            }
            Type::DictEntry(key, value) => {
                self.align_reader(8)?;
                let key = self.read_value(key, depth + 1)?;
                let value = self.read_value(value, depth + 1)?;
                Value::DictEntry(DictEntry::new(key, value)?)
            }
            Type::Variant => {
                let sig = self.read_signature()?;
                let inner = Type::parse_single(sig)?;
                Value::Variant(Box::new(self.read_value(&inner, depth + 1)?))
            }
        };
        Ok(value)
    }

    fn read_array(&mut self, element: &Type, depth: usize) -> Result<Array> {
        let len = self.read_primitive::<u32>()? as usize;
        if len > MAX_ARRAY_LEN {
            return Err(Error::ArrayTooLong(len));
        }
        self.align_reader(element.alignment())?;
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(Error::IndexOutOfBounds(end));
        }
        let mut array = Array::new(element.clone())?;
        while self.pos < end {
            let item = self.read_value(element, depth + 1)?;
            array.items.push(item);
        }
        if self.pos > end {
            return Err(Error::ArrayElementOverrun(self.pos, end));
        }
        Ok(array)
    }
}
