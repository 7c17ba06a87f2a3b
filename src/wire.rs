//! Framing of whole messages.
//!
//! A message is the header struct `(yyyyuua(yv))`, padding to 8, then the
//! body. The first 16 bytes always have a fixed layout, which is what lets
//! [`decode`] work out the total length before anything else is parsed.

use crate::align::{align, pad_vec};
use crate::error::{Error, Result};
use crate::message::{Flags, HeaderField, HeaderFields, Message, MessageKind};
use crate::signature::{Signature, Type};
use crate::value::codec::Endianness;
use crate::value::{Array, Struct, Value};

use log::{debug, trace};

pub const PROTOCOL_VERSION: u8 = 1;
pub const FIXED_HEADER_LEN: usize = 16;
/// No message, header included, may exceed 128 MiB.
pub const MAX_MESSAGE_LEN: usize = 1 << 27;
pub const HEADER_SIGNATURE: &str = "(yyyyuua(yv))";

#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Complete { message: Message, consumed: usize },
    Incomplete,
}

fn header_field_type() -> Type {
    Type::Struct(vec![Type::Byte, Type::Variant])
}

fn header_type() -> Type {
    Type::Struct(vec![
        Type::Byte,
        Type::Byte,
        Type::Byte,
        Type::Byte,
        Type::Uint32,
        Type::Uint32,
        Type::Array(Box::new(header_field_type())),
    ])
}

/// Encodes `message` with the given serial. `sender`, when set, overrides the
/// SENDER header field.
pub fn encode(message: &Message, serial: u32, sender: Option<&str>) -> Result<Vec<u8>> {
    if serial == 0 {
        return Err(Error::ZeroSerial);
    }
    message.validate()?;
    let endianness = message.endianness;

    let mut body = Vec::new();
    for value in &message.body {
        value.marshal(&mut body, endianness)?;
    }
    let mut fields = message.fields.clone();
    fields.signature = if message.body.is_empty() {
        None
    } else {
        Some(Signature::new(message.body_signature())?)
    };
    if let Some(sender) = sender {
        fields.sender = Some(sender.to_owned());
    }

    let mut field_array = Array::new(header_field_type())?;
    for (field, value) in fields.to_values() {
        field_array.push(Value::Struct(Struct::new(vec![
            Value::Byte(field.code()),
            Value::variant(value),
        ])?))?;
    }
    let header = Value::Struct(Struct::new(vec![
        Value::Byte(endianness.marker()),
        Value::Byte(message.kind as u8),
        Value::Byte(message.flags.bits()),
        Value::Byte(PROTOCOL_VERSION),
        Value::Uint32(body.len() as u32),
        Value::Uint32(serial),
        Value::Array(field_array),
    ])?);

    let mut out = Vec::with_capacity(FIXED_HEADER_LEN + 64 + body.len());
    header.marshal(&mut out, endianness)?;
    pad_vec(&mut out, 8);
    out.extend_from_slice(&body);
    if out.len() > MAX_MESSAGE_LEN {
        return Err(Error::MessageTooLong(out.len()));
    }
    trace!("encoded {} into {} bytes", message, out.len());
    Ok(out)
}

/// Total frame length announced by the fixed part of a header.
fn frame_len(endianness: Endianness, buf: &[u8]) -> usize {
    let body_len = endianness.read_u32(&buf[4..8]) as usize;
    let fields_len = endianness.read_u32(&buf[12..16]) as usize;
    align(FIXED_HEADER_LEN + fields_len, 8) + body_len
}

/// Decodes the message at the start of `buf`, if all of it is there.
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    if buf.len() < FIXED_HEADER_LEN {
        return Ok(Decoded::Incomplete);
    }
    let endianness = Endianness::from_marker(buf[0])?;
    let total = frame_len(endianness, buf);
    if total > MAX_MESSAGE_LEN {
        return Err(Error::MessageTooLong(total));
    }
    if buf.len() < total {
        return Ok(Decoded::Incomplete);
    }
    let frame = &buf[..total];

    let (header, header_end) = Value::unmarshal(&header_type(), frame, 0, endianness)?;
    let body_start = align(header_end, 8);
    let header = match header {
        Value::Struct(s) => s.into_fields(),
        other => {
            return Err(Error::MismatchSignature(
                HEADER_SIGNATURE.to_owned(),
                other.signature(),
            ))
        }
    };
    let (kind, flags, version, body_len, serial, raw_fields) = match header.as_slice() {
        [Value::Byte(_), Value::Byte(kind), Value::Byte(flags), Value::Byte(version), Value::Uint32(body_len), Value::Uint32(serial), Value::Array(fields)] => {
            (*kind, *flags, *version, *body_len, *serial, fields)
        }
        _ => {
            return Err(Error::MismatchSignature(
                HEADER_SIGNATURE.to_owned(),
                Type::Struct(header.iter().map(Value::value_type).collect()).signature(),
            ))
        }
    };
    if version != PROTOCOL_VERSION {
        return Err(Error::InvalidProtocolVersion(version));
    }
    let kind = MessageKind::from_u8(kind)?;
    if serial == 0 {
        return Err(Error::ZeroSerial);
    }

    let mut fields = HeaderFields::default();
    for item in raw_fields.iter() {
        if let Some([Value::Byte(code), Value::Variant(value)]) =
            item.as_struct().map(Struct::fields)
        {
            match HeaderField::from_code(*code) {
                Some(field) => fields.set(field, (**value).clone())?,
                None => debug!("ignoring unknown header field {}", code),
            }
        }
    }

    let signature = fields.signature.clone().filter(|s| !s.is_empty());
    let body = match signature {
        Some(sig) => {
            if body_len == 0 {
                return Err(Error::SignatureWithoutBody(sig.to_string()));
            }
            let body_type = Type::Struct(sig.types()?);
            let (body, body_end) = Value::unmarshal(&body_type, frame, body_start, endianness)?;
            if body_end != total {
                return Err(Error::LeftoverData(total - body_end));
            }
            match body {
                Value::Struct(s) => s.into_fields(),
                _ => Vec::new(),
            }
        }
        None if body_len != 0 => return Err(Error::BodyWithoutSignature(body_len)),
        None => Vec::new(),
    };

    let message = Message {
        endianness,
        kind,
        flags: Flags::from_bits(flags),
        serial,
        fields,
        body,
    };
    message.validate()?;
    trace!("decoded {} from {} bytes", message, total);
    Ok(Decoded::Complete {
        message,
        consumed: total,
    })
}

/// Reassembles messages from a byte stream delivered in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// The next complete message, or `None` until more bytes arrive.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        match decode(&self.buf)? {
            Decoded::Complete { message, consumed } => {
                self.buf.drain(..consumed);
                Ok(Some(message))
            }
            Decoded::Incomplete => Ok(None),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MethodError;
    use test_log::test;

    fn call() -> Result<Message> {
        Ok(Message::method_call(
            Some("org.freedesktop.DBus"),
            "/org/freedesktop/DBus",
            Some("org.freedesktop.DBus"),
            "Hello",
        )?)
    }

    fn complete(decoded: Decoded) -> (Message, usize) {
        match decoded {
            Decoded::Complete { message, consumed } => (message, consumed),
            Decoded::Incomplete => panic!("message should be complete"),
        }
    }

    #[test]
    fn encodes_hello_like_the_reference_bus() -> Result<()> {
        let mut hello = call()?;
        hello.endianness = Endianness::Little;
        let bytes = encode(&hello, 1, None)?;
        assert_eq!(&bytes[..4], &[b'l', 1, 0, 1]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(bytes.len() % 8, 0);
        let (decoded, consumed) = complete(decode(&bytes)?);
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.serial, 1);
        assert_eq!(decoded.member(), Some("Hello"));
        assert_eq!(decoded.destination(), Some("org.freedesktop.DBus"));
        assert!(decoded.body.is_empty());
        assert_eq!(decoded.fields.signature, None);
        Ok(())
    }

    #[test]
    fn round_trips_with_body_in_both_orders() -> Result<()> {
        for endianness in [Endianness::Little, Endianness::Big] {
            let mut msg = call()?
                .with_arg("text")
                .with_arg(Value::Uint64(u64::MAX))
                .with_arg(Value::variant(Value::Int16(-2)))
                .with_flags(Flags::NO_AUTO_START);
            msg.endianness = endianness;
            let bytes = encode(&msg, 77, Some(":1.3"))?;
            let (decoded, _) = complete(decode(&bytes)?);
            assert_eq!(decoded.body, msg.body);
            assert_eq!(decoded.sender(), Some(":1.3"));
            assert_eq!(decoded.fields.signature.as_ref().map(|s| s.as_str()), Some("stv"));
            assert!(decoded.flags.contains(Flags::NO_AUTO_START));
            assert_eq!(decoded.endianness, endianness);
        }
        Ok(())
    }

    #[test]
    fn incomplete_until_every_byte_is_there() -> Result<()> {
        let bytes = encode(&call()?.with_arg("payload"), 5, None)?;
        for cut in [0, 10, FIXED_HEADER_LEN, bytes.len() - 1] {
            assert_eq!(decode(&bytes[..cut])?, Decoded::Incomplete);
        }
        let mut two = bytes.clone();
        two.extend_from_slice(&bytes);
        let (_, consumed) = complete(decode(&two)?);
        assert_eq!(consumed, bytes.len());
        Ok(())
    }

    #[test]
    fn frame_buffer_reassembles_fragments() -> Result<()> {
        let first = encode(&call()?.with_arg(1u32), 1, None)?;
        let second = encode(&call()?.with_arg(2u32), 2, None)?;
        let mut stream = first.clone();
        stream.extend_from_slice(&second);
        let mut frames = FrameBuffer::new();
        let mut seen = Vec::new();
        for chunk in stream.chunks(7) {
            frames.push(chunk);
            while let Some(message) = frames.next_message()? {
                seen.push(message.serial);
            }
        }
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(frames.buffered(), 0);
        Ok(())
    }

    #[test]
    fn rejects_bad_fixed_header() -> Result<()> {
        let bytes = encode(&call()?, 1, None)?;
        let mut bad = bytes.clone();
        bad[0] = b'x';
        assert_eq!(decode(&bad), Err(Error::InvalidEndianness(b'x')));
        let mut bad = bytes.clone();
        bad[3] = 2;
        assert_eq!(decode(&bad), Err(Error::InvalidProtocolVersion(2)));
        let mut bad = bytes.clone();
        bad[1] = 9;
        assert_eq!(decode(&bad), Err(Error::UnknownMessageKind(9)));
        let mut bad = bytes;
        bad[8..12].copy_from_slice(&[0, 0, 0, 0]);
        assert_eq!(decode(&bad), Err(Error::ZeroSerial));
        Ok(())
    }

    #[test]
    fn rejects_body_without_signature() -> Result<()> {
        let mut msg = call()?;
        msg.endianness = Endianness::Little;
        let mut bytes = encode(&msg, 1, None)?;
        bytes[4..8].copy_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 8]);
        assert_eq!(decode(&bytes), Err(Error::BodyWithoutSignature(8)));
        Ok(())
    }

    #[test]
    fn rejects_oversized_messages() {
        let mut bytes = vec![b'l', 1, 0, 1];
        bytes.extend_from_slice(&(MAX_MESSAGE_LEN as u32).to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            decode(&bytes),
            Err(Error::MessageTooLong(MAX_MESSAGE_LEN + 16))
        );
    }

    #[test]
    fn encode_refuses_incomplete_messages() -> Result<()> {
        assert_eq!(encode(&call()?, 0, None), Err(Error::ZeroSerial));
        let mut reply = Message::method_return(&call()?);
        reply.fields.reply_serial = None;
        assert!(matches!(
            encode(&reply, 1, None),
            Err(Error::MissingHeaderField { .. })
        ));
        let error = Message::error(&call()?, &MethodError::failed("boom"));
        let (decoded, _) = complete(decode(&encode(&error, 3, None)?)?);
        assert_eq!(decoded.to_method_error(), MethodError::failed("boom"));
        Ok(())
    }
}
