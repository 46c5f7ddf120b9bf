//! Message trait and the header + body framing shared by every message type.
//!
//! Concrete messages only describe their body. [`encode`] and [`decode_body`]
//! wrap a body in its header, keep the declared data size honest, and roll
//! the buffer back when any field fails so a caller never sees a partially
//! written or partially read message.

use std::any::Any;
use std::fmt;

use bytes::Bytes;

use crate::codec::{CodecError, Packet};
use crate::presence::PresenceVectorSize;
use crate::wire::{DataFlag, Header, Version, HEADER_SIZE, MAX_DATA_SIZE};

/// A JAUS message body.
pub trait Message: Send + Sync + fmt::Debug {
    /// Command code identifying this message type.
    fn command_code(&self) -> u16;

    /// Human-readable message name, for logs.
    fn name(&self) -> &'static str;

    fn presence_vector_size(&self, _version: Version) -> PresenceVectorSize {
        PresenceVectorSize::None
    }

    /// Canonical mask of the presence vector bits legal for `version`.
    fn presence_vector_mask(&self, _version: Version) -> u32 {
        0
    }

    /// Append the body. Returns bytes written.
    fn write_body(&self, packet: &mut Packet, version: Version) -> Result<usize, CodecError>;

    /// Read the body from the packet cursor. Returns bytes read.
    fn read_body(&mut self, packet: &mut Packet, version: Version) -> Result<usize, CodecError>;

    fn clone_box(&self) -> Box<dyn Message>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn Message> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Write `header` followed by the body of `message` into `packet`.
///
/// The header's command code, data flag and data size are taken from the
/// message. On failure the packet is truncated back to its original length.
pub fn encode_into(
    packet: &mut Packet,
    message: &dyn Message,
    header: &Header,
) -> Result<usize, CodecError> {
    let start = packet.len();
    let result = write_framed(packet, message, header, start);
    if let Err(e) = &result {
        packet.truncate(start);
        tracing::debug!(
            message = message.name(),
            code = message.command_code(),
            error = %e,
            "message encode rejected"
        );
    }
    result
}

fn write_framed(
    packet: &mut Packet,
    message: &dyn Message,
    header: &Header,
    start: usize,
) -> Result<usize, CodecError> {
    let mut framed = Header {
        command_code: message.command_code(),
        data_flag: DataFlag::Single,
        data_size: 0,
        ..*header
    };
    packet.write_header(&framed)?;
    let body = message.write_body(packet, header.version)?;
    if packet.len() - start - HEADER_SIZE != body {
        return Err(CodecError::WriteFailure {
            expected: body,
            actual: packet.len() - start - HEADER_SIZE,
        });
    }
    if body > MAX_DATA_SIZE {
        return Err(CodecError::InvalidValue(format!(
            "body of {body} bytes exceeds {MAX_DATA_SIZE}"
        )));
    }
    framed.data_size = body as u16;
    packet.write_header_at(start, &framed)?;
    Ok(HEADER_SIZE + body)
}

/// Encode `message` into a fresh packet.
pub fn encode(message: &dyn Message, header: &Header) -> Result<Packet, CodecError> {
    let mut packet = Packet::new();
    encode_into(&mut packet, message, header)?;
    Ok(packet)
}

/// Body bytes only, for comparing two messages of the same type.
pub fn body_bytes(message: &dyn Message, version: Version) -> Result<Bytes, CodecError> {
    let mut packet = Packet::new();
    message.write_body(&mut packet, version)?;
    Ok(packet.freeze())
}

/// Read the body described by `header` from the packet cursor into `message`.
///
/// The body is read in place from a view bounded by the header's data size,
/// so positions the body refers to are positions in `packet`. The message
/// must consume exactly the declared bytes. On failure the cursor is
/// left where it was and `message` must be discarded, since fields read
/// before the failing one have already been overwritten.
pub fn decode_body(
    message: &mut dyn Message,
    packet: &mut Packet,
    header: &Header,
) -> Result<usize, CodecError> {
    let size = header.data_size as usize;
    if size > packet.remaining() {
        return Err(CodecError::BadPacket {
            need: size,
            remaining: packet.remaining(),
        });
    }

    let start = packet.read_pos();
    let end = start + size;
    let outcome = packet.read_within(end, |body| {
        let read = message.read_body(body, header.version)?;
        Ok::<_, CodecError>((read, body.remaining()))
    })?;
    let (read, left) = match outcome {
        Ok(counts) => counts,
        Err(e) => {
            packet.set_read_pos(start)?;
            return Err(e);
        }
    };
    if read != size || left != 0 {
        packet.set_read_pos(start)?;
        tracing::debug!(
            message = message.name(),
            declared = size,
            read,
            "body length does not match header"
        );
        return Err(CodecError::ReadFailure {
            expected: size,
            actual: read,
        });
    }

    packet.set_read_pos(end)?;
    Ok(size)
}

/// Read a header from the packet cursor, then the body into `message`.
///
/// Fails if the header's command code is not the message's own.
pub fn decode(message: &mut dyn Message, packet: &mut Packet) -> Result<Header, CodecError> {
    let start = packet.read_pos();
    let result = read_framed(message, packet);
    if result.is_err() {
        packet.set_read_pos(start)?;
    }
    result
}

fn read_framed(message: &mut dyn Message, packet: &mut Packet) -> Result<Header, CodecError> {
    let header = packet.read_header()?;
    if header.command_code != message.command_code() {
        return Err(CodecError::InvalidValue(format!(
            "command code 0x{:04x} does not match {} (0x{:04x})",
            header.command_code,
            message.name(),
            message.command_code()
        )));
    }
    decode_body(message, packet, &header)?;
    Ok(header)
}
