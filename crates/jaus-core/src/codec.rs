//! Field codec: the byte buffer every message is written into and read from.
//!
//! A [`Packet`] is an ordered byte sequence with an independent read cursor.
//! Writes append little-endian fixed-width fields and return the number of
//! bytes transferred; reads consume from the cursor and fail instead of
//! returning partial values.

use bytes::{BufMut, Bytes, BytesMut};

use crate::scaled::{self, ScaledWidth};
use crate::wire::{Header, WireError, HEADER_SIZE};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while encoding or decoding a message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// Bytes written did not add up to what the presence vector promised.
    #[error("write failure: expected {expected} bytes, wrote {actual}")]
    WriteFailure { expected: usize, actual: usize },

    /// Bytes read did not add up to what the structure requires.
    #[error("read failure: expected {expected} bytes, read {actual}")]
    ReadFailure { expected: usize, actual: usize },

    #[error("unsupported protocol version 0x{0:02x}")]
    UnsupportedVersion(u8),

    /// A declared variable-length field runs past the end of the buffer.
    #[error("bad packet: declared {need} bytes, {remaining} remaining")]
    BadPacket { need: usize, remaining: usize },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("header: {0}")]
    Wire(#[from] WireError),
}

// ── Packet ────────────────────────────────────────────────────────────────────

macro_rules! fixed_width {
    ($($write:ident, $write_at:ident, $read:ident, $ty:ty);* $(;)?) => {
        $(
            pub fn $write(&mut self, value: $ty) -> usize {
                self.data.extend_from_slice(&value.to_le_bytes());
                std::mem::size_of::<$ty>()
            }

            pub fn $write_at(&mut self, pos: usize, value: $ty) -> Result<usize, CodecError> {
                self.patch(pos, &value.to_le_bytes())
            }

            pub fn $read(&mut self) -> Result<$ty, CodecError> {
                let bytes = self.take::<{ std::mem::size_of::<$ty>() }>()?;
                Ok(<$ty>::from_le_bytes(bytes))
            }
        )*
    };
}

/// Serialized message bytes plus a read cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    data: BytesMut,
    read_pos: usize,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the written bytes. The read cursor is discarded.
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Move the read cursor to an absolute position.
    pub fn set_read_pos(&mut self, pos: usize) -> Result<(), CodecError> {
        if pos > self.data.len() {
            return Err(CodecError::BadPacket {
                need: pos,
                remaining: self.data.len(),
            });
        }
        self.read_pos = pos;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    /// Bytes left between the read cursor and the end.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Drop everything past `len`. Used to roll back a failed write.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
        self.read_pos = self.read_pos.min(len);
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    /// Copy `len` bytes starting at `start` into a new packet.
    pub fn slice(&self, start: usize, len: usize) -> Result<Packet, CodecError> {
        let end = start.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => Ok(Packet::from_slice(&self.data[start..end])),
            None => Err(CodecError::BadPacket {
                need: len,
                remaining: self.data.len().saturating_sub(start),
            }),
        }
    }

    /// Run `read` with the packet temporarily cut off at `end`.
    ///
    /// Positions inside the view are the packet's own, so absolute offsets
    /// written into a body stay valid while it is read.
    pub fn read_within<R>(
        &mut self,
        end: usize,
        read: impl FnOnce(&mut Packet) -> R,
    ) -> Result<R, CodecError> {
        if end < self.read_pos || end > self.data.len() {
            return Err(CodecError::BadPacket {
                need: end.saturating_sub(self.read_pos),
                remaining: self.remaining(),
            });
        }
        let tail = self.data.split_off(end);
        let result = read(self);
        self.data.unsplit(tail);
        Ok(result)
    }

    fixed_width! {
        write_u8, write_u8_at, read_u8, u8;
        write_u16, write_u16_at, read_u16, u16;
        write_u32, write_u32_at, read_u32, u32;
        write_u64, write_u64_at, read_u64, u64;
        write_i8, write_i8_at, read_i8, i8;
        write_i16, write_i16_at, read_i16, i16;
        write_i32, write_i32_at, read_i32, i32;
        write_i64, write_i64_at, read_i64, i64;
        write_f32, write_f32_at, read_f32, f32;
        write_f64, write_f64_at, read_f64, f64;
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.data.put_slice(bytes);
        bytes.len()
    }

    /// Read exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, CodecError> {
        if len > self.remaining() {
            return Err(CodecError::BadPacket {
                need: len,
                remaining: self.remaining(),
            });
        }
        let start = self.read_pos;
        self.read_pos += len;
        Ok(Bytes::copy_from_slice(&self.data[start..self.read_pos]))
    }

    // ── Scaled integers ──────────────────────────────────────────────────────

    /// Quantize `value` over `[min, max]` and write it as an unsigned integer
    /// of the given width.
    pub fn write_scaled(
        &mut self,
        value: f64,
        min: f64,
        max: f64,
        width: ScaledWidth,
    ) -> Result<usize, CodecError> {
        let raw = scaled::quantize(value, min, max, width)?;
        Ok(match width {
            ScaledWidth::Byte => self.write_u8(raw as u8),
            ScaledWidth::Short => self.write_u16(raw as u16),
            ScaledWidth::Int => self.write_u32(raw),
        })
    }

    pub fn read_scaled(
        &mut self,
        min: f64,
        max: f64,
        width: ScaledWidth,
    ) -> Result<f64, CodecError> {
        let raw = match width {
            ScaledWidth::Byte => self.read_u8()? as u32,
            ScaledWidth::Short => self.read_u16()? as u32,
            ScaledWidth::Int => self.read_u32()?,
        };
        scaled::dequantize(raw, min, max, width)
    }

    // ── Variable-length fields ───────────────────────────────────────────────

    /// Embed another buffer behind a u32 length prefix.
    pub fn write_embedded(&mut self, bytes: &[u8]) -> Result<usize, CodecError> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            CodecError::InvalidValue(format!("embedded buffer of {} bytes", bytes.len()))
        })?;
        Ok(self.write_u32(len) + self.write_bytes(bytes))
    }

    pub fn read_embedded(&mut self) -> Result<Bytes, CodecError> {
        let start = self.read_pos;
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len);
        if bytes.is_err() {
            self.read_pos = start;
        }
        bytes
    }

    /// Write a string behind a u8 length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<usize, CodecError> {
        let len = u8::try_from(value.len()).map_err(|_| {
            CodecError::InvalidValue(format!("string of {} bytes exceeds 255", value.len()))
        })?;
        Ok(self.write_u8(len) + self.write_bytes(value.as_bytes()))
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let start = self.read_pos;
        let len = self.read_u8()? as usize;
        let decoded = self.read_bytes(len).and_then(|bytes| {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| CodecError::InvalidValue("string is not UTF-8".to_string()))
        });
        if decoded.is_err() {
            self.read_pos = start;
        }
        decoded
    }

    // ── Header framing ───────────────────────────────────────────────────────

    pub fn write_header(&mut self, header: &Header) -> Result<usize, CodecError> {
        let bytes = header.encode()?;
        Ok(self.write_bytes(&bytes))
    }

    /// Overwrite a previously written header in place.
    pub fn write_header_at(&mut self, pos: usize, header: &Header) -> Result<usize, CodecError> {
        let bytes = header.encode()?;
        self.patch(pos, &bytes)
    }

    pub fn read_header(&mut self) -> Result<Header, CodecError> {
        if self.remaining() < HEADER_SIZE {
            return Err(CodecError::ReadFailure {
                expected: HEADER_SIZE,
                actual: self.remaining(),
            });
        }
        let header = Header::parse(&self.data[self.read_pos..]).map_err(|e| match e {
            WireError::UnknownVersion(v) => CodecError::UnsupportedVersion(v),
            other => CodecError::Wire(other),
        })?;
        self.read_pos += HEADER_SIZE;
        Ok(header)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        if self.remaining() < N {
            return Err(CodecError::ReadFailure {
                expected: N,
                actual: self.remaining(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.read_pos..self.read_pos + N]);
        self.read_pos += N;
        Ok(out)
    }

    fn patch(&mut self, pos: usize, bytes: &[u8]) -> Result<usize, CodecError> {
        let end = pos.checked_add(bytes.len()).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                self.data[pos..end].copy_from_slice(bytes);
                Ok(bytes.len())
            }
            None => Err(CodecError::WriteFailure {
                expected: bytes.len(),
                actual: 0,
            }),
        }
    }
}

impl From<&[u8]> for Packet {
    fn from(bytes: &[u8]) -> Self {
        Packet::from_slice(bytes)
    }
}

impl From<Bytes> for Packet {
    fn from(bytes: Bytes) -> Self {
        Packet::from_slice(&bytes)
    }
}

// ── Byte accounting ───────────────────────────────────────────────────────────

/// Running comparison of structurally expected bytes against bytes actually
/// transferred for one message body.
///
/// Message bodies add the size each present field should occupy with
/// [`ByteTally::expect`] and what the codec reported with
/// [`ByteTally::record`]. A mismatch rejects the whole body.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ByteTally {
    expected: usize,
    actual: usize,
}

impl ByteTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&mut self, bytes: usize) {
        self.expected += bytes;
    }

    pub fn record(&mut self, bytes: usize) {
        self.actual += bytes;
    }

    /// Expect `expected` bytes for a field that transferred `actual`.
    pub fn field(&mut self, expected: usize, actual: usize) {
        self.expect(expected);
        self.record(actual);
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn finish_write(self) -> Result<usize, CodecError> {
        if self.expected == self.actual {
            Ok(self.actual)
        } else {
            Err(CodecError::WriteFailure {
                expected: self.expected,
                actual: self.actual,
            })
        }
    }

    pub fn finish_read(self) -> Result<usize, CodecError> {
        if self.expected == self.actual {
            Ok(self.actual)
        } else {
            Err(CodecError::ReadFailure {
                expected: self.expected,
                actual: self.actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Address, DataFlag};

    #[test]
    fn fixed_width_round_trip() {
        let mut packet = Packet::new();
        assert_eq!(packet.write_u8(0xAB), 1);
        assert_eq!(packet.write_u16(0x1234), 2);
        assert_eq!(packet.write_u32(0xDEAD_BEEF), 4);
        assert_eq!(packet.write_u64(u64::MAX - 1), 8);
        assert_eq!(packet.write_i16(-2), 2);
        assert_eq!(packet.write_i32(-70_000), 4);
        assert_eq!(packet.write_f32(1.5), 4);
        assert_eq!(packet.write_f64(-0.25), 8);
        assert_eq!(packet.len(), 33);

        assert_eq!(packet.read_u8().unwrap(), 0xAB);
        assert_eq!(packet.read_u16().unwrap(), 0x1234);
        assert_eq!(packet.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(packet.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(packet.read_i16().unwrap(), -2);
        assert_eq!(packet.read_i32().unwrap(), -70_000);
        assert_eq!(packet.read_f32().unwrap(), 1.5);
        assert_eq!(packet.read_f64().unwrap(), -0.25);
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn values_are_little_endian() {
        let mut packet = Packet::new();
        packet.write_u32(0x0102_0304);
        assert_eq!(packet.as_slice(), &[4, 3, 2, 1]);
    }

    #[test]
    fn short_read_fails_without_moving_cursor() {
        let mut packet = Packet::from_slice(&[1, 2, 3]);
        assert_eq!(
            packet.read_u32(),
            Err(CodecError::ReadFailure { expected: 4, actual: 3 })
        );
        assert_eq!(packet.read_pos(), 0);
        assert_eq!(packet.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn back_patching_overwrites_in_place() {
        let mut packet = Packet::new();
        packet.write_u32(0);
        packet.write_u8(7);
        packet.write_u32_at(0, 99).unwrap();
        assert_eq!(packet.read_u32().unwrap(), 99);
        assert_eq!(packet.read_u8().unwrap(), 7);
        assert!(packet.write_u32_at(3, 1).is_err());
    }

    #[test]
    fn embedded_buffers_round_trip() {
        let mut inner = Packet::new();
        inner.write_u16(0xCAFE);
        let mut outer = Packet::new();
        assert_eq!(outer.write_embedded(inner.as_slice()).unwrap(), 6);
        let bytes = outer.read_embedded().unwrap();
        assert_eq!(&bytes[..], inner.as_slice());
    }

    #[test]
    fn embedded_length_past_end_is_bad_packet() {
        let mut packet = Packet::new();
        packet.write_u32(100);
        packet.write_bytes(&[0u8; 10]);
        assert_eq!(
            packet.read_embedded(),
            Err(CodecError::BadPacket { need: 100, remaining: 10 })
        );
        assert_eq!(packet.read_pos(), 0);
    }

    #[test]
    fn strings_round_trip_and_reject_oversize() {
        let mut packet = Packet::new();
        assert_eq!(packet.write_string("primitive driver").unwrap(), 17);
        assert_eq!(packet.read_string().unwrap(), "primitive driver");
        assert!(packet.write_string(&"x".repeat(256)).is_err());
    }

    #[test]
    fn scaled_values_round_trip() {
        let mut packet = Packet::new();
        assert_eq!(
            packet
                .write_scaled(45.0, -180.0, 180.0, ScaledWidth::Short)
                .unwrap(),
            2
        );
        let value = packet.read_scaled(-180.0, 180.0, ScaledWidth::Short).unwrap();
        assert!((value - 45.0).abs() < 360.0 / 65535.0);
    }

    #[test]
    fn header_framing_round_trip() {
        let header = Header {
            data_flag: DataFlag::Last,
            sequence_number: 3,
            ..Header::new(0x0011, Address::new(1, 1, 1, 1), Address::new(2, 1, 1, 1))
        };
        let mut packet = Packet::new();
        assert_eq!(packet.write_header(&header).unwrap(), HEADER_SIZE);
        assert_eq!(packet.read_header().unwrap(), header);
    }

    #[test]
    fn unknown_header_version_is_unsupported() {
        let header = Header::new(0x0011, Address::new(1, 1, 1, 1), Address::new(2, 1, 1, 1));
        let mut bytes = header.encode().unwrap();
        bytes[0] = 0x01;
        let mut packet = Packet::from_slice(&bytes);
        assert_eq!(packet.read_header(), Err(CodecError::UnsupportedVersion(0x01)));
        assert_eq!(packet.read_pos(), 0);
    }

    #[test]
    fn slice_copies_range() {
        let packet = Packet::from_slice(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(packet.slice(2, 3).unwrap().as_slice(), &[2, 3, 4]);
        assert!(packet.slice(4, 3).is_err());
    }

    #[test]
    fn read_within_keeps_positions_and_restores_tail() {
        let mut packet = Packet::from_slice(&[0, 1, 2, 3, 4, 5]);
        packet.set_read_pos(2).unwrap();
        let seen = packet
            .read_within(4, |view| {
                assert_eq!(view.read_pos(), 2);
                assert_eq!(view.remaining(), 2);
                let value = view.read_u16().unwrap();
                (value, view.read_u8().is_err())
            })
            .unwrap();
        assert_eq!(seen, (0x0302, true));
        assert_eq!(packet.len(), 6);
        assert_eq!(packet.read_pos(), 4);
        assert_eq!(packet.read_u16().unwrap(), 0x0504);

        packet.set_read_pos(3).unwrap();
        assert!(packet.read_within(2, |_| ()).is_err());
        assert!(packet.read_within(7, |_| ()).is_err());
    }

    #[test]
    fn set_read_pos_is_bounded() {
        let mut packet = Packet::from_slice(&[0, 1, 2]);
        packet.set_read_pos(3).unwrap();
        assert_eq!(packet.remaining(), 0);
        assert!(packet.set_read_pos(4).is_err());
    }

    #[test]
    fn tally_detects_mismatch() {
        let mut tally = ByteTally::new();
        tally.field(4, 4);
        tally.field(2, 0);
        assert_eq!(
            tally.finish_write(),
            Err(CodecError::WriteFailure { expected: 6, actual: 4 })
        );
        assert_eq!(
            tally.finish_read(),
            Err(CodecError::ReadFailure { expected: 6, actual: 4 })
        );

        let mut ok = ByteTally::new();
        ok.field(1, 1);
        assert_eq!(ok.finish_write(), Ok(1));
    }
}
