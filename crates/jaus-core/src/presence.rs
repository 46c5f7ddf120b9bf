//! Presence vectors: bitmasks announcing which optional fields follow.
//!
//! Write order is fixed: the vector itself (when the message has one), then
//! every optional field whose bit is set, in ascending bit order. Unset
//! fields contribute no bytes. Reading mirrors the same order.

use crate::codec::{CodecError, Packet};

/// Width of a message's presence vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PresenceVectorSize {
    /// Message has no optional fields.
    #[default]
    None = 0,
    Byte = 1,
    Short = 2,
    Int = 4,
}

impl PresenceVectorSize {
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Bits that fit in a vector of this size.
    pub const fn capacity_mask(self) -> u32 {
        match self {
            PresenceVectorSize::None => 0,
            PresenceVectorSize::Byte => 0xFF,
            PresenceVectorSize::Short => 0xFFFF,
            PresenceVectorSize::Int => u32::MAX,
        }
    }
}

/// Optional-field bitmask for one message instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PresenceVector {
    size: PresenceVectorSize,
    bits: u32,
}

impl PresenceVector {
    /// Empty vector of the given size.
    pub const fn new(size: PresenceVectorSize) -> Self {
        Self { size, bits: 0 }
    }

    /// Vector with `bits` set. Bits that do not fit in `size` are rejected.
    pub fn with_bits(size: PresenceVectorSize, bits: u32) -> Result<Self, CodecError> {
        if bits & !size.capacity_mask() != 0 {
            return Err(CodecError::InvalidValue(format!(
                "presence vector 0x{bits:x} does not fit in {} bytes",
                size.bytes()
            )));
        }
        Ok(Self { size, bits })
    }

    pub fn size(&self) -> PresenceVectorSize {
        self.size
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn is_set(&self, bit: u8) -> bool {
        bit < 32 && self.bits & (1 << bit) != 0
    }

    /// Set `bit`. Bits beyond the vector's width are ignored.
    pub fn set(&mut self, bit: u8) {
        if bit < 32 {
            self.bits |= (1 << bit) & self.size.capacity_mask();
        }
    }

    pub fn clear(&mut self, bit: u8) {
        if bit < 32 {
            self.bits &= !(1 << bit);
        }
    }

    pub fn clear_all(&mut self) {
        self.bits = 0;
    }

    /// Reject bits outside the message's canonical mask.
    pub fn check_mask(&self, mask: u32) -> Result<(), CodecError> {
        let illegal = self.bits & !mask;
        if illegal != 0 {
            return Err(CodecError::InvalidValue(format!(
                "presence vector bits 0x{illegal:x} not allowed by mask 0x{mask:x}"
            )));
        }
        Ok(())
    }

    /// Write the vector. Writes nothing for [`PresenceVectorSize::None`].
    pub fn write(&self, packet: &mut Packet) -> usize {
        match self.size {
            PresenceVectorSize::None => 0,
            PresenceVectorSize::Byte => packet.write_u8(self.bits as u8),
            PresenceVectorSize::Short => packet.write_u16(self.bits as u16),
            PresenceVectorSize::Int => packet.write_u32(self.bits),
        }
    }

    /// Read a vector of the given size.
    pub fn read(size: PresenceVectorSize, packet: &mut Packet) -> Result<Self, CodecError> {
        let bits = match size {
            PresenceVectorSize::None => 0,
            PresenceVectorSize::Byte => packet.read_u8()? as u32,
            PresenceVectorSize::Short => packet.read_u16()? as u32,
            PresenceVectorSize::Int => packet.read_u32()?,
        };
        Ok(Self { size, bits })
    }

    /// Read a vector and reject bits outside `mask`.
    ///
    /// A vector carrying unknown bits means the body layout is unknown, so
    /// it is reported as a read failure rather than an invalid value.
    pub fn read_masked(
        size: PresenceVectorSize,
        mask: u32,
        packet: &mut Packet,
    ) -> Result<Self, CodecError> {
        let pv = Self::read(size, packet)?;
        if pv.check_mask(mask).is_err() {
            tracing::debug!(bits = pv.bits, mask, "presence vector carries unknown bits");
            return Err(CodecError::ReadFailure {
                expected: size.bytes(),
                actual: 0,
            });
        }
        Ok(pv)
    }
}
