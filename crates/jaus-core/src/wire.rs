//! JAUS wire format: the header that precedes every message body.
//!
//! The header layout IS the protocol. Every field, every size, every reserved
//! byte is part of the wire format and must stay byte-compatible with peers.
//!
//! The on-wire struct is `#[repr(C)]` over little-endian field types and uses
//! zerocopy derives for allocation-free framing. [`Header`] is the typed view
//! that the rest of the crate works with.

use std::fmt;

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Raw Header ───────────────────────────────────────────────────────────────

/// The header exactly as it appears on the wire.
///
/// Wire size: 18 bytes. All multi-byte fields are little-endian.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RawHeader {
    /// Protocol version byte. See [`Version`].
    pub version: u8,

    /// Message properties:
    ///   bits 0-3: priority (0..=15)
    ///   bits 4-5: ack/nack mode
    ///   bit    6: service connection
    ///   bit    7: experimental message
    pub properties: u8,

    /// Command code identifying the message type.
    pub command_code: U16<LittleEndian>,

    /// Destination address, packed as subsystem.node.component.instance.
    pub destination: U32<LittleEndian>,

    /// Source address, same packing as `destination`.
    pub source: U32<LittleEndian>,

    /// Number of body bytes following this header.
    pub data_size: U16<LittleEndian>,

    /// Large data set marker. See [`DataFlag`].
    pub data_flag: u8,

    /// Reserved, must be zero.
    pub reserved: u8,

    /// Sequence number. Only meaningful for fragmented transfers.
    pub sequence_number: U16<LittleEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(RawHeader, [u8; 18]);

/// Size of the serialized header in bytes.
pub const HEADER_SIZE: usize = 18;

/// Largest body a single header can describe.
pub const MAX_DATA_SIZE: usize = u16::MAX as usize;

/// Priority assigned to messages that do not ask for another one.
pub const DEFAULT_PRIORITY: u8 = 6;

/// Highest priority value the 4-bit field can carry.
pub const MAX_PRIORITY: u8 = 15;

const PRIORITY_MASK: u8 = 0x0F;
const ACK_NACK_SHIFT: u8 = 4;
const ACK_NACK_MASK: u8 = 0x30;
const SERVICE_CONNECTION_BIT: u8 = 0x40;
const EXPERIMENTAL_BIT: u8 = 0x80;

// ── Version ──────────────────────────────────────────────────────────────────

/// Protocol versions this codec implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Version {
    /// Reference Architecture 3.3.
    V3_3 = 0x02,
    /// Reference Architecture 3.4.
    V3_4 = 0x03,
}

impl Version {
    pub const CURRENT: Version = Version::V3_4;
}

impl TryFrom<u8> for Version {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x02 => Ok(Version::V3_3),
            0x03 => Ok(Version::V3_4),
            other => Err(WireError::UnknownVersion(other)),
        }
    }
}

impl From<Version> for u8 {
    fn from(v: Version) -> u8 {
        v as u8
    }
}

// ── Ack/Nack ─────────────────────────────────────────────────────────────────

/// Acknowledgement mode carried in bits 4-5 of the properties byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AckNack {
    /// No acknowledgement requested or carried.
    #[default]
    None = 0,
    /// Sender requests an acknowledgement.
    Request = 1,
    /// Negative acknowledgement frame.
    Nack = 2,
    /// Positive acknowledgement frame.
    Ack = 3,
}

impl AckNack {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => AckNack::None,
            1 => AckNack::Request,
            2 => AckNack::Nack,
            _ => AckNack::Ack,
        }
    }

    /// True for the two reply modes (Ack or Nack).
    pub fn is_reply(self) -> bool {
        matches!(self, AckNack::Ack | AckNack::Nack)
    }
}

// ── Data Flag ────────────────────────────────────────────────────────────────

/// Large data set marker.
///
/// A message that fits in one transport unit is `Single`. Fragments of an
/// oversized message are `First`, `Normal` or `Last`; `Retransmit` marks a
/// fragment re-sent after the receiver reported it missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DataFlag {
    #[default]
    Single = 0x00,
    First = 0x01,
    Normal = 0x02,
    Retransmit = 0x04,
    Last = 0x08,
}

impl TryFrom<u8> for DataFlag {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(DataFlag::Single),
            0x01 => Ok(DataFlag::First),
            0x02 => Ok(DataFlag::Normal),
            0x04 => Ok(DataFlag::Retransmit),
            0x08 => Ok(DataFlag::Last),
            other => Err(WireError::UnknownDataFlag(other)),
        }
    }
}

// ── Address ──────────────────────────────────────────────────────────────────

/// Component address: subsystem, node, component, instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address {
    pub subsystem: u8,
    pub node: u8,
    pub component: u8,
    pub instance: u8,
}

impl Address {
    /// Wildcard value for any address field.
    pub const BROADCAST_FIELD: u8 = 0xFF;

    /// Address that matches every component on every subsystem.
    pub const BROADCAST: Address = Address {
        subsystem: 0xFF,
        node: 0xFF,
        component: 0xFF,
        instance: 0xFF,
    };

    pub const fn new(subsystem: u8, node: u8, component: u8, instance: u8) -> Self {
        Self {
            subsystem,
            node,
            component,
            instance,
        }
    }

    pub const fn from_u32(packed: u32) -> Self {
        Self {
            subsystem: (packed >> 24) as u8,
            node: (packed >> 16) as u8,
            component: (packed >> 8) as u8,
            instance: packed as u8,
        }
    }

    pub const fn to_u32(self) -> u32 {
        (self.subsystem as u32) << 24
            | (self.node as u32) << 16
            | (self.component as u32) << 8
            | self.instance as u32
    }

    /// Zero is not a legal subsystem, node or component ID.
    pub fn is_valid(&self) -> bool {
        self.subsystem != 0 && self.node != 0 && self.component != 0
    }

    pub fn is_broadcast(&self) -> bool {
        self.subsystem == Self::BROADCAST_FIELD
            || self.node == Self::BROADCAST_FIELD
            || self.component == Self::BROADCAST_FIELD
            || self.instance == Self::BROADCAST_FIELD
    }

    /// Field-wise comparison where 255 on either side matches anything.
    pub fn matches(&self, other: &Address) -> bool {
        fn field(a: u8, b: u8) -> bool {
            a == b || a == Address::BROADCAST_FIELD || b == Address::BROADCAST_FIELD
        }
        field(self.subsystem, other.subsystem)
            && field(self.node, other.node)
            && field(self.component, other.component)
            && field(self.instance, other.instance)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.subsystem, self.node, self.component, self.instance
        )
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Typed view of [`RawHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: Version,
    pub priority: u8,
    pub ack_nack: AckNack,
    pub service_connection: bool,
    pub experimental: bool,
    pub command_code: u16,
    pub destination: Address,
    pub source: Address,
    pub data_size: u16,
    pub data_flag: DataFlag,
    pub sequence_number: u16,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: Version::CURRENT,
            priority: DEFAULT_PRIORITY,
            ack_nack: AckNack::None,
            service_connection: false,
            experimental: false,
            command_code: 0,
            destination: Address::default(),
            source: Address::default(),
            data_size: 0,
            data_flag: DataFlag::Single,
            sequence_number: 0,
        }
    }
}

impl Header {
    pub fn new(command_code: u16, destination: Address, source: Address) -> Self {
        Self {
            command_code,
            destination,
            source,
            ..Self::default()
        }
    }

    /// Build the on-wire representation. Fails on an out-of-range priority.
    pub fn to_raw(&self) -> Result<RawHeader, WireError> {
        if self.priority > MAX_PRIORITY {
            return Err(WireError::PriorityOutOfRange(self.priority));
        }
        let mut properties = self.priority & PRIORITY_MASK;
        properties |= (self.ack_nack as u8) << ACK_NACK_SHIFT;
        if self.service_connection {
            properties |= SERVICE_CONNECTION_BIT;
        }
        if self.experimental {
            properties |= EXPERIMENTAL_BIT;
        }

        Ok(RawHeader {
            version: self.version.into(),
            properties,
            command_code: U16::new(self.command_code),
            destination: U32::new(self.destination.to_u32()),
            source: U32::new(self.source.to_u32()),
            data_size: U16::new(self.data_size),
            data_flag: self.data_flag as u8,
            reserved: 0,
            sequence_number: U16::new(self.sequence_number),
        })
    }

    /// Interpret a raw header, rejecting unknown versions, unknown data
    /// flags and non-zero reserved bits.
    pub fn from_raw(raw: &RawHeader) -> Result<Self, WireError> {
        if raw.reserved != 0 {
            return Err(WireError::ReservedBitsSet(raw.reserved));
        }
        let version = Version::try_from(raw.version)?;
        let data_flag = DataFlag::try_from(raw.data_flag)?;
        let properties = raw.properties;

        Ok(Self {
            version,
            priority: properties & PRIORITY_MASK,
            ack_nack: AckNack::from_bits((properties & ACK_NACK_MASK) >> ACK_NACK_SHIFT),
            service_connection: properties & SERVICE_CONNECTION_BIT != 0,
            experimental: properties & EXPERIMENTAL_BIT != 0,
            command_code: raw.command_code.get(),
            destination: Address::from_u32(raw.destination.get()),
            source: Address::from_u32(raw.source.get()),
            data_size: raw.data_size.get(),
            data_flag,
            sequence_number: raw.sequence_number.get(),
        })
    }

    /// Serialize to exactly [`HEADER_SIZE`] bytes.
    pub fn encode(&self) -> Result<[u8; HEADER_SIZE], WireError> {
        let raw = self.to_raw()?;
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(raw.as_bytes());
        Ok(out)
    }

    /// Parse a header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let raw = RawHeader::read_from_prefix(bytes).ok_or(WireError::Truncated {
            need: HEADER_SIZE,
            got: bytes.len(),
        })?;
        Self::from_raw(&raw)
    }

    /// Read the command code without validating the rest of the header.
    pub fn peek_command_code(bytes: &[u8]) -> Option<u16> {
        RawHeader::read_from_prefix(bytes).map(|raw| raw.command_code.get())
    }

    /// Same source, destination and command code.
    pub fn same_identity(&self, other: &Header) -> bool {
        self.source == other.source
            && self.destination == other.destination
            && self.command_code == other.command_code
    }

    /// Header for an acknowledgement (or negative acknowledgement) of this
    /// message: addresses swapped, same command code, empty body.
    pub fn reply(&self, ack_nack: AckNack) -> Header {
        Header {
            ack_nack,
            destination: self.source,
            source: self.destination,
            data_size: 0,
            data_flag: DataFlag::Single,
            sequence_number: self.sequence_number,
            ..*self
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown protocol version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown data flag: 0x{0:02x}")]
    UnknownDataFlag(u8),

    #[error("reserved header bits are non-zero: 0x{0:02x}")]
    ReservedBitsSet(u8),

    #[error("priority {0} exceeds maximum {}", MAX_PRIORITY)]
    PriorityOutOfRange(u8),

    #[error("truncated header: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
