//! Time service messages: Set Time, Query Time, Report Time.

use std::any::Any;

use jaus_core::codec::{ByteTally, CodecError, Packet};
use jaus_core::message::Message;
use jaus_core::presence::{PresenceVector, PresenceVectorSize};
use jaus_core::time::{DateStamp, TimeStamp};
use jaus_core::wire::Version;

use super::codes;

/// Presence vector bits shared by all three time messages.
pub mod bits {
    pub const TIME: u8 = 0;
    pub const DATE: u8 = 1;
}

const MASK: u32 = 0b11;
const PV_SIZE: PresenceVectorSize = PresenceVectorSize::Byte;

/// Time and date fields, each optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeFields {
    pub time: Option<TimeStamp>,
    pub date: Option<DateStamp>,
}

impl TimeFields {
    fn presence_vector(&self) -> PresenceVector {
        let mut pv = PresenceVector::new(PV_SIZE);
        if self.time.is_some() {
            pv.set(bits::TIME);
        }
        if self.date.is_some() {
            pv.set(bits::DATE);
        }
        pv
    }

    fn write(&self, packet: &mut Packet) -> Result<usize, CodecError> {
        let pv = self.presence_vector();
        let mut tally = ByteTally::new();
        tally.field(PV_SIZE.bytes(), pv.write(packet));
        if let Some(time) = &self.time {
            tally.field(4, packet.write_u32(time.pack()?));
        }
        if let Some(date) = &self.date {
            tally.field(2, packet.write_u16(date.pack()?));
        }
        tally.finish_write()
    }

    fn read(&mut self, packet: &mut Packet) -> Result<usize, CodecError> {
        let start = packet.read_pos();
        let pv = PresenceVector::read_masked(PV_SIZE, MASK, packet)?;
        let mut tally = ByteTally::new();
        tally.expect(PV_SIZE.bytes());

        self.time = None;
        self.date = None;
        if pv.is_set(bits::TIME) {
            tally.expect(4);
            self.time = Some(TimeStamp::unpack(packet.read_u32()?)?);
        }
        if pv.is_set(bits::DATE) {
            tally.expect(2);
            self.date = Some(DateStamp::unpack(packet.read_u16()?)?);
        }
        tally.record(packet.read_pos() - start);
        tally.finish_read()
    }
}

macro_rules! time_message {
    ($(#[$doc:meta])* $name:ident, $code:expr, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name {
            pub fields: TimeFields,
        }

        impl Message for $name {
            fn command_code(&self) -> u16 {
                $code
            }

            fn name(&self) -> &'static str {
                $label
            }

            fn presence_vector_size(&self, _version: Version) -> PresenceVectorSize {
                PV_SIZE
            }

            fn presence_vector_mask(&self, _version: Version) -> u32 {
                MASK
            }

            fn write_body(
                &self,
                packet: &mut Packet,
                _version: Version,
            ) -> Result<usize, CodecError> {
                self.fields.write(packet)
            }

            fn read_body(
                &mut self,
                packet: &mut Packet,
                _version: Version,
            ) -> Result<usize, CodecError> {
                self.fields.read(packet)
            }

            fn clone_box(&self) -> Box<dyn Message> {
                Box::new(*self)
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

time_message!(
    /// Command a component to set its clock.
    SetTime,
    codes::SET_TIME,
    "SetTime"
);

time_message!(
    /// Reply to [`QueryTime`].
    ReportTime,
    codes::REPORT_TIME,
    "ReportTime"
);

/// Ask for the fields selected by `requested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTime {
    /// Presence vector of the fields wanted in the report.
    pub requested: u8,
}

impl Default for QueryTime {
    fn default() -> Self {
        Self { requested: MASK as u8 }
    }
}

impl Message for QueryTime {
    fn command_code(&self) -> u16 {
        codes::QUERY_TIME
    }

    fn name(&self) -> &'static str {
        "QueryTime"
    }

    fn write_body(&self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        PresenceVector::with_bits(PV_SIZE, self.requested as u32)?.check_mask(MASK)?;
        Ok(packet.write_u8(self.requested))
    }

    fn read_body(&mut self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        self.requested = PresenceVector::read_masked(PV_SIZE, MASK, packet)?.bits() as u8;
        Ok(PV_SIZE.bytes())
    }

    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
