//! Global pose messages: Query Global Pose, Report Global Pose.
//!
//! Every pose field is a scaled integer over a fixed domain, so these two
//! messages are the main consumers of the quantization codec.

use std::any::Any;
use std::f64::consts::PI;

use jaus_core::codec::{ByteTally, CodecError, Packet};
use jaus_core::message::Message;
use jaus_core::presence::{PresenceVector, PresenceVectorSize};
use jaus_core::scaled::ScaledWidth;
use jaus_core::time::TimeStamp;
use jaus_core::wire::Version;

use super::codes;

/// Presence vector bits of Report Global Pose.
pub mod bits {
    pub const LATITUDE: u8 = 0;
    pub const LONGITUDE: u8 = 1;
    pub const ELEVATION: u8 = 2;
    pub const POSITION_RMS: u8 = 3;
    pub const ROLL: u8 = 4;
    pub const PITCH: u8 = 5;
    pub const YAW: u8 = 6;
    pub const ATTITUDE_RMS: u8 = 7;
    pub const TIME_STAMP: u8 = 8;
}

const MASK: u32 = 0x01FF;
const PV_SIZE: PresenceVectorSize = PresenceVectorSize::Short;

/// Scaled field descriptor: domain and wire width.
struct Scaled {
    bit: u8,
    min: f64,
    max: f64,
    width: ScaledWidth,
}

const LATITUDE: Scaled = Scaled {
    bit: bits::LATITUDE,
    min: -90.0,
    max: 90.0,
    width: ScaledWidth::Int,
};
const LONGITUDE: Scaled = Scaled {
    bit: bits::LONGITUDE,
    min: -180.0,
    max: 180.0,
    width: ScaledWidth::Int,
};
const ELEVATION: Scaled = Scaled {
    bit: bits::ELEVATION,
    min: -10_000.0,
    max: 35_000.0,
    width: ScaledWidth::Int,
};
const POSITION_RMS: Scaled = Scaled {
    bit: bits::POSITION_RMS,
    min: 0.0,
    max: 100.0,
    width: ScaledWidth::Int,
};
const ROLL: Scaled = Scaled {
    bit: bits::ROLL,
    min: -PI,
    max: PI,
    width: ScaledWidth::Short,
};
const PITCH: Scaled = Scaled {
    bit: bits::PITCH,
    min: -PI,
    max: PI,
    width: ScaledWidth::Short,
};
const YAW: Scaled = Scaled {
    bit: bits::YAW,
    min: -PI,
    max: PI,
    width: ScaledWidth::Short,
};
const ATTITUDE_RMS: Scaled = Scaled {
    bit: bits::ATTITUDE_RMS,
    min: 0.0,
    max: PI,
    width: ScaledWidth::Short,
};

/// Position and attitude in geodetic coordinates.
///
/// Latitude/longitude in degrees, elevation and position RMS in meters,
/// angles in radians. `None` fields are left out of the body.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReportGlobalPose {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub position_rms: Option<f64>,
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    pub yaw: Option<f64>,
    pub attitude_rms: Option<f64>,
    pub time_stamp: Option<TimeStamp>,
}

impl ReportGlobalPose {
    fn scaled_fields(&self) -> [(&'static Scaled, Option<f64>); 8] {
        [
            (&LATITUDE, self.latitude),
            (&LONGITUDE, self.longitude),
            (&ELEVATION, self.elevation),
            (&POSITION_RMS, self.position_rms),
            (&ROLL, self.roll),
            (&PITCH, self.pitch),
            (&YAW, self.yaw),
            (&ATTITUDE_RMS, self.attitude_rms),
        ]
    }

    fn scaled_slot(&mut self, bit: u8) -> &mut Option<f64> {
        match bit {
            bits::LATITUDE => &mut self.latitude,
            bits::LONGITUDE => &mut self.longitude,
            bits::ELEVATION => &mut self.elevation,
            bits::POSITION_RMS => &mut self.position_rms,
            bits::ROLL => &mut self.roll,
            bits::PITCH => &mut self.pitch,
            bits::YAW => &mut self.yaw,
            _ => &mut self.attitude_rms,
        }
    }

    pub fn presence_vector(&self) -> PresenceVector {
        let mut pv = PresenceVector::new(PV_SIZE);
        for (field, value) in self.scaled_fields() {
            if value.is_some() {
                pv.set(field.bit);
            }
        }
        if self.time_stamp.is_some() {
            pv.set(bits::TIME_STAMP);
        }
        pv
    }
}

impl Message for ReportGlobalPose {
    fn command_code(&self) -> u16 {
        codes::REPORT_GLOBAL_POSE
    }

    fn name(&self) -> &'static str {
        "ReportGlobalPose"
    }

    fn presence_vector_size(&self, _version: Version) -> PresenceVectorSize {
        PV_SIZE
    }

    fn presence_vector_mask(&self, _version: Version) -> u32 {
        MASK
    }

    fn write_body(&self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        let pv = self.presence_vector();
        let mut tally = ByteTally::new();
        tally.field(PV_SIZE.bytes(), pv.write(packet));

        for (field, value) in self.scaled_fields() {
            if let Some(value) = value {
                let written = packet.write_scaled(value, field.min, field.max, field.width)?;
                tally.field(field.width.bytes(), written);
            }
        }
        if let Some(stamp) = &self.time_stamp {
            tally.field(4, packet.write_u32(stamp.pack()?));
        }
        tally.finish_write()
    }

    fn read_body(&mut self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        let start = packet.read_pos();
        let pv = PresenceVector::read_masked(PV_SIZE, MASK, packet)?;
        let mut tally = ByteTally::new();
        tally.expect(PV_SIZE.bytes());

        for field in [
            &LATITUDE,
            &LONGITUDE,
            &ELEVATION,
            &POSITION_RMS,
            &ROLL,
            &PITCH,
            &YAW,
            &ATTITUDE_RMS,
        ] {
            let value = if pv.is_set(field.bit) {
                tally.expect(field.width.bytes());
                Some(packet.read_scaled(field.min, field.max, field.width)?)
            } else {
                None
            };
            *self.scaled_slot(field.bit) = value;
        }
        self.time_stamp = if pv.is_set(bits::TIME_STAMP) {
            tally.expect(4);
            Some(TimeStamp::unpack(packet.read_u32()?)?)
        } else {
            None
        };

        tally.record(packet.read_pos() - start);
        tally.finish_read()
    }

    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Ask for the pose fields selected by `requested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryGlobalPose {
    pub requested: u16,
}

impl Default for QueryGlobalPose {
    fn default() -> Self {
        Self {
            requested: MASK as u16,
        }
    }
}

impl Message for QueryGlobalPose {
    fn command_code(&self) -> u16 {
        codes::QUERY_GLOBAL_POSE
    }

    fn name(&self) -> &'static str {
        "QueryGlobalPose"
    }

    fn write_body(&self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        PresenceVector::with_bits(PV_SIZE, self.requested as u32)?.check_mask(MASK)?;
        Ok(packet.write_u16(self.requested))
    }

    fn read_body(&mut self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        self.requested = PresenceVector::read_masked(PV_SIZE, MASK, packet)?.bits() as u16;
        Ok(PV_SIZE.bytes())
    }

    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
