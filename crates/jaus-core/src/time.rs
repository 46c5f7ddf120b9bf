//! Bit-packed JAUS time and date fields.
//!
//! Time (u32):
//!   bits  0-9:  milliseconds (0..=999)
//!   bits 10-15: seconds (0..=59)
//!   bits 16-21: minutes (0..=59)
//!   bits 22-26: hour (0..=23)
//!   bits 27-31: day of month (1..=31)
//!
//! Date (u16):
//!   bits 0-4:  day (1..=31)
//!   bits 5-8:  month (1..=12)
//!   bits 9-15: years since 2000 (0..=127)

use crate::codec::CodecError;

/// Time of day within a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimeStamp {
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

impl TimeStamp {
    pub fn pack(&self) -> Result<u32, CodecError> {
        if self.millisecond > 999
            || self.second > 59
            || self.minute > 59
            || self.hour > 23
            || self.day == 0
            || self.day > 31
        {
            return Err(CodecError::InvalidValue(format!("time stamp {self:?}")));
        }
        Ok(self.millisecond as u32
            | (self.second as u32) << 10
            | (self.minute as u32) << 16
            | (self.hour as u32) << 22
            | (self.day as u32) << 27)
    }

    pub fn unpack(packed: u32) -> Result<Self, CodecError> {
        let stamp = Self {
            millisecond: (packed & 0x3FF) as u16,
            second: ((packed >> 10) & 0x3F) as u8,
            minute: ((packed >> 16) & 0x3F) as u8,
            hour: ((packed >> 22) & 0x1F) as u8,
            day: ((packed >> 27) & 0x1F) as u8,
        };
        // Re-packing validates the ranges.
        stamp.pack()?;
        Ok(stamp)
    }
}

/// Calendar date between 2000 and 2127.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateStamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Default for DateStamp {
    fn default() -> Self {
        Self {
            year: 2000,
            month: 1,
            day: 1,
        }
    }
}

impl DateStamp {
    pub fn pack(&self) -> Result<u16, CodecError> {
        if !(2000..=2127).contains(&self.year)
            || self.month == 0
            || self.month > 12
            || self.day == 0
            || self.day > 31
        {
            return Err(CodecError::InvalidValue(format!("date stamp {self:?}")));
        }
        Ok(self.day as u16 | (self.month as u16) << 5 | (self.year - 2000) << 9)
    }

    pub fn unpack(packed: u16) -> Result<Self, CodecError> {
        let stamp = Self {
            day: (packed & 0x1F) as u8,
            month: ((packed >> 5) & 0x0F) as u8,
            year: 2000 + (packed >> 9),
        };
        stamp.pack()?;
        Ok(stamp)
    }
}
