//! Built-in messages registered in every [`MessageCatalog`](crate::catalog::MessageCatalog).
//!
//! Together they cover each field encoding the codec offers: bit-packed time
//! and date stamps, scaled integers of every width, one and two byte presence
//! vectors, and length-prefixed strings.

pub mod identification;
pub mod pose;
pub mod time;

pub use identification::{QueryIdentification, ReportIdentification};
pub use pose::{QueryGlobalPose, ReportGlobalPose};
pub use time::{QueryTime, ReportTime, SetTime, TimeFields};

/// Command codes of the built-in messages.
pub mod codes {
    pub const SET_TIME: u16 = 0x0011;
    pub const QUERY_TIME: u16 = 0x2011;
    pub const REPORT_TIME: u16 = 0x4011;
    pub const QUERY_GLOBAL_POSE: u16 = 0x2402;
    pub const REPORT_GLOBAL_POSE: u16 = 0x4402;
    pub const QUERY_IDENTIFICATION: u16 = 0x2B00;
    pub const REPORT_IDENTIFICATION: u16 = 0x4B00;
}
