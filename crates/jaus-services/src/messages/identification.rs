//! Query Identification and Report Identification.

use std::any::Any;

use jaus_core::codec::{CodecError, Packet};
use jaus_core::message::Message;
use jaus_core::wire::Version;

use super::codes;

/// Which level of the address hierarchy is being identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QueryType {
    #[default]
    System = 1,
    Subsystem = 2,
    Node = 3,
    Component = 4,
}

impl TryFrom<u8> for QueryType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(QueryType::System),
            2 => Ok(QueryType::Subsystem),
            3 => Ok(QueryType::Node),
            4 => Ok(QueryType::Component),
            other => Err(CodecError::InvalidValue(format!(
                "identification query type {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryIdentification {
    pub query_type: QueryType,
}

impl Message for QueryIdentification {
    fn command_code(&self) -> u16 {
        codes::QUERY_IDENTIFICATION
    }

    fn name(&self) -> &'static str {
        "QueryIdentification"
    }

    fn write_body(&self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        Ok(packet.write_u8(self.query_type as u8))
    }

    fn read_body(&mut self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        self.query_type = QueryType::try_from(packet.read_u8()?)?;
        Ok(1)
    }

    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Human-readable identity of a system, subsystem, node or component.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportIdentification {
    pub query_type: QueryType,
    /// Vehicle or component type code.
    pub kind: u16,
    pub identification: String,
}

impl Message for ReportIdentification {
    fn command_code(&self) -> u16 {
        codes::REPORT_IDENTIFICATION
    }

    fn name(&self) -> &'static str {
        "ReportIdentification"
    }

    fn write_body(&self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        if self.identification.len() > u8::MAX as usize {
            return Err(CodecError::InvalidValue(format!(
                "identification of {} bytes exceeds 255",
                self.identification.len()
            )));
        }
        let mut written = packet.write_u8(self.query_type as u8);
        written += packet.write_u16(self.kind);
        written += packet.write_string(&self.identification)?;
        Ok(written)
    }

    fn read_body(&mut self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        let start = packet.read_pos();
        self.query_type = QueryType::try_from(packet.read_u8()?)?;
        self.kind = packet.read_u16()?;
        self.identification = packet.read_string()?;
        Ok(packet.read_pos() - start)
    }

    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
