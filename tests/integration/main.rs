//! JAUS integration test harness.
//!
//! Scenarios here wire the codec, catalog, fragmentation, reassembly and
//! delivery tracking together the way a component's receive and timer paths
//! would, with an in-memory link standing in for the transport.
//!
//!   cargo test --test integration

mod delivery;
mod large_data;

use std::any::Any;

use anyhow::{Context, Result};
use bytes::Bytes;

use jaus_core::codec::{CodecError, Packet};
use jaus_core::message::{encode, Message};
use jaus_core::wire::{Address, Header, Version};
use jaus_services::catalog::MessageCatalog;
use jaus_services::mission::{Mission, Task};
use jaus_services::messages::{QueryGlobalPose, ReportIdentification, SetTime};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const OPERATOR: Address = Address::new(1, 1, 1, 1);
pub const VEHICLE: Address = Address::new(2, 1, 3, 1);

/// Encode `message` from `source` to `destination`.
pub fn frame(message: &dyn Message, source: Address, destination: Address) -> Result<Bytes> {
    let packet = encode(message, &Header::new(0, destination, source))
        .with_context(|| format!("failed to encode {}", message.name()))?;
    Ok(packet.freeze())
}

/// Application message carrying a whole mission plan, large enough to need
/// fragmenting.
#[derive(Debug, Clone)]
pub struct SpoolMission {
    pub mission: Option<Mission>,
    catalog: MessageCatalog,
}

pub const SPOOL_MISSION: u16 = 0xD400;

impl SpoolMission {
    pub fn new(mission: Mission, catalog: MessageCatalog) -> Self {
        Self {
            mission: Some(mission),
            catalog,
        }
    }

    /// Register this message type so `catalog` can decode it.
    pub fn register(catalog: &MessageCatalog) -> bool {
        let inner = catalog.clone();
        catalog.register_custom(SPOOL_MISSION, move || {
            Box::new(SpoolMission {
                mission: None,
                catalog: inner.clone(),
            })
        })
    }
}

impl Message for SpoolMission {
    fn command_code(&self) -> u16 {
        SPOOL_MISSION
    }

    fn name(&self) -> &'static str {
        "SpoolMission"
    }

    fn write_body(&self, packet: &mut Packet, version: Version) -> Result<usize, CodecError> {
        let mission = self
            .mission
            .as_ref()
            .ok_or_else(|| CodecError::InvalidValue("no mission to spool".to_string()))?;
        mission.write(packet, version)
    }

    fn read_body(&mut self, packet: &mut Packet, _version: Version) -> Result<usize, CodecError> {
        let start = packet.read_pos();
        self.mission = Some(Mission::read(packet, &self.catalog)?);
        Ok(packet.read_pos() - start)
    }

    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A mission with `tasks` tasks in a chain of small families, each task
/// holding a few messages.
pub fn survey_mission(tasks: u16) -> Result<Mission> {
    let mut mission = Mission::new(500, Task::new(1));
    for id in 2..=tasks {
        let mut task = Task::new(id);
        task.set_message(1, Box::new(SetTime::default()), true);
        task.set_message(2, Box::new(QueryGlobalPose::default()), false);
        task.set_message(
            3,
            Box::new(ReportIdentification {
                kind: id,
                identification: format!(
                    "survey leg {id} of {tasks}, hold altitude and report pose"
                ),
                ..ReportIdentification::default()
            }),
            false,
        );
        // Every third task starts a new branch under the root.
        let parent = if id % 3 == 2 { 1 } else { id - 1 };
        mission.add_task(parent, task)?;
    }
    Ok(mission)
}
