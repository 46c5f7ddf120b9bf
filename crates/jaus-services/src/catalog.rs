//! Message catalog: command code to message constructor.
//!
//! Built-in codes are fixed at construction. Applications add their own
//! message types through the custom registry, which is shared by every clone
//! of the catalog and safe to mutate from any thread.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use jaus_core::codec::{CodecError, Packet};
use jaus_core::message::{decode_body, Message};
use jaus_core::presence::PresenceVectorSize;
use jaus_core::wire::{Header, Version};

use crate::messages::{
    codes, QueryGlobalPose, QueryIdentification, QueryTime, ReportGlobalPose,
    ReportIdentification, ReportTime, SetTime,
};

/// Builds a fresh, default-valued message.
pub type Constructor = Arc<dyn Fn() -> Box<dyn Message> + Send + Sync>;

fn boxed<M: Message + Default + 'static>() -> Box<dyn Message> {
    Box::new(M::default())
}

#[derive(Clone)]
pub struct MessageCatalog {
    builtin: Arc<HashMap<u16, fn() -> Box<dyn Message>>>,
    custom: Arc<DashMap<u16, Constructor>>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCatalog")
            .field("builtin", &self.builtin.len())
            .field("custom", &self.custom.len())
            .finish()
    }
}

impl MessageCatalog {
    pub fn new() -> Self {
        let mut builtin: HashMap<u16, fn() -> Box<dyn Message>> = HashMap::new();
        builtin.insert(codes::SET_TIME, boxed::<SetTime>);
        builtin.insert(codes::QUERY_TIME, boxed::<QueryTime>);
        builtin.insert(codes::REPORT_TIME, boxed::<ReportTime>);
        builtin.insert(codes::QUERY_GLOBAL_POSE, boxed::<QueryGlobalPose>);
        builtin.insert(codes::REPORT_GLOBAL_POSE, boxed::<ReportGlobalPose>);
        builtin.insert(codes::QUERY_IDENTIFICATION, boxed::<QueryIdentification>);
        builtin.insert(codes::REPORT_IDENTIFICATION, boxed::<ReportIdentification>);

        Self {
            builtin: Arc::new(builtin),
            custom: Arc::new(DashMap::new()),
        }
    }

    /// A default-valued message for `code`, or `None` if the code is unknown.
    pub fn create(&self, code: u16) -> Option<Box<dyn Message>> {
        if let Some(ctor) = self.builtin.get(&code) {
            return Some(ctor());
        }
        // Clone the constructor out so the shard lock is not held while it runs.
        let ctor = self.custom.get(&code).map(|entry| Arc::clone(entry.value()))?;
        Some(ctor())
    }

    pub fn is_registered(&self, code: u16) -> bool {
        self.builtin.contains_key(&code) || self.custom.contains_key(&code)
    }

    pub fn is_builtin(&self, code: u16) -> bool {
        self.builtin.contains_key(&code)
    }

    /// Register a constructor for an application-defined code.
    ///
    /// Returns `false` when `code` is built in or the constructor builds a
    /// message with a different command code. An existing custom entry for
    /// the same code is replaced.
    pub fn register_custom<F>(&self, code: u16, ctor: F) -> bool
    where
        F: Fn() -> Box<dyn Message> + Send + Sync + 'static,
    {
        if self.is_builtin(code) {
            tracing::warn!(code, "refusing to override built-in message code");
            return false;
        }
        let built = ctor();
        if built.command_code() != code {
            tracing::warn!(
                code,
                built = built.command_code(),
                message = built.name(),
                "constructor builds a message with another command code"
            );
            return false;
        }
        if self.custom.insert(code, Arc::new(ctor)).is_some() {
            tracing::debug!(code, message = built.name(), "custom message replaced");
        } else {
            tracing::debug!(code, message = built.name(), "custom message registered");
        }
        true
    }

    pub fn unregister_custom(&self, code: u16) -> bool {
        self.custom.remove(&code).is_some()
    }

    pub fn clear_custom(&self) {
        self.custom.clear();
    }

    pub fn custom_codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self.custom.iter().map(|entry| *entry.key()).collect();
        codes.sort_unstable();
        codes
    }

    pub fn presence_vector_size(&self, code: u16, version: Version) -> Option<PresenceVectorSize> {
        self.create(code).map(|m| m.presence_vector_size(version))
    }

    pub fn presence_vector_mask(&self, code: u16, version: Version) -> Option<u32> {
        self.create(code).map(|m| m.presence_vector_mask(version))
    }

    /// Read one framed message from the packet cursor.
    ///
    /// An unknown command code is not an error: its body is skipped and
    /// `Ok(None)` returned so the caller can carry on with the next message.
    /// On error the cursor is restored.
    pub fn decode(
        &self,
        packet: &mut Packet,
    ) -> Result<Option<(Header, Box<dyn Message>)>, CodecError> {
        let start = packet.read_pos();
        let result = self.decode_framed(packet);
        if result.is_err() {
            packet.set_read_pos(start)?;
        }
        result
    }

    fn decode_framed(
        &self,
        packet: &mut Packet,
    ) -> Result<Option<(Header, Box<dyn Message>)>, CodecError> {
        let header = packet.read_header()?;
        let size = header.data_size as usize;
        if size > packet.remaining() {
            return Err(CodecError::BadPacket {
                need: size,
                remaining: packet.remaining(),
            });
        }

        let Some(mut message) = self.create(header.command_code) else {
            tracing::trace!(
                code = header.command_code,
                source = %header.source,
                size,
                "skipping message with unknown command code"
            );
            packet.set_read_pos(packet.read_pos() + size)?;
            return Ok(None);
        };

        decode_body(message.as_mut(), packet, &header)?;
        Ok(Some((header, message)))
    }
}
