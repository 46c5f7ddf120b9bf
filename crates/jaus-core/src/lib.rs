//! jaus-core: wire header, field codec, presence vectors and the message trait.
//! All other JAUS crates depend on this one.

pub mod codec;
pub mod config;
pub mod message;
pub mod presence;
pub mod scaled;
pub mod time;
pub mod wire;

pub use codec::{ByteTally, CodecError, Packet};
pub use message::Message;
pub use presence::{PresenceVector, PresenceVectorSize};
pub use scaled::ScaledWidth;
pub use wire::{AckNack, Address, DataFlag, Header, Version, WireError, HEADER_SIZE};
