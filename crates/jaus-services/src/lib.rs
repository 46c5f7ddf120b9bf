//! jaus-services: message catalog, large data set fragmentation,
//! delivery tracking and mission task trees, built on `jaus-core`.

pub mod catalog;
pub mod delivery;
pub mod fragment;
pub mod messages;
pub mod mission;
pub mod reassembly;
pub mod receipt;

pub use catalog::{Constructor, MessageCatalog};
pub use delivery::{DeliveryPolicy, DeliveryTracker, Overdue, ReceiptId};
pub use fragment::{
    create_fragments, select_retransmits, Fragment, FragmentError, FragmentKey, FragmentSet,
};
pub use mission::{Mission, Task, TaskMessage};
pub use reassembly::{Reassembler, StalledSet};
pub use receipt::{Receipt, ReceiptStatus};
