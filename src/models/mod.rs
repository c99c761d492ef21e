//! Data models for the clan armory

pub mod armory;
pub mod clan;
pub mod event;

// Re-export commonly used types
pub use armory::{
    ArmoryEntry, ArmoryEntryDetails, ArmoryLoan, ArmoryOffer, ClanId, ItemInstanceId, ItemTypeId,
    LendingState, UserId,
};
pub use clan::{ClanRole, ItemInstanceInfo};
pub use event::{ArmoryEvent, ArmoryEventKind, CatalogEvent};
