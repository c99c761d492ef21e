//! Repository layer: the armory ledger and the collaborator adapters

pub mod armory;
pub mod clans;
pub mod inventory;
pub mod memory;

use std::sync::Arc;

use sqlx::{Pool, Postgres};

pub use armory::{ArmoryLedger, PgArmoryLedger};
pub use clans::{ClanSettings, ClansRepository, MembershipOracle};
pub use inventory::{DisableOutcome, InventoryRepository, ItemRegistry, ItemTypeCatalog};
pub use memory::MemoryArmoryLedger;

/// Ledger and collaborators the armory services run against
#[derive(Clone)]
pub struct Repository {
    pub ledger: Arc<dyn ArmoryLedger>,
    pub members: Arc<dyn MembershipOracle>,
    pub clans: Arc<dyn ClanSettings>,
    pub items: Arc<dyn ItemRegistry>,
    pub catalog: Arc<dyn ItemTypeCatalog>,
}

impl Repository {
    /// Create a repository backed by the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        let clans = ClansRepository::new(pool.clone());
        let inventory = InventoryRepository::new(pool.clone());

        Self {
            ledger: Arc::new(PgArmoryLedger::new(pool)),
            members: Arc::new(clans.clone()),
            clans: Arc::new(clans),
            items: Arc::new(inventory.clone()),
            catalog: Arc::new(inventory),
        }
    }
}
