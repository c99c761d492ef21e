//! Item instances and item types, read from the inventory subsystem's tables

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Pool, Postgres, Row};

use crate::{
    error::{AppError, AppResult},
    models::{
        armory::{ArmoryEntry, ItemInstanceId, ItemTypeId},
        clan::ItemInstanceInfo,
    },
};

use super::armory::PgArmoryLedger;

/// Authoritative record of item instances and their current possessor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemRegistry: Send + Sync {
    async fn describe(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ItemInstanceInfo>>;
}

/// Result of disabling an item type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisableOutcome {
    /// Armory entries removed, as they were before removal
    pub purged: Vec<ArmoryEntry>,
    pub equipped_cleared: u64,
}

/// Item type enablement. Disabling a type clears its equipped slots and
/// purges its armory entries in the same transaction as the flag flip.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemTypeCatalog: Send + Sync {
    async fn disable_item_type(&self, item_type_id: ItemTypeId) -> AppResult<DisableOutcome>;
}

#[derive(Clone)]
pub struct InventoryRepository {
    pool: Pool<Postgres>,
}

impl InventoryRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemRegistry for InventoryRepository {
    async fn describe(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ItemInstanceInfo>> {
        let row = sqlx::query(
            r#"
            SELECT ii.owner_user_id, ii.item_type_id, it.enabled
            FROM item_instances ii
            JOIN item_types it ON it.id = ii.item_type_id
            WHERE ii.id = $1
            "#,
        )
        .bind(item_instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ItemInstanceInfo {
            owner_user_id: r.get("owner_user_id"),
            item_type_id: r.get("item_type_id"),
            item_type_enabled: r.get("enabled"),
        }))
    }
}

#[async_trait]
impl ItemTypeCatalog for InventoryRepository {
    async fn disable_item_type(&self, item_type_id: ItemTypeId) -> AppResult<DisableOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i64>(
            "UPDATE item_types SET enabled = FALSE WHERE id = $1 RETURNING id",
        )
        .bind(item_type_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Item type with id {} not found", item_type_id)))?;

        let equipped_cleared = sqlx::query(
            r#"
            DELETE FROM equipped_items
            WHERE item_instance_id IN (SELECT id FROM item_instances WHERE item_type_id = $1)
            "#,
        )
        .bind(item_type_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let purged = PgArmoryLedger::purge_by_item_type_in(&mut tx, item_type_id).await?;

        tx.commit().await?;

        Ok(DisableOutcome {
            purged,
            equipped_cleared,
        })
    }
}
