//! Item deactivation reconciler: keeps the armory free of disabled item types

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        armory::ItemTypeId,
        event::{ArmoryEvent, ArmoryEventKind, CatalogEvent},
    },
    repository::Repository,
};

use super::{clock::Clock, events::ArmoryEventSink};

/// What disabling an item type removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PurgeReport {
    pub item_type_id: ItemTypeId,
    pub offers_removed: usize,
    /// Loans among the removed offers
    pub loans_removed: usize,
    pub equipped_cleared: u64,
}

#[derive(Clone)]
pub struct DeactivationReconciler {
    repository: Repository,
    clock: Arc<dyn Clock>,
    events: Arc<dyn ArmoryEventSink>,
}

impl DeactivationReconciler {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, events: Arc<dyn ArmoryEventSink>) -> Self {
        Self {
            repository,
            clock,
            events,
        }
    }

    /// Consume a catalog event. Only disablement touches the armory.
    pub async fn handle(&self, event: CatalogEvent) -> AppResult<Option<PurgeReport>> {
        match event {
            CatalogEvent::ItemTypeDisabled { item_type_id } => {
                self.disable_item_type(item_type_id).await.map(Some)
            }
            CatalogEvent::ItemTypeEnabled { item_type_id } => {
                tracing::debug!(item_type_id, "Item type enabled, armory unaffected");
                Ok(None)
            }
        }
    }

    /// Disable an item type, clearing equipped slots and purging the armory
    /// in the same transaction as the flag flip
    pub async fn disable_item_type(&self, item_type_id: ItemTypeId) -> AppResult<PurgeReport> {
        let outcome = self.repository.catalog.disable_item_type(item_type_id).await?;

        let now = self.clock.now();
        for entry in &outcome.purged {
            self.events
                .publish(ArmoryEvent::from_entry(ArmoryEventKind::OfferPurged, entry, now));
        }

        let report = PurgeReport {
            item_type_id,
            offers_removed: outcome.purged.len(),
            loans_removed: outcome.purged.iter().filter(|e| e.is_loaned()).count(),
            equipped_cleared: outcome.equipped_cleared,
        };

        tracing::info!(
            item_type_id,
            offers_removed = report.offers_removed,
            loans_removed = report.loans_removed,
            equipped_cleared = report.equipped_cleared,
            "Item type disabled, armory references purged"
        );

        Ok(report)
    }
}
