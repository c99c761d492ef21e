//! Armory events emitted to activity log and notification collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::armory::{ArmoryEntry, ClanId, ItemInstanceId, ItemTypeId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArmoryEventKind {
    OfferCreated,
    OfferWithdrawn,
    LoanCreated,
    LoanReturned,
    LoanReclaimed,
    /// Offer (and its loan, if any) removed because its item type was disabled
    OfferPurged,
}

impl std::fmt::Display for ArmoryEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ArmoryEventKind::OfferCreated => "offer_created",
            ArmoryEventKind::OfferWithdrawn => "offer_withdrawn",
            ArmoryEventKind::LoanCreated => "loan_created",
            ArmoryEventKind::LoanReturned => "loan_returned",
            ArmoryEventKind::LoanReclaimed => "loan_reclaimed",
            ArmoryEventKind::OfferPurged => "offer_purged",
        };
        write!(f, "{}", label)
    }
}

/// A lending state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ArmoryEvent {
    pub id: Uuid,
    pub kind: ArmoryEventKind,
    pub item_instance_id: ItemInstanceId,
    pub clan_id: ClanId,
    pub lender_user_id: UserId,
    pub borrower_user_id: Option<UserId>,
    pub at: DateTime<Utc>,
}

impl ArmoryEvent {
    /// Build an event from the entry as it was when the change happened
    pub fn from_entry(kind: ArmoryEventKind, entry: &ArmoryEntry, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            item_instance_id: entry.offer.item_instance_id,
            clan_id: entry.offer.lender_clan_id,
            lender_user_id: entry.offer.lender_user_id,
            borrower_user_id: entry.loan().map(|l| l.borrower_user_id),
            at,
        }
    }
}

/// Item catalog lifecycle events consumed by the armory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogEvent {
    ItemTypeDisabled { item_type_id: ItemTypeId },
    ItemTypeEnabled { item_type_id: ItemTypeId },
}
