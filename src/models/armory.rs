//! Armory offer and loan models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

pub type ItemInstanceId = i64;
pub type ItemTypeId = i64;
pub type UserId = i64;
pub type ClanId = i64;

/// An item instance made available to clan-mates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryOffer {
    pub item_instance_id: ItemInstanceId,
    pub item_type_id: ItemTypeId,
    pub lender_clan_id: ClanId,
    pub lender_user_id: UserId,
    pub updated_at: DateTime<Utc>,
}

/// An active borrow of an offered item instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryLoan {
    pub item_instance_id: ItemInstanceId,
    pub borrower_clan_id: ClanId,
    pub borrower_user_id: UserId,
    /// Reclaim clock, refreshed by loan activity
    pub updated_at: DateTime<Utc>,
}

/// Lending state of an offered item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LendingState {
    Available,
    Loaned(ArmoryLoan),
}

/// One ledger record: an offer and, optionally, its single active loan.
///
/// Keeping the loan embedded in the offer record means a loan can never exist
/// without its offer, and there can never be two loans for the same instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoryEntry {
    pub offer: ArmoryOffer,
    pub state: LendingState,
}

impl ArmoryEntry {
    pub fn available(offer: ArmoryOffer) -> Self {
        Self {
            offer,
            state: LendingState::Available,
        }
    }

    pub fn item_instance_id(&self) -> ItemInstanceId {
        self.offer.item_instance_id
    }

    pub fn loan(&self) -> Option<&ArmoryLoan> {
        match &self.state {
            LendingState::Loaned(loan) => Some(loan),
            LendingState::Available => None,
        }
    }

    pub fn is_loaned(&self) -> bool {
        matches!(self.state, LendingState::Loaned(_))
    }

    /// Most recent activity on the entry, used to order the armory listing
    pub fn last_activity(&self) -> DateTime<Utc> {
        match &self.state {
            LendingState::Loaned(loan) => loan.updated_at.max(self.offer.updated_at),
            LendingState::Available => self.offer.updated_at,
        }
    }
}

/// Sort entries most recently active first, ties broken by instance id
pub fn sort_by_activity(entries: &mut [ArmoryEntry]) {
    entries.sort_by(|a, b| {
        b.last_activity()
            .cmp(&a.last_activity())
            .then_with(|| a.item_instance_id().cmp(&b.item_instance_id()))
    });
}

/// Row of the `armory_offers` table
#[derive(Debug, Clone, FromRow)]
pub struct ArmoryOfferRow {
    pub item_instance_id: i64,
    pub item_type_id: i64,
    pub lender_clan_id: i64,
    pub lender_user_id: i64,
    pub offer_updated_at: DateTime<Utc>,
    pub borrower_clan_id: Option<i64>,
    pub borrower_user_id: Option<i64>,
    pub loan_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<ArmoryOfferRow> for ArmoryEntry {
    type Error = AppError;

    fn try_from(row: ArmoryOfferRow) -> AppResult<Self> {
        let offer = ArmoryOffer {
            item_instance_id: row.item_instance_id,
            item_type_id: row.item_type_id,
            lender_clan_id: row.lender_clan_id,
            lender_user_id: row.lender_user_id,
            updated_at: row.offer_updated_at,
        };

        let state = match (row.borrower_clan_id, row.borrower_user_id, row.loan_updated_at) {
            (None, None, None) => LendingState::Available,
            (Some(borrower_clan_id), Some(borrower_user_id), Some(updated_at)) => {
                LendingState::Loaned(ArmoryLoan {
                    item_instance_id: row.item_instance_id,
                    borrower_clan_id,
                    borrower_user_id,
                    updated_at,
                })
            }
            _ => {
                return Err(AppError::Internal(format!(
                    "Armory offer {} has a partial loan record",
                    row.item_instance_id
                )))
            }
        };

        Ok(ArmoryEntry { offer, state })
    }
}

/// Armory entry as shown to clan members
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArmoryEntryDetails {
    pub item_instance_id: i64,
    pub item_type_id: i64,
    pub clan_id: i64,
    pub lender_user_id: i64,
    pub offered_at: DateTime<Utc>,
    pub is_loaned: bool,
    /// Current borrower, if the item is on loan
    pub borrower_user_id: Option<i64>,
    /// Last loan activity, if the item is on loan
    pub loan_updated_at: Option<DateTime<Utc>>,
}

impl From<ArmoryEntry> for ArmoryEntryDetails {
    fn from(entry: ArmoryEntry) -> Self {
        let loan = entry.loan().cloned();
        Self {
            item_instance_id: entry.offer.item_instance_id,
            item_type_id: entry.offer.item_type_id,
            clan_id: entry.offer.lender_clan_id,
            lender_user_id: entry.offer.lender_user_id,
            offered_at: entry.offer.updated_at,
            is_loaned: loan.is_some(),
            borrower_user_id: loan.as_ref().map(|l| l.borrower_user_id),
            loan_updated_at: loan.map(|l| l.updated_at),
        }
    }
}
