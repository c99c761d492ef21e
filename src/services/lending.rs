//! Lending service: the member-facing armory operations

use std::sync::Arc;

use crate::{
    error::{AppResult, ArmoryError},
    models::{
        armory::{ArmoryEntry, ArmoryEntryDetails, ArmoryOffer, ClanId, ItemInstanceId, UserId},
        clan::ClanRole,
        event::{ArmoryEvent, ArmoryEventKind},
    },
    repository::Repository,
};

use super::{clock::Clock, events::ArmoryEventSink};

#[derive(Clone)]
pub struct LendingService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    events: Arc<dyn ArmoryEventSink>,
    offer_limit: Option<usize>,
}

impl LendingService {
    pub fn new(
        repository: Repository,
        clock: Arc<dyn Clock>,
        events: Arc<dyn ArmoryEventSink>,
        offer_limit: Option<usize>,
    ) -> Self {
        Self {
            repository,
            clock,
            events,
            offer_limit,
        }
    }

    /// Fail with `NotClanMember` unless the user is an active member of the clan
    async fn require_member(&self, user_id: UserId, clan_id: ClanId) -> AppResult<ClanRole> {
        self.repository
            .members
            .active_role(user_id, clan_id)
            .await?
            .ok_or_else(|| ArmoryError::NotClanMember { user_id, clan_id }.into())
    }

    fn emit(&self, kind: ArmoryEventKind, entry: &ArmoryEntry) {
        self.events
            .publish(ArmoryEvent::from_entry(kind, entry, self.clock.now()));
    }

    /// Put one of the user's items in the clan armory
    pub async fn offer_item(
        &self,
        user_id: UserId,
        clan_id: ClanId,
        item_instance_id: ItemInstanceId,
    ) -> AppResult<ArmoryOffer> {
        self.require_member(user_id, clan_id).await?;

        let item = self
            .repository
            .items
            .describe(item_instance_id)
            .await?
            .filter(|item| item.owner_user_id == user_id)
            .ok_or(ArmoryError::NotItemOwner {
                user_id,
                item_instance_id,
            })?;

        if !item.item_type_enabled {
            return Err(ArmoryError::ItemTypeDisabled(item_instance_id).into());
        }

        // The ledger re-checks the type and the limit atomically with the insert
        let offer = self
            .repository
            .ledger
            .put_offer(
                ArmoryOffer {
                    item_instance_id,
                    item_type_id: item.item_type_id,
                    lender_clan_id: clan_id,
                    lender_user_id: user_id,
                    updated_at: self.clock.now(),
                },
                self.offer_limit,
            )
            .await?;

        tracing::info!(user_id, clan_id, item_instance_id, "Item offered to armory");
        self.emit(ArmoryEventKind::OfferCreated, &ArmoryEntry::available(offer.clone()));
        Ok(offer)
    }

    /// Take an item back out of the armory. Rejected while it is on loan.
    pub async fn withdraw_offer(
        &self,
        user_id: UserId,
        item_instance_id: ItemInstanceId,
    ) -> AppResult<ArmoryEntry> {
        let entry = self
            .repository
            .ledger
            .remove_offer(item_instance_id, user_id)
            .await?;

        tracing::info!(user_id, item_instance_id, "Armory offer withdrawn");
        self.emit(ArmoryEventKind::OfferWithdrawn, &entry);
        Ok(entry)
    }

    /// Borrow an item from the clan armory
    pub async fn borrow_item(
        &self,
        user_id: UserId,
        clan_id: ClanId,
        item_instance_id: ItemInstanceId,
    ) -> AppResult<ArmoryEntry> {
        self.require_member(user_id, clan_id).await?;

        let entry = self
            .repository
            .ledger
            .create_loan(item_instance_id, user_id, clan_id, self.clock.now())
            .await?;

        tracing::info!(
            user_id,
            clan_id,
            item_instance_id,
            lender_user_id = entry.offer.lender_user_id,
            "Armory item borrowed"
        );
        self.emit(ArmoryEventKind::LoanCreated, &entry);
        Ok(entry)
    }

    /// Give a borrowed item back to the armory. The offer stays available.
    pub async fn return_item(
        &self,
        user_id: UserId,
        item_instance_id: ItemInstanceId,
    ) -> AppResult<ArmoryEntry> {
        let entry = self
            .repository
            .ledger
            .return_loan(item_instance_id, user_id)
            .await?;

        tracing::info!(user_id, item_instance_id, "Armory item returned");
        self.emit(ArmoryEventKind::LoanReturned, &entry);
        Ok(entry)
    }

    /// Record loan activity by the borrower, restarting the reclaim clock
    pub async fn touch_loan(
        &self,
        user_id: UserId,
        item_instance_id: ItemInstanceId,
    ) -> AppResult<ArmoryEntry> {
        let entry = self
            .repository
            .ledger
            .touch_loan(item_instance_id, user_id, self.clock.now())
            .await?;

        tracing::debug!(user_id, item_instance_id, "Armory loan refreshed");
        Ok(entry)
    }

    /// The clan's armory, most recently active first
    pub async fn list_armory(
        &self,
        user_id: UserId,
        clan_id: ClanId,
    ) -> AppResult<Vec<ArmoryEntryDetails>> {
        self.require_member(user_id, clan_id).await?;

        let entries = self.repository.ledger.list_offers(clan_id).await?;
        Ok(entries.into_iter().map(ArmoryEntryDetails::from).collect())
    }

    /// Remove a departed member's offers and loans in a clan.
    /// Only an officer or leader of the clan may do this.
    pub async fn purge_member(
        &self,
        acting_user_id: UserId,
        clan_id: ClanId,
        user_id: UserId,
    ) -> AppResult<Vec<ArmoryEntry>> {
        let role = self.require_member(acting_user_id, clan_id).await?;
        if !role.can_moderate() {
            return Err(ArmoryError::InsufficientRole {
                user_id: acting_user_id,
                clan_id,
            }
            .into());
        }

        let affected = self.repository.ledger.purge_member(clan_id, user_id).await?;

        for entry in &affected {
            let kind = if entry.offer.lender_user_id == user_id {
                ArmoryEventKind::OfferWithdrawn
            } else {
                ArmoryEventKind::LoanReturned
            };
            self.emit(kind, entry);
        }

        tracing::info!(
            clan_id,
            user_id,
            acting_user_id,
            affected = affected.len(),
            "Departed member purged from armory"
        );
        Ok(affected)
    }
}
