//! In-process armory ledger.
//!
//! Each item instance gets its own slot guarded by an async mutex, so
//! operations on one instance are serialized while different instances never
//! wait on each other. The slot table itself is only locked for lookups.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    error::{AppResult, ArmoryError},
    models::armory::{
        sort_by_activity, ArmoryEntry, ArmoryOffer, ClanId, ItemInstanceId, ItemTypeId,
        LendingState, UserId,
    },
};

use super::armory::{check_borrower, lend, ArmoryLedger};

#[derive(Default)]
struct Slot {
    entry: Option<ArmoryEntry>,
    /// Set once the slot has been dropped from the table; holders must look up again
    retired: bool,
}

type SlotGuard = OwnedMutexGuard<Slot>;

#[derive(Default, Clone)]
pub struct MemoryArmoryLedger {
    slots: Arc<Mutex<HashMap<ItemInstanceId, Arc<AsyncMutex<Slot>>>>>,
    /// Item types purged from the ledger; new offers of these are refused
    disabled_types: Arc<Mutex<HashSet<ItemTypeId>>>,
    /// Held while a limited offer counts and inserts
    offer_gate: Arc<AsyncMutex<()>>,
}

impl MemoryArmoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept offers of an item type again after it was purged
    pub fn enable_item_type(&self, item_type_id: ItemTypeId) {
        self.disabled().remove(&item_type_id);
    }

    pub fn is_item_type_disabled(&self, item_type_id: ItemTypeId) -> bool {
        self.disabled().contains(&item_type_id)
    }

    fn disabled(&self) -> std::sync::MutexGuard<'_, HashSet<ItemTypeId>> {
        self.disabled_types
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<ItemInstanceId, Arc<AsyncMutex<Slot>>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the slot of one instance. With `create`, a missing slot is added.
    async fn acquire(&self, item_instance_id: ItemInstanceId, create: bool) -> Option<SlotGuard> {
        loop {
            let slot = {
                let mut table = self.table();
                match table.get(&item_instance_id) {
                    Some(slot) => slot.clone(),
                    None if create => table.entry(item_instance_id).or_default().clone(),
                    None => return None,
                }
            };

            let guard = slot.lock_owned().await;
            if !guard.retired {
                return Some(guard);
            }
        }
    }

    /// Drop the slot from the table if it no longer holds an offer
    fn release(&self, item_instance_id: ItemInstanceId, mut guard: SlotGuard) {
        if guard.entry.is_none() {
            guard.retired = true;
            self.table().remove(&item_instance_id);
        }
    }

    /// Lock every current slot in turn, applying `f` to each held entry
    async fn for_each_slot<F>(&self, mut f: F)
    where
        F: FnMut(&mut Option<ArmoryEntry>) + Send,
    {
        let mut ids: Vec<ItemInstanceId> = self.table().keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            if let Some(mut guard) = self.acquire(id, false).await {
                f(&mut guard.entry);
                self.release(id, guard);
            }
        }
    }

    /// Snapshot of every entry matching `predicate`
    async fn collect<P>(&self, predicate: P) -> Vec<ArmoryEntry>
    where
        P: Fn(&ArmoryEntry) -> bool + Send + Sync,
    {
        let mut found = Vec::new();
        self.for_each_slot(|slot| {
            if let Some(entry) = slot.as_ref() {
                if predicate(entry) {
                    found.push(entry.clone());
                }
            }
        })
        .await;
        found
    }

    /// End the loan held in `slot`, returning the entry as it was
    fn end_loan(slot: &mut Option<ArmoryEntry>) -> Option<ArmoryEntry> {
        let entry = slot.as_mut()?;
        if !entry.is_loaned() {
            return None;
        }
        let before = entry.clone();
        entry.state = LendingState::Available;
        Some(before)
    }
}

#[async_trait]
impl ArmoryLedger for MemoryArmoryLedger {
    async fn put_offer(&self, offer: ArmoryOffer, limit: Option<usize>) -> AppResult<ArmoryOffer> {
        let item_instance_id = offer.item_instance_id;

        let _gate = match limit {
            Some(_) => Some(self.offer_gate.lock().await),
            None => None,
        };
        if let Some(limit) = limit {
            let offered = self
                .count_offers_by_lender(offer.lender_clan_id, offer.lender_user_id)
                .await?;
            if offered >= limit {
                return Err(ArmoryError::OfferLimitReached {
                    user_id: offer.lender_user_id,
                    limit,
                }
                .into());
            }
        }

        let mut guard = self
            .acquire(item_instance_id, true)
            .await
            .ok_or(ArmoryError::AlreadyOffered(item_instance_id))?;

        // Checked after the slot is in the table: a purge that disables the
        // type afterwards will visit this slot.
        if self.is_item_type_disabled(offer.item_type_id) {
            self.release(item_instance_id, guard);
            return Err(ArmoryError::ItemTypeDisabled(item_instance_id).into());
        }
        if guard.entry.is_some() {
            return Err(ArmoryError::AlreadyOffered(item_instance_id).into());
        }
        guard.entry = Some(ArmoryEntry::available(offer.clone()));
        Ok(offer)
    }

    async fn remove_offer(
        &self,
        item_instance_id: ItemInstanceId,
        requesting_user_id: UserId,
    ) -> AppResult<ArmoryEntry> {
        let mut guard = self
            .acquire(item_instance_id, false)
            .await
            .ok_or(ArmoryError::OfferNotFound(item_instance_id))?;

        let check = match guard.entry.as_ref() {
            None => Err(ArmoryError::OfferNotFound(item_instance_id)),
            Some(entry) if entry.is_loaned() => Err(ArmoryError::CurrentlyLoaned(item_instance_id)),
            Some(entry) if entry.offer.lender_user_id != requesting_user_id => {
                Err(ArmoryError::NotLender {
                    user_id: requesting_user_id,
                    item_instance_id,
                })
            }
            Some(_) => Ok(()),
        };

        let removed = check.map(|()| guard.entry.take());
        self.release(item_instance_id, guard);

        match removed? {
            Some(entry) => Ok(entry),
            None => Err(ArmoryError::OfferNotFound(item_instance_id).into()),
        }
    }

    async fn get_entry(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ArmoryEntry>> {
        Ok(match self.acquire(item_instance_id, false).await {
            Some(guard) => guard.entry.clone(),
            None => None,
        })
    }

    async fn list_offers(&self, clan_id: ClanId) -> AppResult<Vec<ArmoryEntry>> {
        let mut entries = self
            .collect(|entry| entry.offer.lender_clan_id == clan_id)
            .await;
        sort_by_activity(&mut entries);
        Ok(entries)
    }

    async fn count_offers_by_lender(&self, clan_id: ClanId, user_id: UserId) -> AppResult<usize> {
        let entries = self
            .collect(|entry| {
                entry.offer.lender_clan_id == clan_id && entry.offer.lender_user_id == user_id
            })
            .await;
        Ok(entries.len())
    }

    async fn create_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
        borrower_clan_id: ClanId,
        now: DateTime<Utc>,
    ) -> AppResult<ArmoryEntry> {
        let mut guard = self
            .acquire(item_instance_id, false)
            .await
            .ok_or(ArmoryError::OfferNotFound(item_instance_id))?;

        let entry = guard
            .entry
            .clone()
            .ok_or(ArmoryError::OfferNotFound(item_instance_id))?;
        let loaned = lend(entry, borrower_user_id, borrower_clan_id, now)?;
        guard.entry = Some(loaned.clone());
        Ok(loaned)
    }

    async fn return_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
    ) -> AppResult<ArmoryEntry> {
        let mut guard = self
            .acquire(item_instance_id, false)
            .await
            .ok_or(ArmoryError::LoanNotFound(item_instance_id))?;

        let entry = guard
            .entry
            .clone()
            .ok_or(ArmoryError::LoanNotFound(item_instance_id))?;
        check_borrower(&entry, borrower_user_id)?;

        Self::end_loan(&mut guard.entry);
        Ok(entry)
    }

    async fn delete_loan(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ArmoryEntry>> {
        Ok(match self.acquire(item_instance_id, false).await {
            Some(mut guard) => Self::end_loan(&mut guard.entry),
            None => None,
        })
    }

    async fn touch_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
        now: DateTime<Utc>,
    ) -> AppResult<ArmoryEntry> {
        let mut guard = self
            .acquire(item_instance_id, false)
            .await
            .ok_or(ArmoryError::LoanNotFound(item_instance_id))?;

        let entry = guard
            .entry
            .as_mut()
            .ok_or(ArmoryError::LoanNotFound(item_instance_id))?;
        check_borrower(entry, borrower_user_id)?;

        if let LendingState::Loaned(loan) = &mut entry.state {
            loan.updated_at = now;
        }
        Ok(entry.clone())
    }

    async fn loaned_clans(&self) -> AppResult<Vec<ClanId>> {
        let mut clans: Vec<ClanId> = self
            .collect(ArmoryEntry::is_loaned)
            .await
            .into_iter()
            .map(|entry| entry.offer.lender_clan_id)
            .collect();
        clans.sort_unstable();
        clans.dedup();
        Ok(clans)
    }

    async fn expired_loans(
        &self,
        clan_id: ClanId,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ArmoryEntry>> {
        let cutoff = now - timeout;
        let mut expired = self
            .collect(|entry| {
                entry.offer.lender_clan_id == clan_id
                    && entry.loan().is_some_and(|loan| loan.updated_at < cutoff)
            })
            .await;
        expired.sort_by_key(|entry| {
            (
                entry.loan().map(|loan| loan.updated_at),
                entry.item_instance_id(),
            )
        });
        Ok(expired)
    }

    async fn reclaim_if_expired(
        &self,
        item_instance_id: ItemInstanceId,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Option<ArmoryEntry>> {
        let Some(mut guard) = self.acquire(item_instance_id, false).await else {
            return Ok(None);
        };

        let still_expired = guard
            .entry
            .as_ref()
            .and_then(ArmoryEntry::loan)
            .is_some_and(|loan| loan.updated_at < cutoff);

        Ok(if still_expired {
            Self::end_loan(&mut guard.entry)
        } else {
            None
        })
    }

    async fn purge_by_item_type(&self, item_type_id: ItemTypeId) -> AppResult<Vec<ArmoryEntry>> {
        // Before the scan, so an offer racing the purge is either refused or visited
        self.disabled().insert(item_type_id);

        let mut purged = Vec::new();
        self.for_each_slot(|slot| {
            if slot.as_ref().is_some_and(|e| e.offer.item_type_id == item_type_id) {
                purged.extend(slot.take());
            }
        })
        .await;
        Ok(purged)
    }

    async fn purge_member(&self, clan_id: ClanId, user_id: UserId) -> AppResult<Vec<ArmoryEntry>> {
        let mut affected = Vec::new();
        self.for_each_slot(|slot| {
            let Some(entry) = slot.as_ref() else {
                return;
            };
            if entry.offer.lender_clan_id != clan_id {
                return;
            }
            if entry.offer.lender_user_id == user_id {
                affected.extend(slot.take());
            } else if entry.loan().is_some_and(|loan| loan.borrower_user_id == user_id) {
                affected.extend(Self::end_loan(slot));
            }
        })
        .await;
        Ok(affected)
    }
}
