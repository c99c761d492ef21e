//! Armory ledger: offers and their embedded loans

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult, ArmoryError},
    models::armory::{
        ArmoryEntry, ArmoryOffer, ArmoryOfferRow, ClanId, ItemInstanceId, ItemTypeId,
        LendingState, UserId,
    },
};

/// Store of armory offers keyed by item instance.
///
/// Every mutating operation on one item instance is mutually exclusive with
/// every other mutating operation on the same instance. Operations on
/// different instances never wait on each other.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArmoryLedger: Send + Sync {
    /// Record a new offer.
    ///
    /// Fails with `ItemTypeDisabled` if the offer's item type is disabled at
    /// insert time, `AlreadyOffered` if the instance has an offer, and
    /// `OfferLimitReached` if `limit` is set and the lender already has that
    /// many offers in the clan. The checks and the insert are one atomic step.
    async fn put_offer(&self, offer: ArmoryOffer, limit: Option<usize>) -> AppResult<ArmoryOffer>;

    /// Remove an offer that is not on loan. Returns the removed entry.
    async fn remove_offer(
        &self,
        item_instance_id: ItemInstanceId,
        requesting_user_id: UserId,
    ) -> AppResult<ArmoryEntry>;

    async fn get_entry(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ArmoryEntry>>;

    /// Entries of a clan, most recently active first
    async fn list_offers(&self, clan_id: ClanId) -> AppResult<Vec<ArmoryEntry>>;

    async fn count_offers_by_lender(&self, clan_id: ClanId, user_id: UserId) -> AppResult<usize>;

    /// Lend an available offer. Returns the entry with its new loan.
    async fn create_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
        borrower_clan_id: ClanId,
        now: DateTime<Utc>,
    ) -> AppResult<ArmoryEntry>;

    /// End a loan on behalf of its borrower. Returns the entry as it was
    /// before the return.
    async fn return_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
    ) -> AppResult<ArmoryEntry>;

    /// End a loan unconditionally. Returns `None` if there was none.
    async fn delete_loan(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ArmoryEntry>>;

    /// Refresh the reclaim clock of a loan on behalf of its borrower.
    /// Fails with `LoanNotFound` or `NotBorrower`.
    async fn touch_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
        now: DateTime<Utc>,
    ) -> AppResult<ArmoryEntry>;

    /// Clans with at least one active loan
    async fn loaned_clans(&self) -> AppResult<Vec<ClanId>>;

    /// Loaned entries of a clan whose loan has been idle for longer than `timeout`
    async fn expired_loans(
        &self,
        clan_id: ClanId,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ArmoryEntry>>;

    /// End the loan only if it is still idle since before `cutoff`.
    /// Returns the entry as it was before the reclaim.
    async fn reclaim_if_expired(
        &self,
        item_instance_id: ItemInstanceId,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Option<ArmoryEntry>>;

    /// Remove every offer (and loan) of an item type. Returns the removed entries.
    async fn purge_by_item_type(&self, item_type_id: ItemTypeId) -> AppResult<Vec<ArmoryEntry>>;

    /// Remove a departed member's offers in a clan and end their loans there.
    /// Returns the affected entries as they were before the purge.
    async fn purge_member(&self, clan_id: ClanId, user_id: UserId) -> AppResult<Vec<ArmoryEntry>>;
}

const OFFER_COLUMNS: &str = "item_instance_id, item_type_id, lender_clan_id, lender_user_id, \
     offer_updated_at, borrower_clan_id, borrower_user_id, loan_updated_at";

const OLD_OFFER_COLUMNS: &str = "old.item_instance_id, old.item_type_id, old.lender_clan_id, \
     old.lender_user_id, old.offer_updated_at, old.borrower_clan_id, old.borrower_user_id, \
     old.loan_updated_at";

/// Clear the loan columns of the rows selected by `filter` (evaluated against
/// the `armory_offers` table aliased as `a`), returning the rows as they were.
fn end_loans_query(filter: &str) -> String {
    format!(
        r#"
        WITH old AS (
            SELECT {columns}
            FROM armory_offers a
            WHERE a.borrower_user_id IS NOT NULL AND {filter}
            FOR UPDATE
        )
        UPDATE armory_offers o
        SET borrower_clan_id = NULL, borrower_user_id = NULL, loan_updated_at = NULL
        FROM old
        WHERE o.item_instance_id = old.item_instance_id
        RETURNING {old_columns}
        "#,
        columns = OFFER_COLUMNS,
        filter = filter,
        old_columns = OLD_OFFER_COLUMNS,
    )
}

fn into_entries(rows: Vec<ArmoryOfferRow>) -> AppResult<Vec<ArmoryEntry>> {
    rows.into_iter().map(ArmoryEntry::try_from).collect()
}

/// PostgreSQL ledger backed by the `armory_offers` table
#[derive(Clone)]
pub struct PgArmoryLedger {
    pool: Pool<Postgres>,
}

impl PgArmoryLedger {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Lock and load one entry inside an open transaction
    async fn lock_entry(
        conn: &mut PgConnection,
        item_instance_id: ItemInstanceId,
    ) -> AppResult<Option<ArmoryEntry>> {
        let row = sqlx::query_as::<_, ArmoryOfferRow>(&format!(
            "SELECT {} FROM armory_offers WHERE item_instance_id = $1 FOR UPDATE",
            OFFER_COLUMNS
        ))
        .bind(item_instance_id)
        .fetch_optional(conn)
        .await?;

        row.map(ArmoryEntry::try_from).transpose()
    }

    /// Purge an item type inside the caller's transaction, so the purge
    /// commits together with whatever else the caller changes.
    pub async fn purge_by_item_type_in(
        conn: &mut PgConnection,
        item_type_id: ItemTypeId,
    ) -> AppResult<Vec<ArmoryEntry>> {
        let rows = sqlx::query_as::<_, ArmoryOfferRow>(&format!(
            "DELETE FROM armory_offers WHERE item_type_id = $1 RETURNING {}",
            OFFER_COLUMNS
        ))
        .bind(item_type_id)
        .fetch_all(conn)
        .await?;

        into_entries(rows)
    }
}

#[async_trait]
impl ArmoryLedger for PgArmoryLedger {
    async fn put_offer(&self, offer: ArmoryOffer, limit: Option<usize>) -> AppResult<ArmoryOffer> {
        let mut tx = self.pool.begin().await?;

        if let Some(limit) = limit {
            // Serializes concurrent offers by the same member
            sqlx::query_scalar::<_, i16>(
                r#"
                SELECT role
                FROM clan_members
                WHERE clan_id = $1 AND user_id = $2 AND left_at IS NULL
                FOR UPDATE
                "#,
            )
            .bind(offer.lender_clan_id)
            .bind(offer.lender_user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ArmoryError::NotClanMember {
                user_id: offer.lender_user_id,
                clan_id: offer.lender_clan_id,
            })?;

            let offered: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM armory_offers WHERE lender_clan_id = $1 AND lender_user_id = $2",
            )
            .bind(offer.lender_clan_id)
            .bind(offer.lender_user_id)
            .fetch_one(&mut *tx)
            .await?;

            if offered >= i64::try_from(limit).unwrap_or(i64::MAX) {
                return Err(ArmoryError::OfferLimitReached {
                    user_id: offer.lender_user_id,
                    limit,
                }
                .into());
            }
        }

        // Held until commit: a concurrent disable waits for this offer and
        // purges it, or has already committed and fails the check.
        let enabled = sqlx::query_scalar::<_, bool>(
            "SELECT enabled FROM item_types WHERE id = $1 FOR SHARE",
        )
        .bind(offer.item_type_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Item type with id {} not found", offer.item_type_id))
        })?;

        if !enabled {
            return Err(ArmoryError::ItemTypeDisabled(offer.item_instance_id).into());
        }

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO armory_offers (item_instance_id, item_type_id, lender_clan_id, lender_user_id, offer_updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (item_instance_id) DO NOTHING
            RETURNING item_instance_id
            "#,
        )
        .bind(offer.item_instance_id)
        .bind(offer.item_type_id)
        .bind(offer.lender_clan_id)
        .bind(offer.lender_user_id)
        .bind(offer.updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            return Err(ArmoryError::AlreadyOffered(offer.item_instance_id).into());
        }

        tx.commit().await?;
        Ok(offer)
    }

    async fn remove_offer(
        &self,
        item_instance_id: ItemInstanceId,
        requesting_user_id: UserId,
    ) -> AppResult<ArmoryEntry> {
        let mut tx = self.pool.begin().await?;

        let entry = Self::lock_entry(&mut tx, item_instance_id)
            .await?
            .ok_or(ArmoryError::OfferNotFound(item_instance_id))?;

        if entry.is_loaned() {
            return Err(ArmoryError::CurrentlyLoaned(item_instance_id).into());
        }
        if entry.offer.lender_user_id != requesting_user_id {
            return Err(ArmoryError::NotLender {
                user_id: requesting_user_id,
                item_instance_id,
            }
            .into());
        }

        sqlx::query("DELETE FROM armory_offers WHERE item_instance_id = $1")
            .bind(item_instance_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn get_entry(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ArmoryEntry>> {
        let row = sqlx::query_as::<_, ArmoryOfferRow>(&format!(
            "SELECT {} FROM armory_offers WHERE item_instance_id = $1",
            OFFER_COLUMNS
        ))
        .bind(item_instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ArmoryEntry::try_from).transpose()
    }

    async fn list_offers(&self, clan_id: ClanId) -> AppResult<Vec<ArmoryEntry>> {
        let rows = sqlx::query_as::<_, ArmoryOfferRow>(&format!(
            r#"
            SELECT {}
            FROM armory_offers
            WHERE lender_clan_id = $1
            ORDER BY GREATEST(offer_updated_at, COALESCE(loan_updated_at, offer_updated_at)) DESC,
                     item_instance_id
            "#,
            OFFER_COLUMNS
        ))
        .bind(clan_id)
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    async fn count_offers_by_lender(&self, clan_id: ClanId, user_id: UserId) -> AppResult<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM armory_offers WHERE lender_clan_id = $1 AND lender_user_id = $2",
        )
        .bind(clan_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        usize::try_from(count).map_err(|e| AppError::Internal(e.to_string()))
    }

    async fn create_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
        borrower_clan_id: ClanId,
        now: DateTime<Utc>,
    ) -> AppResult<ArmoryEntry> {
        let mut tx = self.pool.begin().await?;

        let entry = Self::lock_entry(&mut tx, item_instance_id)
            .await?
            .ok_or(ArmoryError::OfferNotFound(item_instance_id))?;

        let loaned = lend(entry, borrower_user_id, borrower_clan_id, now)?;

        sqlx::query(
            r#"
            UPDATE armory_offers
            SET borrower_clan_id = $2, borrower_user_id = $3, loan_updated_at = $4
            WHERE item_instance_id = $1
            "#,
        )
        .bind(item_instance_id)
        .bind(borrower_clan_id)
        .bind(borrower_user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(loaned)
    }

    async fn return_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
    ) -> AppResult<ArmoryEntry> {
        let mut tx = self.pool.begin().await?;

        let entry = Self::lock_entry(&mut tx, item_instance_id)
            .await?
            .ok_or(ArmoryError::LoanNotFound(item_instance_id))?;
        check_borrower(&entry, borrower_user_id)?;

        sqlx::query(
            r#"
            UPDATE armory_offers
            SET borrower_clan_id = NULL, borrower_user_id = NULL, loan_updated_at = NULL
            WHERE item_instance_id = $1
            "#,
        )
        .bind(item_instance_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn delete_loan(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ArmoryEntry>> {
        let row = sqlx::query_as::<_, ArmoryOfferRow>(&end_loans_query("a.item_instance_id = $1"))
            .bind(item_instance_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ArmoryEntry::try_from).transpose()
    }

    async fn touch_loan(
        &self,
        item_instance_id: ItemInstanceId,
        borrower_user_id: UserId,
        now: DateTime<Utc>,
    ) -> AppResult<ArmoryEntry> {
        let mut tx = self.pool.begin().await?;

        let entry = Self::lock_entry(&mut tx, item_instance_id)
            .await?
            .ok_or(ArmoryError::LoanNotFound(item_instance_id))?;
        check_borrower(&entry, borrower_user_id)?;

        let row = sqlx::query_as::<_, ArmoryOfferRow>(&format!(
            r#"
            UPDATE armory_offers
            SET loan_updated_at = $2
            WHERE item_instance_id = $1
            RETURNING {}
            "#,
            OFFER_COLUMNS
        ))
        .bind(item_instance_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        ArmoryEntry::try_from(row)
    }

    async fn loaned_clans(&self) -> AppResult<Vec<ClanId>> {
        let clans = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT lender_clan_id
            FROM armory_offers
            WHERE borrower_user_id IS NOT NULL
            ORDER BY lender_clan_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(clans)
    }

    async fn expired_loans(
        &self,
        clan_id: ClanId,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ArmoryEntry>> {
        let cutoff = now - timeout;

        let rows = sqlx::query_as::<_, ArmoryOfferRow>(&format!(
            r#"
            SELECT {}
            FROM armory_offers
            WHERE lender_clan_id = $1
              AND borrower_user_id IS NOT NULL
              AND loan_updated_at < $2
            ORDER BY loan_updated_at, item_instance_id
            "#,
            OFFER_COLUMNS
        ))
        .bind(clan_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    async fn reclaim_if_expired(
        &self,
        item_instance_id: ItemInstanceId,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Option<ArmoryEntry>> {
        let row = sqlx::query_as::<_, ArmoryOfferRow>(&end_loans_query(
            "a.item_instance_id = $1 AND a.loan_updated_at < $2",
        ))
        .bind(item_instance_id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ArmoryEntry::try_from).transpose()
    }

    async fn purge_by_item_type(&self, item_type_id: ItemTypeId) -> AppResult<Vec<ArmoryEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::purge_by_item_type_in(&mut conn, item_type_id).await
    }

    async fn purge_member(&self, clan_id: ClanId, user_id: UserId) -> AppResult<Vec<ArmoryEntry>> {
        let mut tx = self.pool.begin().await?;

        let offered = sqlx::query_as::<_, ArmoryOfferRow>(&format!(
            r#"
            DELETE FROM armory_offers
            WHERE lender_clan_id = $1 AND lender_user_id = $2
            RETURNING {}
            "#,
            OFFER_COLUMNS
        ))
        .bind(clan_id)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let borrowed = sqlx::query_as::<_, ArmoryOfferRow>(&end_loans_query(
            "a.lender_clan_id = $1 AND a.borrower_user_id = $2",
        ))
        .bind(clan_id)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut entries = into_entries(offered)?;
        entries.extend(into_entries(borrowed)?);
        Ok(entries)
    }
}

/// Apply the borrow rules to a locked entry and return it loaned
pub(crate) fn lend(
    entry: ArmoryEntry,
    borrower_user_id: UserId,
    borrower_clan_id: ClanId,
    now: DateTime<Utc>,
) -> AppResult<ArmoryEntry> {
    let item_instance_id = entry.item_instance_id();

    if entry.offer.lender_clan_id != borrower_clan_id {
        return Err(ArmoryError::CrossClanBorrow {
            item_instance_id,
            lender_clan_id: entry.offer.lender_clan_id,
            borrower_clan_id,
        }
        .into());
    }
    if entry.is_loaned() {
        return Err(ArmoryError::AlreadyLoaned(item_instance_id).into());
    }
    if entry.offer.lender_user_id == borrower_user_id {
        return Err(ArmoryError::SelfLoan {
            user_id: borrower_user_id,
            item_instance_id,
        }
        .into());
    }

    Ok(ArmoryEntry {
        state: LendingState::Loaned(crate::models::ArmoryLoan {
            item_instance_id,
            borrower_clan_id,
            borrower_user_id,
            updated_at: now,
        }),
        offer: entry.offer,
    })
}

/// Check that `user_id` holds the loan on a locked entry
pub(crate) fn check_borrower(entry: &ArmoryEntry, user_id: UserId) -> AppResult<()> {
    let item_instance_id = entry.item_instance_id();
    match entry.loan() {
        None => Err(ArmoryError::LoanNotFound(item_instance_id).into()),
        Some(loan) if loan.borrower_user_id != user_id => Err(ArmoryError::NotBorrower {
            user_id,
            item_instance_id,
        }
        .into()),
        Some(_) => Ok(()),
    }
}
