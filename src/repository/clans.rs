//! Clan membership and clan settings, read from the clan subsystem's tables

use async_trait::async_trait;
use chrono::Duration;
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{armory::{ClanId, UserId}, clan::ClanRole},
};

/// Answers "is this user an active member of this clan, and with which role?"
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn active_role(&self, user_id: UserId, clan_id: ClanId) -> AppResult<Option<ClanRole>>;
}

/// Per-clan armory configuration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClanSettings: Send + Sync {
    /// The clan's armory timeout, or `None` to use the default
    async fn armory_timeout(&self, clan_id: ClanId) -> AppResult<Option<Duration>>;
}

#[derive(Clone)]
pub struct ClansRepository {
    pool: Pool<Postgres>,
}

impl ClansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipOracle for ClansRepository {
    async fn active_role(&self, user_id: UserId, clan_id: ClanId) -> AppResult<Option<ClanRole>> {
        let role = sqlx::query_scalar::<_, i16>(
            r#"
            SELECT role
            FROM clan_members
            WHERE user_id = $1 AND clan_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(clan_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role.map(ClanRole::from))
    }
}

#[async_trait]
impl ClanSettings for ClansRepository {
    async fn armory_timeout(&self, clan_id: ClanId) -> AppResult<Option<Duration>> {
        let secs = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT armory_timeout_secs FROM clans WHERE id = $1",
        )
        .bind(clan_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        Ok(secs.filter(|s| *s > 0).map(Duration::seconds))
    }
}
