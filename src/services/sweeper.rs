//! Reclaim sweeper daemon.
//!
//! Periodically ends loans that have been idle for longer than their clan's
//! armory timeout. A reclaim only resets the lending state: the item stays
//! with whoever physically holds it, and the offer stays in the armory.
//!
//! Each reclaim is its own atomic ledger operation, so a pass interrupted by
//! shutdown leaves the ledger consistent; remaining expired loans are picked
//! up by the next pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        armory::{ArmoryEntry, ClanId},
        event::{ArmoryEvent, ArmoryEventKind},
    },
    repository::Repository,
};

use super::{clock::Clock, events::ArmoryEventSink};

/// Default interval between sweeps (1 hour).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    pub clans_scanned: usize,
    pub reclaimed: usize,
    /// Expired at scan time but returned, refreshed or already reclaimed since
    pub skipped: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct ReclaimSweeper {
    repository: Repository,
    clock: Arc<dyn Clock>,
    events: Arc<dyn ArmoryEventSink>,
    default_timeout: ChronoDuration,
    interval: Duration,
}

impl ReclaimSweeper {
    pub fn new(
        repository: Repository,
        clock: Arc<dyn Clock>,
        events: Arc<dyn ArmoryEventSink>,
        default_timeout: ChronoDuration,
    ) -> Self {
        Self {
            repository,
            clock,
            events,
            default_timeout,
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    /// Sets a custom sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn clan_timeout(&self, clan_id: ClanId) -> AppResult<ChronoDuration> {
        Ok(self
            .repository
            .clans
            .armory_timeout(clan_id)
            .await?
            .unwrap_or(self.default_timeout))
    }

    /// Runs one pass over every clan with active loans.
    ///
    /// Errors for one clan or one item are logged and counted; they never stop
    /// the pass.
    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let clans = match self.repository.ledger.loaned_clans().await {
            Ok(clans) => clans,
            Err(e) => {
                warn!("Armory sweep could not list clans: {}", e);
                report.failures += 1;
                return report;
            }
        };

        for clan_id in clans {
            report.clans_scanned += 1;

            let timeout = match self.clan_timeout(clan_id).await {
                Ok(timeout) => timeout,
                Err(e) => {
                    warn!(clan_id, "Armory sweep could not read clan timeout: {}", e);
                    report.failures += 1;
                    continue;
                }
            };

            let expired = match self.repository.ledger.expired_loans(clan_id, timeout, now).await {
                Ok(expired) => expired,
                Err(e) => {
                    warn!(clan_id, "Armory sweep could not list expired loans: {}", e);
                    report.failures += 1;
                    continue;
                }
            };

            let cutoff = now - timeout;
            for entry in expired {
                self.reclaim(clan_id, &entry, cutoff, &mut report).await;
            }
        }

        if report.reclaimed > 0 || report.failures > 0 {
            info!(
                clans = report.clans_scanned,
                reclaimed = report.reclaimed,
                skipped = report.skipped,
                failures = report.failures,
                "Armory sweep completed"
            );
        } else {
            debug!(clans = report.clans_scanned, "Armory sweep found nothing to reclaim");
        }

        report
    }

    async fn reclaim(
        &self,
        clan_id: ClanId,
        entry: &ArmoryEntry,
        cutoff: chrono::DateTime<chrono::Utc>,
        report: &mut SweepReport,
    ) {
        let item_instance_id = entry.item_instance_id();

        if let Some(loan) = entry.loan() {
            if loan.borrower_clan_id != entry.offer.lender_clan_id {
                error!(
                    item_instance_id,
                    lender_clan_id = entry.offer.lender_clan_id,
                    borrower_clan_id = loan.borrower_clan_id,
                    "Armory loan crosses clans; reclaiming it anyway"
                );
            }
        }

        match self
            .repository
            .ledger
            .reclaim_if_expired(item_instance_id, cutoff)
            .await
        {
            Ok(Some(before)) => {
                report.reclaimed += 1;
                info!(
                    clan_id,
                    item_instance_id,
                    borrower_user_id = ?before.loan().map(|l| l.borrower_user_id),
                    "Armory loan reclaimed"
                );
                self.events.publish(ArmoryEvent::from_entry(
                    ArmoryEventKind::LoanReclaimed,
                    &before,
                    self.clock.now(),
                ));
            }
            Ok(None) => {
                report.skipped += 1;
                debug!(clan_id, item_instance_id, "Armory loan no longer expired");
            }
            Err(e) => {
                report.failures += 1;
                warn!(clan_id, item_instance_id, "Armory reclaim failed, retrying next pass: {}", e);
            }
        }
    }

    /// Runs the sweeper until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Armory reclaim sweeper starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Armory reclaim sweeper shutting down");
                    break;
                }

                _ = interval.tick() => {
                    tokio::select! {
                        biased;

                        _ = shutdown.cancelled() => {
                            info!("Armory reclaim sweeper shutting down mid-pass");
                            break;
                        }

                        _ = self.sweep_once() => {}
                    }
                }
            }
        }
    }
}
