//! Business logic services

pub mod clock;
pub mod events;
pub mod lending;
pub mod reconciler;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::{config::ArmoryConfig, repository::Repository};

use self::{clock::Clock, events::ArmoryEventSink};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub lending: lending::LendingService,
    pub sweeper: sweeper::ReclaimSweeper,
    pub reconciler: reconciler::DeactivationReconciler,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(
        repository: Repository,
        armory_config: &ArmoryConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn ArmoryEventSink>,
    ) -> Self {
        Self {
            lending: lending::LendingService::new(
                repository.clone(),
                clock.clone(),
                events.clone(),
                armory_config.offer_limit(),
            ),
            sweeper: sweeper::ReclaimSweeper::new(
                repository.clone(),
                clock.clone(),
                events.clone(),
                armory_config.default_timeout(),
            )
            .with_interval(armory_config.sweep_interval()),
            reconciler: reconciler::DeactivationReconciler::new(repository, clock, events),
        }
    }
}
