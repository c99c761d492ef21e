//! In-process collaborators for service tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{
        armory::{ClanId, ItemInstanceId, ItemTypeId, UserId},
        clan::{ClanRole, ItemInstanceInfo, DEFAULT_ARMORY_TIMEOUT_HOURS},
    },
    repository::{
        ArmoryLedger, ClanSettings, DisableOutcome, ItemRegistry, ItemTypeCatalog,
        MemoryArmoryLedger, MembershipOracle, Repository,
    },
};

use super::{
    clock::ManualClock, events::RecordingEventSink, lending::LendingService,
    reconciler::DeactivationReconciler, sweeper::ReclaimSweeper,
};

pub const CLAN_A: ClanId = 1000;
pub const CLAN_B: ClanId = 2000;

#[derive(Default)]
struct World {
    members: HashMap<(UserId, ClanId), ClanRole>,
    owners: HashMap<ItemInstanceId, (UserId, ItemTypeId)>,
    disabled: HashSet<ItemTypeId>,
    timeouts: HashMap<ClanId, Duration>,
    equipped: HashSet<ItemInstanceId>,
}

/// Clan, inventory and catalog subsystems backed by one in-memory world
#[derive(Clone)]
pub struct FakeDirectory {
    world: Arc<Mutex<World>>,
    ledger: Arc<dyn ArmoryLedger>,
}

impl FakeDirectory {
    fn world(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }
}

#[async_trait]
impl MembershipOracle for FakeDirectory {
    async fn active_role(&self, user_id: UserId, clan_id: ClanId) -> AppResult<Option<ClanRole>> {
        Ok(self.world().members.get(&(user_id, clan_id)).copied())
    }
}

#[async_trait]
impl ClanSettings for FakeDirectory {
    async fn armory_timeout(&self, clan_id: ClanId) -> AppResult<Option<Duration>> {
        Ok(self.world().timeouts.get(&clan_id).copied())
    }
}

#[async_trait]
impl ItemRegistry for FakeDirectory {
    async fn describe(&self, item_instance_id: ItemInstanceId) -> AppResult<Option<ItemInstanceInfo>> {
        let world = self.world();
        Ok(world
            .owners
            .get(&item_instance_id)
            .map(|(owner, item_type_id)| ItemInstanceInfo {
                owner_user_id: *owner,
                item_type_id: *item_type_id,
                item_type_enabled: !world.disabled.contains(item_type_id),
            }))
    }
}

#[async_trait]
impl ItemTypeCatalog for FakeDirectory {
    async fn disable_item_type(&self, item_type_id: ItemTypeId) -> AppResult<DisableOutcome> {
        let equipped_cleared = {
            let mut world = self.world();
            if !world.owners.values().any(|(_, t)| *t == item_type_id) {
                return Err(AppError::NotFound(format!("Item type with id {} not found", item_type_id)));
            }
            world.disabled.insert(item_type_id);

            let of_type: Vec<ItemInstanceId> = world
                .owners
                .iter()
                .filter(|(_, (_, t))| *t == item_type_id)
                .map(|(id, _)| *id)
                .collect();
            let before = world.equipped.len();
            world.equipped.retain(|id| !of_type.contains(id));
            (before - world.equipped.len()) as u64
        };

        let purged = self.ledger.purge_by_item_type(item_type_id).await?;
        Ok(DisableOutcome {
            purged,
            equipped_cleared,
        })
    }
}

/// Services wired to a memory ledger, a manual clock and a recording sink
pub struct Fixture {
    pub ledger: Arc<MemoryArmoryLedger>,
    pub clock: ManualClock,
    pub events: RecordingEventSink,
    directory: FakeDirectory,
}

impl Fixture {
    pub fn new() -> Self {
        let ledger = Arc::new(MemoryArmoryLedger::new());
        let directory = FakeDirectory {
            world: Arc::new(Mutex::new(World::default())),
            ledger: ledger.clone(),
        };
        Self {
            ledger,
            clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()),
            events: RecordingEventSink::new(),
            directory,
        }
    }

    pub fn join(&self, user_id: UserId, clan_id: ClanId) {
        self.join_as(user_id, clan_id, ClanRole::Member);
    }

    pub fn join_as(&self, user_id: UserId, clan_id: ClanId, role: ClanRole) {
        self.directory
            .world()
            .members
            .insert((user_id, clan_id), role);
    }

    pub fn leave(&self, user_id: UserId, clan_id: ClanId) {
        self.directory.world().members.remove(&(user_id, clan_id));
    }

    pub fn own(&self, item_instance_id: ItemInstanceId, user_id: UserId, item_type_id: ItemTypeId) {
        self.directory
            .world()
            .owners
            .insert(item_instance_id, (user_id, item_type_id));
    }

    pub fn disable_type(&self, item_type_id: ItemTypeId) {
        self.directory.world().disabled.insert(item_type_id);
    }

    pub fn is_disabled(&self, item_type_id: ItemTypeId) -> bool {
        self.directory.world().disabled.contains(&item_type_id)
    }

    pub fn set_timeout(&self, clan_id: ClanId, timeout: Duration) {
        self.directory.world().timeouts.insert(clan_id, timeout);
    }

    pub fn equip(&self, item_instance_id: ItemInstanceId) {
        self.directory.world().equipped.insert(item_instance_id);
    }

    pub fn is_equipped(&self, item_instance_id: ItemInstanceId) -> bool {
        self.directory.world().equipped.contains(&item_instance_id)
    }

    pub fn directory(&self) -> FakeDirectory {
        self.directory.clone()
    }

    pub fn repository(&self) -> Repository {
        self.repository_with(self.ledger.clone(), Arc::new(self.directory.clone()))
    }

    fn repository_with(
        &self,
        ledger: Arc<dyn ArmoryLedger>,
        catalog: Arc<dyn ItemTypeCatalog>,
    ) -> Repository {
        let directory = Arc::new(self.directory.clone());
        Repository {
            ledger,
            members: directory.clone(),
            clans: directory.clone(),
            items: directory,
            catalog,
        }
    }

    pub fn lending(&self) -> LendingService {
        self.lending_limited(None)
    }

    pub fn lending_with_limit(&self, limit: usize) -> LendingService {
        self.lending_limited(Some(limit))
    }

    /// Lending over a different item registry
    pub fn lending_with_items(&self, items: Arc<dyn ItemRegistry>) -> LendingService {
        let repository = Repository {
            items,
            ..self.repository()
        };
        LendingService::new(
            repository,
            Arc::new(self.clock.clone()),
            Arc::new(self.events.clone()),
            None,
        )
    }

    fn lending_limited(&self, limit: Option<usize>) -> LendingService {
        LendingService::new(
            self.repository(),
            Arc::new(self.clock.clone()),
            Arc::new(self.events.clone()),
            limit,
        )
    }

    pub fn sweeper(&self) -> ReclaimSweeper {
        self.sweeper_for(self.repository())
    }

    pub fn sweeper_with_ledger(&self, ledger: Arc<dyn ArmoryLedger>) -> ReclaimSweeper {
        self.sweeper_for(self.repository_with(ledger, Arc::new(self.directory.clone())))
    }

    fn sweeper_for(&self, repository: Repository) -> ReclaimSweeper {
        ReclaimSweeper::new(
            repository,
            Arc::new(self.clock.clone()),
            Arc::new(self.events.clone()),
            Duration::hours(DEFAULT_ARMORY_TIMEOUT_HOURS),
        )
    }

    pub fn reconciler(&self) -> DeactivationReconciler {
        self.reconciler_for(self.repository())
    }

    pub fn reconciler_with_catalog(&self, catalog: Arc<dyn ItemTypeCatalog>) -> DeactivationReconciler {
        self.reconciler_for(self.repository_with(self.ledger.clone(), catalog))
    }

    fn reconciler_for(&self, repository: Repository) -> DeactivationReconciler {
        DeactivationReconciler::new(
            repository,
            Arc::new(self.clock.clone()),
            Arc::new(self.events.clone()),
        )
    }
}
