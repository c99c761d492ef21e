//! Clan membership and item instance facts provided by collaborators

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::armory::{ItemTypeId, UserId};

/// Default armory timeout when a clan has none configured
pub const DEFAULT_ARMORY_TIMEOUT_HOURS: i64 = 72;

/// Role of an active clan member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum ClanRole {
    Member = 0,
    Officer = 1,
    Leader = 2,
}

impl ClanRole {
    /// Officers and leaders may manage other members' armory entries
    pub fn can_moderate(&self) -> bool {
        matches!(self, ClanRole::Officer | ClanRole::Leader)
    }
}

impl From<i16> for ClanRole {
    fn from(v: i16) -> Self {
        match v {
            1 => ClanRole::Officer,
            2 => ClanRole::Leader,
            _ => ClanRole::Member,
        }
    }
}

impl From<ClanRole> for i16 {
    fn from(r: ClanRole) -> Self {
        r as i16
    }
}

impl std::fmt::Display for ClanRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ClanRole::Member => "member",
            ClanRole::Officer => "officer",
            ClanRole::Leader => "leader",
        };
        write!(f, "{}", label)
    }
}

/// What the item registry knows about an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInstanceInfo {
    pub owner_user_id: UserId,
    pub item_type_id: ItemTypeId,
    pub item_type_enabled: bool,
}
