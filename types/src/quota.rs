use serde::{Deserialize, Serialize};

use super::GameType;

/// Cached view of one game type's daily play allowance.
///
/// `remaining` is signed: optimistic decrements may push it below zero until the next
/// authoritative refresh. Use [DailyLimitQuota::display_remaining] for anything user-facing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLimitQuota {
    pub game_type: GameType,
    pub limit: u32,
    pub used: u32,
    pub remaining: i64,
    pub last_synced_at: u64,
}

impl DailyLimitQuota {
    /// Build a quota from authority-reported values. `used` is clamped to `limit`.
    pub fn from_authority(game_type: GameType, limit: u32, used: u32, now_ms: u64) -> Self {
        let used = used.min(limit);
        Self {
            game_type,
            limit,
            used,
            remaining: i64::from(limit - used),
            last_synced_at: now_ms,
        }
    }

    pub fn display_remaining(&self) -> u32 {
        self.remaining.clamp(0, i64::from(self.limit)) as u32
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    /// Count a play before the authority confirms it.
    pub fn consume_optimistic(&mut self) {
        self.used = self.used.saturating_add(1);
        self.remaining -= 1;
    }

    /// The authority refused a start: no plays are left, whatever the cache said.
    pub fn force_exhausted(&mut self) {
        self.used = self.limit;
        self.remaining = 0;
    }

    pub fn is_stale(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_synced_at) > max_age_ms
    }
}
