//! Cached per-game daily quotas.
//!
//! The cache trusts local math briefly and lets the authority overwrite it at every sync point:
//! a successful start decrements optimistically, and every completion forces a refetch that
//! replaces the whole cache.

use minigame_types::{api::DailyLimitsResponse, DailyLimitQuota, GameType};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct DailyLimitTracker {
    quotas: HashMap<GameType, DailyLimitQuota>,
    max_age_ms: u64,
}

impl DailyLimitTracker {
    pub fn new(max_age: Duration) -> Self {
        Self {
            quotas: HashMap::new(),
            max_age_ms: max_age.as_millis() as u64,
        }
    }

    pub fn get(&self, game_type: GameType) -> Option<&DailyLimitQuota> {
        self.quotas.get(&game_type)
    }

    /// Plays left for display, never negative.
    pub fn remaining(&self, game_type: GameType) -> Option<u32> {
        self.get(game_type).map(DailyLimitQuota::display_remaining)
    }

    /// Soft local gate. An unknown quota allows play: the authority still decides.
    pub fn allows(&self, game_type: GameType) -> bool {
        self.get(game_type)
            .map(|quota| !quota.is_exhausted())
            .unwrap_or(true)
    }

    /// Missing or older than the freshness threshold.
    pub fn needs_refresh(&self, game_type: GameType, now_ms: u64) -> bool {
        self.get(game_type)
            .map(|quota| quota.is_stale(now_ms, self.max_age_ms))
            .unwrap_or(true)
    }

    /// Replace the cache with an authoritative snapshot.
    pub fn apply(&mut self, response: &DailyLimitsResponse, now_ms: u64) {
        self.quotas = response
            .limits
            .iter()
            .map(|(game_type, entry)| {
                (
                    *game_type,
                    DailyLimitQuota::from_authority(*game_type, entry.limit, entry.used, now_ms),
                )
            })
            .collect();
        debug!(game_types = self.quotas.len(), "daily limits refreshed");
    }

    pub fn consume(&mut self, game_type: GameType) {
        if let Some(quota) = self.quotas.get_mut(&game_type) {
            quota.consume_optimistic();
        }
    }

    /// The authority rejected a start: block further local starts until the next refresh.
    pub fn exhaust(&mut self, game_type: GameType, now_ms: u64) {
        self.quotas
            .entry(game_type)
            .and_modify(|quota| quota.force_exhausted())
            .or_insert_with(|| DailyLimitQuota::from_authority(game_type, 0, 0, now_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minigame_types::api::LimitEntry;
    use proptest::prelude::*;

    fn response(entries: &[(GameType, u32, u32)]) -> DailyLimitsResponse {
        DailyLimitsResponse {
            limits: entries
                .iter()
                .map(|(game_type, limit, used)| {
                    (
                        *game_type,
                        LimitEntry {
                            limit: *limit,
                            used: *used,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn unknown_quota_allows_and_needs_refresh() {
        let tracker = DailyLimitTracker::new(Duration::from_secs(300));
        assert!(tracker.allows(GameType::CoinHunt));
        assert!(tracker.needs_refresh(GameType::CoinHunt, 0));
        assert_eq!(tracker.remaining(GameType::CoinHunt), None);
    }

    #[test]
    fn exhausted_quota_blocks() {
        let mut tracker = DailyLimitTracker::new(Duration::from_secs(300));
        tracker.apply(&response(&[(GameType::CoinHunt, 5, 5)]), 0);
        assert!(!tracker.allows(GameType::CoinHunt));
        assert_eq!(tracker.remaining(GameType::CoinHunt), Some(0));
    }

    #[test]
    fn refresh_overwrites_optimistic_drift() {
        let mut tracker = DailyLimitTracker::new(Duration::from_secs(300));
        tracker.apply(&response(&[(GameType::SpinWheel, 3, 2)]), 0);
        tracker.consume(GameType::SpinWheel);
        tracker.consume(GameType::SpinWheel);
        assert_eq!(tracker.get(GameType::SpinWheel).unwrap().remaining, -1);
        assert_eq!(tracker.remaining(GameType::SpinWheel), Some(0));

        // The second play never reached the authority.
        tracker.apply(&response(&[(GameType::SpinWheel, 3, 3)]), 10);
        let quota = tracker.get(GameType::SpinWheel).unwrap();
        assert_eq!(quota.remaining, 0);
        assert_eq!(quota.used, 3);
        assert_eq!(quota.last_synced_at, 10);
    }

    #[test]
    fn exhaust_without_cache_inserts_blocking_entry() {
        let mut tracker = DailyLimitTracker::new(Duration::from_secs(300));
        tracker.exhaust(GameType::MemoryMatch, 42);
        assert!(!tracker.allows(GameType::MemoryMatch));
        assert!(!tracker.needs_refresh(GameType::MemoryMatch, 42));

        tracker.apply(&response(&[(GameType::MemoryMatch, 5, 1)]), 50);
        tracker.exhaust(GameType::MemoryMatch, 60);
        let quota = tracker.get(GameType::MemoryMatch).unwrap();
        assert_eq!((quota.used, quota.remaining), (5, 0));
    }

    #[test]
    fn staleness_follows_max_age() {
        let mut tracker = DailyLimitTracker::new(Duration::from_secs(300));
        tracker.apply(&response(&[(GameType::CoinHunt, 5, 0)]), 1_000);
        assert!(!tracker.needs_refresh(GameType::CoinHunt, 301_000));
        assert!(tracker.needs_refresh(GameType::CoinHunt, 301_001));
    }

    proptest! {
        #[test]
        fn remaining_bounded_after_refresh(
            limit in 0u32..20,
            used in 0u32..40,
            consumed in 0usize..30,
            server_used in 0u32..40,
        ) {
            let mut tracker = DailyLimitTracker::new(Duration::from_secs(300));
            tracker.apply(&response(&[(GameType::CoinHunt, limit, used)]), 0);
            for _ in 0..consumed {
                tracker.consume(GameType::CoinHunt);
            }
            tracker.apply(&response(&[(GameType::CoinHunt, limit, server_used)]), 1);
            let quota = tracker.get(GameType::CoinHunt).unwrap();
            prop_assert!(quota.remaining >= 0);
            prop_assert!(quota.remaining <= i64::from(quota.limit));
            prop_assert!(quota.used <= quota.limit);
        }
    }
}
