//! In-memory tally of gameplay events for the active round.

use minigame_types::GameplayEvent;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScoreSnapshot {
    pub score: u64,
    pub event_count: u32,
}

/// Sums event values, counting each event id once.
///
/// Screens may re-emit the same catch or match while re-rendering; only the first
/// occurrence of an id contributes.
#[derive(Clone, Debug, Default)]
pub struct LocalRewardAccumulator {
    seen: HashSet<u64>,
    score: u64,
    event_count: u32,
}

impl LocalRewardAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the event id was already recorded.
    pub fn record(&mut self, event: GameplayEvent) -> bool {
        if !self.seen.insert(event.id) {
            return false;
        }
        self.score = self.score.saturating_add(event.value);
        self.event_count = self.event_count.saturating_add(1);
        true
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        ScoreSnapshot {
            score: self.score,
            event_count: self.event_count,
        }
    }
}
