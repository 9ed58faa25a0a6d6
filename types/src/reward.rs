use serde::{Deserialize, Serialize};

use super::{GameType, SessionId, SessionMetrics};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardSource {
    Authority,
    Fallback,
}

/// Canonical outcome of a settled session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardResult {
    pub session_id: SessionId,
    pub coins_earned: u64,
    pub source: RewardSource,
    pub reconciled_at: u64,
}

impl RewardResult {
    pub fn is_authoritative(&self) -> bool {
        self.source == RewardSource::Authority
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Prize {
    pub label: &'static str,
    pub coins: u64,
}

/// Outcome of mapping an authority coin value back onto the wheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrizeMatch {
    Exact(usize),
    /// No segment pays exactly this value; the index is the largest segment below it
    /// (or the smallest segment when the value is below every prize).
    Nearest(usize),
}

impl PrizeMatch {
    pub fn index(&self) -> usize {
        match self {
            PrizeMatch::Exact(index) | PrizeMatch::Nearest(index) => *index,
        }
    }
}

const WHEEL: [Prize; 7] = [
    Prize { label: "5 Coins", coins: 5 },
    Prize { label: "10 Coins", coins: 10 },
    Prize { label: "15 Coins", coins: 15 },
    Prize { label: "20 Coins", coins: 20 },
    Prize { label: "30 Coins", coins: 30 },
    Prize { label: "50 Coins", coins: 50 },
    Prize { label: "Jackpot", coins: 100 },
];

/// Reward configuration for one game type.
///
/// The authority owns this configuration; clients hold a copy only to render prize lists and to
/// size the offline estimate. It never decides a final reward on the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardTable {
    pub game_type: GameType,
    pub max_coins: u64,
    /// Earning ceiling applied to the authority-measured elapsed time.
    pub coins_per_second_cap: Option<u64>,
    /// Wheel segments in ascending coin order. Empty for non-wheel games.
    pub prizes: &'static [Prize],
}

impl RewardTable {
    pub const fn for_game(game_type: GameType) -> Self {
        match game_type {
            GameType::CoinHunt => Self {
                game_type,
                max_coins: 150,
                coins_per_second_cap: Some(5),
                prizes: &[],
            },
            GameType::SpinWheel => Self {
                game_type,
                max_coins: 100,
                coins_per_second_cap: None,
                prizes: &WHEEL,
            },
            GameType::MemoryMatch => Self {
                game_type,
                max_coins: 120,
                coins_per_second_cap: Some(3),
                prizes: &[],
            },
        }
    }

    /// Deterministic offline estimate for a round.
    pub fn estimate(&self, local_score: u64, metrics: &SessionMetrics) -> u64 {
        if self.prizes.is_empty() {
            return local_score.min(self.max_coins);
        }
        if let Some(prize) = metrics.landed_segment.and_then(|i| self.prizes.get(i)) {
            return prize.coins;
        }
        self.prizes
            .iter()
            .rev()
            .find(|prize| prize.coins <= local_score)
            .map(|prize| prize.coins)
            .unwrap_or(0)
    }

    /// Find the wheel segment matching an authority coin value. `None` for non-wheel games.
    pub fn prize_for_coins(&self, coins: u64) -> Option<PrizeMatch> {
        if self.prizes.is_empty() {
            return None;
        }
        if let Some(index) = self.prizes.iter().position(|prize| prize.coins == coins) {
            return Some(PrizeMatch::Exact(index));
        }
        let index = self
            .prizes
            .iter()
            .rposition(|prize| prize.coins < coins)
            .unwrap_or(0);
        Some(PrizeMatch::Nearest(index))
    }
}
