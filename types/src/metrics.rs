use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{GameType, RewardTable, MAX_ELAPSED_FACTOR};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("elapsed time out of range (got={got_ms}ms, max={max_ms}ms)")]
    ElapsedOutOfRange { got_ms: u64, max_ms: u64 },
    #[error("landed segment out of range (got={got}, segments={segments})")]
    SegmentOutOfRange { got: usize, segments: usize },
    #[error("landed segment reported for {0}")]
    UnexpectedSegment(GameType),
}

/// Gameplay summary sent alongside the local score when a session completes.
///
/// The authority only uses it as an anti-grief signal; it never determines the reward.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub elapsed_ms: u64,
    pub event_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landed_segment: Option<usize>,
}

impl SessionMetrics {
    pub fn validate(&self, game_type: GameType) -> Result<(), MetricsError> {
        let max_ms = game_type.duration_ms().saturating_mul(MAX_ELAPSED_FACTOR);
        if self.elapsed_ms > max_ms {
            return Err(MetricsError::ElapsedOutOfRange {
                got_ms: self.elapsed_ms,
                max_ms,
            });
        }
        if let Some(segment) = self.landed_segment {
            if game_type != GameType::SpinWheel {
                return Err(MetricsError::UnexpectedSegment(game_type));
            }
            let segments = RewardTable::for_game(game_type).prizes.len();
            if segment >= segments {
                return Err(MetricsError::SegmentOutOfRange {
                    got: segment,
                    segments,
                });
            }
        }
        Ok(())
    }

    /// Metrics stripped down to what cannot be malformed.
    pub fn sanitized(&self, game_type: GameType) -> Self {
        Self {
            elapsed_ms: self
                .elapsed_ms
                .min(game_type.duration_ms().saturating_mul(MAX_ELAPSED_FACTOR)),
            event_count: self.event_count,
            landed_segment: None,
        }
    }
}
