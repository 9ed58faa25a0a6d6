use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::{
    DailyLimitQuota, COIN_HUNT_DURATION_MS, MEMORY_MATCH_DURATION_MS, SPIN_WHEEL_DURATION_MS,
};

/// Prefix of identifiers minted on the device before the authority assigns one.
const LOCAL_ID_PREFIX: &str = "local-";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    CoinHunt,
    SpinWheel,
    MemoryMatch,
}

impl GameType {
    pub const ALL: [GameType; 3] = [GameType::CoinHunt, GameType::SpinWheel, GameType::MemoryMatch];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::CoinHunt => "coin_hunt",
            GameType::SpinWheel => "spin_wheel",
            GameType::MemoryMatch => "memory_match",
        }
    }

    /// Length of one round (ms).
    pub fn duration_ms(&self) -> u64 {
        match self {
            GameType::CoinHunt => COIN_HUNT_DURATION_MS,
            GameType::SpinWheel => SPIN_WHEEL_DURATION_MS,
            GameType::MemoryMatch => MEMORY_MATCH_DURATION_MS,
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown game type: {0}")]
pub struct ParseGameTypeError(pub String);

impl FromStr for GameType {
    type Err = ParseGameTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "coin_hunt" => Ok(GameType::CoinHunt),
            "spin_wheel" => Ok(GameType::SpinWheel),
            "memory_match" => Ok(GameType::MemoryMatch),
            other => Err(ParseGameTypeError(other.to_string())),
        }
    }
}

/// Lifecycle of a [GameSession].
///
/// ```text
/// pending -> active -> settling -> completed
///              |          |  \
///              v          v   -> unreconciled -> completed (retry)
///           expired    expired
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Settling,
    Completed,
    Unreconciled,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Settling => "settling",
            SessionStatus::Completed => "completed",
            SessionStatus::Unreconciled => "unreconciled",
            SessionStatus::Expired => "expired",
        }
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Expired)
    }

    /// The session still occupies its game type's single live slot.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Pending | SessionStatus::Active)
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Active, Settling)
                | (Active, Expired)
                | (Settling, Completed)
                | (Settling, Unreconciled)
                | (Settling, Expired)
                | (Unreconciled, Completed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("session {session_id}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub session_id: SessionId,
    pub from: SessionStatus,
    pub to: SessionStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a device-local identifier.
    pub fn generate() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A discrete scoring event emitted by a game screen (coin caught, pair matched, wheel landed).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameplayEvent {
    /// Monotonic per-round identifier; replays of the same id are ignored.
    pub id: u64,
    pub value: u64,
    pub occurred_at: u64,
}

impl GameplayEvent {
    pub fn new(id: u64, value: u64, occurred_at: u64) -> Self {
        Self {
            id,
            value,
            occurred_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    /// Device-local identifier, stable for the whole lifecycle.
    pub id: SessionId,
    /// Identifier assigned by the authority; `None` for a local-only session.
    pub authority_id: Option<SessionId>,
    pub game_type: GameType,
    pub status: SessionStatus,
    pub started_at: u64,
    pub expires_at: u64,
    pub local_score: u64,
    pub server_reward: Option<u64>,
    pub quota_snapshot_at_start: Option<DailyLimitQuota>,
}

impl GameSession {
    pub fn new(game_type: GameType, now_ms: u64, quota: Option<DailyLimitQuota>) -> Self {
        Self {
            id: SessionId::generate(),
            authority_id: None,
            game_type,
            status: SessionStatus::Pending,
            started_at: now_ms,
            expires_at: now_ms.saturating_add(game_type.duration_ms()),
            local_score: 0,
            server_reward: None,
            quota_snapshot_at_start: quota,
        }
    }

    pub fn transition(&mut self, next: SessionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                session_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Void a locally settled outcome after the authority refused the start it depended on.
    ///
    /// Only an unreconciled session can be revoked; it ends expired and is never redeemable.
    pub fn revoke(&mut self) -> Result<(), TransitionError> {
        if self.status != SessionStatus::Unreconciled {
            return Err(TransitionError {
                session_id: self.id.clone(),
                from: self.status,
                to: SessionStatus::Expired,
            });
        }
        self.status = SessionStatus::Expired;
        Ok(())
    }

    /// Record the authority's acknowledgement of a start request.
    pub fn acknowledge(&mut self, authority_id: SessionId, expires_at: u64) {
        self.authority_id = Some(authority_id);
        self.expires_at = expires_at;
    }

    pub fn is_local_only(&self) -> bool {
        self.authority_id.is_none()
    }

    /// The session outlived its TTL plus `grace_ms`.
    pub fn is_past_ttl(&self, now_ms: u64, grace_ms: u64) -> bool {
        now_ms > self.expires_at.saturating_add(grace_ms)
    }
}
