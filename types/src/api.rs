//! Request and response bodies exchanged with the session authority.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{GameType, SessionId, SessionMetrics};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub game_type: GameType,
    /// Device-local id, echoed in logs so both sides can be correlated.
    pub client_session_id: SessionId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: SessionId,
    pub expires_at: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteSessionRequest {
    /// Advisory only: the authority recomputes the reward.
    pub local_score: u64,
    pub metrics: SessionMetrics,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteSessionResponse {
    pub coins_earned: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitEntry {
    pub limit: u32,
    pub used: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLimitsResponse {
    pub limits: BTreeMap<GameType, LimitEntry>,
}

/// Machine-readable rejection reason carried in every non-2xx authority response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    QuotaExceeded,
    SessionExpired,
    UnknownSession,
    InvalidMetrics,
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
