//! Types shared by the mini-game session engine and the session authority.
//!
//! Defines the session lifecycle, daily quota, reward and metrics types, plus the wire bodies of
//! the authority API.

pub mod api;
mod constants;
mod game;
mod metrics;
mod quota;
mod reward;

pub use constants::*;
pub use game::*;
pub use metrics::*;
pub use quota::*;
pub use reward::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Index of the UTC day containing `now_ms`.
pub fn day_index(now_ms: u64) -> u64 {
    now_ms / DAY_MS
}
