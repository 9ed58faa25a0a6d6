//! Mini-game session lifecycle and reward reconciliation.
//!
//! A [SessionClient] starts and settles sessions against a [SessionAuthority], falling back to a
//! deterministic local estimate when the authority cannot be reached and reconciling later.
//! [GameRound] drives one session per screen: it feeds gameplay events into a
//! [LocalRewardAccumulator] while a [GameTimer] counts down.

pub mod accumulator;
pub mod authority;
mod backoff;
pub mod client;
pub mod clock;
pub mod config;
pub mod fallback;
pub mod limits;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod reconcile;
pub mod round;
pub mod session;
pub mod timer;
pub mod wallet;

pub use accumulator::{LocalRewardAccumulator, ScoreSnapshot};
pub use authority::SessionAuthority;
pub use client::{Client, RetryPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use fallback::{FailureFallback, PendingResync};
pub use limits::DailyLimitTracker;
pub use reconcile::ReconciliationResolver;
pub use round::GameRound;
pub use session::{CompleteError, RetryReport, SessionClient, SessionHandle, StartError};
pub use timer::{GameTimer, SettledFlag};
pub use wallet::{BalanceRefresh, WalletSyncNotifier};

use minigame_types::api::{ErrorBody, ErrorCode};
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("failed: {status}: {body}")]
    FailedWithBody {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected response")]
    UnexpectedResponse,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
    #[error("authority request timed out")]
    Timeout,
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("invalid metrics: {0}")]
    Validation(String),
    #[error("authority unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify a structured authority rejection.
    pub fn from_body(status: reqwest::StatusCode, body: ErrorBody) -> Self {
        match body.code {
            ErrorCode::QuotaExceeded => Error::QuotaExceeded(body.message),
            ErrorCode::SessionExpired => Error::SessionExpired(body.message),
            ErrorCode::UnknownSession => Error::UnknownSession(body.message),
            ErrorCode::InvalidMetrics => Error::Validation(body.message),
            ErrorCode::Unavailable if status.is_server_error() => {
                Error::Unavailable(body.message)
            }
            ErrorCode::Unavailable => Error::FailedWithBody {
                status,
                body: body.message,
            },
        }
    }

    /// Timeouts, connectivity failures and transient statuses that survived retries.
    pub fn is_network(&self) -> bool {
        match self {
            Error::Reqwest(err) => client::is_retryable_error(err),
            Error::FailedWithBody { status, .. } => client::is_retryable_status(*status),
            Error::Timeout | Error::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
