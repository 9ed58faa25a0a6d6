//! In-memory session authority.
//!
//! Implements the server side of the mini-game contract: daily quotas, session TTLs and the
//! authoritative reward computation. Used as a local backend and by client integration tests.

use minigame_types::{
    api::{
        CompleteSessionRequest, CompleteSessionResponse, DailyLimitsResponse, ErrorCode,
        LimitEntry, StartSessionRequest, StartSessionResponse,
    },
    day_index, GameType, MetricsError, RewardTable, SessionId, DEFAULT_COIN_HUNT_DAILY_LIMIT,
    DEFAULT_EXPIRY_GRACE_MS, DEFAULT_MEMORY_MATCH_DAILY_LIMIT, DEFAULT_SPIN_WHEEL_DAILY_LIMIT,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

mod api;

pub use api::Api;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityConfig {
    pub limits: BTreeMap<GameType, u32>,
    pub expiry_grace_ms: u64,
    /// Seed for the spin-wheel prize draw.
    pub prize_seed: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            limits: BTreeMap::from([
                (GameType::CoinHunt, DEFAULT_COIN_HUNT_DAILY_LIMIT),
                (GameType::SpinWheel, DEFAULT_SPIN_WHEEL_DAILY_LIMIT),
                (GameType::MemoryMatch, DEFAULT_MEMORY_MATCH_DAILY_LIMIT),
            ]),
            expiry_grace_ms: DEFAULT_EXPIRY_GRACE_MS,
            prize_seed: 7,
        }
    }
}

impl AuthorityConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let limits = GameType::ALL
            .into_iter()
            .map(|game_type| {
                let key = format!("MINIGAME_LIMIT_{}", game_type.as_str().to_uppercase());
                let fallback = defaults.limits.get(&game_type).copied().unwrap_or(0);
                (game_type, read_env(&key, fallback))
            })
            .collect();
        Self {
            limits,
            expiry_grace_ms: read_env("MINIGAME_EXPIRY_GRACE_MS", defaults.expiry_grace_ms),
            prize_seed: read_env("MINIGAME_PRIZE_SEED", defaults.prize_seed),
        }
    }

    pub fn limit(&self, game_type: GameType) -> u32 {
        self.limits.get(&game_type).copied().unwrap_or(0)
    }
}

fn read_env<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(fallback)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("daily limit reached for {0}")]
    QuotaExceeded(GameType),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session {0} expired")]
    SessionExpired(SessionId),
    #[error("invalid metrics: {0}")]
    InvalidMetrics(#[from] MetricsError),
    #[error("authority offline")]
    Unavailable,
}

impl AuthorityError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthorityError::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
            AuthorityError::UnknownSession(_) => ErrorCode::UnknownSession,
            AuthorityError::SessionExpired(_) => ErrorCode::SessionExpired,
            AuthorityError::InvalidMetrics(_) => ErrorCode::InvalidMetrics,
            AuthorityError::Unavailable => ErrorCode::Unavailable,
        }
    }
}

#[derive(Clone, Debug)]
struct SessionRecord {
    game_type: GameType,
    started_at: u64,
    expires_at: u64,
    /// Wheel segment drawn at start (spin wheel only).
    prize_index: Option<usize>,
    revoked: bool,
    result: Option<CompleteSessionResponse>,
}

struct State {
    day: u64,
    used: BTreeMap<GameType, u32>,
    sessions: HashMap<SessionId, SessionRecord>,
    balance: u64,
    next_id: u64,
    rng: StdRng,
    offline: bool,
}

pub struct Authority {
    config: AuthorityConfig,
    state: Mutex<State>,
}

impl Authority {
    pub fn new(config: AuthorityConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.prize_seed);
        Self {
            config,
            state: Mutex::new(State {
                day: 0,
                used: BTreeMap::new(),
                sessions: HashMap::new(),
                balance: 0,
                next_id: 1,
                rng,
                offline: false,
            }),
        }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulate an outage: every route answers 503 while set.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
        info!(offline, "authority availability changed");
    }

    pub fn is_offline(&self) -> bool {
        self.state().offline
    }

    pub fn balance(&self) -> u64 {
        self.state().balance
    }

    pub fn used(&self, game_type: GameType, now_ms: u64) -> u32 {
        let mut state = self.state();
        roll_day(&mut state, now_ms);
        state.used.get(&game_type).copied().unwrap_or(0)
    }

    /// Mark a session as timed out so its next completion is rejected as expired.
    pub fn force_expire(&self, session_id: &SessionId) -> bool {
        match self.state().sessions.get_mut(session_id) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    pub fn start(
        &self,
        request: StartSessionRequest,
        now_ms: u64,
    ) -> Result<StartSessionResponse, AuthorityError> {
        let game_type = request.game_type;
        let limit = self.config.limit(game_type);
        let mut state = self.state();
        roll_day(&mut state, now_ms);

        let used = state.used.entry(game_type).or_insert(0);
        if *used >= limit {
            info!(%game_type, limit, client_session_id = %request.client_session_id, "start rejected: daily limit reached");
            return Err(AuthorityError::QuotaExceeded(game_type));
        }
        *used += 1;

        let session_id = SessionId::new(format!("srv-{}", state.next_id));
        state.next_id += 1;
        let table = RewardTable::for_game(game_type);
        let prize_index = (!table.prizes.is_empty())
            .then(|| state.rng.gen_range(0..table.prizes.len()));
        let expires_at = now_ms.saturating_add(game_type.duration_ms());
        state.sessions.insert(
            session_id.clone(),
            SessionRecord {
                game_type,
                started_at: now_ms,
                expires_at,
                prize_index,
                revoked: false,
                result: None,
            },
        );
        info!(%session_id, %game_type, client_session_id = %request.client_session_id, expires_at, "session started");
        Ok(StartSessionResponse {
            session_id,
            expires_at,
        })
    }

    /// Settle a session. The first result is stored and returned unchanged on every repeat.
    pub fn complete(
        &self,
        session_id: &SessionId,
        request: CompleteSessionRequest,
        now_ms: u64,
    ) -> Result<CompleteSessionResponse, AuthorityError> {
        let grace = self.config.expiry_grace_ms;
        let mut state = self.state();
        let record = state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| AuthorityError::UnknownSession(session_id.clone()))?;

        if let Some(result) = record.result {
            debug!(%session_id, "replaying stored completion");
            return Ok(result);
        }
        if record.revoked || now_ms > record.expires_at.saturating_add(grace) {
            warn!(%session_id, expires_at = record.expires_at, now_ms, "completion after expiry");
            return Err(AuthorityError::SessionExpired(session_id.clone()));
        }
        request.metrics.validate(record.game_type)?;

        let coins = compute_reward(&record, request.local_score, now_ms);
        state.balance = state.balance.saturating_add(coins);
        let response = CompleteSessionResponse {
            coins_earned: coins,
            new_balance: Some(state.balance),
        };
        if let Some(stored) = state.sessions.get_mut(session_id) {
            stored.result = Some(response.clone());
        }
        info!(
            %session_id,
            game_type = %record.game_type,
            local_score = request.local_score,
            coins,
            "session completed"
        );
        Ok(response)
    }

    pub fn limits(&self, now_ms: u64) -> DailyLimitsResponse {
        let mut state = self.state();
        roll_day(&mut state, now_ms);
        let limits = GameType::ALL
            .into_iter()
            .map(|game_type| {
                let limit = self.config.limit(game_type);
                let used = state.used.get(&game_type).copied().unwrap_or(0).min(limit);
                (game_type, LimitEntry { limit, used })
            })
            .collect();
        DailyLimitsResponse { limits }
    }
}

fn roll_day(state: &mut State, now_ms: u64) {
    let day = day_index(now_ms);
    if day != state.day {
        state.day = day;
        state.used.clear();
    }
}

/// Reward from the authority's own view of the round; the client score is only an upper bound.
fn compute_reward(record: &SessionRecord, local_score: u64, now_ms: u64) -> u64 {
    let table = RewardTable::for_game(record.game_type);
    if let Some(prize) = record.prize_index.and_then(|index| table.prizes.get(index)) {
        return prize.coins;
    }
    let elapsed_ms = now_ms
        .saturating_sub(record.started_at)
        .min(record.game_type.duration_ms());
    let time_cap = match table.coins_per_second_cap {
        Some(rate) => rate.saturating_mul(elapsed_ms.div_ceil(1_000)),
        None => u64::MAX,
    };
    local_score.min(table.max_coins).min(time_cap)
}
