//! Scripted in-memory [SessionAuthority] for tests.

use crate::{
    authority::SessionAuthority,
    clock::{Clock, SystemClock},
    Error, Result,
};
use minigame_types::{
    api::{
        CompleteSessionRequest, CompleteSessionResponse, DailyLimitsResponse, LimitEntry,
        StartSessionRequest, StartSessionResponse,
    },
    GameType, RewardTable, SessionId,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};
use tokio::sync::Notify;

struct MockSession {
    game_type: GameType,
    expired: bool,
    result: Option<CompleteSessionResponse>,
}

#[derive(Default)]
struct MockState {
    limits: BTreeMap<GameType, LimitEntry>,
    sessions: HashMap<SessionId, MockSession>,
    next_id: u64,
    balance: u64,
    rewards: VecDeque<u64>,
    start_errors: VecDeque<Error>,
    complete_errors: VecDeque<Error>,
    offline: bool,
    start_gate: Option<Arc<Notify>>,
    complete_gate: Option<Arc<Notify>>,
}

/// Authority double with call counters, scripted rewards and scripted failures.
///
/// Without a scripted reward a completion pays `min(local_score, max_coins)`. Repeated
/// completions of one session replay the first response.
pub struct MockAuthority {
    clock: Arc<dyn Clock>,
    state: Mutex<MockState>,
    start_calls: AtomicUsize,
    complete_calls: AtomicUsize,
    limit_calls: AtomicUsize,
}

impl Default for MockAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthority {
    pub fn new() -> Self {
        let limits = GameType::ALL
            .into_iter()
            .map(|game_type| (game_type, LimitEntry { limit: 5, used: 0 }))
            .collect();
        Self {
            clock: Arc::new(SystemClock),
            state: Mutex::new(MockState {
                limits,
                ..MockState::default()
            }),
            start_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
            limit_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_limit(self, game_type: GameType, limit: u32, used: u32) -> Self {
        self.state()
            .limits
            .insert(game_type, LimitEntry { limit, used });
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every call fails with [Error::Timeout] while set.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn script_reward(&self, coins: u64) {
        self.state().rewards.push_back(coins);
    }

    pub fn fail_next_start(&self, err: Error) {
        self.state().start_errors.push_back(err);
    }

    pub fn fail_next_complete(&self, err: Error) {
        self.state().complete_errors.push_back(err);
    }

    /// Revoke a session so its completion is rejected as expired.
    pub fn expire(&self, session_id: &SessionId) {
        if let Some(session) = self.state().sessions.get_mut(session_id) {
            session.expired = true;
        }
    }

    /// Park starts until [MockAuthority::release_starts].
    pub fn hold_starts(&self) {
        self.state().start_gate = Some(Arc::new(Notify::new()));
    }

    pub fn release_starts(&self) {
        if let Some(gate) = self.state().start_gate.take() {
            gate.notify_one();
        }
    }

    /// Park completions until [MockAuthority::release_completes].
    pub fn hold_completes(&self) {
        self.state().complete_gate = Some(Arc::new(Notify::new()));
    }

    pub fn release_completes(&self) {
        if let Some(gate) = self.state().complete_gate.take() {
            gate.notify_one();
        }
    }

    pub fn used(&self, game_type: GameType) -> u32 {
        self.state()
            .limits
            .get(&game_type)
            .map(|entry| entry.used)
            .unwrap_or(0)
    }

    pub fn balance(&self) -> u64 {
        self.state().balance
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn limit_calls(&self) -> usize {
        self.limit_calls.load(Ordering::SeqCst)
    }
}

impl SessionAuthority for MockAuthority {
    async fn start_session(&self, request: StartSessionRequest) -> Result<StartSessionResponse> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.state().start_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let now = self.clock.now_ms();
        let mut state = self.state();
        if state.offline {
            return Err(Error::Timeout);
        }
        if let Some(err) = state.start_errors.pop_front() {
            return Err(err);
        }
        let entry = state
            .limits
            .entry(request.game_type)
            .or_insert(LimitEntry { limit: 5, used: 0 });
        if entry.used >= entry.limit {
            return Err(Error::QuotaExceeded(request.game_type.to_string()));
        }
        entry.used += 1;

        state.next_id += 1;
        let session_id = SessionId::new(format!("srv-{}", state.next_id));
        state.sessions.insert(
            session_id.clone(),
            MockSession {
                game_type: request.game_type,
                expired: false,
                result: None,
            },
        );
        Ok(StartSessionResponse {
            session_id,
            expires_at: now.saturating_add(request.game_type.duration_ms()),
        })
    }

    async fn complete_session(
        &self,
        session_id: &SessionId,
        request: CompleteSessionRequest,
    ) -> Result<CompleteSessionResponse> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.state().complete_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state();
        if state.offline {
            return Err(Error::Timeout);
        }
        if let Some(err) = state.complete_errors.pop_front() {
            return Err(err);
        }
        let (game_type, expired, stored) = match state.sessions.get(session_id) {
            Some(session) => (session.game_type, session.expired, session.result.clone()),
            None => return Err(Error::UnknownSession(session_id.to_string())),
        };
        if let Some(result) = stored {
            return Ok(result);
        }
        if expired {
            return Err(Error::SessionExpired(session_id.to_string()));
        }

        let coins = state.rewards.pop_front().unwrap_or_else(|| {
            request
                .local_score
                .min(RewardTable::for_game(game_type).max_coins)
        });
        state.balance = state.balance.saturating_add(coins);
        let response = CompleteSessionResponse {
            coins_earned: coins,
            new_balance: Some(state.balance),
        };
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.result = Some(response.clone());
        }
        Ok(response)
    }

    async fn daily_limits(&self) -> Result<DailyLimitsResponse> {
        self.limit_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.offline {
            return Err(Error::Timeout);
        }
        Ok(DailyLimitsResponse {
            limits: state.limits.clone(),
        })
    }
}
