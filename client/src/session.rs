//! Session lifecycle against the authority, with offline fallback and later reconciliation.
//!
//! All engine state lives behind one mutex that is never held across an authority call, so
//! every outcome is applied in a single critical section and observers never see a partially
//! settled session.

use crate::{
    authority::SessionAuthority,
    backoff::{jittered_backoff, next_backoff},
    clock::{Clock, SystemClock},
    config::EngineConfig,
    fallback::{FailureFallback, PendingResync},
    limits::DailyLimitTracker,
    reconcile::ReconciliationResolver,
    wallet::{BalanceRefresh, WalletSyncNotifier},
    Error, Result,
};
use minigame_types::{
    api::{CompleteSessionRequest, CompleteSessionResponse, StartSessionRequest},
    DailyLimitQuota, GameSession, GameType, RewardResult, SessionId, SessionMetrics,
    SessionStatus, TransitionError,
};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a screen needs to run a started session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub game_type: GameType,
    pub expires_at: u64,
    /// The authority never acknowledged the start; the reward will come from the fallback.
    pub local_only: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum StartError {
    #[error("no plays left today for {0}")]
    QuotaExhausted(GameType),
    #[error("authority rejected {0} start: daily limit reached")]
    QuotaExceeded(GameType),
    #[error("a {0} session is already in progress")]
    SessionInProgress(GameType),
    #[error("authority unreachable: {0}")]
    Network(#[source] Error),
    #[error("authority rejected start: {0}")]
    Rejected(#[source] Error),
    #[error(transparent)]
    InvalidState(#[from] TransitionError),
}

impl StartError {
    /// The caller may try the same start again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StartError::Network(_) | StartError::SessionInProgress(_))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompleteError {
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("completion already in flight for {0}")]
    InFlight(SessionId),
    #[error("session expired: {0}")]
    SessionExpired(SessionId),
    #[error(transparent)]
    InvalidState(#[from] TransitionError),
}

/// Outcome of one [SessionClient::retry_unreconciled] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub reconciled: usize,
    pub dropped: usize,
    pub remaining: usize,
}

enum Attempt {
    Settled(CompleteSessionResponse),
    Denied,
    Fallback(SessionMetrics),
}

struct State {
    sessions: HashMap<SessionId, GameSession>,
    limits: DailyLimitTracker,
    resolver: ReconciliationResolver,
    fallback: FailureFallback,
    /// Sessions with a completion call outstanding.
    in_flight: HashSet<SessionId>,
    /// Sessions whose start call has not returned yet.
    starting: HashSet<SessionId>,
    /// Wallet refreshes for sessions settled before their start call returned.
    deferred: HashMap<SessionId, BalanceRefresh>,
}

impl State {
    /// Drop sessions whose outcome the resolver no longer remembers, once they cannot change.
    fn prune_evicted(&mut self) {
        for session_id in self.resolver.take_evicted() {
            let terminal = self
                .sessions
                .get(&session_id)
                .map(|session| session.status.is_terminal())
                .unwrap_or(false);
            if terminal {
                self.sessions.remove(&session_id);
            }
        }
    }
}

pub struct SessionClient<A: SessionAuthority> {
    authority: A,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    wallet: WalletSyncNotifier,
    state: Mutex<State>,
}

impl<A: SessionAuthority> SessionClient<A> {
    pub fn new(authority: A, config: EngineConfig, wallet: WalletSyncNotifier) -> Self {
        let state = State {
            sessions: HashMap::new(),
            limits: DailyLimitTracker::new(config.quota_max_age),
            resolver: ReconciliationResolver::new(config.resolver_capacity),
            fallback: FailureFallback::new(config.resync_capacity),
            in_flight: HashSet::new(),
            starting: HashSet::new(),
            deferred: HashMap::new(),
        };
        Self {
            authority,
            config,
            clock: Arc::new(SystemClock),
            wallet,
            state: Mutex::new(state),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn expiry_grace_ms(&self) -> u64 {
        self.config.expiry_grace.as_millis() as u64
    }

    /// Bound an authority call by the configured request timeout.
    async fn call<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Replace the cached quotas with the authority's view.
    pub async fn refresh_limits(&self) -> Result<()> {
        let response = self.call(self.authority.daily_limits()).await?;
        let now = self.clock.now_ms();
        self.state().limits.apply(&response, now);
        Ok(())
    }

    /// Prepare a screen: refetch quotas if the cache is missing or stale, then return the quota
    /// for `game_type`. A failed refetch leaves the cache as it was.
    pub async fn mount(&self, game_type: GameType) -> Option<DailyLimitQuota> {
        let now = self.clock.now_ms();
        let stale = self.state().limits.needs_refresh(game_type, now);
        if stale {
            if let Err(err) = self.refresh_limits().await {
                warn!(?err, %game_type, "quota refresh on mount failed; using cached quota");
            }
        }
        self.quota(game_type)
    }

    pub fn quota(&self, game_type: GameType) -> Option<DailyLimitQuota> {
        self.state().limits.get(game_type).cloned()
    }

    /// Local soft gate. The authority still has the final say on start.
    pub fn can_play(&self, game_type: GameType) -> bool {
        self.state().limits.allows(game_type)
    }

    pub fn session(&self, session_id: &SessionId) -> Option<GameSession> {
        self.state().sessions.get(session_id).cloned()
    }

    pub fn live_session(&self, game_type: GameType) -> Option<GameSession> {
        self.state()
            .sessions
            .values()
            .find(|session| session.game_type == game_type && session.status.is_live())
            .cloned()
    }

    /// The settled outcome of a session, if any.
    pub fn result(&self, session_id: &SessionId) -> Option<RewardResult> {
        self.state().resolver.result(session_id).cloned()
    }

    /// Start a session for `game_type`.
    ///
    /// The session is active as soon as this is called, before the authority answers. If the
    /// authority cannot be reached and offline play is enabled, the session stays active as a
    /// local-only session and its reward will come from the fallback.
    pub async fn start_session(
        &self,
        game_type: GameType,
    ) -> std::result::Result<SessionHandle, StartError> {
        let now = self.clock.now_ms();
        let session_id = {
            let mut state = self.state();
            if !state.limits.allows(game_type) {
                info!(%game_type, "no plays left today; start rejected locally");
                return Err(StartError::QuotaExhausted(game_type));
            }
            if state
                .sessions
                .values()
                .any(|session| session.game_type == game_type && session.status.is_live())
            {
                return Err(StartError::SessionInProgress(game_type));
            }
            let quota = state.limits.get(game_type).cloned();
            let mut session = GameSession::new(game_type, now, quota);
            transition(&mut session, SessionStatus::Active)?;
            let session_id = session.id.clone();
            state.starting.insert(session_id.clone());
            state.sessions.insert(session_id.clone(), session);
            session_id
        };

        let request = StartSessionRequest {
            game_type,
            client_session_id: session_id.clone(),
        };
        let outcome = self.call(self.authority.start_session(request)).await;

        let now = self.clock.now_ms();
        let mut state = self.state();
        state.starting.remove(&session_id);
        match outcome {
            Ok(response) => {
                state.limits.consume(game_type);
                if let Some(session) = state.sessions.get_mut(&session_id) {
                    session.acknowledge(response.session_id.clone(), response.expires_at);
                }
                state
                    .fallback
                    .set_authority_id(&session_id, response.session_id.clone());
                if let Some(refresh) = state.deferred.remove(&session_id) {
                    self.wallet.notify(refresh);
                }
                info!(
                    %session_id,
                    authority_id = %response.session_id,
                    %game_type,
                    expires_at = response.expires_at,
                    "session started"
                );
                Ok(SessionHandle {
                    session_id,
                    game_type,
                    expires_at: response.expires_at,
                    local_only: false,
                })
            }
            Err(Error::QuotaExceeded(reason)) => {
                warn!(%session_id, %game_type, %reason, "authority reports no plays left");
                state.limits.exhaust(game_type, now);
                discard_unacknowledged(&mut state, &session_id);
                Err(StartError::QuotaExceeded(game_type))
            }
            Err(err) if err.is_network() && self.config.offline_play => {
                warn!(?err, %session_id, %game_type, "authority unreachable; playing local-only session");
                state.limits.consume(game_type);
                let expires_at = state
                    .sessions
                    .get(&session_id)
                    .map(|session| session.expires_at)
                    .unwrap_or_else(|| now.saturating_add(game_type.duration_ms()));
                if let Some(refresh) = state.deferred.remove(&session_id) {
                    self.wallet.notify(refresh);
                }
                Ok(SessionHandle {
                    session_id,
                    game_type,
                    expires_at,
                    local_only: true,
                })
            }
            Err(err) if err.is_network() => {
                warn!(?err, %session_id, %game_type, "authority unreachable; start failed");
                discard_unacknowledged(&mut state, &session_id);
                Err(StartError::Network(err))
            }
            Err(err) => {
                warn!(?err, %session_id, %game_type, "start rejected");
                discard_unacknowledged(&mut state, &session_id);
                Err(StartError::Rejected(err))
            }
        }
    }

    /// Settle an active session and resolve its reward.
    ///
    /// `local_score` is sent as a hint; the authority's value is what gets credited. When the
    /// authority cannot be reached (or rejects the metrics) the fallback estimate is returned and
    /// the session is queued for reconciliation. A repeat call returns the stored outcome.
    pub async fn complete_session(
        &self,
        session_id: &SessionId,
        local_score: u64,
        metrics: SessionMetrics,
    ) -> std::result::Result<RewardResult, CompleteError> {
        let now = self.clock.now_ms();
        let (game_type, authority_id) = {
            let mut state = self.state();
            if let Some(result) = state.resolver.result(session_id) {
                debug!(%session_id, "session already settled; returning stored result");
                return Ok(result.clone());
            }
            if state.in_flight.contains(session_id) {
                return Err(CompleteError::InFlight(session_id.clone()));
            }
            let grace = self.expiry_grace_ms();
            let session = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CompleteError::UnknownSession(session_id.clone()))?;
            if session.status == SessionStatus::Expired {
                return Err(CompleteError::SessionExpired(session_id.clone()));
            }
            if session.status == SessionStatus::Active && session.is_past_ttl(now, grace) {
                transition(session, SessionStatus::Expired)?;
                warn!(%session_id, expires_at = session.expires_at, "session outlived its ttl");
                return Err(CompleteError::SessionExpired(session_id.clone()));
            }
            transition(session, SessionStatus::Settling)?;
            session.local_score = local_score;
            let settling = (session.game_type, session.authority_id.clone());
            state.in_flight.insert(session_id.clone());
            settling
        };

        let invalid = metrics.validate(game_type).err();
        let metrics = match &invalid {
            Some(_) => metrics.sanitized(game_type),
            None => metrics,
        };
        let fallback_coins = FailureFallback::estimate(game_type, local_score, &metrics);
        let attempt = if let Some(err) = invalid {
            warn!(%session_id, %err, "invalid metrics; settling with fallback");
            Attempt::Fallback(metrics)
        } else if let Some(authority_id) = &authority_id {
            let request = CompleteSessionRequest {
                local_score,
                metrics: metrics.clone(),
            };
            match self
                .call(self.authority.complete_session(authority_id, request))
                .await
            {
                Ok(response) => Attempt::Settled(response),
                Err(Error::SessionExpired(_)) | Err(Error::UnknownSession(_)) => Attempt::Denied,
                Err(Error::Validation(reason)) => {
                    warn!(%session_id, %reason, "authority rejected metrics; settling with fallback");
                    Attempt::Fallback(metrics.sanitized(game_type))
                }
                Err(err) => {
                    warn!(?err, %session_id, "complete failed; settling with fallback");
                    Attempt::Fallback(metrics)
                }
            }
        } else {
            debug!(%session_id, "local-only session; settling with fallback");
            Attempt::Fallback(metrics)
        };

        let now = self.clock.now_ms();
        let (outcome, refresh) = {
            let mut state = self.state();
            state.in_flight.remove(session_id);
            let applied = self.apply_attempt(
                &mut state,
                session_id,
                game_type,
                authority_id,
                local_score,
                fallback_coins,
                attempt,
                now,
            );
            state.prune_evicted();
            match applied {
                (outcome, Some(refresh)) if state.starting.contains(session_id) => {
                    debug!(%session_id, "start still pending; holding wallet refresh");
                    state.deferred.insert(session_id.clone(), refresh);
                    (outcome, None)
                }
                applied => applied,
            }
        };

        if let Err(err) = self.refresh_limits().await {
            warn!(?err, %session_id, "quota refresh after settlement failed");
        }
        if let Some(refresh) = refresh {
            self.wallet.notify(refresh);
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_attempt(
        &self,
        state: &mut State,
        session_id: &SessionId,
        game_type: GameType,
        authority_id: Option<SessionId>,
        local_score: u64,
        fallback_coins: u64,
        attempt: Attempt,
        now: u64,
    ) -> (
        std::result::Result<RewardResult, CompleteError>,
        Option<BalanceRefresh>,
    ) {
        let Some(session) = state.sessions.get_mut(session_id) else {
            return (Err(CompleteError::UnknownSession(session_id.clone())), None);
        };
        match attempt {
            Attempt::Denied => {
                if let Err(err) = transition(session, SessionStatus::Expired) {
                    return (Err(err.into()), None);
                }
                warn!(%session_id, "authority denied completion; no reward credited");
                (Err(CompleteError::SessionExpired(session_id.clone())), None)
            }
            Attempt::Settled(response) => {
                if let Err(err) = transition(session, SessionStatus::Completed) {
                    return (Err(err.into()), None);
                }
                let result = state.resolver.resolve(
                    session_id,
                    Some(response.coins_earned),
                    fallback_coins,
                    now,
                );
                if let Some(session) = state.sessions.get_mut(session_id) {
                    session.server_reward = Some(result.coins_earned);
                }
                info!(
                    %session_id,
                    %game_type,
                    local_score,
                    coins = result.coins_earned,
                    "session completed"
                );
                let refresh = BalanceRefresh {
                    session_id: session_id.clone(),
                    source: result.source,
                    new_balance: response.new_balance,
                };
                (Ok(result), Some(refresh))
            }
            Attempt::Fallback(metrics) => {
                if let Err(err) = transition(session, SessionStatus::Unreconciled) {
                    return (Err(err.into()), None);
                }
                let fallback_coins = FailureFallback::estimate(game_type, local_score, &metrics);
                let result = state
                    .resolver
                    .resolve(session_id, None, fallback_coins, now);
                state.fallback.enqueue(PendingResync {
                    session_id: session_id.clone(),
                    authority_id,
                    game_type,
                    local_score,
                    metrics,
                    fallback_coins,
                    queued_at: now,
                });
                info!(
                    %session_id,
                    %game_type,
                    local_score,
                    coins = result.coins_earned,
                    "session settled with fallback estimate"
                );
                let refresh = BalanceRefresh {
                    session_id: session_id.clone(),
                    source: result.source,
                    new_balance: None,
                };
                (Ok(result), Some(refresh))
            }
        }
    }

    /// Expire every active session whose TTL plus grace has passed. Returns the expired ids.
    pub fn expire_stale(&self) -> Vec<SessionId> {
        let now = self.clock.now_ms();
        let grace = self.expiry_grace_ms();
        let mut state = self.state();
        let State {
            sessions,
            in_flight,
            starting,
            ..
        } = &mut *state;
        let mut expired = Vec::new();
        for session in sessions.values_mut() {
            if session.status != SessionStatus::Active
                || !session.is_past_ttl(now, grace)
                || in_flight.contains(&session.id)
                || starting.contains(&session.id)
            {
                continue;
            }
            if transition(session, SessionStatus::Expired).is_ok() {
                info!(session_id = %session.id, expires_at = session.expires_at, "stale session expired");
                expired.push(session.id.clone());
            }
        }
        expired
    }

    /// Replay queued fallback results against the authority.
    ///
    /// An accepted replay replaces the estimate and completes the session. An expired or unknown
    /// session is dropped from the queue and never credited. A network failure ends the pass and
    /// leaves the rest queued.
    pub async fn retry_unreconciled(&self) -> RetryReport {
        let mut report = RetryReport::default();
        let pending = self.state().fallback.pending();
        for entry in pending {
            let session_id = entry.session_id.clone();
            let authority_id = {
                let mut state = self.state();
                if state.in_flight.contains(&session_id) {
                    continue;
                }
                match &entry.authority_id {
                    Some(authority_id) => {
                        state.in_flight.insert(session_id.clone());
                        authority_id.clone()
                    }
                    None if state.starting.contains(&session_id) => continue,
                    None => {
                        warn!(%session_id, "start never acknowledged; dropping resync entry");
                        state.fallback.remove(&session_id);
                        report.dropped += 1;
                        continue;
                    }
                }
            };

            let request = CompleteSessionRequest {
                local_score: entry.local_score,
                metrics: entry.metrics.clone(),
            };
            let outcome = self
                .call(self.authority.complete_session(&authority_id, request))
                .await;

            let now = self.clock.now_ms();
            let refresh = {
                let mut state = self.state();
                state.in_flight.remove(&session_id);
                match outcome {
                    Ok(response) => {
                        state.fallback.remove(&session_id);
                        let result = state.resolver.resolve(
                            &session_id,
                            Some(response.coins_earned),
                            entry.fallback_coins,
                            now,
                        );
                        if let Some(session) = state.sessions.get_mut(&session_id) {
                            session.server_reward = Some(result.coins_earned);
                            if let Err(err) = transition(session, SessionStatus::Completed) {
                                warn!(%err, "reconciled session in unexpected state");
                            }
                        }
                        state.prune_evicted();
                        info!(
                            %session_id,
                            estimate = entry.fallback_coins,
                            coins = result.coins_earned,
                            "session reconciled"
                        );
                        report.reconciled += 1;
                        Some(BalanceRefresh {
                            session_id: session_id.clone(),
                            source: result.source,
                            new_balance: response.new_balance,
                        })
                    }
                    Err(Error::SessionExpired(_)) | Err(Error::UnknownSession(_)) => {
                        warn!(%session_id, "authority denied resync; dropping entry");
                        state.fallback.remove(&session_id);
                        report.dropped += 1;
                        None
                    }
                    Err(err) if err.is_network() => {
                        debug!(?err, %session_id, "authority still unreachable; ending resync pass");
                        break;
                    }
                    Err(err) => {
                        warn!(?err, %session_id, "resync rejected; keeping entry");
                        None
                    }
                }
            };
            if let Some(refresh) = refresh {
                self.wallet.notify(refresh);
            }
        }

        if report.reconciled > 0 {
            if let Err(err) = self.refresh_limits().await {
                warn!(?err, "quota refresh after resync failed");
            }
        }
        report.remaining = self.state().fallback.len();
        report
    }

    /// Run [SessionClient::retry_unreconciled] in the background until the handle is aborted.
    ///
    /// Passes are spaced by the configured retry interval with equal jitter, backing off while
    /// entries stay queued without progress.
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let base = client.config.retry_interval;
            let mut backoff = base;
            loop {
                tokio::time::sleep(jittered_backoff(&mut rng, backoff)).await;
                let report = client.retry_unreconciled().await;
                if report.remaining == 0 || report.reconciled > 0 {
                    backoff = base;
                } else {
                    backoff = next_backoff(backoff, client.config.max_retry_interval);
                    debug!(
                        remaining = report.remaining,
                        next_ms = backoff.as_millis() as u64,
                        "resync pass made no progress"
                    );
                }
            }
        })
    }

    pub fn pending_resync(&self) -> Vec<PendingResync> {
        self.state().fallback.pending()
    }

    /// Persist the resync queue so it survives a restart.
    pub fn save_resync(&self, path: &Path) -> Result<()> {
        self.state().fallback.save(path)
    }

    /// Merge a previously saved resync queue. Returns the number of queued entries afterwards.
    pub fn restore_resync(&self, path: &Path) -> usize {
        let loaded = FailureFallback::load(path, self.config.resync_capacity);
        let mut state = self.state();
        for entry in loaded.pending() {
            state.fallback.enqueue(entry);
        }
        info!(entries = state.fallback.len(), path = %path.display(), "resync queue restored");
        state.fallback.len()
    }
}

fn transition(
    session: &mut GameSession,
    next: SessionStatus,
) -> std::result::Result<(), TransitionError> {
    let from = session.status;
    session.transition(next)?;
    debug!(session_id = %session.id, from = from.as_str(), to = next.as_str(), "session transition");
    Ok(())
}

/// Forget a session the authority refused to start.
///
/// A session that already settled locally while the start was pending loses its fallback
/// reward: the estimate, its resync entry and its held wallet refresh are all dropped.
fn discard_unacknowledged(state: &mut State, session_id: &SessionId) {
    state.deferred.remove(session_id);
    let Some(session) = state.sessions.get_mut(session_id) else {
        return;
    };
    if session.status.is_live() {
        state.sessions.remove(session_id);
        return;
    }
    match session.revoke() {
        Ok(()) => {
            state.resolver.revoke(session_id);
            state.fallback.remove(session_id);
            warn!(%session_id, "start refused after local settlement; fallback reward revoked");
        }
        Err(err) => debug!(%err, "refused start left settled session as is"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, mocks::MockAuthority};
    use minigame_types::RewardSource;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const NOW: u64 = 1_700_000_000_000;

    struct Harness {
        client: Arc<SessionClient<MockAuthority>>,
        clock: Arc<ManualClock>,
        wallet: mpsc::Receiver<BalanceRefresh>,
    }

    fn harness(authority: MockAuthority) -> Harness {
        harness_with(authority, EngineConfig::default())
    }

    fn harness_with(authority: MockAuthority, config: EngineConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(NOW));
        let (notifier, wallet) = WalletSyncNotifier::channel(16);
        let client = SessionClient::new(authority.with_clock(clock.clone()), config, notifier)
            .with_clock(clock.clone());
        Harness {
            client: Arc::new(client),
            clock,
            wallet,
        }
    }

    fn metrics(elapsed_ms: u64, event_count: u32) -> SessionMetrics {
        SessionMetrics {
            elapsed_ms,
            event_count,
            landed_segment: None,
        }
    }

    #[tokio::test]
    async fn exhausted_quota_rejects_without_network_call() {
        let h = harness(MockAuthority::new().with_limit(GameType::CoinHunt, 5, 5));
        let quota = h.client.mount(GameType::CoinHunt).await.unwrap();
        assert_eq!(quota.display_remaining(), 0);
        assert!(!h.client.can_play(GameType::CoinHunt));

        let err = h.client.start_session(GameType::CoinHunt).await.unwrap_err();
        assert!(matches!(err, StartError::QuotaExhausted(GameType::CoinHunt)));
        assert_eq!(h.client.authority().start_calls(), 0);
        assert!(h.client.live_session(GameType::CoinHunt).is_none());
    }

    #[tokio::test]
    async fn authority_reward_wins_over_local_score() {
        let mut h = harness(MockAuthority::new());
        h.client.mount(GameType::CoinHunt).await;
        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        assert!(!handle.local_only);
        assert_eq!(
            h.client.quota(GameType::CoinHunt).unwrap().remaining,
            4,
            "optimistic decrement"
        );

        h.client.authority().script_reward(28);
        h.clock.advance(30_000);
        let result = h
            .client
            .complete_session(&handle.session_id, 30, metrics(30_000, 3))
            .await
            .unwrap();
        assert_eq!(result.coins_earned, 28);
        assert_eq!(result.source, RewardSource::Authority);

        let session = h.client.session(&handle.session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.server_reward, Some(28));
        assert_eq!(session.local_score, 30);

        let refresh = h.wallet.recv().await.unwrap();
        assert_eq!(refresh.session_id, handle.session_id);
        assert_eq!(refresh.source, RewardSource::Authority);
        assert_eq!(refresh.new_balance, Some(28));
    }

    #[tokio::test]
    async fn repeated_complete_is_idempotent() {
        let h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::MemoryMatch).await.unwrap();
        let first = h
            .client
            .complete_session(&handle.session_id, 40, metrics(20_000, 8))
            .await
            .unwrap();
        let second = h
            .client
            .complete_session(&handle.session_id, 90, metrics(20_000, 8))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(h.client.authority().complete_calls(), 1);
        assert_eq!(h.client.authority().used(GameType::MemoryMatch), 1);
        assert_eq!(h.client.authority().balance(), 40);
        assert_eq!(h.client.quota(GameType::MemoryMatch).unwrap().used, 1);
    }

    #[tokio::test]
    async fn network_failure_settles_with_fallback() {
        let mut h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        h.client.authority().set_offline(true);

        let result = h
            .client
            .complete_session(&handle.session_id, 30, metrics(30_000, 3))
            .await
            .unwrap();
        assert_eq!(result.source, RewardSource::Fallback);
        assert_eq!(result.coins_earned, 30);
        assert_eq!(
            h.client.session(&handle.session_id).unwrap().status,
            SessionStatus::Unreconciled
        );
        assert_eq!(h.client.pending_resync().len(), 1);

        let refresh = h.wallet.recv().await.unwrap();
        assert_eq!(refresh.source, RewardSource::Fallback);
        assert_eq!(refresh.new_balance, None);

        // A repeat while still offline returns the same estimate without another attempt.
        let calls = h.client.authority().complete_calls();
        let again = h
            .client
            .complete_session(&handle.session_id, 30, metrics(30_000, 3))
            .await
            .unwrap();
        assert_eq!(again, result);
        assert_eq!(h.client.authority().complete_calls(), calls);
    }

    #[tokio::test]
    async fn retry_reconciles_fallback_result() {
        let mut h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        h.client.authority().set_offline(true);
        h.client
            .complete_session(&handle.session_id, 30, metrics(30_000, 3))
            .await
            .unwrap();
        let _ = h.wallet.recv().await;

        // Still offline: nothing changes.
        let report = h.client.retry_unreconciled().await;
        assert_eq!(report, RetryReport { reconciled: 0, dropped: 0, remaining: 1 });

        h.client.authority().set_offline(false);
        h.client.authority().script_reward(25);
        let report = h.client.retry_unreconciled().await;
        assert_eq!(report, RetryReport { reconciled: 1, dropped: 0, remaining: 0 });

        let result = h.client.result(&handle.session_id).unwrap();
        assert_eq!(result.coins_earned, 25);
        assert_eq!(result.source, RewardSource::Authority);
        assert_eq!(
            h.client.session(&handle.session_id).unwrap().status,
            SessionStatus::Completed
        );
        let refresh = h.wallet.recv().await.unwrap();
        assert_eq!(refresh.source, RewardSource::Authority);

        // Further completes keep returning the reconciled value.
        let again = h
            .client
            .complete_session(&handle.session_id, 30, metrics(30_000, 3))
            .await
            .unwrap();
        assert_eq!(again, result);
    }

    #[tokio::test]
    async fn expired_session_gets_no_credit() {
        let mut h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::SpinWheel).await.unwrap();
        let authority_id = h
            .client
            .session(&handle.session_id)
            .unwrap()
            .authority_id
            .unwrap();
        h.client.authority().expire(&authority_id);

        let err = h
            .client
            .complete_session(&handle.session_id, 50, metrics(5_000, 1))
            .await
            .unwrap_err();
        assert_eq!(err, CompleteError::SessionExpired(handle.session_id.clone()));
        assert_eq!(
            h.client.session(&handle.session_id).unwrap().status,
            SessionStatus::Expired
        );
        assert!(h.client.pending_resync().is_empty());
        assert!(h.client.result(&handle.session_id).is_none());
        assert!(h.wallet.try_recv().is_err());

        // Terminal: never retried.
        let err = h
            .client
            .complete_session(&handle.session_id, 50, metrics(5_000, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CompleteError::SessionExpired(_)));
        assert_eq!(h.client.authority().complete_calls(), 1);
    }

    #[tokio::test]
    async fn local_ttl_check_expires_before_network() {
        let h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        h.clock.advance(30_000 + 10_000 + 1);

        let err = h
            .client
            .complete_session(&handle.session_id, 10, metrics(30_000, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CompleteError::SessionExpired(_)));
        assert_eq!(h.client.authority().complete_calls(), 0);
    }

    #[tokio::test]
    async fn expire_stale_sweeps_only_overdue_active_sessions() {
        let h = harness(MockAuthority::new());
        let hunt = h.client.start_session(GameType::CoinHunt).await.unwrap();
        let memory = h.client.start_session(GameType::MemoryMatch).await.unwrap();

        h.clock.advance(30_000 + 10_000 + 1);
        assert_eq!(h.client.expire_stale(), vec![hunt.session_id.clone()]);
        assert_eq!(
            h.client.session(&memory.session_id).unwrap().status,
            SessionStatus::Active
        );
        assert!(h.client.expire_stale().is_empty());

        // The expired play does not block a new one.
        assert!(h.client.start_session(GameType::CoinHunt).await.is_ok());
    }

    #[tokio::test]
    async fn authority_quota_rejection_forces_zero() {
        let h = harness(MockAuthority::new().with_limit(GameType::MemoryMatch, 5, 5));
        // No mount: the local cache is unknown, so the authority decides.
        let err = h
            .client
            .start_session(GameType::MemoryMatch)
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::QuotaExceeded(GameType::MemoryMatch)));
        assert!(!h.client.can_play(GameType::MemoryMatch));
        assert!(h.client.live_session(GameType::MemoryMatch).is_none());

        let err = h
            .client
            .start_session(GameType::MemoryMatch)
            .await
            .unwrap_err();
        assert!(matches!(err, StartError::QuotaExhausted(_)));
        assert_eq!(h.client.authority().start_calls(), 1);
    }

    #[tokio::test]
    async fn unreachable_start_plays_local_only() {
        let h = harness(MockAuthority::new());
        h.client.mount(GameType::CoinHunt).await;
        h.client.authority().set_offline(true);

        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        assert!(handle.local_only);
        assert_eq!(h.client.quota(GameType::CoinHunt).unwrap().remaining, 4);
        let session = h.client.session(&handle.session_id).unwrap();
        assert!(session.is_local_only());
        assert_eq!(session.status, SessionStatus::Active);

        let result = h
            .client
            .complete_session(&handle.session_id, 12, metrics(30_000, 2))
            .await
            .unwrap();
        assert_eq!(result.source, RewardSource::Fallback);
        assert_eq!(result.coins_earned, 12);

        // Never acknowledged, so nothing to replay against.
        h.client.authority().set_offline(false);
        let report = h.client.retry_unreconciled().await;
        assert_eq!(report, RetryReport { reconciled: 0, dropped: 1, remaining: 0 });
        assert_eq!(
            h.client.session(&handle.session_id).unwrap().status,
            SessionStatus::Unreconciled
        );
    }

    #[tokio::test]
    async fn unreachable_start_without_offline_play_is_retryable() {
        let config = EngineConfig {
            offline_play: false,
            ..EngineConfig::default()
        };
        let h = harness_with(MockAuthority::new(), config);
        h.client.authority().set_offline(true);

        let err = h.client.start_session(GameType::CoinHunt).await.unwrap_err();
        assert!(matches!(err, StartError::Network(_)));
        assert!(err.is_retryable());
        assert!(h.client.live_session(GameType::CoinHunt).is_none());
    }

    #[tokio::test]
    async fn live_session_blocks_second_start() {
        let h = harness(MockAuthority::new());
        h.client.start_session(GameType::SpinWheel).await.unwrap();
        let err = h.client.start_session(GameType::SpinWheel).await.unwrap_err();
        assert!(matches!(err, StartError::SessionInProgress(GameType::SpinWheel)));
        assert!(h.client.start_session(GameType::CoinHunt).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_metrics_skip_network() {
        let h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        let bad = SessionMetrics {
            elapsed_ms: 1_000,
            event_count: 1,
            landed_segment: Some(2),
        };
        let result = h
            .client
            .complete_session(&handle.session_id, 15, bad)
            .await
            .unwrap();
        assert_eq!(result.source, RewardSource::Fallback);
        assert_eq!(h.client.authority().complete_calls(), 0);

        let queued = h.client.pending_resync();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].metrics.landed_segment, None);
    }

    #[tokio::test]
    async fn authority_metrics_rejection_settles_with_sanitized_fallback() {
        let mut h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::SpinWheel).await.unwrap();
        h.client
            .authority()
            .fail_next_complete(Error::Validation("segment does not match seed".into()));

        let claimed = SessionMetrics {
            elapsed_ms: 4_000,
            event_count: 1,
            landed_segment: Some(6),
        };
        let result = h
            .client
            .complete_session(&handle.session_id, 15, claimed)
            .await
            .unwrap();
        assert_eq!(result.source, RewardSource::Fallback);
        // The rejected jackpot segment is not trusted for the estimate.
        assert_eq!(result.coins_earned, 15);
        assert_eq!(h.client.authority().complete_calls(), 1);
        assert_eq!(
            h.client.session(&handle.session_id).unwrap().status,
            SessionStatus::Unreconciled
        );

        let queued = h.client.pending_resync();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].metrics.landed_segment, None);
        assert_eq!(queued[0].fallback_coins, 15);
        assert!(queued[0].authority_id.is_some());

        let refresh = h.wallet.recv().await.unwrap();
        assert_eq!(refresh.source, RewardSource::Fallback);
    }

    #[tokio::test]
    async fn rejected_start_frees_the_slot() {
        let h = harness(MockAuthority::new());
        h.client
            .authority()
            .fail_next_start(Error::UnexpectedResponse);

        let err = h.client.start_session(GameType::CoinHunt).await.unwrap_err();
        assert!(matches!(err, StartError::Rejected(Error::UnexpectedResponse)));
        assert!(!err.is_retryable());
        assert!(h.client.live_session(GameType::CoinHunt).is_none());
        assert!(h.client.pending_resync().is_empty());

        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        assert!(!handle.local_only);
        assert_eq!(h.client.authority().start_calls(), 2);
    }

    /// Start a coin hunt whose start call is parked, settle it locally, then return the start task.
    async fn settle_before_start(
        h: &Harness,
    ) -> (
        SessionId,
        JoinHandle<std::result::Result<SessionHandle, StartError>>,
    ) {
        h.client.authority().hold_starts();
        let client = h.client.clone();
        let start = tokio::spawn(async move { client.start_session(GameType::CoinHunt).await });
        while h.client.authority().start_calls() == 0 {
            tokio::task::yield_now().await;
        }

        let session_id = h.client.live_session(GameType::CoinHunt).unwrap().id;
        let result = h
            .client
            .complete_session(&session_id, 30, metrics(30_000, 3))
            .await
            .unwrap();
        assert_eq!(result.source, RewardSource::Fallback);
        assert_eq!(result.coins_earned, 30);
        (session_id, start)
    }

    #[tokio::test]
    async fn quota_rejection_revokes_early_settlement() {
        let mut h = harness(MockAuthority::new());
        let (session_id, start) = settle_before_start(&h).await;
        assert!(h.wallet.try_recv().is_err(), "refresh held until start returns");

        h.client
            .authority()
            .fail_next_start(Error::QuotaExceeded("coin_hunt".into()));
        h.client.authority().release_starts();
        let err = start.await.unwrap().unwrap_err();
        assert!(matches!(err, StartError::QuotaExceeded(GameType::CoinHunt)));

        assert!(h.client.result(&session_id).is_none());
        assert_eq!(
            h.client.session(&session_id).unwrap().status,
            SessionStatus::Expired
        );
        assert!(h.client.pending_resync().is_empty());
        assert!(h.wallet.try_recv().is_err());
        assert!(!h.client.can_play(GameType::CoinHunt));

        let err = h
            .client
            .complete_session(&session_id, 30, metrics(30_000, 3))
            .await
            .unwrap_err();
        assert_eq!(err, CompleteError::SessionExpired(session_id));
    }

    #[tokio::test]
    async fn unreachable_start_without_offline_play_revokes_early_settlement() {
        let config = EngineConfig {
            offline_play: false,
            ..EngineConfig::default()
        };
        let mut h = harness_with(MockAuthority::new(), config);
        let (session_id, start) = settle_before_start(&h).await;

        h.client.authority().fail_next_start(Error::Timeout);
        h.client.authority().release_starts();
        let err = start.await.unwrap().unwrap_err();
        assert!(matches!(err, StartError::Network(_)));

        assert!(h.client.result(&session_id).is_none());
        assert!(h.client.pending_resync().is_empty());
        assert!(h.wallet.try_recv().is_err());
    }

    #[tokio::test]
    async fn acknowledged_start_releases_held_refresh() {
        let mut h = harness(MockAuthority::new());
        let (session_id, start) = settle_before_start(&h).await;
        assert!(h.wallet.try_recv().is_err());

        h.client.authority().release_starts();
        let handle = start.await.unwrap().unwrap();
        assert_eq!(handle.session_id, session_id);

        let refresh = h.wallet.recv().await.unwrap();
        assert_eq!(refresh.session_id, session_id);
        assert_eq!(refresh.source, RewardSource::Fallback);

        // The acknowledged id lets the queued estimate reconcile.
        let queued = h.client.pending_resync();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].authority_id.is_some());
        h.client.authority().script_reward(26);
        let report = h.client.retry_unreconciled().await;
        assert_eq!(report, RetryReport { reconciled: 1, dropped: 0, remaining: 0 });
        assert_eq!(h.client.result(&session_id).unwrap().coins_earned, 26);
    }

    #[tokio::test]
    async fn concurrent_complete_is_guarded() {
        let h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        h.client.authority().hold_completes();

        let client = h.client.clone();
        let session_id = handle.session_id.clone();
        let first = tokio::spawn(async move {
            client
                .complete_session(&session_id, 20, metrics(10_000, 2))
                .await
        });
        while h.client.authority().complete_calls() == 0 {
            tokio::task::yield_now().await;
        }

        let err = h
            .client
            .complete_session(&handle.session_id, 20, metrics(10_000, 2))
            .await
            .unwrap_err();
        assert_eq!(err, CompleteError::InFlight(handle.session_id.clone()));

        h.client.authority().release_completes();
        let result = first.await.unwrap().unwrap();
        assert_eq!(result.coins_earned, 20);
        assert_eq!(h.client.authority().complete_calls(), 1);
    }

    #[tokio::test]
    async fn complete_refreshes_quota_from_authority() {
        let h = harness(MockAuthority::new().with_limit(GameType::SpinWheel, 3, 1));
        h.client.mount(GameType::SpinWheel).await;
        let handle = h.client.start_session(GameType::SpinWheel).await.unwrap();
        let fetches = h.client.authority().limit_calls();

        h.client
            .complete_session(&handle.session_id, 10, metrics(5_000, 1))
            .await
            .unwrap();
        assert_eq!(h.client.authority().limit_calls(), fetches + 1);
        let quota = h.client.quota(GameType::SpinWheel).unwrap();
        assert_eq!((quota.used, quota.remaining), (2, 1));
    }

    #[tokio::test]
    async fn mount_uses_fresh_cache() {
        let h = harness(MockAuthority::new());
        h.client.mount(GameType::CoinHunt).await;
        h.client.mount(GameType::CoinHunt).await;
        assert_eq!(h.client.authority().limit_calls(), 1);

        h.clock.advance(5 * 60 * 1_000 + 1);
        h.client.mount(GameType::CoinHunt).await;
        assert_eq!(h.client.authority().limit_calls(), 2);
    }

    #[tokio::test]
    async fn resync_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resync.json");

        let h = harness(MockAuthority::new());
        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        h.client.authority().set_offline(true);
        h.client
            .complete_session(&handle.session_id, 30, metrics(30_000, 3))
            .await
            .unwrap();
        h.client.save_resync(&path).unwrap();

        let restarted = harness(MockAuthority::new());
        assert_eq!(restarted.client.restore_resync(&path), 1);
        assert_eq!(
            restarted.client.pending_resync()[0].session_id,
            handle.session_id
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconciler_retries_in_background() {
        let config = EngineConfig {
            retry_interval: Duration::from_secs(30),
            ..EngineConfig::default()
        };
        let h = harness_with(MockAuthority::new(), config);
        let handle = h.client.start_session(GameType::CoinHunt).await.unwrap();
        h.client.authority().set_offline(true);
        h.client
            .complete_session(&handle.session_id, 30, metrics(30_000, 3))
            .await
            .unwrap();
        h.client.authority().set_offline(false);

        let reconciler = h.client.spawn_reconciler();
        tokio::time::sleep(Duration::from_secs(31)).await;
        reconciler.abort();

        assert!(h.client.pending_resync().is_empty());
        assert!(h.client.result(&handle.session_id).unwrap().is_authoritative());
    }
}
