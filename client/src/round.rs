//! One screen's round: a started session, its accumulator and its countdown.

use crate::{
    accumulator::{LocalRewardAccumulator, ScoreSnapshot},
    authority::SessionAuthority,
    session::{CompleteError, SessionClient, SessionHandle, StartError},
    timer::{GameTimer, SettledFlag},
};
use minigame_types::{
    GameType, GameplayEvent, PrizeMatch, RewardResult, RewardTable, SessionMetrics,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

type Outcome = Option<Result<RewardResult, CompleteError>>;

#[derive(Default)]
struct Tally {
    accumulator: LocalRewardAccumulator,
    landed_segment: Option<usize>,
}

/// Everything a settlement needs, shared between the timer task and the screen.
struct Settle<A: SessionAuthority> {
    client: Arc<SessionClient<A>>,
    handle: SessionHandle,
    tally: Arc<Mutex<Tally>>,
    started: Instant,
    outcome: Arc<watch::Sender<Outcome>>,
}

impl<A: SessionAuthority> Clone for Settle<A> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            handle: self.handle.clone(),
            tally: self.tally.clone(),
            started: self.started,
            outcome: self.outcome.clone(),
        }
    }
}

impl<A: SessionAuthority> Settle<A> {
    fn tally(&self) -> MutexGuard<'_, Tally> {
        lock(&self.tally)
    }

    async fn run(self) {
        let (snapshot, landed_segment) = {
            let tally = self.tally();
            (tally.accumulator.snapshot(), tally.landed_segment)
        };
        let metrics = SessionMetrics {
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            event_count: snapshot.event_count,
            landed_segment,
        };
        let outcome = self
            .client
            .complete_session(&self.handle.session_id, snapshot.score, metrics)
            .await;
        if let Err(err) = &outcome {
            debug!(session_id = %self.handle.session_id, %err, "round settled without reward");
        }
        self.outcome.send_replace(Some(outcome));
    }
}

/// Drives one session from start to settlement.
///
/// Whichever comes first of the countdown reaching zero and [GameRound::stop] settles the round;
/// the other is a no-op.
pub struct GameRound<A: SessionAuthority> {
    settle: Settle<A>,
    settled: SettledFlag,
    timer: GameTimer,
    outcome: watch::Receiver<Outcome>,
}

impl<A: SessionAuthority> GameRound<A> {
    /// Start a session and its countdown.
    pub async fn begin(
        client: Arc<SessionClient<A>>,
        game_type: GameType,
    ) -> Result<Self, StartError> {
        let handle = client.start_session(game_type).await?;
        Ok(Self::attach(client, handle))
    }

    /// Run a round for a session that is already started.
    pub fn attach(client: Arc<SessionClient<A>>, handle: SessionHandle) -> Self {
        let (sender, outcome) = watch::channel(None);
        let tick = client.config().tick;
        let duration = Duration::from_millis(handle.game_type.duration_ms());
        let settle = Settle {
            client,
            handle,
            tally: Arc::new(Mutex::new(Tally::default())),
            started: Instant::now(),
            outcome: Arc::new(sender),
        };
        let settled = SettledFlag::new();
        let on_expire = settle.clone();
        let timer = GameTimer::start(duration, tick, settled.clone(), move || {
            debug!(session_id = %on_expire.handle.session_id, "round timer expired");
            tokio::spawn(on_expire.run());
        });
        Self {
            settle,
            settled,
            timer,
            outcome,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.settle.handle
    }

    /// Returns `false` for a duplicate event id or once the round has settled.
    pub fn record(&self, event: GameplayEvent) -> bool {
        if self.settled.is_settled() {
            return false;
        }
        self.settle.tally().accumulator.record(event)
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        self.settle.tally().accumulator.snapshot()
    }

    /// Spin-wheel segment the wheel stopped on, reported with the completion.
    pub fn set_landed_segment(&self, segment: usize) {
        self.settle.tally().landed_segment = Some(segment);
    }

    /// Wheel segment to show for a settled reward. `None` outside the spin wheel.
    ///
    /// The authority's coin value is what gets displayed and credited; a value that matches no
    /// segment picks the largest segment below it.
    pub fn display_segment(&self, result: &RewardResult) -> Option<usize> {
        let table = RewardTable::for_game(self.settle.handle.game_type);
        match table.prize_for_coins(result.coins_earned)? {
            PrizeMatch::Exact(index) => Some(index),
            PrizeMatch::Nearest(index) => {
                warn!(
                    session_id = %result.session_id,
                    coins = result.coins_earned,
                    segment = index,
                    "reward matches no wheel segment; showing nearest lower segment"
                );
                Some(index)
            }
        }
    }

    pub fn remaining(&self) -> Duration {
        self.timer.remaining()
    }

    /// Countdown updates for display.
    pub fn countdown(&self) -> watch::Receiver<Duration> {
        self.timer.subscribe()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.is_settled()
    }

    /// End the round now. Returns `false` if the timer already settled it.
    pub fn stop(&self) -> bool {
        if !self.settled.try_settle() {
            return false;
        }
        self.timer.cancel();
        debug!(session_id = %self.settle.handle.session_id, "round stopped by player");
        tokio::spawn(self.settle.clone().run());
        true
    }

    /// Wait for the settled outcome. Does not return until the round is stopped or expires.
    pub async fn wait(&self) -> Option<Result<RewardResult, CompleteError>> {
        let mut outcome = self.outcome.clone();
        let settled = outcome.wait_for(Option::is_some).await.ok()?;
        settled.clone()
    }

    /// Stop the countdown for a screen that is going away.
    ///
    /// If the round never settled, one completion with the current tally is fired in the
    /// background; its failure only affects the reward source, never the caller.
    pub fn teardown(self) -> Option<JoinHandle<()>> {
        self.timer.cancel();
        if !self.settled.try_settle() {
            return None;
        }
        debug!(session_id = %self.settle.handle.session_id, "round torn down while active");
        Some(tokio::spawn(self.settle.clone().run()))
    }
}

fn lock(tally: &Mutex<Tally>) -> MutexGuard<'_, Tally> {
    tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
