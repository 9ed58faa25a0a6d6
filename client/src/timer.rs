//! Cooperative countdown with a single, idempotent expiry.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

/// Smallest accepted tick; `tokio::time::interval` rejects a zero period.
const MIN_TICK: Duration = Duration::from_millis(1);

/// One-way flag shared by every party that can end a round. The first `try_settle` wins.
#[derive(Clone, Debug, Default)]
pub struct SettledFlag(Arc<AtomicBool>);

impl SettledFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for exactly one caller.
    pub fn try_settle(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Running(Duration),
    Elapsed,
}

/// Pure countdown state advanced one tick at a time.
#[derive(Clone, Copy, Debug)]
pub struct Countdown {
    remaining: Duration,
    tick: Duration,
}

impl Countdown {
    pub fn new(duration: Duration, tick: Duration) -> Self {
        Self {
            remaining: duration,
            tick: tick.max(MIN_TICK),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn tick(&mut self) -> Tick {
        self.remaining = self.remaining.saturating_sub(self.tick);
        if self.remaining.is_zero() {
            Tick::Elapsed
        } else {
            Tick::Running(self.remaining)
        }
    }
}

/// Drives a [Countdown] on a tokio task and fires `on_expire` at most once.
///
/// The expiry only fires if the timer wins the shared [SettledFlag]; a user stop that settles
/// first suppresses it. Dropping the timer cancels it.
pub struct GameTimer {
    settled: SettledFlag,
    remaining: watch::Receiver<Duration>,
    handle: JoinHandle<()>,
}

impl GameTimer {
    pub fn start<F>(duration: Duration, tick: Duration, settled: SettledFlag, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut countdown = Countdown::new(duration, tick);
        let (tx, rx) = watch::channel(countdown.remaining());
        let flag = settled.clone();
        let period = countdown.tick;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if flag.is_settled() {
                    debug!("round settled before expiry; stopping countdown");
                    return;
                }
                match countdown.tick() {
                    Tick::Running(remaining) => {
                        tx.send_replace(remaining);
                    }
                    Tick::Elapsed => {
                        tx.send_replace(Duration::ZERO);
                        if flag.try_settle() {
                            on_expire();
                        }
                        return;
                    }
                }
            }
        });
        Self {
            settled,
            remaining: rx,
            handle,
        }
    }

    pub fn settled_flag(&self) -> SettledFlag {
        self.settled.clone()
    }

    pub fn remaining(&self) -> Duration {
        *self.remaining.borrow()
    }

    /// Receiver updated on every tick, for countdown displays.
    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.remaining.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop future ticks. Does not settle the round.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for GameTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
