use std::time::Duration;

/// Default countdown tick (1 second)
const DEFAULT_TICK_MS: u64 = 1_000;

/// Default age after which cached quotas are refetched on mount (5 minutes)
const DEFAULT_QUOTA_MAX_AGE_MS: u64 = 5 * 60 * 1_000;

/// Default per-call deadline on authority requests
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Default bound on queued fallback results awaiting resync
const DEFAULT_RESYNC_CAPACITY: usize = 32;

/// Default number of settled outcomes remembered for idempotent replay
const DEFAULT_RESOLVER_CAPACITY: usize = 256;

/// Default pause between background reconciliation passes
const DEFAULT_RETRY_INTERVAL_MS: u64 = 30_000;

/// Upper bound for the reconciler's backoff after failed passes
const DEFAULT_MAX_RETRY_INTERVAL_MS: u64 = 5 * 60 * 1_000;

/// Configuration for the session engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Countdown tick interval
    pub tick: Duration,
    /// Cached quotas older than this are refetched before being trusted
    pub quota_max_age: Duration,
    /// Extra time after a session's `expires_at` before it is swept as expired
    pub expiry_grace: Duration,
    /// Deadline for a single authority call
    pub request_timeout: Duration,
    /// Maximum queued fallback results
    pub resync_capacity: usize,
    /// Maximum remembered settled outcomes
    pub resolver_capacity: usize,
    /// Play on with a local-only session when the start call cannot reach the authority
    pub offline_play: bool,
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            quota_max_age: Duration::from_millis(DEFAULT_QUOTA_MAX_AGE_MS),
            expiry_grace: Duration::from_millis(minigame_types::DEFAULT_EXPIRY_GRACE_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            resync_capacity: DEFAULT_RESYNC_CAPACITY,
            resolver_capacity: DEFAULT_RESOLVER_CAPACITY,
            offline_play: true,
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            max_retry_interval: Duration::from_millis(DEFAULT_MAX_RETRY_INTERVAL_MS),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick: read_ms("MINIGAME_TICK_MS", defaults.tick),
            quota_max_age: read_ms("MINIGAME_QUOTA_MAX_AGE_MS", defaults.quota_max_age),
            expiry_grace: read_ms("MINIGAME_EXPIRY_GRACE_MS", defaults.expiry_grace),
            request_timeout: read_ms("MINIGAME_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            resync_capacity: read_usize("MINIGAME_RESYNC_CAPACITY", defaults.resync_capacity),
            resolver_capacity: read_usize("MINIGAME_RESOLVER_CAPACITY", defaults.resolver_capacity),
            offline_play: read_bool("MINIGAME_OFFLINE_PLAY", defaults.offline_play),
            retry_interval: read_ms("MINIGAME_RETRY_INTERVAL_MS", defaults.retry_interval),
            max_retry_interval: read_ms(
                "MINIGAME_MAX_RETRY_INTERVAL_MS",
                defaults.max_retry_interval,
            ),
        }
    }
}

fn read_ms(key: &str, fallback: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(fallback)
}

fn read_usize(key: &str, fallback: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(fallback)
}

fn read_bool(key: &str, fallback: bool) -> bool {
    match std::env::var(key).as_deref() {
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES") => true,
        Ok("0") | Ok("false") | Ok("FALSE") | Ok("no") | Ok("NO") => false,
        _ => fallback,
    }
}
