/// Default per-game daily play limits, as configured by the authority.
pub const DEFAULT_COIN_HUNT_DAILY_LIMIT: u32 = 5;
pub const DEFAULT_SPIN_WHEEL_DAILY_LIMIT: u32 = 3;
pub const DEFAULT_MEMORY_MATCH_DAILY_LIMIT: u32 = 5;

/// Round lengths (ms).
pub const COIN_HUNT_DURATION_MS: u64 = 30_000;
pub const SPIN_WHEEL_DURATION_MS: u64 = 15_000;
pub const MEMORY_MATCH_DURATION_MS: u64 = 60_000;

/// Extra time after `expires_at` during which a completion is still honoured.
pub const DEFAULT_EXPIRY_GRACE_MS: u64 = 10_000;

/// Metrics reporting an elapsed time above this multiple of the round length are rejected.
pub const MAX_ELAPSED_FACTOR: u64 = 2;

/// Milliseconds in a UTC day, used to bucket daily quotas.
pub const DAY_MS: u64 = 24 * 60 * 60 * 1_000;
