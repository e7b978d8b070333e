/// Suggested number of concurrent media uploads
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 2;

/// Hard ceiling on concurrent media uploads, keeps foreground traffic alive
pub const MAX_UPLOAD_CONCURRENCY: usize = 3;

/// First retry delay of a failed delivery, in milliseconds
pub const DEFAULT_RETRY_BASE_MS: u64 = 2_000;

/// Upper bound of any delivery retry delay, in milliseconds
pub const DEFAULT_RETRY_MAX_MS: u64 = 60_000;

/// Delivery attempts before a message becomes `failedTerminal`
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Maximum fraction shaved off a retry delay to spread reconnect bursts
pub const DEFAULT_RETRY_JITTER: f64 = 0.25;

/// Delays between push token regeneration attempts, in milliseconds
pub const DEFAULT_TOKEN_RETRY_DELAYS_MS: [u64; 3] = [2_000, 5_000, 10_000];

/// Interval between periodic notification health checks (30 minutes)
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30 * 60;

/// Window during which messages from one sender are grouped
pub const DEFAULT_BUFFER_WINDOW_MS: u64 = 2_000;

/// Lifetime of an "immediate notification sent" dedup marker
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 120;

/// Default freshness of a cache snapshot (5 minutes)
pub const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

/// A validated push token younger than this is trusted without a probe (24 h)
pub const DEFAULT_TOKEN_REVALIDATE_SECS: u64 = 24 * 60 * 60;

/// Number of health reports kept in the persisted history
pub const HEALTH_HISTORY_LEN: usize = 50;

/// Android delivery channels that must exist for pushes to surface
pub const REQUIRED_CHANNELS: [&str; 2] = ["messages", "default"];

/// Manufacturers shipping aggressive background killers
pub const AGGRESSIVE_OEMS: [&str; 10] = [
    "xiaomi", "huawei", "honor", "oppo", "vivo", "realme", "oneplus", "samsung", "meizu", "asus",
];
