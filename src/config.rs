use serde::{Deserialize, Serialize};

/// Cache behavior options. Loading these from a file or environment is the
/// caller's business; the crate only consumes plain values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL in seconds applied when a write passes no explicit timeout.
    /// An explicit 0 means "never expires"; this default is only a fallback.
    pub default_ttl_secs: u64,

    /// Cron expression driving background garbage collection,
    /// `None` disables the scheduled job entirely.
    pub gc_schedule: Option<String>,

    /// Number of scheduled runs one full gc sweep is sliced across (>= 1).
    /// 1 means every run sweeps all shards.
    pub gc_complete_times: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            gc_schedule: None,
            gc_complete_times: 1,
        }
    }
}
