use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// The persisted cache unit. Written wholesale on every set, never patched.
///
/// The serialized field names (`value`, `expired`, `v`) are the on-disk
/// format of the file backend and must stay stable across implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Cached value
    pub value: Value,

    /// Absolute expiry time in ms since the Unix epoch, 0 = never
    #[serde(rename = "expired")]
    pub expires_at: i64,

    /// Cache version stamped at write time
    #[serde(rename = "v")]
    pub version: u64,
}

impl Envelope {
    /// Build an envelope expiring `ttl_secs` from now (0 = never).
    pub fn new(value: Value, ttl_secs: u64, version: u64) -> Self {
        let expires_at = if ttl_secs == 0 {
            0
        } else {
            now_ms() + ttl_secs as i64 * 1000
        };
        Self {
            value,
            expires_at,
            version,
        }
    }

    /// Time-based expiry only; version staleness is the cache core's call.
    pub fn is_expired(&self) -> bool {
        self.expires_at != 0 && self.expires_at < now_ms()
    }
}

/// Current wall clock in ms since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
