use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Circuit breaker policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// A call running longer than this counts as a failure
    pub timeout_ms: u64,
    /// Failure percentage (0-100) in the rolling window that trips the breaker
    pub error_threshold_percentage: u8,
    /// How long the breaker stays open before allowing a probe
    pub reset_timeout_ms: u64,
    /// Length of the rolling statistics window
    pub rolling_count_timeout_ms: u64,
    /// Number of buckets the rolling window is divided into
    pub rolling_count_buckets: u32,
    /// Minimum calls in the window before the breaker can trip
    pub volume_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            error_threshold_percentage: 80,
            reset_timeout_ms: 30_000,
            rolling_count_timeout_ms: 120_000,
            rolling_count_buckets: 120,
            volume_threshold: 10,
        }
    }
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_count_timeout_ms)
    }

    /// Time span covered by one bucket of the rolling window
    pub fn bucket_duration(&self) -> Duration {
        let buckets = u64::from(self.rolling_count_buckets.max(1));
        Duration::from_millis(self.rolling_count_timeout_ms / buckets)
    }
}

/// Temporary directory settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempDirConfig {
    /// Create directories here instead of the platform temp directory
    pub base_dir: Option<PathBuf>,
}
