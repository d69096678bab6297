use serde::Serialize;
use std::fmt::Display;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Calls pass through
    Closed,
    /// Calls fail fast
    Open,
    /// One probe call may pass
    HalfOpen,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Closed => write!(f, "closed"),
            State::Open => write!(f, "open"),
            State::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Cumulative counters since the breaker was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    /// Calls admitted to run
    pub fires: u64,
    pub successes: u64,
    /// Failed calls, timeouts included
    pub failures: u64,
    pub timeouts: u64,
    /// Calls refused while open or while a probe was running
    pub rejects: u64,
}

/// Rolling-window totals at the time of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowStats {
    pub successes: u64,
    pub failures: u64,
    pub error_percentage: f64,
}

impl WindowStats {
    pub fn volume(&self) -> u64 {
        self.successes + self.failures
    }
}

/// Point-in-time view of a breaker, suitable for status output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: State,
    pub stats: BreakerStats,
    pub window: WindowStats,
}
