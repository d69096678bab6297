use crate::breaker::BreakerError;
use crate::utils::format_file_size;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The free-space check on the base temporary directory failed
    #[error(
        "Insufficient disk space: {} available, {} required",
        human_size(.available),
        human_size(.required)
    )]
    InsufficientDiskSpace { available: u64, required: u64 },

    /// Disk statistics query or directory creation failed
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The circuit breaker refused the call without attempting it
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// The call did not finish within the breaker timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

fn human_size(bytes: &u64) -> String {
    format_file_size(*bytes)
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_insufficient_disk_space(&self) -> bool {
        matches!(self, Error::InsufficientDiskSpace { .. })
    }
}

impl From<BreakerError<Error>> for Error {
    fn from(err: BreakerError<Error>) -> Self {
        match err {
            BreakerError::Open => Error::CircuitOpen,
            BreakerError::Timeout(after) => Error::Timeout(after),
            BreakerError::Inner(inner) => inner,
        }
    }
}
