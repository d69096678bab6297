//! Create uniquely named temporary directories behind a circuit breaker.
//!
//! A persistently full or broken filesystem trips the breaker after a burst of
//! failures; further calls then fail fast with [`Error::CircuitOpen`] until a
//! cool-down passes and a single probe call succeeds.
//!
//! ```no_run
//! # async fn run() -> mkdtemp_breaker::Result<()> {
//! let creator = mkdtemp_breaker::TempDirCreator::new()?;
//! let dir = creator.create_temp_dir("download-", Some(512 * 1024 * 1024)).await?;
//! println!("working in {}", dir.display());
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod tempdir;
pub mod utils;

pub use breaker::{BreakerError, BreakerSnapshot, BreakerStats, CircuitBreaker, State};
pub use config::{AppConfig, BreakerConfig, TempDirConfig};
pub use error::{Error, Result};
pub use tempdir::TempDirCreator;
pub use utils::{DiskStats, available_space, disk_stats, init_logging, init_logging_in};
