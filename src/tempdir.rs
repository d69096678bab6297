//! Breaker-guarded `mkdtemp`.
//!
//! Directories are created and handed over to the caller; nothing here removes
//! them. A call abandoned by the breaker timeout keeps running on the blocking
//! pool and may still create its directory, which is then logged as orphaned.

use crate::breaker::CircuitBreaker;
use crate::config::{AppConfig, TempDirConfig};
use crate::error::{Error, Result};
use crate::utils::{disk_stats, format_file_size};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const BREAKER_NAME: &str = "mkdtemp";

/// Creates uniquely named temporary directories through a shared circuit breaker
#[derive(Debug, Clone)]
pub struct TempDirCreator {
    breaker: Arc<CircuitBreaker>,
    base_dir: Option<PathBuf>,
}

impl TempDirCreator {
    /// Creator with the default breaker policy and the platform temp directory
    pub fn new() -> Result<Self> {
        Self::from_config(&AppConfig::default())
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let breaker = CircuitBreaker::new(BREAKER_NAME, config.breaker.clone())?;
        Ok(Self::with_breaker(Arc::new(breaker), &config.tempdir))
    }

    /// Creator sharing an existing breaker
    pub fn with_breaker(breaker: Arc<CircuitBreaker>, config: &TempDirConfig) -> Self {
        Self {
            breaker,
            base_dir: config.base_dir.clone(),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Directory new temp dirs are created in, resolved on every call
    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Create `<base>/<prefix><random>` and return its path.
    ///
    /// With `min_disk_space` set, fails with [`Error::InsufficientDiskSpace`]
    /// before creating anything when the base directory's filesystem has
    /// fewer free bytes than requested.
    pub async fn create_temp_dir(
        &self,
        prefix: &str,
        min_disk_space: Option<u64>,
    ) -> Result<PathBuf> {
        let base = self.base_dir();
        let prefix = prefix.to_string();
        self.breaker
            .call(|| {
                mkdtemp(
                    base,
                    prefix,
                    min_disk_space,
                    create_blocking,
                    Arc::default(),
                )
            })
            .await
            .map_err(Error::from)
    }
}

type CreateFn = fn(&Path, &str, Option<u64>) -> Result<PathBuf>;

/// Meeting point between a caller and its blocking task.
///
/// Whichever side arrives second reports the orphan, so a directory created
/// for a caller that already gave up is logged exactly once.
#[derive(Debug, Default)]
struct Handoff {
    abandoned: bool,
    created: Option<PathBuf>,
    orphaned: Option<PathBuf>,
}

impl Handoff {
    fn created(&mut self, path: &Path) {
        if self.abandoned {
            self.orphan(path.to_path_buf());
        } else {
            self.created = Some(path.to_path_buf());
        }
    }

    fn abandon(&mut self) {
        self.abandoned = true;
        if let Some(path) = self.created.take() {
            self.orphan(path);
        }
    }

    fn orphan(&mut self, path: PathBuf) {
        if self.orphaned.is_some() {
            return;
        }
        warn!(
            "Orphaned temporary directory {} created after its caller gave up",
            path.display()
        );
        self.orphaned = Some(path);
    }
}

fn lock_handoff(handoff: &Mutex<Handoff>) -> std::sync::MutexGuard<'_, Handoff> {
    handoff.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Abandons the handoff if the caller's future is dropped before the task returns
struct AbandonGuard {
    handoff: Arc<Mutex<Handoff>>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            lock_handoff(&self.handoff).abandon();
        }
    }
}

async fn mkdtemp(
    base: PathBuf,
    prefix: String,
    min_disk_space: Option<u64>,
    create: CreateFn,
    handoff: Arc<Mutex<Handoff>>,
) -> Result<PathBuf> {
    let mut guard = AbandonGuard {
        handoff: handoff.clone(),
        armed: true,
    };

    let task = tokio::task::spawn_blocking(move || {
        let result = create(&base, &prefix, min_disk_space);
        if let Ok(path) = &result {
            lock_handoff(&handoff).created(path);
        }
        result
    });

    let result = task.await.map_err(io::Error::other)?;
    guard.armed = false;
    result
}

fn create_blocking(base: &Path, prefix: &str, min_disk_space: Option<u64>) -> Result<PathBuf> {
    if let Some(required) = min_disk_space {
        let available = disk_stats(base)?.available_bytes();
        debug!(
            "Free space in {}: {} (need {})",
            base.display(),
            format_file_size(available),
            format_file_size(required)
        );
        if available < required {
            return Err(Error::InsufficientDiskSpace {
                available,
                required,
            });
        }
    }

    let path = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(base)?
        .keep();
    debug!("Created temporary directory {}", path.display());
    Ok(path)
}
