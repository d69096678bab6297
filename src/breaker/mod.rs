//! Circuit breaker around async operations.
//!
//! ```text
//! Closed   -> Open:     after a failure, window volume >= volume_threshold
//!                       and failure percentage >= error_threshold_percentage
//! Open     -> HalfOpen: reset timeout elapsed (checked on the next call)
//! HalfOpen -> Closed:   probe succeeds
//! HalfOpen -> Open:     probe fails or times out
//! ```
//!
//! Only one probe runs while half-open; other callers are rejected until it
//! resolves. Timed-out calls are abandoned, not cancelled: whatever the
//! wrapped future handed off to another thread keeps running.

pub mod state;
pub mod window;

pub use state::{BreakerSnapshot, BreakerStats, State, WindowStats};
pub use window::{Bucket, RollingWindow};

use crate::config::BreakerConfig;
use crate::error::Result;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Failure of a call routed through a [`CircuitBreaker`]
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected without running the operation
    #[error("Circuit breaker is open")]
    Open,
    /// The operation ran longer than the configured timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// The operation itself failed
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    /// Half-open probe, tagged with the epoch it was admitted in
    Probe(u64),
}

#[derive(Debug)]
struct Inner {
    state: State,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every state change so results from older probes are ignored
    epoch: u64,
    window: RollingWindow,
    stats: BreakerStats,
}

impl Inner {
    fn is_current_probe(&self, admission: Admission) -> bool {
        match admission {
            Admission::Probe(epoch) => self.state == State::HalfOpen && self.epoch == epoch,
            Admission::Normal => false,
        }
    }
}

/// Shared breaker state, safe to use from many tasks at once
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker with the given policy
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self> {
        config.validate()?;
        let window = RollingWindow::new(
            config.rolling_count_buckets as usize,
            config.bucket_duration(),
            Instant::now(),
        );
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                opened_at: None,
                probe_in_flight: false,
                epoch: 0,
                window,
                stats: BreakerStats::default(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Run `op` unless the breaker is open, recording its outcome
    pub async fn call<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let Some(admission) = self.admit() else {
            return Err(BreakerError::Open);
        };

        let mut probe = ProbeGuard {
            breaker: self,
            admission,
            armed: matches!(admission, Admission::Probe(_)),
        };
        let timeout = self.config.timeout();
        let outcome = tokio::time::timeout(timeout, op()).await;
        probe.armed = false;

        match outcome {
            Ok(Ok(value)) => {
                self.on_success(admission);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure(admission, false);
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                warn!("{}: call abandoned after {:?}", self.name, timeout);
                self.on_failure(admission, true);
                Err(BreakerError::Timeout(timeout))
            }
        }
    }

    /// Current state, moving Open to HalfOpen if the reset timeout has passed
    pub fn state(&self) -> State {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Counters accumulated since the breaker was created
    pub fn stats(&self) -> BreakerStats {
        self.lock().stats
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        let totals = inner.window.totals(now);
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            stats: inner.stats,
            window: WindowStats {
                successes: totals.successes,
                failures: totals.failures,
                error_percentage: totals.error_percentage(),
            },
        }
    }

    /// Force the breaker open, starting a fresh cool-down
    pub fn trip(&self) {
        let mut inner = self.lock();
        self.open(&mut inner, Instant::now());
    }

    /// Force the breaker closed and forget the rolling window
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.close(&mut inner, Instant::now());
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());

        match inner.state {
            State::Closed => {
                inner.stats.fires += 1;
                Some(Admission::Normal)
            }
            State::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                inner.stats.fires += 1;
                debug!("{}: admitting half-open probe", self.name);
                Some(Admission::Probe(inner.epoch))
            }
            State::HalfOpen | State::Open => {
                inner.stats.rejects += 1;
                debug!("{}: rejected call while {}", self.name, inner.state);
                None
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.stats.successes += 1;
        inner.window.record_success(now);

        if inner.is_current_probe(admission) {
            self.close(&mut inner, now);
        }
    }

    fn on_failure(&self, admission: Admission, timed_out: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.stats.failures += 1;
        if timed_out {
            inner.stats.timeouts += 1;
        }
        inner.window.record_failure(now);

        if inner.is_current_probe(admission) {
            self.open(&mut inner, now);
        } else if inner.state == State::Closed && self.should_trip(&mut inner, now) {
            // late results from calls admitted in an earlier state only count
            self.open(&mut inner, now);
        }
    }

    fn should_trip(&self, inner: &mut Inner, now: Instant) -> bool {
        let totals = inner.window.totals(now);
        let volume = totals.volume();
        volume >= u64::from(self.config.volume_threshold)
            && totals.failures * 100 >= u64::from(self.config.error_threshold_percentage) * volume
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state != State::Open {
            return;
        }
        let reset_timeout = self.config.reset_timeout();
        let due = inner
            .opened_at
            .is_none_or(|opened| now.saturating_duration_since(opened) >= reset_timeout);
        if due {
            inner.state = State::HalfOpen;
            inner.epoch += 1;
            inner.probe_in_flight = false;
            info!("{}: circuit half-open, next call probes", self.name);
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        let totals = inner.window.totals(now);
        inner.state = State::Open;
        inner.epoch += 1;
        inner.opened_at = Some(now);
        inner.probe_in_flight = false;
        warn!(
            "{}: circuit opened ({} failures of {} calls, {:.1}%)",
            self.name,
            totals.failures,
            totals.volume(),
            totals.error_percentage()
        );
    }

    fn close(&self, inner: &mut Inner, now: Instant) {
        let was = inner.state;
        inner.state = State::Closed;
        inner.epoch += 1;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.window.clear(now);
        if was != State::Closed {
            info!("{}: circuit closed", self.name);
        }
    }
}

/// Frees the half-open probe slot if the probing future is dropped early
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.lock();
            if !inner.is_current_probe(self.admission) {
                return;
            }
            inner.probe_in_flight = false;
            debug!("{}: probe dropped before completing", self.breaker.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", BreakerConfig::default()).unwrap()
    }

    async fn fail(cb: &CircuitBreaker) -> std::result::Result<(), BreakerError<&'static str>> {
        cb.call(|| async { Err("boom") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> std::result::Result<(), BreakerError<&'static str>> {
        cb.call(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_volume_of_failures() {
        let cb = breaker();
        for _ in 0..9 {
            assert!(matches!(fail(&cb).await, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(cb.state(), State::Closed);

        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), State::Open);

        let attempts = AtomicUsize::new(0);
        let result = cb
            .call(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        let stats = cb.stats();
        assert_eq!(stats.fires, 10);
        assert_eq!(stats.failures, 10);
        assert_eq!(stats.rejects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_is_inclusive() {
        let cb = breaker();
        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        for _ in 0..7 {
            fail(&cb).await.unwrap_err();
        }
        assert_eq!(cb.state(), State::Closed);

        // 8 of 10 is exactly 80%
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_below_threshold() {
        let cb = breaker();
        for _ in 0..3 {
            succeed(&cb).await.unwrap();
        }
        for _ in 0..8 {
            fail(&cb).await.unwrap_err();
        }
        // 8 of 11 is under 80%
        assert_eq!(cb.state(), State::Closed);
        succeed(&cb).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_count() {
        let cb = breaker();
        for _ in 0..9 {
            fail(&cb).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(120)).await;

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.snapshot().window.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_closes_on_success() {
        let cb = breaker();
        cb.trip();
        assert_eq!(cb.state(), State::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state(), State::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), State::HalfOpen);

        let probe_runs = AtomicUsize::new(0);
        let (probe, other) = tokio::join!(
            cb.call(|| async {
                probe_runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>("probed")
            }),
            async {
                tokio::task::yield_now().await;
                cb.call(|| async {
                    probe_runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, &str>("second")
                })
                .await
            }
        );

        assert_eq!(probe.unwrap(), "probed");
        assert!(matches!(other, Err(BreakerError::Open)));
        assert_eq!(probe_runs.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), State::Closed);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.snapshot().window.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let cb = breaker();
        cb.trip();
        tokio::time::advance(Duration::from_secs(30)).await;

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Open);
        assert!(matches!(succeed(&cb).await, Err(BreakerError::Open)));

        tokio::time::advance(Duration::from_secs(30)).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let config = BreakerConfig {
            timeout_ms: 100,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("slow", config).unwrap();

        let result = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(BreakerError::Timeout(d)) if d == Duration::from_millis(100)
        ));
        let stats = cb.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(cb.snapshot().window.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_can_trip() {
        let config = BreakerConfig {
            timeout_ms: 10,
            ..Default::default()
        };
        let cb = CircuitBreaker::new("slow", config).unwrap();
        for _ in 0..10 {
            let result = cb
                .call(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, &str>(())
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Timeout(_))));
        }
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let cb = breaker();
        cb.trip();
        tokio::time::advance(Duration::from_secs(30)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(1),
            cb.call(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, &str>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cb.state(), State::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_trial_failure_after_reset_is_a_plain_failure() {
        let cb = breaker();
        cb.trip();
        tokio::time::advance(Duration::from_secs(30)).await;

        let (trial, _) = tokio::join!(
            cb.call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Err::<(), _>("late")
            }),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cb.reset();
                assert_eq!(cb.state(), State::Closed);
            }
        );

        assert!(matches!(trial, Err(BreakerError::Inner("late"))));
        // one failure is below the volume threshold
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.snapshot().window.volume(), 1);
        succeed(&cb).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_trial_success_after_trip_keeps_breaker_open() {
        let cb = breaker();
        cb.trip();
        tokio::time::advance(Duration::from_secs(30)).await;

        let (trial, _) = tokio::join!(
            cb.call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>(())
            }),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cb.trip();
            }
        );

        assert!(trial.is_ok());
        assert_eq!(cb.state(), State::Open);
        assert!(matches!(succeed(&cb).await, Err(BreakerError::Open)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stale_trial_keeps_new_trial_slot() {
        let cb = breaker();
        cb.trip();
        tokio::time::advance(Duration::from_secs(30)).await;

        let old_trial = cb.call(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, &str>(())
        });
        let mut old_trial = Box::pin(old_trial);
        // poll once so the old call is admitted
        assert!(poll_once(old_trial.as_mut()).await.is_none());

        cb.trip();
        tokio::time::advance(Duration::from_secs(30)).await;

        let (new_trial, other) = tokio::join!(
            cb.call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>(())
            }),
            async {
                tokio::task::yield_now().await;
                drop(old_trial);
                succeed(&cb).await
            }
        );

        assert!(new_trial.is_ok());
        assert!(matches!(other, Err(BreakerError::Open)));
        assert_eq!(cb.state(), State::Closed);
    }

    async fn poll_once<F: Future + Unpin>(fut: F) -> Option<F::Output> {
        let mut fut = fut;
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut fut).poll(cx) {
                std::task::Poll::Ready(out) => Some(out),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_and_clears() {
        let cb = breaker();
        for _ in 0..10 {
            fail(&cb).await.unwrap_err();
        }
        assert_eq!(cb.state(), State::Open);

        cb.reset();
        assert_eq!(cb.state(), State::Closed);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.snapshot().window.volume(), 1);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let config = BreakerConfig {
            rolling_count_buckets: 0,
            ..Default::default()
        };
        assert!(CircuitBreaker::new("bad", config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_serializes() {
        let cb = breaker();
        succeed(&cb).await.unwrap();
        fail(&cb).await.unwrap_err();

        let json = serde_json::to_value(cb.snapshot()).unwrap();
        assert_eq!(json["name"], "test");
        assert_eq!(json["state"], "closed");
        assert_eq!(json["stats"]["fires"], 2);
        assert_eq!(json["window"]["error_percentage"], 50.0);
    }
}
