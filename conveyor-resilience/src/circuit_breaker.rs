//! Circuit breaker guarding a single named dependency.
//!
//! The breaker counts consecutive failures of the operations it wraps and
//! "opens" once a threshold is reached, rejecting calls until a cool-down has
//! elapsed.
//!
//! ## States
//!
//! - **Closed**: Normal operation, calls pass through and failures accumulate
//! - **Open**: Calls are rejected immediately without invoking the operation
//! - **Half-Open**: Exactly one trial call is let through; its outcome decides
//!   between closing and re-opening the circuit
//!
//! ## Example
//!
//! ```
//! use conveyor_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("billing-api")
//!         .failure_threshold(3)
//!         .half_open_after(Duration::from_secs(10)),
//! );
//!
//! let result: Result<u32, CircuitBreakerError<&str>> = breaker.exec(|| async { Ok(42) }).await;
//! assert_eq!(result.unwrap(), 42);
//! # }
//! ```

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is half-open, a single trial call is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the guarded dependency (for logging and registry lookups).
    pub name: String,
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Cool-down before an open circuit admits a trial call.
    pub half_open_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            half_open_after: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the cool-down before a trial call.
    pub fn half_open_after(mut self, cool_down: Duration) -> Self {
        self.half_open_after = cool_down;
        self
    }

    /// Same configuration under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Circuit breaker error.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The call was short-circuited; the operation was never invoked.
    Open {
        /// Name of the breaker that rejected the call.
        name: String,
    },
    /// The operation ran and failed with its own error.
    Execution(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether the call was rejected without running.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open { .. } => None,
            Self::Execution(e) => Some(e),
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { name } => write!(f, "Circuit '{}' is open", name),
            Self::Execution(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CircuitBreakerError<E> {}

/// Mutable breaker state, only touched under the lock.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker for a single named dependency.
///
/// Every call site sharing one dependency must go through the same instance
/// (usually an `Arc<CircuitBreaker>` handed out by a
/// [`BreakerRegistry`](crate::BreakerRegistry)), so failures from unrelated
/// callers trip the breaker for all of them.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            half_open_after = ?config.half_open_after,
            "Circuit breaker initialized"
        );

        Arc::new(Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An open circuit whose cool-down has elapsed is still
    /// reported as open until a call actually starts the trial.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// The operation's own error is handed back as
    /// [`CircuitBreakerError::Execution`] after the failure is recorded.
    pub async fn exec<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let admission = match self.admit() {
            Some(admission) => admission,
            None => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                debug!(name = %self.config.name, "Circuit breaker rejected call");
                return Err(CircuitBreakerError::Open {
                    name: self.config.name.clone(),
                });
            }
        };

        let mut trial = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let result = operation().await;
        trial.armed = false;

        match result {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(admission);
                Err(CircuitBreakerError::Execution(e))
            }
        }
    }

    /// Decide whether a call may run, moving open -> half-open when the
    /// cool-down has elapsed.
    fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|opened| opened.elapsed() >= self.config.half_open_after);
                if !cooled {
                    return None;
                }
                debug!(name = %self.config.name, "Circuit breaker transitioning to HALF-OPEN");
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                Some(Admission::Trial)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Admission::Trial)
                }
            }
        }
    }

    /// Only a closed circuit or the half-open trial may close the breaker.
    /// A call admitted while closed that finishes after the circuit opened
    /// is counted and otherwise ignored.
    fn record_success(&self, admission: Admission) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.failures = 0;
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                info!(name = %self.config.name, "Circuit breaker CLOSED");
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
            }
            (state, _) => {
                debug!(name = %self.config.name, %state, "Late success ignored");
            }
        }
    }

    fn record_failure(&self, admission: Admission) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        match (inner.state, admission) {
            (CircuitState::Closed, _) => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    warn!(
                        name = %self.config.name,
                        failures = inner.failures,
                        "Circuit breaker OPENED"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                warn!(name = %self.config.name, "Circuit breaker trial failed, re-OPENED");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
            }
            // Admitted while closed, finished after another call opened the
            // circuit.
            (state, _) => {
                debug!(name = %self.config.name, %state, "Late failure ignored");
            }
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        info!(name = %self.config.name, "Circuit breaker manually reset");
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: inner.state,
            consecutive_failures: inner.failures,
            open_for: inner.opened_at.map(|opened| opened.elapsed()),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Releases the half-open trial slot if the trial future is dropped before
/// it completes, so a cancelled trial cannot wedge the breaker.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Circuit breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted while closed.
    pub consecutive_failures: u32,
    /// How long the circuit has been open (or half-open).
    pub open_for: Option<Duration>,
    /// Total calls.
    pub total_requests: u64,
    /// Total successful calls.
    pub total_successes: u64,
    /// Total failed calls.
    pub total_failures: u64,
    /// Total short-circuited calls.
    pub total_rejections: u64,
}

impl CircuitBreakerStats {
    /// Calculate failure rate over executed calls (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        let executed = self.total_successes + self.total_failures;
        if executed == 0 {
            0.0
        } else {
            self.total_failures as f64 / executed as f64
        }
    }
}
