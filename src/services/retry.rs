//! Retry and backoff primitives shared by the submission and polling phases.
//!
//! Delays are computed by [`RetryPolicy`] and waited out through a [`Clock`],
//! so the exact timing can be asserted in tests with [`ManualClock`].

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of time for retry loops.
pub trait Clock: Clone {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

/// Wall-clock time backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        tokio::time::sleep(duration)
    }
}

/// Virtual clock: `sleep` returns immediately and advances `now` instead.
///
/// Clones share the same timeline and sleep log.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Arc::new(Mutex::new(ManualClockState::default())),
        }
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualClockState> {
        // A poisoned lock only means a test thread panicked mid-update.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.lock().elapsed
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        {
            let mut state = self.lock();
            state.elapsed += duration;
            state.sleeps.push(duration);
        }
        std::future::ready(())
    }
}

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The request timed out.
    Timeout,
    /// The connection could not be established (refused, DNS, TLS).
    Connect,
    /// The server answered with an error status.
    Status(u16),
    /// Any other transport or body decoding failure.
    Network,
}

impl FaultKind {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Network
        }
    }

    /// Multiple of the base delay to wait after this fault.
    pub fn delay_factor(&self, escalated: bool) -> u32 {
        match (self, escalated) {
            (Self::Connect, false) => 2,
            (Self::Connect, true) => 12,
            (_, false) => 1,
            (_, true) => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Status(_) => "status",
            Self::Network => "network",
        }
    }
}

/// Bounds and base delay for one retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Hard cap on attempts for the loop.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Consecutive faults after which delays escalate; twice this abandons
    /// the loop. `None` disables both.
    pub escalation_threshold: Option<u32>,
}

impl RetryPolicy {
    /// Fixed delay, no escalation.
    pub fn fixed(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            escalation_threshold: None,
        }
    }

    pub fn escalating(max_attempts: u32, base_delay: Duration, threshold: u32) -> Self {
        Self {
            max_attempts,
            base_delay,
            escalation_threshold: Some(threshold.max(1)),
        }
    }

    pub fn is_escalated(&self, consecutive_errors: u32) -> bool {
        self.escalation_threshold
            .is_some_and(|threshold| consecutive_errors >= threshold)
    }

    pub fn should_abandon(&self, consecutive_errors: u32) -> bool {
        self.escalation_threshold
            .is_some_and(|threshold| consecutive_errors >= threshold.saturating_mul(2))
    }

    /// Delay to wait after `fault`, given the current error streak.
    pub fn delay_for(&self, fault: FaultKind, consecutive_errors: u32) -> Duration {
        let factor = fault.delay_factor(self.is_escalated(consecutive_errors));
        self.base_delay.saturating_mul(factor)
    }
}

/// Start of a moderation wait and the number of checks made during it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModerationWindow {
    pub started_at: Instant,
    pub checks: u32,
}

/// Mutable counters for one in-flight job. Never shared between jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub consecutive_errors: u32,
    pub moderation: Option<ModerationWindow>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether another attempt fits under `policy.max_attempts`.
    pub fn has_attempts_left(&self, policy: &RetryPolicy) -> bool {
        self.attempt < policy.max_attempts
    }

    pub fn advance(&mut self) {
        self.attempt += 1;
    }

    /// Any answer from the remote side clears the error streak.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn record_fault(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.consecutive_errors
    }

    /// Enter or continue the moderation window and count one check.
    pub fn record_moderation_check(&mut self, now: Instant) -> ModerationWindow {
        let window = self.moderation.get_or_insert(ModerationWindow {
            started_at: now,
            checks: 0,
        });
        window.checks += 1;
        *window
    }
}
