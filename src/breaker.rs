//! Two-state circuit breaker.
//!
//! # States
//! - Closed: calls pass through and their outcomes are counted
//! - Open: calls are rejected without running the operation
//!
//! # Transitions
//! ```text
//! Closed -> Open:   total >= minimum_request_volume AND error% >= threshold
//! Open   -> Closed: the same test fails (errors aged out, or volume dropped)
//! ```
//! The state lives in one atomic byte and only changes by compare-and-swap.
//! The counter is never locked together with it, so the state may trail the
//! newest outcome until the next evaluation.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::counter::{HealthSummary, Outcome, RollingHealthCounter};
use crate::error::{BreakerError, CallError};
use crate::options::Options;

/// Lagging subscribers lose the oldest transitions past this many.
const EVENT_CAPACITY: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
        }
    }

    fn from_u8(v: u8) -> Self {
        if v == BreakerState::Open as u8 {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State the breaker should be in for a given summary.
pub fn target_state(options: &Options, summary: &HealthSummary) -> BreakerState {
    if summary.total >= options.minimum_request_volume
        && summary.error_percentage >= options.error_percentage_threshold
    {
        BreakerState::Open
    } else {
        BreakerState::Closed
    }
}

struct Shared {
    options: Options,
    counter: RollingHealthCounter,
    state: AtomicU8,
    evaluation_pending: AtomicBool,
    events: broadcast::Sender<BreakerState>,
}

impl Shared {
    fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    async fn evaluate(&self) -> Result<BreakerState, BreakerError> {
        // Snapshot before asking for counts: if another evaluator moves the
        // state meanwhile, our counts are older than its and the CAS must fail.
        let current = self.state();
        let summary = self.counter.summary().await?;
        let target = target_state(&self.options, &summary);
        if target == current {
            return Ok(current);
        }

        match self.state.compare_exchange(
            current as u8,
            target as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                match target {
                    BreakerState::Open => warn!(
                        error_rate = summary.error_percentage,
                        total = summary.total,
                        "circuit breaker opened"
                    ),
                    BreakerState::Closed => info!(
                        error_rate = summary.error_percentage,
                        total = summary.total,
                        "circuit breaker closed"
                    ),
                }
                // No receivers is fine; observers are optional.
                let _ = self.events.send(target);
                Ok(target)
            }
            Err(actual) => Ok(BreakerState::from_u8(actual)),
        }
    }
}

/// Circuit breaker handle. Clones share the same counter and state.
///
/// # Errors
/// `new` fails with [`BreakerError::InvalidWindow`] or
/// [`BreakerError::InvalidThreshold`] for bad options, and with
/// [`BreakerError::NoRuntime`] outside a tokio runtime.
#[derive(Clone)]
pub struct Breaker {
    shared: Arc<Shared>,
}

impl fmt::Debug for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("state", &self.current_state())
            .field("options", &self.shared.options)
            .finish()
    }
}

impl Breaker {
    pub fn new(options: Options) -> Result<Self, BreakerError> {
        options.validate()?;
        let counter = RollingHealthCounter::new(options.window_seconds)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        debug!(
            threshold = options.error_percentage_threshold,
            min_requests = options.minimum_request_volume,
            window_s = options.window_seconds,
            "circuit breaker created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                options,
                counter,
                state: AtomicU8::new(BreakerState::Closed as u8),
                evaluation_pending: AtomicBool::new(false),
                events,
            }),
        })
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// The outcome is handed to the counter and the state is re-evaluated in the
    /// background; the result is returned without waiting for either.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.shared.counter.is_shutdown() {
            return Err(CallError::Breaker(BreakerError::CounterShutdown));
        }

        if self.current_state() == BreakerState::Open
            && self.shared.evaluate().await? == BreakerState::Open
        {
            debug!("call rejected, circuit open");
            return Err(CallError::OpenCircuit);
        }

        let result = operation().await;
        let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failure };
        match self.shared.counter.record(outcome) {
            Ok(()) => self.schedule_evaluation(),
            Err(e) => error!(?outcome, "outcome lost: {}", e),
        }

        result.map_err(CallError::Operation)
    }

    /// Re-evaluate the state against the current health summary.
    pub async fn evaluate(&self) -> Result<BreakerState, BreakerError> {
        self.shared.evaluate().await
    }

    pub async fn health(&self) -> Result<HealthSummary, BreakerError> {
        self.shared.counter.summary().await
    }

    pub fn current_state(&self) -> BreakerState {
        self.shared.state()
    }

    pub fn options(&self) -> Options {
        self.shared.options
    }

    /// Stream of confirmed transitions. Best effort: poll `current_state` for
    /// the authoritative value.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerState> {
        self.shared.events.subscribe()
    }

    pub fn shutdown(&self) {
        debug!("circuit breaker shutting down");
        self.shared.counter.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.counter.is_shutdown()
    }

    // At most one evaluator is in flight. It clears the flag before querying,
    // so an outcome that found the flag set is still covered by that run.
    fn schedule_evaluation(&self) {
        if self.shared.evaluation_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.shared.evaluation_pending.store(false, Ordering::Release);
            debug!("no runtime for background evaluation, deferring to next admission");
            return;
        };
        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            shared.evaluation_pending.swap(false, Ordering::AcqRel);
            if let Err(e) = shared.evaluate().await {
                debug!("background evaluation skipped: {}", e);
            }
        });
    }
}
