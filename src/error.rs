use thiserror::Error;

use crate::counter::{MAX_WINDOW_SECONDS, MIN_WINDOW_SECONDS};

/// Failures raised by the breaker machinery itself.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum BreakerError {
    #[error(
        "window of {0} seconds out of bounds, should be between {min} and {max} seconds",
        min = MIN_WINDOW_SECONDS,
        max = MAX_WINDOW_SECONDS
    )]
    InvalidWindow(u32),
    #[error("error percentage threshold {0} is not a finite number")]
    InvalidThreshold(f64),
    /// The counter actor needs a tokio runtime to be spawned on.
    #[error("no tokio runtime available to run the health counter")]
    NoRuntime,
    /// The health counter actor is gone; calling after `shutdown()` is a bug.
    #[error("health counter has been shut down")]
    CounterShutdown,
}

/// Result of [`Breaker::call`](crate::Breaker::call).
///
/// `Operation` carries the wrapped operation's error exactly as it was returned.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("circuit breaker is open")]
    OpenCircuit,
    #[error(transparent)]
    Breaker(#[from] BreakerError),
    #[error("{0}")]
    Operation(E),
}

impl<E> CallError<E> {
    pub fn is_open_circuit(&self) -> bool {
        matches!(self, CallError::OpenCircuit)
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CallError::Operation(e) => Some(e),
            _ => None,
        }
    }
}
