//! Circuit breaker over a rolling per-second health window.
//!
//! A [`Breaker`] sits in front of a fallible async operation. Outcomes are fed
//! to a [`RollingHealthCounter`] actor; once the error rate over the window
//! crosses the configured threshold (and enough requests were seen) the breaker
//! opens and rejects calls with [`CallError::OpenCircuit`] until the window
//! drains.
//!
//! ```no_run
//! use healthgate::{Breaker, CallError, Options};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = Breaker::new(Options::default())?;
//! let res: Result<u32, CallError<std::io::Error>> = breaker.call(|| async { Ok(7) }).await;
//! assert_eq!(res.ok(), Some(7));
//! breaker.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod counter;
pub mod error;
pub mod options;

pub use breaker::{Breaker, BreakerState};
pub use counter::{HealthSummary, Outcome, RollingHealthCounter};
pub use error::{BreakerError, CallError};
pub use options::Options;
