//! Rolling health counter.
//!
//! Outcomes land in a fixed ring of per-second buckets. The ring is owned by a
//! single tokio task; callers talk to it over channels, so the buckets are never
//! shared and never locked.
//!
//! Bucket selection ("leaky bucket"): window = 5, one request per second.
//! ```text
//! t=1 -> [1], t=2 -> [2], t=3 -> [3], t=4 -> [4], t=5 -> [0]
//! t=6 -> 6 % 5 = 1. Slot 1 was written at t=1, 5s ago: still inside the window, add to it.
//! t=8 after a quiet t=7 -> slot 3 last written at t=3, also 5s ago: add to it.
//! t=20 -> slot 0 last written at t=5, 15s ago: reset it first, then count.
//! ```
//! A slot holds "events that landed on second k mod N", so the window edge is
//! fuzzy by up to one bucket.

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BreakerError;

pub const MIN_WINDOW_SECONDS: u32 = 1;
pub const MAX_WINDOW_SECONDS: u32 = 60;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Point-in-time aggregate over the live buckets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct HealthSummary {
    pub failures: u64,
    pub successes: u64,
    pub total: u64,
    /// `100 * failures / total`, 0 when nothing was recorded.
    pub error_percentage: f64,
    pub last_failure: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
}

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    failures: u64,
    successes: u64,
    last_write: Option<SystemTime>,
}

impl Bucket {
    fn is_live(&self, now: SystemTime, window: Duration) -> bool {
        match self.last_write {
            Some(at) => elapsed(now, at) <= window,
            None => false,
        }
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.successes = 0;
    }
}

// A clock step backwards reads as zero elapsed.
fn elapsed(now: SystemTime, earlier: SystemTime) -> Duration {
    now.duration_since(earlier).unwrap_or_default()
}

fn later(current: Option<SystemTime>, candidate: SystemTime) -> Option<SystemTime> {
    match current {
        Some(c) if c >= candidate => Some(c),
        _ => Some(candidate),
    }
}

/// Bucket storage. Only ever touched from the actor task.
#[derive(Debug)]
pub(crate) struct HealthCounts {
    buckets: Vec<Bucket>,
    window: Duration,
    last_failure: Option<SystemTime>,
    last_success: Option<SystemTime>,
}

impl HealthCounts {
    pub(crate) fn new(window_seconds: u32) -> Result<Self, BreakerError> {
        if !(MIN_WINDOW_SECONDS..=MAX_WINDOW_SECONDS).contains(&window_seconds) {
            return Err(BreakerError::InvalidWindow(window_seconds));
        }
        Ok(Self {
            buckets: vec![Bucket::default(); window_seconds as usize],
            window: Duration::from_secs(u64::from(window_seconds)),
            last_failure: None,
            last_success: None,
        })
    }

    fn bucket_mut(&mut self, now: SystemTime) -> &mut Bucket {
        let secs = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let index = (secs % self.buckets.len() as u64) as usize;
        let window = self.window;
        let bucket = &mut self.buckets[index];
        if let Some(last) = bucket.last_write {
            if elapsed(now, last) > window {
                bucket.reset();
            }
        }
        bucket.last_write = later(bucket.last_write, now);
        bucket
    }

    pub(crate) fn record(&mut self, outcome: Outcome, now: SystemTime) {
        match outcome {
            Outcome::Success => {
                self.bucket_mut(now).successes += 1;
                self.last_success = later(self.last_success, now);
            }
            Outcome::Failure => {
                self.bucket_mut(now).failures += 1;
                self.last_failure = later(self.last_failure, now);
            }
        }
    }

    pub(crate) fn summary(&self, now: SystemTime) -> HealthSummary {
        let mut hs = HealthSummary::default();
        for bucket in self.buckets.iter().filter(|b| b.is_live(now, self.window)) {
            hs.successes += bucket.successes;
            hs.failures += bucket.failures;
        }
        hs.total = hs.successes + hs.failures;
        if hs.total > 0 {
            hs.error_percentage = hs.failures as f64 / hs.total as f64 * 100.0;
        }
        hs.last_failure = self.last_failure;
        hs.last_success = self.last_success;
        hs
    }
}

enum Command {
    Record { outcome: Outcome, at: SystemTime },
    Summary(oneshot::Sender<HealthSummary>),
}

/// Handle to the counter actor.
///
/// Recording is a non-blocking send; `summary` waits for the actor to answer.
///
/// # Errors
/// `new` returns [`BreakerError::NoRuntime`] when called outside a tokio runtime.
#[derive(Debug)]
pub struct RollingHealthCounter {
    tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    window: Duration,
}

impl RollingHealthCounter {
    pub fn new(window_seconds: u32) -> Result<Self, BreakerError> {
        let counts = HealthCounts::new(window_seconds)?;
        let runtime = Handle::try_current().map_err(|_| BreakerError::NoRuntime)?;
        let window = counts.window;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        runtime.spawn(run(counts, rx, cancel.clone()));
        debug!(window_s = window_seconds, "health counter started");
        Ok(Self { tx, cancel, window })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record_success(&self) -> Result<(), BreakerError> {
        self.record(Outcome::Success)
    }

    pub fn record_failure(&self) -> Result<(), BreakerError> {
        self.record(Outcome::Failure)
    }

    pub fn record(&self, outcome: Outcome) -> Result<(), BreakerError> {
        if self.cancel.is_cancelled() {
            return Err(BreakerError::CounterShutdown);
        }
        self.tx
            .send(Command::Record { outcome, at: SystemTime::now() })
            .map_err(|_| BreakerError::CounterShutdown)
    }

    pub async fn summary(&self) -> Result<HealthSummary, BreakerError> {
        if self.cancel.is_cancelled() {
            return Err(BreakerError::CounterShutdown);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Summary(reply_tx))
            .map_err(|_| BreakerError::CounterShutdown)?;
        // The actor drops queued replies when it stops, which ends this wait.
        reply_rx.await.map_err(|_| BreakerError::CounterShutdown)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn run(
    mut counts: HealthCounts,
    mut rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("health counter stopped");
                return;
            }
            cmd = rx.recv() => match cmd {
                Some(Command::Record { outcome, at }) => counts.record(outcome, at),
                Some(Command::Summary(reply)) => {
                    let _ = reply.send(counts.summary(SystemTime::now()));
                }
                None => {
                    debug!("health counter handle dropped");
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Multiple of every window used below, so `t0` always lands on slot 0.
    fn t0() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 - 1_700_000_000 % 3600)
    }

    fn at(secs: u64) -> SystemTime {
        t0() + Duration::from_secs(secs)
    }

    #[test]
    fn rejects_out_of_range_windows() {
        assert_eq!(HealthCounts::new(0).unwrap_err(), BreakerError::InvalidWindow(0));
        assert_eq!(HealthCounts::new(61).unwrap_err(), BreakerError::InvalidWindow(61));
        assert!(HealthCounts::new(1).is_ok());
        assert!(HealthCounts::new(60).is_ok());
    }

    #[test]
    fn empty_counter_reports_zero() {
        let hc = HealthCounts::new(10).unwrap();
        let hs = hc.summary(at(0));
        assert_eq!(hs.total, 0);
        assert_eq!(hs.error_percentage, 0.0);
        assert_eq!(hs.last_failure, None);
        assert_eq!(hs.last_success, None);
    }

    #[test]
    fn totals_within_window() {
        let mut hc = HealthCounts::new(10).unwrap();
        for i in 0..7u64 {
            hc.record(Outcome::Success, at(i));
        }
        for i in 0..3u64 {
            hc.record(Outcome::Failure, at(i + 4));
        }
        let hs = hc.summary(at(9));
        assert_eq!(hs.successes, 7);
        assert_eq!(hs.failures, 3);
        assert_eq!(hs.total, 10);
        assert!((hs.error_percentage - 30.0).abs() < 1e-9);
    }

    #[test]
    fn percentage_is_not_truncated() {
        let mut hc = HealthCounts::new(5).unwrap();
        hc.record(Outcome::Failure, at(0));
        hc.record(Outcome::Success, at(0));
        hc.record(Outcome::Success, at(0));
        let hs = hc.summary(at(0));
        assert!((hs.error_percentage - 100.0 / 3.0).abs() < 1e-9);
        assert!(hs.error_percentage > 0.0 && hs.error_percentage < 100.0);
    }

    #[test]
    fn failures_count_as_failures() {
        let mut hc = HealthCounts::new(5).unwrap();
        hc.record(Outcome::Failure, at(1));
        let hs = hc.summary(at(1));
        assert_eq!(hs.failures, 1);
        assert_eq!(hs.successes, 0);
        assert_eq!(hs.error_percentage, 100.0);
        assert_eq!(hs.last_failure, Some(at(1)));
    }

    #[test]
    fn buckets_age_out_of_the_window() {
        let mut hc = HealthCounts::new(5).unwrap();
        hc.record(Outcome::Failure, at(0));
        hc.record(Outcome::Success, at(2));
        assert_eq!(hc.summary(at(5)).total, 2);
        assert_eq!(hc.summary(at(6)).total, 1);
        assert_eq!(hc.summary(at(8)).total, 0);
        // timestamps survive aging out
        assert_eq!(hc.summary(at(8)).last_failure, Some(at(0)));
    }

    #[test]
    fn stale_slot_is_reset_on_reuse() {
        let mut hc = HealthCounts::new(5).unwrap();
        hc.record(Outcome::Failure, at(0));
        hc.record(Outcome::Failure, at(0));
        // same slot, 10s later
        hc.record(Outcome::Success, at(10));
        let hs = hc.summary(at(10));
        assert_eq!(hs.failures, 0);
        assert_eq!(hs.successes, 1);
    }

    #[test]
    fn slot_reused_inside_window_accumulates() {
        let mut hc = HealthCounts::new(5).unwrap();
        hc.record(Outcome::Failure, at(0));
        hc.record(Outcome::Failure, at(5));
        assert_eq!(hc.summary(at(5)).failures, 2);
    }

    #[test]
    fn last_seen_timestamps_never_move_back() {
        let mut hc = HealthCounts::new(10).unwrap();
        hc.record(Outcome::Success, at(3));
        hc.record(Outcome::Success, at(1));
        assert_eq!(hc.summary(at(3)).last_success, Some(at(3)));
    }

    #[tokio::test]
    async fn actor_serves_records_and_summaries() {
        let counter = RollingHealthCounter::new(10).unwrap();
        counter.record_success().unwrap();
        counter.record_failure().unwrap();
        counter.record(Outcome::Failure).unwrap();
        let hs = counter.summary().await.unwrap();
        assert_eq!(hs.total, 3);
        assert_eq!(hs.failures, 2);
        assert!(hs.last_success.is_some());
        counter.shutdown();
    }

    #[test]
    fn needs_a_runtime() {
        assert_eq!(RollingHealthCounter::new(10).unwrap_err(), BreakerError::NoRuntime);
    }

    #[tokio::test]
    async fn shutdown_fails_fast() {
        let counter = RollingHealthCounter::new(3).unwrap();
        counter.shutdown();
        counter.shutdown();
        assert!(counter.is_shutdown());
        assert_eq!(counter.record_success(), Err(BreakerError::CounterShutdown));
        assert_eq!(counter.summary().await, Err(BreakerError::CounterShutdown));
    }
}
