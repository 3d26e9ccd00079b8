use crate::config::Config;
use crate::error_reason::ErrorReason;
use healthgate::{Breaker, BreakerState, Options};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

pub struct AppState {
    pub cfg: Arc<RwLock<Config>>,
    pub breaker: Arc<RwLock<Breaker>>,

    // Global counters for the live dashboard
    pub total_calls: AtomicU64,    // incoming POST /
    pub rejected_calls: AtomicU64, // short-circuited while open
    pub upstream_errors: AtomicU64,
    pub transitions: AtomicU64,
    pub last_error: parking_lot::RwLock<ErrorReason>,
    pub last_transition: parking_lot::Mutex<Option<(BreakerState, Instant)>>,
}

impl AppState {
    pub fn new(cfg: Config) -> anyhow::Result<Arc<Self>> {
        let breaker = Breaker::new(cfg.breaker)?;
        let app = Arc::new(Self {
            cfg: Arc::new(RwLock::new(cfg)),
            breaker: Arc::new(RwLock::new(breaker.clone())),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            last_error: parking_lot::RwLock::new(ErrorReason::None),
            last_transition: parking_lot::Mutex::new(None),
        });
        spawn_transition_watcher(app.clone(), &breaker);
        Ok(app)
    }

    pub async fn breaker(&self) -> Breaker {
        self.breaker.read().await.clone()
    }

    /// Install a breaker built from `options` and shut the old one down.
    /// Counts start from zero.
    pub async fn replace_breaker(self: &Arc<Self>, options: Options) -> anyhow::Result<()> {
        let fresh = Breaker::new(options)?;
        spawn_transition_watcher(self.clone(), &fresh);
        let old = {
            let mut guard = self.breaker.write().await;
            std::mem::replace(&mut *guard, fresh)
        };
        old.shutdown();
        info!(
            threshold = options.error_percentage_threshold,
            min_requests = options.minimum_request_volume,
            window_s = options.window_seconds,
            "breaker replaced"
        );
        Ok(())
    }

    pub fn set_last_error(&self, reason: ErrorReason) {
        // Sticky: a later success does not clear it.
        *self.last_error.write() = reason;
    }

    pub fn last_error(&self) -> ErrorReason {
        *self.last_error.read()
    }

    pub fn record_transition(&self, state: BreakerState) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
        *self.last_transition.lock() = Some((state, Instant::now()));
    }
}

fn spawn_transition_watcher(app: Arc<AppState>, breaker: &Breaker) {
    let mut events = breaker.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(state) => app.record_transition(state),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("transition watcher lagged, {} events dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
