mod config;
mod error_reason;
mod relay;
mod state;
mod ui;

use anyhow::Result;
use axum::{routing::get, Router};
use config::Config;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use reqwest::Client;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

use relay::HttpState;
use state::AppState;
use ui::run_terminal_dashboard;

static DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(true)
        .compact()
        .init();

    // Load config
    let cfg_path = env::var("HG_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg_path = PathBuf::from(cfg_path);
    let cfg = Config::load_from_path(&cfg_path)?;
    info!("loaded config, guarding upstream {}", cfg.upstream.url);

    // State
    let app_state = AppState::new(cfg)?;
    let client = Client::builder()
        .pool_max_idle_per_host(32)
        .tcp_keepalive(Some(std::time::Duration::from_secs(30)))
        .build()?;

    let http_state = HttpState { app: app_state.clone(), client };

    // Config watcher
    {
        let app_state = app_state.clone();
        let cfg_path = cfg_path.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_config_and_apply(cfg_path, app_state).await {
                error!("config watcher error: {:?}", e);
            }
        });
    }

    // Terminal dashboard (enabled by default; set HG_TUI=0 to disable)
    let enable_tui = env::var("HG_TUI").ok().map(|v| v != "0").unwrap_or(true);
    if enable_tui {
        let app = app_state.clone();
        tokio::spawn(async move { run_terminal_dashboard(app).await; });
    }

    // HTTP server
    let (addr, router) = {
        let cfg = app_state.cfg.read().await;
        let addr: SocketAddr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port).parse()?;
        let router = Router::new()
            .route("/", get(relay::health).post(relay::relay))
            .route("/status", get(relay::status))
            .with_state(http_state);
        (addr, router)
    };

    info!("listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.breaker().await.shutdown();
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {:?}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn watch_config_and_apply(cfg_path: PathBuf, app: Arc<AppState>) -> Result<()> {
    use tokio::sync::mpsc;
    let (tx, mut rx) = mpsc::channel::<()>(8);

    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(ev) = res {
                match ev.kind {
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {
                        let _ = tx.try_send(());
                    }
                    _ => {}
                }
            }
        },
        notify::Config::default(),
    )?;

    let watch_dir = cfg_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;

    while rx.recv().await.is_some() {
        match Config::load_from_path(&cfg_path) {
            Ok(new_cfg) => {
                let old_opts = app.cfg.read().await.breaker;
                let new_opts = new_cfg.breaker;
                // swap config
                {
                    let mut cfg_guard = app.cfg.write().await;
                    *cfg_guard = new_cfg;
                }
                // breaker options are fixed per breaker; changes need a fresh one
                if new_opts != old_opts {
                    if let Err(e) = app.replace_breaker(new_opts).await {
                        error!("failed to rebuild breaker: {:?}", e);
                    }
                }
                info!("applied new config (hot reload)");
            }
            Err(e) => {
                error!("failed to reload config: {:?}", e);
            }
        }
    }
    Ok(())
}
