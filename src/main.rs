use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod bucket;
mod config;
mod handlers;
mod middleware;
mod poller;
mod reconcile;
mod scheduler;
mod server;
mod store;

use aggregate::Accumulator;
use bucket::BucketClock;
use config::Config;
use store::SnapshotStore;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Loaded once at startup, never mutated.
    pub config: Arc<Config>,

    /// Fixed bucket width for this process.
    pub clock: BucketClock,

    /// Open-bucket aggregates. The poller writes, the scheduler drains,
    /// handlers peek.
    pub accumulator: Arc<Accumulator>,

    /// Finalized history on disk.
    pub store: Arc<SnapshotStore>,
}

#[derive(Debug, Parser)]
#[command(version, about = "HTTP(S) uptime and latency monitor")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(long)]
    bind: Option<String>,

    /// Override the shard directory from the config file
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Wait for a spawned task, logging a panic or cancellation instead of
/// dropping it. Returns whether the task ran to completion.
pub async fn join_logged(task: &str, handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(task, error = %e, "background task did not finish cleanly");
            false
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   📈  PINGBOARD — UPTIME & LATENCY MONITOR       ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── 1. Load configuration ────────────────────────────────────
    let mut config = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    let config = Arc::new(config);
    info!(
        services = config.services.len(),
        bucket = ?config.bucket,
        poll_interval_ms = config.poll_interval_ms,
        retention_days = config.retention_days,
        "configuration loaded"
    );

    // ── 2. Open storage ──────────────────────────────────────────
    let clock = BucketClock::new(config.bucket.width_ms());
    let store = Arc::new(
        SnapshotStore::open(&config.data_dir, clock)
            .await
            .context("opening snapshot store")?,
    );
    info!(dir = %store.dir().display(), "snapshot store ready");

    // ── 3. Build shared state ────────────────────────────────────
    let state = Arc::new(AppState {
        config: config.clone(),
        clock,
        accumulator: Arc::new(Accumulator::new(clock)),
        store: store.clone(),
    });
    let cancel = CancellationToken::new();

    // ── 4. Start the poller ──────────────────────────────────────
    let probe = Arc::new(poller::HttpProbe::new().context("building HTTP client")?);
    let poller_handle = tokio::spawn(poller::run(
        config.services.clone(),
        probe,
        state.accumulator.clone(),
        config.poll_interval(),
        cancel.clone(),
    ));

    // ── 5. Start the finalization scheduler ──────────────────────
    let finalizer = Arc::new(scheduler::Finalizer::new(
        state.accumulator.clone(),
        store,
        config.services.iter().map(|s| s.id.clone()).collect(),
        config.retention_days,
    ));
    let scheduler_handle = tokio::spawn(scheduler::run(
        clock,
        bucket::now_ms,
        move |completed| {
            let finalizer = finalizer.clone();
            async move { finalizer.finalize(completed, bucket::now_ms()).await }
        },
        cancel.clone(),
    ));

    // ── 6. Bind & serve ──────────────────────────────────────────
    let app = server::create_router(state, &config.static_dir);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind))?;

    println!("Server listening on http://{}", config.bind);
    println!("Health          → /health");
    println!("Live feed (SSE) → /health/stream");
    println!("History         → /snapshots?service_id=…&from_utc_ms=…&to_utc_ms=…");
    println!();

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
            shutdown.cancel();
        })
        .await;

    cancel.cancel();
    join_logged("poller", poller_handle).await;
    join_logged("scheduler", scheduler_handle).await;

    served.context("server exited with error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_reports_panicked_task() {
        assert!(join_logged("ok", tokio::spawn(async {})).await);

        let panicked = tokio::spawn(async { panic!("worker blew up") });
        assert!(!join_logged("boom", panicked).await);

        let aborted = tokio::spawn(std::future::pending::<()>());
        aborted.abort();
        assert!(!join_logged("aborted", aborted).await);
    }
}
