//! Fab Tracker — binary entrypoint.
//! Loads config, opens the state file and runs the reconciler once or on a schedule.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fab_tracker::config::TrackerConfig;
use fab_tracker::metrics::Metrics;
use fab_tracker::notify::discord::DiscordChannel;
use fab_tracker::scheduler::{cancel_on_shutdown_signal, Scheduler};
use fab_tracker::source::fab::FabListingSource;
use fab_tracker::{LifecycleReconciler, ListingStateStore};

/// Compact logs by default; `FAB_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fab_tracker=info,warn"));

    let json = std::env::var("FAB_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = TrackerConfig::load_default()?;
    tracing::info!(
        state_path = %cfg.state_path.display(),
        interval_secs = cfg.interval_secs,
        source = %cfg.source_url,
        "config loaded"
    );

    // Corrupt state is fatal: never start over with an empty store.
    let store = match ListingStateStore::open(&cfg.state_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "cannot load listing state, operator action required");
            return Err(e.into());
        }
    };

    let source = FabListingSource::from_url(
        cfg.source_url.clone(),
        cfg.section_prefix.clone(),
        cfg.call_timeout(),
    )
    .context("building listing source")?;
    let channel = DiscordChannel::new(&cfg.webhook_url, cfg.discord.clone())
        .context("building discord channel")?
        .with_timeout(cfg.discord_attempt_timeout());

    let cancel = CancellationToken::new();
    let mut reconciler = LifecycleReconciler::new(
        Arc::new(source),
        Arc::new(channel),
        store,
        cfg.reconciler_options(),
    )
    .with_cancellation(cancel.clone());

    // Installed before the first pass so a stop request during it lands
    // between listings and the finished ones are still committed.
    cancel_on_shutdown_signal(cancel.clone()).context("installing signal handlers")?;

    let Some(interval) = cfg.interval() else {
        let report = reconciler.run().await;
        cancel.cancel();
        let report = report?;
        tracing::info!(?report, "single pass finished");
        return Ok(());
    };

    let scheduler = Scheduler::new(reconciler, interval, cancel.clone());

    if let Some(addr) = cfg.metrics_addr.clone() {
        let metrics = Metrics::init()?;
        let app = metrics.router(scheduler.subscribe());
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding metrics endpoint on {addr}"))?;
        tracing::info!(%addr, "metrics endpoint listening");
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::warn!(error = %e, "metrics endpoint stopped");
            }
        });
    }

    let handle = scheduler.spawn();

    handle.await.context("scheduler task panicked")??;
    cancel.cancel();
    Ok(())
}
