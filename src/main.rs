//! Mercari watcher: binary entrypoint.
//! Loads configuration, wires source / dispatcher / store into the
//! orchestrator and runs the cycle loop until Ctrl-C or SIGTERM.

use anyhow::Context;
use chrono::Local;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mercari_watch::classify::Classifier;
use mercari_watch::config::{self, Settings, SourceSection};
use mercari_watch::dispatch::local::LogTransport;
use mercari_watch::dispatch::telegram::TelegramTransport;
use mercari_watch::dispatch::{Dispatcher, Transport};
use mercari_watch::fx;
use mercari_watch::metrics::Metrics;
use mercari_watch::orchestrator::{
    report_fatal, CycleSettings, Orchestrator, OrchestratorParts, SystemClock,
};
use mercari_watch::source::fixture::FixtureSessionFactory;
use mercari_watch::source::http::HttpSessionFactory;
use mercari_watch::source::SessionFactory;
use mercari_watch::store::SeenStore;
use mercari_watch::summary::DailySummary;

/// Compact logs by default; `LOG_FORMAT=json` for structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mercari_watch=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn build_transport(settings: &Settings) -> anyhow::Result<Arc<dyn Transport>> {
    if settings.dry_run {
        tracing::warn!("dry run: messages are logged, not sent");
        return Ok(Arc::new(LogTransport));
    }
    let creds = settings
        .telegram
        .clone()
        .context("telegram credentials missing outside dry run")?;
    Ok(Arc::new(TelegramTransport::new(creds.bot_token, creds.chat_id)))
}

fn build_session_factory(source: &SourceSection, usd_to_jpy: f64) -> Box<dyn SessionFactory> {
    match source {
        SourceSection::Http {
            endpoint,
            page_size,
            timeout_secs,
            user_agent,
        } => Box::new(HttpSessionFactory {
            endpoint: endpoint.clone(),
            page_size: *page_size,
            timeout: std::time::Duration::from_secs(*timeout_secs),
            user_agent: user_agent.clone(),
        }),
        SourceSection::Fixture { path } => Box::new(FixtureSessionFactory {
            path: path.clone(),
            usd_to_jpy,
        }),
    }
}

async fn start_metrics_server(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let metrics = Metrics::init()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    tracing::info!(%addr, "metrics endpoint listening");
    let app = metrics.router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });
    Ok(())
}

async fn wait_for_stop() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Credentials usually live in key.env; a regular .env works too.
    let _ = dotenvy::from_filename("key.env");
    let _ = dotenvy::dotenv();

    init_tracing();

    let settings = config::load_default().context("loading watcher configuration")?;
    tracing::info!(
        keywords = settings.keywords.len(),
        store = %settings.store_path.display(),
        summary_at = %settings.daily_summary_time,
        dry_run = settings.dry_run,
        "configuration loaded"
    );

    if let Some(addr) = settings.metrics_addr {
        start_metrics_server(addr).await?;
    }

    let dispatcher = Arc::new(Dispatcher::new(build_transport(&settings)?, settings.dispatch));

    let usd_to_jpy =
        fx::resolve_usd_to_jpy(settings.pricing.usd_to_jpy, &settings.pricing.fx_endpoint).await;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_stop().await;
        tracing::info!("stop signal received, finishing current step");
        let _ = stop_tx.send(true);
    });

    let parts = OrchestratorParts {
        keywords: settings.keywords.clone(),
        settings: CycleSettings::from(&settings),
        store: SeenStore::load(settings.store_path.clone()),
        classifier: Classifier::new(usd_to_jpy, settings.pricing.price_change),
        factory: build_session_factory(&settings.source, usd_to_jpy),
        dispatcher: dispatcher.clone(),
        summary: DailySummary::new(settings.daily_summary_time, Local::now().naive_local()),
        clock: Arc::new(SystemClock),
        stop: stop_rx,
    };

    let mut orchestrator = match Orchestrator::start(parts).await {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = ?e, "could not open a listing source session");
            report_fatal(&dispatcher, &e).await;
            return Err(e);
        }
    };

    orchestrator.run().await;
    orchestrator
        .shutdown()
        .await
        .context("saving seen items at shutdown")?;
    Ok(())
}
