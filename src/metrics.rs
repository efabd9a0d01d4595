use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("watch_cycles_total", "Completed polling cycles.");
        describe_counter!(
            "watch_listings_seen_total",
            "Listings returned by the source across all keywords."
        );
        describe_counter!(
            "watch_notifications_sent_total",
            "Listings delivered to the chat."
        );
        describe_counter!("watch_messages_sent_total", "Chat messages delivered.");
        describe_counter!(
            "watch_dispatch_failures_total",
            "Messages given up on (rejected or attempts exhausted)."
        );
        describe_counter!(
            "watch_rate_limited_total",
            "Rate-limit responses from the transport."
        );
        describe_counter!(
            "watch_source_errors_total",
            "Keyword searches that failed."
        );
        describe_counter!(
            "watch_store_flush_failures_total",
            "Failed seen-items snapshots."
        );
        describe_gauge!("watch_store_records", "Records in the seen-items store.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Recorder that is not installed globally; renders an empty exposition.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// `/metrics` in Prometheus exposition format plus a `/healthz` probe.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route(
                "/metrics",
                get(move || {
                    let h = handle.clone();
                    async move { h.render() }
                }),
            )
            .route("/healthz", get(|| async { "ok" }))
    }
}
