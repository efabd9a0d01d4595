// tests/metrics.rs
use axum::body::{self, Body};
use axum::Router;
use http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

use mercari_watch::dispatch::local::ScriptedTransport;
use mercari_watch::dispatch::{DispatchPolicy, Dispatcher, SendOutcome};
use mercari_watch::metrics::Metrics;

async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
    let resp = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn healthz_answers_ok() {
    let (status, text) = get_text(Metrics::detached().router(), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "ok");
}

// The only test in this binary that installs the global recorder.
#[tokio::test]
async fn metrics_endpoint_reports_dispatch_series() {
    let metrics = Metrics::init().expect("install recorder");

    let transport = Arc::new(ScriptedTransport::with_script([SendOutcome::RateLimited {
        retry_after: None,
    }]));
    let policy = DispatchPolicy {
        min_interval: std::time::Duration::from_millis(1),
        min_retry_delay: std::time::Duration::from_millis(1),
        ..DispatchPolicy::default()
    };
    Dispatcher::new(transport, policy)
        .dispatch("hello")
        .await
        .unwrap();

    let (status, text) = get_text(metrics.router(), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    for needle in ["watch_messages_sent_total", "watch_rate_limited_total"] {
        assert!(text.contains(needle), "missing {needle} in:\n{text}");
    }
}
