// tests/http_fetcher.rs
//
// The real reqwest-backed fetcher against a loopback Axum upstream:
// status mapping, per-attempt timeout, and a full chain over real sockets.

use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;

use morning_briefing::error::AttemptError;
use morning_briefing::fetch::extract::extract;
use morning_briefing::fetch::types::Plausible;
use morning_briefing::fetch::{run_chain, FieldSpec, Fetcher, Format, HttpFetcher, Reading, SourceSpec};

/// Spawn a throwaway upstream on 127.0.0.1:0 and return its base URL.
async fn upstream() -> String {
    let app = Router::new()
        .route(
            "/vix.csv",
            get(|| async { "Date,Close\n2024-01-01,10\n2024-01-02,22.5\n" }),
        )
        .route(
            "/down",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "Date,Close\n2024-01-02,99\n"
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new("morning-briefing-tests").expect("client")
}

#[tokio::test]
async fn non_success_status_is_an_attempt_failure() {
    let base = upstream().await;
    let src = SourceSpec::new("Down", format!("{base}/down"), Format::Csv);
    assert_eq!(fetcher().fetch(&src).await, Err(AttemptError::Status(503)));
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let base = upstream().await;
    let src = SourceSpec::new("Slow", format!("{base}/slow"), Format::Csv).with_timeout_ms(150);
    assert_eq!(fetcher().fetch(&src).await, Err(AttemptError::Timeout(150)));
}

#[tokio::test]
async fn refused_connection_is_transport() {
    // Bind then drop to get a port nobody listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let src = SourceSpec::new("Gone", format!("http://{addr}/x"), Format::Csv);
    let err = fetcher().fetch(&src).await.unwrap_err();
    assert_eq!(err.reason(), "transport");
}

#[tokio::test]
async fn chain_over_real_sockets_prefers_first_healthy_source() {
    let base = upstream().await;
    let sources = vec![
        SourceSpec::new("A", format!("{base}/down"), Format::Csv).with_hint(&["close"]),
        SourceSpec::new("S", format!("{base}/slow"), Format::Csv)
            .with_hint(&["close"])
            .with_timeout_ms(200),
        SourceSpec::new("B", format!("{base}/vix.csv"), Format::Csv).with_hint(&["close"]),
    ];
    let field = FieldSpec::scalar("vix", Plausible::ANY, sources.clone());
    let f = fetcher();

    let run = run_chain(&f, &sources, |d, s| extract(d, &field, s)).await;

    let res = run.result().expect("B answers");
    assert_eq!(res.value, Reading::Scalar(22.5));
    assert_eq!(res.source_name, "B");
    let errors: Vec<_> = run.attempts.iter().map(|a| a.error.clone()).collect();
    assert_eq!(
        errors,
        vec![
            Some(AttemptError::Status(503)),
            Some(AttemptError::Timeout(200)),
            None
        ]
    );
}
