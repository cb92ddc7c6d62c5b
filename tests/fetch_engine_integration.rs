//! Integration tests for the fetch engine against a mock origin over real HTTP.

#![allow(clippy::unwrap_used)]

mod support;
use support::socket_guard::start_mock_server_or_skip;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use blobfetch_core::fetch::{
    EngineError, FetchConfig, FetchEngine, LogLevel, ProgressEvent, ProgressSink, ProgressStage,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config() -> FetchConfig {
    FetchConfig {
        backoff_base: Duration::from_millis(20),
        rate_limit_wait: Duration::from_millis(20),
        connect_timeout_secs: 5,
        read_timeout_secs: 5,
        ..FetchConfig::default()
    }
}

fn blob_url(server: &MockServer) -> impl Fn(&str) -> String + '_ {
    move |cid: &str| format!("{}/blob/{cid}", server.uri())
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
    cancel_on_resize: Option<CancellationToken>,
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(*event);
    }

    fn on_log(&self, level: LogLevel, message: &str) {
        if let Some(token) = &self.cancel_on_resize
            && message.starts_with("Concurrency ")
        {
            token.cancel();
        }
        self.logs.lock().unwrap().push((level, message.to_string()));
    }
}

// ==================== Success Path Tests ====================

#[tokio::test]
async fn test_fetches_blobs_in_input_order() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    for (cid, body) in [("bafyA", "alpha"), ("bafyB", "beta"), ("bafyC", "gamma")] {
        Mock::given(method("GET"))
            .and(path(format!("/blob/{cid}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body.as_bytes())
                    .insert_header("Content-Type", "image/png"),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let engine = FetchEngine::new(fast_config()).unwrap();
    let report = engine
        .run(["bafyC", "bafyA", "bafyB"], blob_url(&server), &CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<&str> = report
        .results()
        .iter()
        .map(|r| r.content_id.as_str())
        .collect();
    assert_eq!(ids, vec!["bafyC", "bafyA", "bafyB"]);
    assert_eq!(report.results()[0].payload(), Some(&b"gamma"[..]));
    assert_eq!(report.results()[1].content_type(), Some("image/png"));
    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.retried(), 0);
    assert!(report.quota().is_none());
}

#[tokio::test]
async fn test_progress_ends_with_finished_event() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".as_slice()))
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::default());
    let engine = FetchEngine::new(fast_config())
        .unwrap()
        .with_sink(Arc::clone(&sink) as Arc<dyn ProgressSink>);
    engine
        .run(["a", "b", "c", "d"], blob_url(&server), &CancellationToken::new())
        .await
        .unwrap();

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 5);
    let last = events.last().unwrap();
    assert_eq!(last.stage, ProgressStage::Finished);
    assert_eq!(last.completed, 4);
    assert_eq!(last.total, 4);
}

// ==================== Failure Handling Tests ====================

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/blob/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let engine = FetchEngine::new(fast_config()).unwrap();
    let report = engine
        .run(["gone"], blob_url(&server), &CancellationToken::new())
        .await
        .unwrap();

    let result = &report.results()[0];
    assert!(result.is_failure());
    assert_eq!(result.attempts, 1);
    assert!(result.error().unwrap().contains("not found"));
    assert_eq!(report.retried(), 0);
}

#[tokio::test]
async fn test_server_errors_exhaust_attempts() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/blob/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let engine = FetchEngine::new(fast_config()).unwrap();
    let report = engine
        .run(["flaky"], blob_url(&server), &CancellationToken::new())
        .await
        .unwrap();

    let result = &report.results()[0];
    assert!(result.is_failure());
    assert_eq!(result.attempts, 3);
    assert!(result.error().unwrap().contains("503"));
    assert_eq!(report.retried(), 2);
}

#[tokio::test]
async fn test_rate_limited_response_honors_retry_after() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/blob/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/busy"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".as_slice()))
        .mount(&server)
        .await;

    let engine = FetchEngine::new(fast_config()).unwrap();
    let started = Instant::now();
    let report = engine
        .run(["busy"], blob_url(&server), &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    let result = &report.results()[0];
    assert!(result.is_success());
    assert_eq!(result.attempts, 2);
    assert_eq!(report.retried(), 1);
}

#[tokio::test]
async fn test_one_failure_does_not_abort_the_run() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/blob/bad"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".as_slice()))
        .mount(&server)
        .await;

    let engine = FetchEngine::new(fast_config()).unwrap();
    let report = engine
        .run(["a", "bad", "b"], blob_url(&server), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.results()[1].is_failure());
}

// ==================== Adaptive Throttle Tests ====================

#[tokio::test]
async fn test_quota_headers_shrink_concurrency() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"ok".as_slice())
                .insert_header("RateLimit-Limit", "3000")
                .insert_header("RateLimit-Remaining", "40")
                .insert_header("RateLimit-Reset", "1760000000")
                .insert_header("RateLimit-Policy", "3000;w=300"),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let sink = Arc::new(RecordingSink {
        cancel_on_resize: Some(cancel.clone()),
        ..RecordingSink::default()
    });
    let config = FetchConfig {
        base_concurrency: 4,
        batch_size: 10,
        reevaluate_every: 10,
        ..fast_config()
    };
    let engine = FetchEngine::new(config)
        .unwrap()
        .with_sink(Arc::clone(&sink) as Arc<dyn ProgressSink>);

    let ids: Vec<String> = (0..30).map(|i| format!("cid{i}")).collect();
    let outcome = engine.run(ids, blob_url(&server), &cancel).await;

    let resize: Vec<String> = sink
        .logs
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, message)| message.starts_with("Concurrency "))
        .map(|(_, message)| message.clone())
        .collect();
    assert_eq!(resize.len(), 1, "{resize:?}");
    assert!(resize[0].starts_with("Concurrency 4 -> 1"));
    assert!(resize[0].contains("critical"));

    let Err(EngineError::Cancelled(report)) = outcome else {
        panic!("run should stop once cancelled");
    };
    let quota = report.quota().unwrap();
    assert_eq!(quota.remaining, 40);
    assert_eq!(quota.policy.as_deref(), Some("3000;w=300"));
    assert!(report.cancelled() > 0);
}

// ==================== Cancellation Tests ====================

#[tokio::test]
async fn test_cancel_mid_run_returns_partial_report() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".as_slice())
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    let config = FetchConfig {
        base_concurrency: 1,
        ..fast_config()
    };
    let engine = FetchEngine::new(config).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        trigger.cancel();
    });

    let ids: Vec<String> = (0..20).map(|i| format!("cid{i}")).collect();
    let Err(EngineError::Cancelled(report)) = engine.run(ids, blob_url(&server), &cancel).await
    else {
        panic!("run should be cancelled");
    };

    assert_eq!(report.len(), 20);
    assert!(report.was_cancelled());
    assert!(report.succeeded() >= 1);
    assert!(report.cancelled() >= 10);
    assert_eq!(report.succeeded() + report.cancelled(), 20);
    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() <= report.succeeded() + 1);
}
