//! The admission API served on a real socket

use crate::common::{self, ScriptedWorkers};
use jobgate::config::ServerConfig;
use jobgate::dispatcher::{DispatchConfig, Dispatcher};
use jobgate::server::DispatchServer;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A server running in the background
struct TestServer {
    base: String,
    client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), jobgate::server::ServerError>>,
}

impl TestServer {
    async fn start(dispatcher: Arc<Dispatcher>) -> Self {
        let config = ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            enable_request_logging: false,
            shutdown_grace_secs: 1,
            ..ServerConfig::default()
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel::<()>();

        let server = DispatchServer::with_dispatcher(config, dispatcher);
        let handle = tokio::spawn(async move {
            server
                .serve_with_listener(listener, async {
                    let _ = rx.await;
                })
                .await
        });

        Self {
            base,
            client: reqwest::Client::new(),
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post_request(&self, n: usize) -> reqwest::Response {
        self.client
            .post(self.url("/new_request"))
            .json(&common::payload(n))
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server stops within timeout")
            .unwrap()
            .unwrap();
    }
}

async fn dispatcher_stats_unfinished(server: &TestServer) -> u64 {
    let (_, stats) = server.get_json("/api/stats").await;
    stats["data"]["in_flight"].as_u64().unwrap_or_default()
        + stats["data"]["queue_len"].as_u64().unwrap_or_default()
}

fn gated_dispatcher(n: usize, config: DispatchConfig) -> (Arc<ScriptedWorkers>, Arc<Dispatcher>) {
    let workers = ScriptedWorkers::gated();
    let dispatcher = common::dispatcher(n, workers.clone(), config);
    (workers, dispatcher)
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_new_request_acknowledges_before_completion() {
    let (workers, dispatcher) = gated_dispatcher(1, DispatchConfig::default());
    let server = TestServer::start(dispatcher).await;

    let first = server.post_request(1).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["disposition"], "dispatched");
    assert!(body["request_id"].is_string());

    let second = server.post_request(2).await;
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["disposition"], "queued");
    assert_eq!(body["queue_position"], 1);

    let third: Value = server.post_request(3).await.json().await.unwrap();
    assert_eq!(third["queue_position"], 2);

    // Only the dispatched request has reached a worker, and it has not answered
    common::eventually(|| workers.deliveries().len() == 1).await;
    assert_eq!(dispatcher_stats_unfinished(&server).await, 3);

    workers.release(3);
    server.stop().await;
    assert_eq!(workers.deliveries().len(), 3);
}

#[tokio::test]
async fn test_extra_fields_reach_the_worker() {
    let (workers, dispatcher) = gated_dispatcher(1, DispatchConfig::default());
    let mut outcomes = dispatcher.subscribe();
    let server = TestServer::start(dispatcher).await;

    let response = server
        .client
        .post(server.url("/new_request"))
        .json(&json!({"input_text": "hello", "temperature": 0.5}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    workers.release(1);
    let completed = common::collect_outcomes(&mut outcomes, 1).await;
    assert!(completed[0].outcome.is_success());
    assert_eq!(workers.deliveries()[0].input, "hello");

    server.stop().await;
}

#[tokio::test]
async fn test_missing_input_text_is_rejected() {
    let (workers, dispatcher) = gated_dispatcher(1, DispatchConfig::default());
    let server = TestServer::start(dispatcher).await;

    let response = server
        .client
        .post(server.url("/new_request"))
        .json(&json!({"prompt": "wrong field"}))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert!(workers.deliveries().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_full_queue_returns_503() {
    let config = DispatchConfig::builder().max_queue_len(1).build().unwrap();
    let (workers, dispatcher) = gated_dispatcher(1, config);
    let server = TestServer::start(dispatcher).await;

    assert_eq!(server.post_request(1).await.status(), StatusCode::ACCEPTED);
    assert_eq!(server.post_request(2).await.status(), StatusCode::ACCEPTED);

    let overflow = server.post_request(3).await;
    assert_eq!(overflow.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = overflow.json().await.unwrap();
    assert_eq!(body["success"], false);

    let (_, stats) = server.get_json("/api/stats").await;
    assert_eq!(stats["data"]["accepted"], 2);
    assert_eq!(stats["data"]["rejected"], 1);

    workers.release(2);
    server.stop().await;
}

// ============================================================================
// Status and Operator Controls
// ============================================================================

#[tokio::test]
async fn test_status_lists_every_worker() {
    let (workers, dispatcher) = gated_dispatcher(3, DispatchConfig::default());
    let server = TestServer::start(dispatcher).await;

    server.post_request(1).await;

    let (status, body) = server.get_json("/status").await;
    assert_eq!(status, StatusCode::OK);

    let pool = body.as_object().unwrap();
    assert_eq!(pool.len(), 3);
    assert_eq!(body["container1"]["status"], "busy");
    assert_eq!(body["container1"]["ip"], "127.0.0.1");
    assert_eq!(body["container1"]["port"], 8001);
    assert_eq!(body["container2"]["status"], "free");

    workers.release(1);
    server.stop().await;
}

#[tokio::test]
async fn test_disable_and_restore_worker() {
    let (workers, dispatcher) = gated_dispatcher(1, DispatchConfig::default());
    let server = TestServer::start(dispatcher).await;

    let disabled = server
        .client
        .post(server.url("/api/workers/container1/disable"))
        .send()
        .await
        .unwrap();
    assert_eq!(disabled.status(), StatusCode::OK);
    let body: Value = disabled.json().await.unwrap();
    assert_eq!(body["data"]["status"], "unhealthy");

    let queued: Value = server.post_request(1).await.json().await.unwrap();
    assert_eq!(queued["disposition"], "queued");

    let (ready, _) = server.get_json("/health/ready").await;
    assert_eq!(ready, StatusCode::SERVICE_UNAVAILABLE);

    let restored = server
        .client
        .post(server.url("/api/workers/container1/restore"))
        .send()
        .await
        .unwrap();
    assert_eq!(restored.status(), StatusCode::OK);
    let body: Value = restored.json().await.unwrap();
    assert_eq!(body["data"]["status"], "busy");
    common::eventually(|| workers.deliveries().len() == 1).await;

    workers.release(1);
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_worker_is_404() {
    let (_, dispatcher) = gated_dispatcher(1, DispatchConfig::default());
    let server = TestServer::start(dispatcher).await;

    let response = server
        .client
        .post(server.url("/api/workers/container9/restore"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

// ============================================================================
// Health and Metrics
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let (_, dispatcher) = gated_dispatcher(2, DispatchConfig::default());
    let server = TestServer::start(dispatcher).await;

    let (live, body) = server.get_json("/health/live").await;
    assert_eq!(live, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (ready, _) = server.get_json("/health/ready").await;
    assert_eq!(ready, StatusCode::OK);

    let (api, body) = server.get_json("/api/health").await;
    assert_eq!(api, StatusCode::OK);
    assert_eq!(body["success"], true);

    server.stop().await;
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text() {
    let (_, dispatcher) = gated_dispatcher(1, DispatchConfig::default());
    let server = TestServer::start(dispatcher).await;

    let response = server.client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    server.stop().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_waits_for_queued_work() {
    let workers = ScriptedWorkers::with_delay(Duration::from_millis(50));
    let dispatcher = common::dispatcher(1, workers.clone(), DispatchConfig::default());
    let server = TestServer::start(dispatcher.clone()).await;

    for i in 0..3 {
        assert_eq!(server.post_request(i).await.status(), StatusCode::ACCEPTED);
    }

    server.stop().await;

    assert_eq!(workers.deliveries().len(), 3);
    let stats = dispatcher.stats().await;
    assert_eq!(stats.unfinished(), 0);
    assert_eq!(stats.succeeded, 3);
}

#[tokio::test]
async fn test_shutdown_gives_up_after_grace() {
    let (workers, dispatcher) = gated_dispatcher(1, DispatchConfig::default());
    let server = TestServer::start(dispatcher.clone()).await;

    server.post_request(1).await;
    server.post_request(2).await;

    // Nothing is released; the grace period of one second runs out
    server.stop().await;

    let stats = dispatcher.stats().await;
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.queue_len, 1);

    workers.release(2);
}
