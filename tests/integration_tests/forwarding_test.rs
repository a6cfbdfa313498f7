//! HTTP forwarding against mock workers

use crate::common;
use jobgate::dispatcher::{Deliver, DispatchConfig, Dispatcher, HttpForwarder};
use jobgate::models::{
    DeliveryOutcome, TerminalOutcome, WorkerAddress, WorkerEndpoint, WorkerId,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint_for(id: &str, server: &MockServer) -> WorkerEndpoint {
    let addr = server.address();
    WorkerEndpoint {
        id: WorkerId::new(id),
        ip: addr.ip().to_string(),
        port: addr.port(),
    }
}

fn address_for(id: &str, server: &MockServer) -> WorkerAddress {
    let addr = server.address();
    WorkerAddress::new(id, addr.ip().to_string(), addr.port())
}

// ============================================================================
// Outcome Classification
// ============================================================================

#[tokio::test]
async fn test_json_response_is_success() {
    let server = MockServer::start().await;
    let payload = json!({"input_text": "Request number 1"});

    Mock::given(method("POST"))
        .and(path("/run_model"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "done"})))
        .expect(1)
        .mount(&server)
        .await;

    let forwarder = HttpForwarder::new(Duration::from_secs(5)).unwrap();
    let outcome = forwarder
        .deliver(&endpoint_for("container1", &server), &payload)
        .await;

    match outcome {
        DeliveryOutcome::Success(body) => assert_eq!(body["output"], "done"),
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_plain_text_response_is_kept_as_string() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/run_model"))
        .respond_with(ResponseTemplate::new(200).set_body_string("model finished"))
        .mount(&server)
        .await;

    let forwarder = HttpForwarder::new(Duration::from_secs(5)).unwrap();
    let outcome = forwarder
        .deliver(&endpoint_for("container1", &server), &json!({"input_text": "x"}))
        .await;

    assert!(matches!(
        outcome,
        DeliveryOutcome::Success(serde_json::Value::String(ref s)) if s == "model finished"
    ));
}

#[tokio::test]
async fn test_error_status_is_remote_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/run_model"))
        .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
        .mount(&server)
        .await;

    let forwarder = HttpForwarder::new(Duration::from_secs(5)).unwrap();
    let outcome = forwarder
        .deliver(&endpoint_for("container1", &server), &json!({"input_text": "x"}))
        .await;

    match outcome {
        DeliveryOutcome::RemoteError { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "out of memory");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_only_200_counts_as_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/run_model"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let forwarder = HttpForwarder::new(Duration::from_secs(5)).unwrap();
    let outcome = forwarder
        .deliver(&endpoint_for("container1", &server), &json!({"input_text": "x"}))
        .await;

    assert!(matches!(
        outcome,
        DeliveryOutcome::RemoteError { status: 204, .. }
    ));
}

#[tokio::test]
async fn test_slow_worker_is_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/run_model"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let forwarder = HttpForwarder::new(Duration::from_millis(200)).unwrap();
    let outcome = forwarder
        .deliver(&endpoint_for("container1", &server), &json!({"input_text": "x"}))
        .await;

    assert!(matches!(outcome, DeliveryOutcome::Timeout));
}

#[tokio::test]
async fn test_probe_reaches_listening_worker() {
    let server = MockServer::start().await;
    let forwarder = HttpForwarder::new(Duration::from_secs(1)).unwrap();

    assert!(forwarder.probe(&endpoint_for("container1", &server)).await);
}

// ============================================================================
// Dispatcher over HTTP
// ============================================================================

#[tokio::test]
async fn test_dispatcher_delivers_over_http() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    for server in [&first, &second] {
        Mock::given(method("POST"))
            .and(path("/run_model"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"output": "ok"}))
                    .set_delay(Duration::from_millis(20)),
            )
            .mount(server)
            .await;
    }

    let dispatcher = Dispatcher::with_http(
        vec![address_for("container1", &first), address_for("container2", &second)],
        DispatchConfig::default(),
    )
    .unwrap();
    let mut outcomes = dispatcher.subscribe();

    for i in 0..6 {
        dispatcher.submit(common::payload(i)).await.unwrap();
    }

    let completed = common::collect_outcomes(&mut outcomes, 6).await;
    assert!(completed.iter().all(|c| c.outcome.is_success()));

    let first_hits = first.received_requests().await.unwrap_or_default().len();
    let second_hits = second.received_requests().await.unwrap_or_default().len();
    assert_eq!(first_hits + second_hits, 6);
    assert!(first_hits > 0 && second_hits > 0);
}

#[tokio::test]
async fn test_remote_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/run_model"))
        .respond_with(ResponseTemplate::new(500).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::with_http(
        vec![address_for("container1", &server)],
        DispatchConfig::default(),
    )
    .unwrap();
    let mut outcomes = dispatcher.subscribe();

    dispatcher.submit(common::payload(0)).await.unwrap();
    let completed = common::collect_outcomes(&mut outcomes, 1).await;

    assert_eq!(completed[0].attempts, 1);
    assert!(matches!(
        completed[0].outcome,
        TerminalOutcome::RemoteError { status: 500, .. }
    ));

    // A bad request says nothing about the worker
    let stats = dispatcher.stats().await;
    assert_eq!(stats.registry.free, 1);
    assert_eq!(stats.retries, 0);
}

#[tokio::test]
async fn test_timed_out_request_retries_on_other_worker() {
    let slow = MockServer::start().await;
    let fast = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/run_model"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&slow)
        .await;
    Mock::given(method("POST"))
        .and(path("/run_model"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": "fast"})))
        .mount(&fast)
        .await;

    let config = DispatchConfig::builder()
        .delivery_timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let dispatcher = Dispatcher::with_http(
        vec![address_for("container1", &slow), address_for("container2", &fast)],
        config,
    )
    .unwrap();
    let mut outcomes = dispatcher.subscribe();

    let admission = dispatcher.submit(common::payload(0)).await.unwrap();
    assert_eq!(admission.worker, Some(WorkerId::new("container1")));

    let completed = common::collect_outcomes(&mut outcomes, 1).await;
    assert_eq!(completed[0].attempts, 2);
    assert_eq!(completed[0].worker, WorkerId::new("container2"));
    assert!(completed[0].outcome.is_success());
}
