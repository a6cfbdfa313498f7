//! Dispatch properties under concurrent load
//!
//! Runs the dispatcher against scripted in-process workers and checks the
//! guarantees callers rely on: one job per worker, nothing lost, FIFO
//! assignment and prompt draining when capacity returns.

use crate::common::{self, ScriptedWorkers};
use futures::future::join_all;
use jobgate::dispatcher::{DispatchConfig, Disposition, WorkerStatus};
use jobgate::models::{DeliveryOutcome, TerminalOutcome, WorkerId};
use std::collections::HashSet;
use std::time::Duration;

fn config() -> DispatchConfig {
    DispatchConfig::builder()
        .delivery_timeout(Duration::from_secs(5))
        .max_retries_per_request(3)
        .worker_failure_threshold(3)
        .build()
        .unwrap()
}

// ============================================================================
// Mutual Exclusion and No Loss
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_worker_runs_two_jobs_at_once() {
    let workers = ScriptedWorkers::with_delay(Duration::from_millis(3));
    let dispatcher = common::dispatcher(4, workers.clone(), config());
    let mut outcomes = dispatcher.subscribe();

    let submitters = (0..20).map(|task| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..10 {
                let admission = dispatcher
                    .submit(common::payload(task * 10 + i))
                    .await
                    .unwrap();
                ids.push(admission.request_id);
            }
            ids
        })
    });

    let admitted: HashSet<_> = join_all(submitters)
        .await
        .into_iter()
        .flat_map(|ids| ids.unwrap())
        .collect();
    assert_eq!(admitted.len(), 200);

    let completed = common::collect_outcomes(&mut outcomes, 200).await;
    let finished: HashSet<_> = completed.iter().map(|c| c.request_id).collect();

    assert_eq!(finished, admitted);
    assert!(completed.iter().all(|c| c.outcome.is_success()));
    assert!(!workers.saw_overlap());
    assert_eq!(workers.deliveries().len(), 200);

    let stats = dispatcher.stats().await;
    assert_eq!(stats.registry.free, 4);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.queue_len, 0);
    assert_eq!(stats.succeeded, 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_failures_lose_nothing() {
    let workers = ScriptedWorkers::with_delay(Duration::from_millis(2));
    workers.script(
        "container1",
        vec![
            DeliveryOutcome::Timeout,
            DeliveryOutcome::Unreachable("connection reset".into()),
        ],
    );
    workers.script("container3", vec![DeliveryOutcome::Timeout]);

    let dispatcher = common::dispatcher(3, workers.clone(), config());
    let mut outcomes = dispatcher.subscribe();

    let admissions = join_all((0..50).map(|i| dispatcher.submit(common::payload(i)))).await;
    let admitted: HashSet<_> = admissions
        .into_iter()
        .map(|a| a.unwrap().request_id)
        .collect();

    let completed = common::collect_outcomes(&mut outcomes, 50).await;
    let finished: HashSet<_> = completed.iter().map(|c| c.request_id).collect();

    assert_eq!(finished, admitted);
    assert!(completed.iter().all(|c| c.outcome.is_success()));
    assert_eq!(workers.deliveries().len(), 53);

    let total_attempts: u32 = completed.iter().map(|c| c.attempts).sum();
    assert_eq!(total_attempts, 53);

    let stats = dispatcher.stats().await;
    assert_eq!(stats.retries, 3);
    assert_eq!(stats.registry.free, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_accounting_holds_under_load() {
    let workers = ScriptedWorkers::with_delay(Duration::from_millis(1));
    let dispatcher = common::dispatcher(5, workers, config());
    let mut outcomes = dispatcher.subscribe();

    let load = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            for i in 0..100 {
                dispatcher.submit(common::payload(i)).await.unwrap();
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    for _ in 0..50 {
        let stats = dispatcher.stats().await;
        let pool = &stats.registry;

        assert_eq!(pool.free + pool.busy + pool.unhealthy, pool.total_workers);
        assert_eq!(pool.busy, stats.in_flight);
        assert!(stats.queue_len == 0 || pool.free == 0);

        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    load.await.unwrap();
    common::collect_outcomes(&mut outcomes, 100).await;
}

// ============================================================================
// Ordering and Draining
// ============================================================================

#[tokio::test]
async fn test_single_worker_serves_in_arrival_order() {
    let workers = ScriptedWorkers::gated();
    let dispatcher = common::dispatcher(1, workers.clone(), config());
    let mut outcomes = dispatcher.subscribe();

    for i in 0..6 {
        let admission = dispatcher.submit(common::payload(i)).await.unwrap();
        let expected = if i == 0 {
            Disposition::Dispatched
        } else {
            Disposition::Queued
        };
        assert_eq!(admission.disposition, expected);
    }

    workers.release(6);
    let completed = common::collect_outcomes(&mut outcomes, 6).await;

    let order: Vec<_> = workers.deliveries().into_iter().map(|r| r.input).collect();
    let expected: Vec<_> = (0..6).map(|i| format!("Request number {i}")).collect();
    assert_eq!(order, expected);

    let seqs: Vec<_> = completed.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_each_completion_dispatches_one_queued_request() {
    let workers = ScriptedWorkers::gated();
    let dispatcher = common::dispatcher(3, workers.clone(), config());
    let mut outcomes = dispatcher.subscribe();

    let admissions: Vec<_> = join_all((0..5).map(|i| dispatcher.submit(common::payload(i))))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let dispatched = admissions
        .iter()
        .filter(|a| a.disposition == Disposition::Dispatched)
        .count();
    assert_eq!(dispatched, 3);
    assert_eq!(admissions.len() - dispatched, 2);

    let stats = dispatcher.stats().await;
    assert_eq!(stats.registry.busy, 3);
    assert_eq!(stats.queue_len, 2);

    workers.release(1);
    common::collect_outcomes(&mut outcomes, 1).await;
    common::eventually(|| workers.deliveries().len() == 4).await;

    let stats = dispatcher.stats().await;
    assert_eq!(stats.queue_len, 1);
    assert_eq!(stats.in_flight, 3);

    workers.release(1);
    common::collect_outcomes(&mut outcomes, 1).await;
    common::eventually(|| workers.deliveries().len() == 5).await;

    let stats = dispatcher.stats().await;
    assert_eq!(stats.queue_len, 0);
    assert_eq!(stats.in_flight, 3);

    workers.release(3);
    common::collect_outcomes(&mut outcomes, 3).await;
    assert_eq!(dispatcher.wait_idle(Duration::from_secs(1)).await, 0);
}

#[tokio::test]
async fn test_restored_worker_drains_backlog() {
    let workers = ScriptedWorkers::with_delay(Duration::from_millis(1));
    let dispatcher = common::dispatcher(2, workers.clone(), config());
    let mut outcomes = dispatcher.subscribe();

    for id in ["container1", "container2"] {
        dispatcher.mark_unhealthy(&WorkerId::new(id)).await.unwrap();
    }

    for i in 0..4 {
        let admission = dispatcher.submit(common::payload(i)).await.unwrap();
        assert_eq!(admission.disposition, Disposition::Queued);
    }
    assert!(workers.deliveries().is_empty());

    dispatcher
        .mark_healthy(&WorkerId::new("container2"))
        .await
        .unwrap();

    let completed = common::collect_outcomes(&mut outcomes, 4).await;
    assert!(completed.iter().all(|c| c.worker.as_str() == "container2"));
    assert_eq!(workers.deliveries_to("container1"), 0);
}

// ============================================================================
// Failure Isolation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_worker_is_isolated() {
    let workers = ScriptedWorkers::with_delay(Duration::from_millis(2));
    workers.break_worker(
        "container1",
        DeliveryOutcome::Unreachable("connection refused".into()),
    );

    let config = DispatchConfig::builder()
        .max_retries_per_request(5)
        .worker_failure_threshold(2)
        .build()
        .unwrap();
    let dispatcher = common::dispatcher(2, workers.clone(), config);
    let mut outcomes = dispatcher.subscribe();

    join_all((0..10).map(|i| dispatcher.submit(common::payload(i)))).await;
    let completed = common::collect_outcomes(&mut outcomes, 10).await;

    assert!(completed.iter().all(|c| c.outcome.is_success()));
    assert!(completed.iter().all(|c| c.worker.as_str() == "container2"));
    assert_eq!(workers.deliveries_to("container1"), 2);

    let snapshot = dispatcher.snapshot().await;
    assert_eq!(
        snapshot[&WorkerId::new("container1")].status,
        WorkerStatus::Unhealthy
    );
    assert_eq!(
        snapshot[&WorkerId::new("container2")].status,
        WorkerStatus::Free
    );
}

#[tokio::test]
async fn test_retry_budget_is_enforced() {
    let workers = ScriptedWorkers::with_delay(Duration::ZERO);
    workers.break_worker("container1", DeliveryOutcome::Timeout);

    let config = DispatchConfig::builder()
        .max_retries_per_request(2)
        .worker_failure_threshold(10)
        .build()
        .unwrap();
    let dispatcher = common::dispatcher(1, workers.clone(), config);
    let mut outcomes = dispatcher.subscribe();

    dispatcher.submit(common::payload(0)).await.unwrap();
    let completed = common::collect_outcomes(&mut outcomes, 1).await;

    assert_eq!(completed[0].attempts, 3);
    assert!(matches!(
        completed[0].outcome,
        TerminalOutcome::RetriesExhausted { .. }
    ));
    assert_eq!(workers.deliveries().len(), 3);
    assert_eq!(dispatcher.stats().await.exhausted, 1);
}

#[tokio::test]
async fn test_slow_worker_times_out_and_request_moves_on() {
    let workers = ScriptedWorkers::gated();

    let config = DispatchConfig::builder()
        .delivery_timeout(Duration::from_millis(50))
        .max_retries_per_request(1)
        .worker_failure_threshold(1)
        .build()
        .unwrap();
    let dispatcher = common::dispatcher(2, workers.clone(), config);
    let mut outcomes = dispatcher.subscribe();

    dispatcher.submit(common::payload(0)).await.unwrap();
    let completed = common::collect_outcomes(&mut outcomes, 1).await;

    // Both workers sat on the gate past the timeout
    assert_eq!(completed[0].attempts, 2);
    assert!(matches!(
        completed[0].outcome,
        TerminalOutcome::RetriesExhausted { .. }
    ));
    assert_eq!(workers.deliveries_to("container1"), 1);
    assert_eq!(workers.deliveries_to("container2"), 1);

    let stats = dispatcher.stats().await;
    assert_eq!(stats.registry.unhealthy, 2);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_timed_out_delivery_does_not_count_as_running() {
    let workers = ScriptedWorkers::gated();

    let config = DispatchConfig::builder()
        .delivery_timeout(Duration::from_millis(30))
        .max_retries_per_request(2)
        .worker_failure_threshold(10)
        .build()
        .unwrap();
    let dispatcher = common::dispatcher(1, workers.clone(), config);
    let mut outcomes = dispatcher.subscribe();

    dispatcher.submit(common::payload(0)).await.unwrap();
    let completed = common::collect_outcomes(&mut outcomes, 1).await;

    // The only worker got every attempt, each one abandoned at the timeout
    assert_eq!(completed[0].attempts, 3);
    assert_eq!(workers.deliveries_to("container1"), 3);
    assert!(!workers.saw_overlap());
}
