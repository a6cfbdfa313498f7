//! Dispatcher
//!
//! Binds the registry, the pending queue and the forwarding client. Every
//! state change happens inside one short critical section over
//! [`DispatchState`]; deliveries run in their own tasks outside of it.
//!
//! Each critical section ends with the queue empty or no worker free, which
//! is what keeps queued requests from being stranded when capacity returns.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::metrics;
use crate::models::{
    CompletedRequest, DeliveryOutcome, Request, TerminalOutcome, WorkerAddress, WorkerEndpoint,
    WorkerId,
};

use super::client::{Deliver, HttpForwarder};
use super::config::DispatchConfig;
use super::error::DispatchError;
use super::queue::PendingQueue;
use super::registry::{Release, RegistrySnapshot, RegistryStats, WorkerRegistry, WorkerStatus};

/// Poll period of [`Dispatcher::wait_idle`]
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Shared State
// ============================================================================

/// Everything guarded by the dispatcher lock
#[derive(Debug)]
struct DispatchState {
    registry: WorkerRegistry,
    queue: PendingQueue,

    /// Requests currently bound to a busy worker
    in_flight: usize,

    /// Next arrival sequence number
    next_seq: u64,
}

/// A request paired with the worker claimed for it
#[derive(Debug)]
struct Assignment {
    worker: WorkerEndpoint,
    request: Request,
}

impl DispatchState {
    /// Pair queued requests with free workers, oldest first
    fn drain(&mut self) -> Vec<Assignment> {
        let mut assignments = Vec::new();

        while self.registry.has_free() {
            let Some(request) = self.queue.dequeue_if_any() else {
                break;
            };

            match self
                .registry
                .try_set_busy_avoiding(request.last_worker.as_ref())
            {
                Some(worker) => {
                    self.in_flight += 1;
                    assignments.push(Assignment { worker, request });
                }
                None => {
                    self.queue.requeue_front(request);
                    break;
                }
            }
        }

        assignments
    }

    /// Hand a worker back, logging instead of failing on a bad transition
    fn release_worker(&mut self, id: &WorkerId, release: Release) -> Option<WorkerStatus> {
        match self.registry.release(id, release) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::error!(worker = %id, error = %e, "Worker release rejected");
                None
            }
        }
    }

    fn publish_metrics(&self) {
        metrics::update_pool_metrics(&self.registry.stats(), self.queue.len(), self.in_flight);
    }

    fn check_invariants(&self) {
        debug_assert!(
            self.queue.is_empty() || !self.registry.has_free(),
            "queued requests left behind a free worker"
        );
        debug_assert_eq!(self.registry.stats().busy, self.in_flight);
    }
}

// ============================================================================
// Admission
// ============================================================================

/// Where an accepted request went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Handed to a worker immediately
    Dispatched,

    /// Waiting for a worker
    Queued,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::Queued => "queued",
        }
    }
}

/// Acknowledgement of an accepted request
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub request_id: Uuid,
    pub seq: u64,
    pub disposition: Disposition,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,

    /// 1-based position in the pending queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    remote_errors: AtomicU64,
    exhausted: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub registry: RegistryStats,
    pub queue_len: usize,
    pub queue_capacity: Option<usize>,
    pub oldest_wait_ms: Option<i64>,
    pub in_flight: usize,
    pub accepted: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub remote_errors: u64,
    pub exhausted: u64,
    pub retries: u64,
}

impl DispatchStats {
    /// Requests accepted but not yet terminal
    pub fn unfinished(&self) -> usize {
        self.queue_len + self.in_flight
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Assigns requests to single-capacity workers and queues the overflow
pub struct Dispatcher {
    state: Mutex<DispatchState>,
    forwarder: Arc<dyn Deliver>,
    config: DispatchConfig,
    counters: Counters,
    completed: broadcast::Sender<CompletedRequest>,
}

impl Dispatcher {
    /// Create a dispatcher over a static worker pool
    pub fn new(
        workers: Vec<WorkerAddress>,
        forwarder: Arc<dyn Deliver>,
        config: DispatchConfig,
    ) -> Result<Arc<Self>, DispatchError> {
        config.validate()?;

        let registry = WorkerRegistry::new(workers)?;
        let (completed, _) = broadcast::channel(config.outcome_channel_capacity);

        let state = DispatchState {
            registry,
            queue: PendingQueue::new(config.max_queue_len),
            in_flight: 0,
            next_seq: 0,
        };
        state.publish_metrics();

        tracing::info!(
            workers = state.registry.len(),
            delivery_timeout_ms = config.delivery_timeout_ms,
            max_retries = config.max_retries_per_request,
            failure_threshold = config.worker_failure_threshold,
            "Dispatcher initialized"
        );

        Ok(Arc::new(Self {
            state: Mutex::new(state),
            forwarder,
            config,
            counters: Counters::default(),
            completed,
        }))
    }

    /// Create a dispatcher that reaches workers over HTTP
    pub fn with_http(
        workers: Vec<WorkerAddress>,
        config: DispatchConfig,
    ) -> Result<Arc<Self>, DispatchError> {
        let forwarder = HttpForwarder::new(config.delivery_timeout())?;
        Self::new(workers, Arc::new(forwarder), config)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Accept a request without waiting for a worker
    ///
    /// A new arrival only claims a worker when nothing is queued, so it never
    /// overtakes an older request.
    pub async fn submit(self: &Arc<Self>, payload: Value) -> Result<Admission, DispatchError> {
        let (admission, assignment) = {
            let mut state = self.state.lock().await;

            let seq = state.next_seq;
            let request = Request::new(seq, payload);
            let request_id = request.id;

            let claimed = if state.queue.is_empty() {
                state.registry.try_set_busy()
            } else {
                None
            };

            let result = match claimed {
                Some(worker) => {
                    state.in_flight += 1;
                    let admission = Admission {
                        request_id,
                        seq,
                        disposition: Disposition::Dispatched,
                        worker: Some(worker.id.clone()),
                        queue_position: None,
                    };
                    Ok((admission, Some(Assignment { worker, request })))
                }
                None => state.queue.enqueue(request).map(|position| {
                    let admission = Admission {
                        request_id,
                        seq,
                        disposition: Disposition::Queued,
                        worker: None,
                        queue_position: Some(position),
                    };
                    (admission, None)
                }),
            };

            if result.is_ok() {
                state.next_seq += 1;
            }
            state.check_invariants();
            state.publish_metrics();
            result
        }
        .map_err(|e| {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::record_rejected();
            tracing::warn!(error = %e, "Request rejected");
            DispatchError::from(e)
        })?;

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::record_accepted();

        tracing::info!(
            request_id = %admission.request_id,
            seq = admission.seq,
            disposition = admission.disposition.as_str(),
            worker = admission.worker.as_ref().map(WorkerId::as_str),
            queue_position = admission.queue_position,
            "Request accepted"
        );

        if let Some(assignment) = assignment {
            self.spawn_delivery(assignment);
        }

        Ok(admission)
    }

    /// Exclude a worker until restored
    pub async fn mark_unhealthy(&self, id: &WorkerId) -> Result<WorkerStatus, DispatchError> {
        let mut state = self.state.lock().await;
        let status = state.registry.mark_unhealthy(id)?;
        state.publish_metrics();

        tracing::warn!(worker = %id, status = status.as_str(), "Worker disabled");
        Ok(status)
    }

    /// Restore a worker and drain the queue onto it
    ///
    /// Returns `true` when the worker became free.
    pub async fn mark_healthy(self: &Arc<Self>, id: &WorkerId) -> Result<bool, DispatchError> {
        let (freed, assignments) = {
            let mut state = self.state.lock().await;
            let freed = state.registry.mark_healthy(id)?;
            let assignments = state.drain();
            state.check_invariants();
            state.publish_metrics();
            (freed, assignments)
        };

        tracing::info!(worker = %id, freed, drained = assignments.len(), "Worker restored");

        for assignment in assignments {
            self.spawn_delivery(assignment);
        }

        Ok(freed)
    }

    /// Probe workers excluded by failures and restore the reachable ones
    ///
    /// Returns the number of workers restored.
    pub async fn probe_unhealthy(self: &Arc<Self>) -> usize {
        let candidates = self.state.lock().await.registry.probe_candidates();
        let mut restored = 0;

        for endpoint in candidates {
            if !self.forwarder.probe(&endpoint).await {
                tracing::debug!(worker = %endpoint.id, "Worker still unreachable");
                continue;
            }

            let assignments = {
                let mut state = self.state.lock().await;

                // An operator may have acted while the probe was in flight
                let still_excluded = state
                    .registry
                    .get(&endpoint.id)
                    .map(|w| w.status == WorkerStatus::Unhealthy && !w.held)
                    .unwrap_or(false);
                if !still_excluded {
                    continue;
                }

                if let Err(e) = state.registry.mark_healthy(&endpoint.id) {
                    tracing::error!(worker = %endpoint.id, error = %e, "Failed to restore worker");
                    continue;
                }

                let assignments = state.drain();
                state.check_invariants();
                state.publish_metrics();
                assignments
            };

            restored += 1;
            tracing::info!(
                worker = %endpoint.id,
                drained = assignments.len(),
                "Worker reachable again, restored"
            );

            for assignment in assignments {
                self.spawn_delivery(assignment);
            }
        }

        restored
    }

    /// Read-only projection of the registry
    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.state.lock().await.registry.snapshot()
    }

    /// Current statistics
    pub async fn stats(&self) -> DispatchStats {
        let (registry, queue_len, queue_capacity, oldest_wait, in_flight) = {
            let state = self.state.lock().await;
            (
                state.registry.stats(),
                state.queue.len(),
                state.queue.capacity(),
                state.queue.oldest_wait(),
                state.in_flight,
            )
        };

        DispatchStats {
            registry,
            queue_len,
            queue_capacity,
            oldest_wait_ms: oldest_wait.map(|d| d.num_milliseconds()),
            in_flight,
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            remote_errors: self.counters.remote_errors.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to terminal outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<CompletedRequest> {
        self.completed.subscribe()
    }

    /// Wait until nothing is queued or in flight, or `grace` elapses
    ///
    /// Returns the number of requests still unfinished.
    pub async fn wait_idle(&self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            let unfinished = {
                let state = self.state.lock().await;
                state.queue.len() + state.in_flight
            };

            if unfinished == 0 || tokio::time::Instant::now() >= deadline {
                return unfinished;
            }

            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    // ------------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------------

    fn spawn_delivery(self: &Arc<Self>, assignment: Assignment) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.run_delivery(assignment).await;
        });
    }

    async fn run_delivery(self: Arc<Self>, assignment: Assignment) {
        let Assignment {
            worker,
            mut request,
        } = assignment;

        request.attempts += 1;
        request.last_worker = Some(worker.id.clone());

        tracing::debug!(
            request_id = %request.id,
            worker = %worker.id,
            attempt = request.attempts,
            "Delivering request"
        );

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.config.delivery_timeout(),
            self.forwarder.deliver(&worker, &request.payload),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::Timeout,
        };

        metrics::record_delivery(
            outcome.kind(),
            started.elapsed().as_secs_f64(),
            outcome.is_transient(),
        );

        self.complete(worker, request, outcome).await;
    }

    /// Apply a delivery outcome: release, retry or finish, then drain
    async fn complete(self: &Arc<Self>, worker: WorkerEndpoint, request: Request, outcome: DeliveryOutcome) {
        let threshold = self.config.worker_failure_threshold;

        let (finished, assignments) = {
            let mut state = self.state.lock().await;
            state.in_flight = state.in_flight.saturating_sub(1);

            let finished = match outcome {
                DeliveryOutcome::Success(response) => {
                    state.release_worker(&worker.id, Release::Recovered);
                    Some((request, TerminalOutcome::Succeeded { response }))
                }
                DeliveryOutcome::RemoteError { status, body } => {
                    state.release_worker(&worker.id, Release::Recovered);
                    Some((request, TerminalOutcome::RemoteError { status, body }))
                }
                transient => {
                    let status = state.release_worker(&worker.id, Release::Failed { threshold });
                    let error = DispatchError::from_delivery(
                        &worker.id,
                        &transient,
                        self.config.delivery_timeout(),
                    )
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| transient.to_string());

                    if status == Some(WorkerStatus::Unhealthy) {
                        let failures = state
                            .registry
                            .get(&worker.id)
                            .map(|w| w.consecutive_failures)
                            .unwrap_or_default();

                        if failures >= threshold {
                            let exhausted = DispatchError::WorkerExhausted {
                                worker: worker.id.clone(),
                                failures,
                            };
                            tracing::warn!(worker = %worker.id, "{}", exhausted);
                        } else {
                            tracing::info!(worker = %worker.id, "Disabled worker released");
                        }
                    }

                    if request.retries() < self.config.max_retries_per_request {
                        self.counters.retries.fetch_add(1, Ordering::Relaxed);
                        metrics::record_retry();
                        tracing::warn!(
                            request_id = %request.id,
                            worker = %worker.id,
                            attempt = request.attempts,
                            error = %error,
                            "Transient delivery failure, retrying"
                        );
                        state.queue.requeue_front(request);
                        None
                    } else {
                        Some((request, TerminalOutcome::RetriesExhausted { last_error: error }))
                    }
                }
            };

            let assignments = state.drain();
            state.check_invariants();
            state.publish_metrics();
            (finished, assignments)
        };

        if let Some((request, outcome)) = finished {
            self.finish(&worker.id, request, outcome);
        }

        for assignment in assignments {
            self.spawn_delivery(assignment);
        }
    }

    /// Record and publish a terminal outcome
    fn finish(&self, worker: &WorkerId, request: Request, outcome: TerminalOutcome) {
        let counter = match &outcome {
            TerminalOutcome::Succeeded { .. } => &self.counters.succeeded,
            TerminalOutcome::RemoteError { .. } => &self.counters.remote_errors,
            TerminalOutcome::RetriesExhausted { .. } => &self.counters.exhausted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_completed(outcome.label());

        match &outcome {
            TerminalOutcome::Succeeded { .. } => tracing::info!(
                request_id = %request.id,
                worker = %worker,
                attempt = request.attempts,
                "Request completed"
            ),
            TerminalOutcome::RemoteError { status, .. } => tracing::warn!(
                request_id = %request.id,
                worker = %worker,
                attempt = request.attempts,
                status = *status,
                "Worker returned an error"
            ),
            TerminalOutcome::RetriesExhausted { last_error } => tracing::error!(
                request_id = %request.id,
                worker = %worker,
                attempt = request.attempts,
                error = %last_error,
                "Retry budget exhausted"
            ),
        }

        // No subscribers is fine
        let _ = self.completed.send(CompletedRequest {
            request_id: request.id,
            seq: request.seq,
            worker: worker.clone(),
            attempts: request.attempts,
            arrived_at: request.arrived_at,
            completed_at: Utc::now(),
            outcome,
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
