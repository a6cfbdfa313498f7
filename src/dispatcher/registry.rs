//! Worker registry
//!
//! Authoritative state of every worker in the pool: identity, address,
//! availability and consecutive failures. The registry itself holds no lock;
//! the [`Dispatcher`](super::Dispatcher) owns it behind a single mutex together
//! with the pending queue, so every operation here is one atomic step from the
//! point of view of concurrent callers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::models::{WorkerAddress, WorkerEndpoint, WorkerId};

// ============================================================================
// Worker Status
// ============================================================================

/// Availability of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Idle and eligible for acquisition
    Free,

    /// Running exactly one request
    Busy,

    /// Excluded from acquisition until restored
    Unhealthy,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Busy => "busy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self::Free
    }
}

// ============================================================================
// Worker
// ============================================================================

/// A single-capacity worker
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    pub ip: String,
    pub port: u16,
    pub status: WorkerStatus,

    /// Transient delivery failures since the last success or restore
    pub consecutive_failures: u32,

    /// Excluded by an operator; only an explicit restore brings it back
    pub held: bool,
}

impl Worker {
    fn from_address(address: WorkerAddress) -> Self {
        Self {
            id: address.id,
            ip: address.ip,
            port: address.port,
            status: if address.disabled {
                WorkerStatus::Unhealthy
            } else {
                WorkerStatus::Free
            },
            consecutive_failures: 0,
            held: address.disabled,
        }
    }

    pub fn endpoint(&self) -> WorkerEndpoint {
        WorkerEndpoint {
            id: self.id.clone(),
            ip: self.ip.clone(),
            port: self.port,
        }
    }

    fn view(&self) -> WorkerView {
        WorkerView {
            ip: self.ip.clone(),
            port: self.port,
            status: self.status,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// Read-only projection of a worker, served by `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerView {
    pub ip: String,
    pub port: u16,
    pub status: WorkerStatus,
    #[serde(default)]
    pub consecutive_failures: u32,
}

/// Registry snapshot keyed by worker id
pub type RegistrySnapshot = BTreeMap<WorkerId, WorkerView>;

/// How a busy worker is handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The worker answered (success or remote error)
    Recovered,

    /// Transient failure; the worker is excluded once `threshold` is reached
    Failed { threshold: u32 },
}

// ============================================================================
// Worker Registry
// ============================================================================

/// Registry of the static worker pool
#[derive(Debug)]
pub struct WorkerRegistry {
    /// Workers in provisioning order (acquisition scan order)
    workers: Vec<Worker>,

    /// Index into `workers`
    index: HashMap<WorkerId, usize>,
}

impl WorkerRegistry {
    /// Build the registry from provisioning output
    pub fn new(addresses: Vec<WorkerAddress>) -> Result<Self, RegistryError> {
        if addresses.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut workers = Vec::with_capacity(addresses.len());
        let mut index = HashMap::with_capacity(addresses.len());

        for address in addresses {
            if index.contains_key(&address.id) {
                return Err(RegistryError::DuplicateWorker(address.id));
            }
            index.insert(address.id.clone(), workers.len());
            workers.push(Worker::from_address(address));
        }

        Ok(Self { workers, index })
    }

    /// Claim the first free worker, marking it busy
    pub fn try_set_busy(&mut self) -> Option<WorkerEndpoint> {
        self.try_set_busy_avoiding(None)
    }

    /// Claim a free worker, preferring one other than `avoid`
    ///
    /// Falls back to `avoid` when it is the only free worker.
    pub fn try_set_busy_avoiding(&mut self, avoid: Option<&WorkerId>) -> Option<WorkerEndpoint> {
        let preferred = self
            .workers
            .iter()
            .position(|w| w.status == WorkerStatus::Free && Some(&w.id) != avoid);

        let idx = preferred.or_else(|| {
            self.workers
                .iter()
                .position(|w| w.status == WorkerStatus::Free)
        })?;

        let worker = &mut self.workers[idx];
        worker.status = WorkerStatus::Busy;
        Some(worker.endpoint())
    }

    /// Hand a busy worker back, returning its new status
    ///
    /// A returned [`WorkerStatus::Free`] is the signal that the pending queue
    /// must be drained.
    pub fn release(&mut self, id: &WorkerId, release: Release) -> Result<WorkerStatus, RegistryError> {
        let worker = self.get_mut(id)?;

        if worker.status != WorkerStatus::Busy {
            return Err(RegistryError::NotBusy {
                worker: id.clone(),
                status: worker.status,
            });
        }

        match release {
            Release::Recovered => {
                worker.consecutive_failures = 0;
            }
            Release::Failed { threshold } => {
                worker.consecutive_failures += 1;
                if worker.consecutive_failures >= threshold {
                    worker.status = WorkerStatus::Unhealthy;
                    return Ok(worker.status);
                }
            }
        }

        worker.status = if worker.held {
            WorkerStatus::Unhealthy
        } else {
            WorkerStatus::Free
        };

        Ok(worker.status)
    }

    /// Exclude a worker from acquisition until explicitly restored
    ///
    /// A busy worker keeps its in-flight request and turns unhealthy when
    /// released.
    pub fn mark_unhealthy(&mut self, id: &WorkerId) -> Result<WorkerStatus, RegistryError> {
        let worker = self.get_mut(id)?;

        worker.held = true;
        if worker.status == WorkerStatus::Free {
            worker.status = WorkerStatus::Unhealthy;
        }

        Ok(worker.status)
    }

    /// Restore a worker, resetting its failure counter
    ///
    /// Returns `true` when the worker became free (the queue must be drained).
    pub fn mark_healthy(&mut self, id: &WorkerId) -> Result<bool, RegistryError> {
        let worker = self.get_mut(id)?;

        worker.consecutive_failures = 0;
        worker.held = false;

        if worker.status == WorkerStatus::Unhealthy {
            worker.status = WorkerStatus::Free;
            return Ok(true);
        }

        Ok(false)
    }

    /// Get a worker
    pub fn get(&self, id: &WorkerId) -> Option<&Worker> {
        self.index.get(id).map(|&idx| &self.workers[idx])
    }

    fn get_mut(&mut self, id: &WorkerId) -> Result<&mut Worker, RegistryError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| RegistryError::WorkerNotFound(id.clone()))?;
        Ok(&mut self.workers[idx])
    }

    /// Whether any worker is free
    pub fn has_free(&self) -> bool {
        self.workers.iter().any(|w| w.status == WorkerStatus::Free)
    }

    /// Unhealthy workers excluded by failures rather than by an operator
    pub fn probe_candidates(&self) -> Vec<WorkerEndpoint> {
        self.workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Unhealthy && !w.held)
            .map(Worker::endpoint)
            .collect()
    }

    /// Number of workers in the pool
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Read-only projection of every worker
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.workers
            .iter()
            .map(|w| (w.id.clone(), w.view()))
            .collect()
    }

    /// Aggregate counts, always derived from the entries
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_workers: self.workers.len(),
            ..Default::default()
        };

        for worker in &self.workers {
            match worker.status {
                WorkerStatus::Free => stats.free += 1,
                WorkerStatus::Busy => stats.busy += 1,
                WorkerStatus::Unhealthy => stats.unhealthy += 1,
            }
        }

        stats
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_workers: usize,
    pub free: usize,
    pub busy: usize,
    pub unhealthy: usize,
}

impl RegistryStats {
    /// Percentage of the pool not excluded from acquisition
    pub fn availability(&self) -> f64 {
        if self.total_workers == 0 {
            0.0
        } else {
            ((self.free + self.busy) as f64 / self.total_workers as f64) * 100.0
        }
    }

    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Registry Stats\n\
             {:-<30}\n\
             Total Workers: {}\n\
             - Free: {}\n\
             - Busy: {}\n\
             - Unhealthy: {}\n\
             Availability: {:.1}%",
            "",
            self.total_workers,
            self.free,
            self.busy,
            self.unhealthy,
            self.availability(),
        )
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No workers supplied
    Empty,

    /// Same id supplied twice
    DuplicateWorker(WorkerId),

    /// Unknown worker id
    WorkerNotFound(WorkerId),

    /// Release of a worker that holds no request
    NotBusy { worker: WorkerId, status: WorkerStatus },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Worker pool is empty"),
            Self::DuplicateWorker(id) => write!(f, "Duplicate worker id: {}", id),
            Self::WorkerNotFound(id) => write!(f, "Worker not found: {}", id),
            Self::NotBusy { worker, status } => {
                write!(f, "Worker {} released while {}", worker, status.as_str())
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ============================================================================
// Tests
// ============================================================================
