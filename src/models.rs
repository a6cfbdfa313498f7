// Core data structures for jobgate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Workers
// ============================================================================

/// Opaque worker identifier (e.g., "container1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for WorkerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Worker address as supplied by the provisioning step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub id: WorkerId,
    pub ip: String,
    pub port: u16,

    /// Start the worker excluded from acquisition
    #[serde(default)]
    pub disabled: bool,
}

impl WorkerAddress {
    pub fn new(id: impl Into<WorkerId>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            port,
            disabled: false,
        }
    }

    /// Parse a command-line worker spec of the form `id=ip:port`
    pub fn parse_spec(spec: &str) -> Result<Self, String> {
        let (id, addr) = spec
            .split_once('=')
            .ok_or_else(|| format!("Invalid worker spec '{spec}': expected id=ip:port"))?;
        let (ip, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid worker address '{addr}': expected ip:port"))?;

        if id.is_empty() || ip.is_empty() {
            return Err(format!("Invalid worker spec '{spec}': empty id or ip"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| format!("Invalid worker port '{port}' in '{spec}'"))?;

        Ok(Self::new(id, ip, port))
    }
}

/// Where a single delivery goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub id: WorkerId,
    pub ip: String,
    pub port: u16,
}

impl WorkerEndpoint {
    /// `ip:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// The worker's fixed processing endpoint
    pub fn run_model_url(&self) -> String {
        format!("http://{}:{}/run_model", self.ip, self.port)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Body accepted by `POST /new_request`
///
/// Only `input_text` is required; any other fields are forwarded to the worker untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    pub input_text: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl NewRequest {
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Convert into the opaque payload forwarded to `/run_model`
    pub fn into_payload(self) -> Value {
        let mut map = self.extra;
        map.insert("input_text".to_string(), Value::String(self.input_text));
        Value::Object(map)
    }
}

/// An accepted job travelling through the dispatcher
#[derive(Debug, Clone)]
pub struct Request {
    /// Request identifier returned to the caller
    pub id: Uuid,

    /// Admission order (monotonic per process)
    pub seq: u64,

    /// Opaque JSON payload
    pub payload: Value,

    /// When the request was accepted
    pub arrived_at: DateTime<Utc>,

    /// Delivery attempts made so far
    pub attempts: u32,

    /// Worker that handled the previous attempt
    pub last_worker: Option<WorkerId>,
}

impl Request {
    pub fn new(seq: u64, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            payload,
            arrived_at: Utc::now(),
            attempts: 0,
            last_worker: None,
        }
    }

    /// Attempts beyond the first delivery
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Worker answered 200 with a body
    Success(Value),

    /// Worker answered with a non-200 status
    RemoteError { status: u16, body: String },

    /// Connection refused/reset, DNS failure, broken body
    Unreachable(String),

    /// No answer within the delivery timeout
    Timeout,
}

impl DeliveryOutcome {
    /// Transient failures are retried and count against the worker
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RemoteError { .. } => "remote_error",
            Self::Unreachable(_) => "unreachable",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => write!(f, "success"),
            Self::RemoteError { status, .. } => write!(f, "worker responded with status {status}"),
            Self::Unreachable(cause) => write!(f, "worker unreachable: {cause}"),
            Self::Timeout => write!(f, "delivery timed out"),
        }
    }
}

/// Final outcome recorded for a request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Succeeded { response: Value },
    RemoteError { status: u16, body: String },
    RetriesExhausted { last_error: String },
}

impl TerminalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::RemoteError { .. } => "remote_error",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

/// Record published when a request reaches its terminal outcome
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRequest {
    pub request_id: Uuid,
    pub seq: u64,

    /// Worker that handled the final attempt
    pub worker: WorkerId,

    pub attempts: u32,
    pub arrived_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: TerminalOutcome,
}
