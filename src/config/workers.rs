//! Provisioning worker file
//!
//! The provisioning step writes a JSON object keyed by worker id:
//!
//! ```json
//! {
//!   "container1": {"ip": "10.0.1.17", "port": 8000, "status": "free"},
//!   "container2": {"ip": "10.0.1.17", "port": 8001, "status": "free"}
//! }
//! ```
//!
//! Registry snapshots use the same layout. On load, `unhealthy` entries stay
//! excluded and `busy` entries start free, since nothing is in flight after a
//! restart.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::dispatcher::registry::WorkerStatus;
use crate::models::{WorkerAddress, WorkerId};

#[derive(Debug, Deserialize)]
struct WorkerEntry {
    ip: String,
    port: u16,
    #[serde(default)]
    status: WorkerStatus,
}

/// Load worker addresses from a provisioning file
pub fn load_worker_file(path: &Path) -> Result<Vec<WorkerAddress>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read worker file: {}", path.display()))?;

    parse_worker_file(&content)
        .with_context(|| format!("Failed to parse worker file: {}", path.display()))
}

/// Parse the provisioning JSON, ordered by id (numeric suffixes compared as numbers)
pub fn parse_worker_file(content: &str) -> Result<Vec<WorkerAddress>> {
    let entries: BTreeMap<WorkerId, WorkerEntry> = serde_json::from_str(content)?;

    let mut addresses: Vec<WorkerAddress> = entries
        .into_iter()
        .map(|(id, entry)| WorkerAddress {
            id,
            ip: entry.ip,
            port: entry.port,
            disabled: entry.status == WorkerStatus::Unhealthy,
        })
        .collect();

    addresses.sort_by(|a, b| natural_key(a.id.as_str()).cmp(&natural_key(b.id.as_str())));

    Ok(addresses)
}

/// `container10` sorts after `container9`
fn natural_key(id: &str) -> (&str, Option<u64>, &str) {
    let prefix = id.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &id[prefix.len()..];
    (prefix, digits.parse().ok(), digits)
}
