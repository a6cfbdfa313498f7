//! Periodic registry snapshots and worker recovery
//!
//! Snapshots use the provisioning `status.json` layout, so the file can be
//! handed back as the worker file on the next start. They are never read
//! during operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::Result;

use super::dispatch::Dispatcher;
use super::registry::RegistrySnapshot;

/// Write a snapshot atomically (temp file, then rename)
pub async fn write_snapshot(path: &Path, snapshot: &RegistrySnapshot) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

impl Dispatcher {
    /// Start writing snapshots to `path` every `interval`
    pub fn start_snapshot_writer(
        self: &Arc<Self>,
        path: PathBuf,
        interval: Duration,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                let snapshot = dispatcher.snapshot().await;

                if let Err(e) = write_snapshot(&path, &snapshot).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to write registry snapshot");
                } else {
                    tracing::trace!(path = %path.display(), "Registry snapshot written");
                }
            }
        })
    }

    /// Start probing unhealthy workers every `interval`
    pub fn start_recovery_prober(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let restored = dispatcher.probe_unhealthy().await;
                if restored > 0 {
                    tracing::info!(restored, "Recovery probe restored workers");
                }
            }
        })
    }

    /// Start the background tasks enabled by configuration
    pub fn start_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(path) = self.config().snapshot_path.clone() {
            tracing::info!(path = %path.display(), "Registry snapshots enabled");
            handles.push(self.start_snapshot_writer(path, self.config().snapshot_interval()));
        }

        if let Some(interval) = self.config().recovery_probe_interval() {
            tracing::info!(interval_secs = interval.as_secs(), "Recovery prober enabled");
            handles.push(self.start_recovery_prober(interval));
        }

        handles
    }
}
