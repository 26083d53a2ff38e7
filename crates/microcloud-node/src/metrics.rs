//! Periodic usage sampling of every tracked workload.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use microcloud_common::{Instance, MetricSample};
use microcloud_store::{Store, StoreError};

use crate::runtime::{ContainerRuntime, RuntimeError, StatsSnapshot};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("stats snapshot failed: {0}")]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("container {container}: bad {field} value {value:?}")]
    Parse {
        container: String,
        field: &'static str,
        value: String,
    },
}

/// Converts a `<number><unit>` token such as `512MiB` or `1.5GiB` to MiB.
///
/// Binary units (`KiB`, `MiB`, `GiB`, `TiB`) scale by 1024; decimal units
/// (`kB`, `MB`, `GB`, `TB`) are powers of 1000 bytes. Returns `None` when the
/// token does not start with a number followed by a recognised unit.
pub fn convert_to_mebibytes(token: &str) -> Option<f64> {
    const MIB: f64 = 1024.0 * 1024.0;

    let token = token.trim();
    let split = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    let (number, unit) = token.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier = match unit.trim() {
        "B" => 1.0 / MIB,
        "KiB" => 1.0 / 1024.0,
        "MiB" => 1.0,
        "GiB" => 1024.0,
        "TiB" => 1024.0 * 1024.0,
        "kB" | "KB" => 1e3 / MIB,
        "MB" => 1e6 / MIB,
        "GB" => 1e9 / MIB,
        "TB" => 1e12 / MIB,
        _ => return None,
    };
    Some(value * multiplier)
}

fn parse_percent(container: &str, field: &'static str, raw: &str) -> Result<f64, CollectError> {
    raw.trim()
        .trim_end_matches('%')
        .trim()
        .parse()
        .map_err(|_| CollectError::Parse {
            container: container.to_string(),
            field,
            value: raw.to_string(),
        })
}

/// Build the sample for one snapshot row, or `None` if the row's container is
/// not a tracked instance. Snapshot ids are short prefixes of full handles.
pub(crate) fn sample_for(
    snap: &StatsSnapshot,
    instances: &[Instance],
) -> Result<Option<MetricSample>, CollectError> {
    let id = snap.container.trim();
    if id.is_empty() {
        return Ok(None);
    }
    let Some(instance) = instances.iter().find(|i| i.workload_handle.starts_with(id)) else {
        return Ok(None);
    };

    let used = snap.mem_usage.split('/').next().unwrap_or("").trim();
    let memory_usage_mib = convert_to_mebibytes(used).unwrap_or_else(|| {
        tracing::debug!(container=%id, value=%used, "unrecognised memory unit, recording 0");
        0.0
    });

    let pids = snap.pids.trim().parse().map_err(|_| CollectError::Parse {
        container: id.to_string(),
        field: "PIDs",
        value: snap.pids.clone(),
    })?;

    Ok(Some(MetricSample {
        instance_id: instance.id,
        workload_id: id.to_string(),
        cpu_percent: parse_percent(id, "CPUPerc", &snap.cpu_percent)?,
        memory_usage_mib,
        memory_percent: parse_percent(id, "MemPerc", &snap.mem_percent)?,
        net_io: snap.net_io.clone(),
        block_io: snap.block_io.clone(),
        pids,
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub observed: usize,
    pub recorded: u64,
    pub skipped: usize,
}

/// Outcome of the latest tick, read by the `/metrics` status handler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectorStatus {
    pub running: bool,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
    pub last_error: Option<String>,
}

pub type SharedCollectorStatus = Arc<Mutex<CollectorStatus>>;

pub struct Collector {
    cfg: CollectorConfig,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn Store>,
    status: SharedCollectorStatus,
}

impl Collector {
    pub fn new(
        cfg: CollectorConfig,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            cfg,
            runtime,
            store,
            status: Arc::new(Mutex::new(CollectorStatus::default())),
        }
    }

    pub fn status(&self) -> SharedCollectorStatus {
        self.status.clone()
    }

    /// One poll: snapshot, match, append. Nothing is written if any step fails.
    pub async fn tick(&self) -> Result<TickReport, CollectError> {
        let snapshots = self.runtime.stats().await?;
        if snapshots.is_empty() {
            return Ok(TickReport::default());
        }
        let instances = self.store.list_instances().await?;

        let mut samples = Vec::with_capacity(snapshots.len());
        for snap in &snapshots {
            if let Some(sample) = sample_for(snap, &instances)? {
                samples.push(sample);
            } else {
                tracing::debug!(container=%snap.container, "untracked workload, skipping");
            }
        }

        let recorded = self.store.append_metrics(&samples).await?;
        Ok(TickReport {
            observed: snapshots.len(),
            recorded,
            skipped: snapshots.len() - samples.len(),
        })
    }

    /// Tick forever. A failed tick is logged and the next one runs on schedule.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.cfg.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.status.lock().await.running = true;
        tracing::info!(interval_ms = self.cfg.interval.as_millis() as u64, "metrics collector started");

        loop {
            interval.tick().await;
            let result = self.tick().await;

            let mut status = self.status.lock().await;
            status.ticks += 1;
            status.last_tick = Some(Utc::now());
            match result {
                Ok(report) => {
                    tracing::debug!(recorded = report.recorded, skipped = report.skipped, "metrics tick");
                    status.last_report = Some(report);
                    status.last_error = None;
                }
                Err(e) => {
                    tracing::error!(error=%e, "metrics tick failed");
                    status.failed_ticks += 1;
                    status.last_error = Some(e.to_string());
                }
            }
        }
    }
}
