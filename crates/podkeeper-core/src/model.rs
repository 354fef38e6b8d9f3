use crate::time::EpochMs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Liveness verdict for one supervised service after a monitor cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Ok,
    /// First probe failed, a restart was issued, and the re-probe passed.
    /// Distinct from `Ok`: an intervention happened this cycle.
    Recovered,
    /// Failed both probes; further retries belong to the supervisor.
    Failing,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealthRecord {
    pub name: String,
    pub endpoint: String,
    pub last_status: ServiceStatus,
    pub checked_at: EpochMs,
}

/// Point-in-time status rewritten in full after every monitor cycle.
///
/// Consumers must treat an absent or stale snapshot as "unknown", never
/// as "ok".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub timestamp_ms: EpochMs,
    pub services: BTreeMap<String, ServiceStatus>,
    pub disk_pct: u8,
    pub gpu_ok: bool,
}

/// Environment facts captured alongside a state backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: Uuid,
    pub timestamp_ms: EpochMs,
    /// Pod identity (`RUNPOD_POD_ID` / `HOSTNAME`).
    pub host: String,
    /// Deployed revision of the primary branch at snapshot time.
    pub revision: Option<String>,
    /// Accelerator name when one is present.
    pub gpu: Option<String>,
}

/// Result of one deploy-poller invocation. Only `Deployed` changed
/// anything; the other variants are skips, not failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DeployOutcome {
    UpToDate,
    AlreadyRunning,
    /// Skipped while training jobs are active; the pending change is
    /// re-detected on the next tick.
    Gated { active_jobs: u64 },
    Deployed {
        from: String,
        to: String,
        restarted: Vec<String>,
    },
}

/// Result of one backup-manager invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum BackupOutcome {
    /// No durable state exists yet.
    NothingToProtect,
    AlreadyRunning,
    DeployInProgress,
    /// Staged files were byte-identical to the branch tip.
    Unchanged,
    Committed { pushed: bool },
}
