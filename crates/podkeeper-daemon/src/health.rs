use crate::config::{PodConfig, ServiceSpec};
use crate::gpu;
use crate::supervisor::Supervisor;
use anyhow::{Context, Result};
use podkeeper_core::{now_ms, ServiceHealthRecord, ServiceStatus, StatusSnapshot};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Probe every supervised service once, restart and re-probe failures,
/// then rewrite the consolidated status snapshot.
pub async fn run_health_cycle(cfg: &PodConfig, sup: &impl Supervisor) -> Result<StatusSnapshot> {
    let client = Client::builder()
        .timeout(Duration::from_secs(cfg.probe_timeout_secs))
        .build()
        .context("building probe client")?;

    let mut records = Vec::with_capacity(cfg.services.len());
    for svc in &cfg.services {
        records.push(check_service(&client, cfg, sup, svc).await);
    }

    let snapshot = StatusSnapshot {
        timestamp_ms: now_ms(),
        services: records
            .iter()
            .map(|r| (r.name.clone(), r.last_status))
            .collect(),
        disk_pct: disk_usage_pct(&cfg.data_dir),
        gpu_ok: !gpu::probe().await.is_empty(),
    };
    write_snapshot(&cfg.status_file, &snapshot)?;

    let unhealthy: Vec<String> = records
        .iter()
        .filter(|r| r.last_status != ServiceStatus::Ok)
        .map(|r| format!("{}={:?}", r.name, r.last_status))
        .collect();
    if !unhealthy.is_empty() {
        warn!("unhealthy services this cycle: {}", unhealthy.join(", "));
    }
    Ok(snapshot)
}

async fn check_service(
    client: &Client,
    cfg: &PodConfig,
    sup: &impl Supervisor,
    svc: &ServiceSpec,
) -> ServiceHealthRecord {
    let status = if probe(client, &svc.health_url).await {
        ServiceStatus::Ok
    } else {
        // One remediation attempt per cycle; anything beyond that is the
        // supervisor's own restart policy.
        if let Err(e) = sup.restart(&svc.name).await {
            warn!("restart of {} failed: {e:#}", svc.name);
        }
        tokio::time::sleep(Duration::from_secs(cfg.restart_grace_secs)).await;
        if probe(client, &svc.health_url).await {
            ServiceStatus::Recovered
        } else {
            ServiceStatus::Failing
        }
    };
    ServiceHealthRecord {
        name: svc.name.clone(),
        endpoint: svc.health_url.clone(),
        last_status: status,
        checked_at: now_ms(),
    }
}

/// Success is any non-error HTTP status inside the timeout.
async fn probe(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status().as_u16() < 400,
        Err(_) => false,
    }
}

fn write_snapshot(path: &Path, snapshot: &StatusSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    // Write-then-rename so a reader never observes a partial snapshot.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

fn disk_usage_pct(path: &Path) -> u8 {
    match nix::sys::statvfs::statvfs(path) {
        Ok(vfs) => {
            let total = vfs.blocks() as u64;
            if total == 0 {
                return 0;
            }
            let used = total.saturating_sub(vfs.blocks_available() as u64);
            ((used * 100) / total) as u8
        }
        Err(_) => 0,
    }
}
