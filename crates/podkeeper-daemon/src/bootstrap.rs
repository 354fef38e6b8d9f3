use crate::config::PodConfig;
use crate::deploy::run_step;
use crate::lock::LockManager;
use crate::sched::Schedules;
use crate::supervisor::{Supervisor, Supervisorctl};
use crate::{backup, deploy, health, restore, volume};
use anyhow::{anyhow, Context, Result};
use podkeeper_core::RestoreError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One-shot node boot sequence: volume migration, restore-if-fresh,
/// install/build, supervisor start.
pub async fn run_bootstrap(cfg: &PodConfig, sup: &Supervisorctl) -> Result<()> {
    volume::run_migration(cfg, sup)
        .await
        .map_err(|e| anyhow!(e))
        .context("migrating onto the persistent volume")?;

    if !cfg.db_file.exists() {
        match restore::run_restore(cfg).await {
            Ok(report) => info!(
                "fresh node: restored {} file(s) from the backup branch",
                report.restored.len()
            ),
            Err(RestoreError::NothingToRestore) => {
                info!("fresh node with no backup snapshot; starting empty")
            }
            Err(e) => return Err(anyhow!(e)).context("restoring state on a fresh node"),
        }
    }

    // A half-built tree must not serve traffic; failures here abort the
    // boot loudly instead of starting services against it.
    run_step(&cfg.deps_install, &cfg.repo_root)
        .await
        .map_err(|e| anyhow!("dependency install failed: {e}"))?;
    run_step(&cfg.asset_build, &cfg.repo_root)
        .await
        .map_err(|e| anyhow!("asset build failed: {e}"))?;

    sup.ensure_running().await?;
    sup.reload().await?;
    sup.start("all").await?;
    info!("bootstrap complete");
    Ok(())
}

/// Register the three recurring maintenance tasks. Keyed by name:
/// calling this again replaces the previous registrations.
pub fn register_schedules(cfg: &Arc<PodConfig>, sched: &mut Schedules) {
    let deploy_cfg = Arc::clone(cfg);
    sched.register(
        "deploy-poll",
        Duration::from_secs(cfg.deploy_interval_secs),
        move || {
            let cfg = Arc::clone(&deploy_cfg);
            async move {
                let locks = LockManager::new(&cfg.lock_dir);
                let sup = Supervisorctl::new(cfg.supervisord_conf.clone());
                deploy::run_deploy_cycle(&cfg, &locks, &sup).await?;
                Ok(())
            }
        },
    );

    let health_cfg = Arc::clone(cfg);
    sched.register(
        "health-check",
        Duration::from_secs(cfg.health_interval_secs),
        move || {
            let cfg = Arc::clone(&health_cfg);
            async move {
                let sup = Supervisorctl::new(cfg.supervisord_conf.clone());
                health::run_health_cycle(&cfg, &sup).await?;
                Ok(())
            }
        },
    );

    let backup_cfg = Arc::clone(cfg);
    sched.register(
        "backup",
        Duration::from_secs(cfg.backup_interval_secs),
        move || {
            let cfg = Arc::clone(&backup_cfg);
            async move {
                let locks = LockManager::new(&cfg.lock_dir);
                backup::run_backup_cycle(&cfg, &locks).await?;
                Ok(())
            }
        },
    );
}
