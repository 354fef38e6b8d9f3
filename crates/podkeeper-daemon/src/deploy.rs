use crate::config::PodConfig;
use crate::db;
use crate::lock::LockManager;
use crate::supervisor::Supervisor;
use crate::vcs::GitRepo;
use podkeeper_core::{classify, DeployError, DeployOutcome};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lease name serializing deploy invocations. The backup manager tests
/// this name to detect an in-flight deploy without contending for it.
pub const DEPLOY_LOCK: &str = "deploy";

/// One deploy-poller invocation: check the remote, and when new commits
/// exist, rebuild what changed and restart only the affected services.
///
/// The lease is released on every exit path, held or not.
pub async fn run_deploy_cycle(
    cfg: &PodConfig,
    locks: &LockManager,
    sup: &impl Supervisor,
) -> Result<DeployOutcome, DeployError> {
    let repo = GitRepo::new(&cfg.repo_root);

    repo.fetch(&cfg.remote, &cfg.branch)
        .await
        .map_err(|e| DeployError::Fetch(format!("{e:#}")))?;
    let local = repo
        .current_revision()
        .await
        .map_err(|e| DeployError::Vcs(format!("{e:#}")))?;
    let remote_ref = format!("{}/{}", cfg.remote, cfg.branch);
    let remote_rev = repo
        .rev_parse(&remote_ref)
        .await
        .map_err(|e| DeployError::Vcs(format!("{e:#}")))?
        .ok_or_else(|| DeployError::Fetch(format!("remote branch {remote_ref} not found")))?;

    if local == remote_rev {
        // Nothing new; stay silent until the next tick.
        return Ok(DeployOutcome::UpToDate);
    }

    let Some(_lease) = locks
        .try_acquire(DEPLOY_LOCK)
        .map_err(|e| DeployError::Lock(format!("{e:#}")))?
    else {
        info!("deploy already in progress; skipping");
        return Ok(DeployOutcome::AlreadyRunning);
    };

    let active_jobs =
        db::active_training_jobs(&cfg.db_file).map_err(|e| DeployError::Gate(format!("{e:#}")))?;
    if active_jobs > 0 {
        info!(
            "deploy skipped: {active_jobs} training job(s) active; \
             pending change will be picked up on a later tick"
        );
        return Ok(DeployOutcome::Gated { active_jobs });
    }

    let changed = repo
        .changed_paths(&local, &remote_rev)
        .await
        .map_err(|e| DeployError::Vcs(format!("{e:#}")))?;
    let plan = classify(&cfg.rules, &changed);
    debug!(
        "deploying {}..{}: {} changed path(s), plan {:?}",
        short(&local),
        short(&remote_rev),
        changed.len(),
        plan
    );

    // Build-type steps first; any failure here aborts the deploy with
    // the previous revision still running.
    if plan.rebuild_assets {
        run_step(&cfg.asset_build, &cfg.repo_root)
            .await
            .map_err(DeployError::AssetBuild)?;
    }
    if plan.reinstall_deps {
        run_step(&cfg.deps_install, &cfg.repo_root)
            .await
            .map_err(DeployError::DependencyInstall)?;
    }

    // The revision pointer moves only after every build step succeeded.
    repo.fast_forward(&remote_rev)
        .await
        .map_err(|e| DeployError::FastForward {
            revision: remote_rev.clone(),
            reason: format!("{e:#}"),
        })?;

    if plan.reload_supervisor {
        if let Err(e) = sup.reload().await {
            warn!("supervisor config reload failed: {e:#}");
        }
    }
    let mut restarted = Vec::new();
    for name in &plan.restart {
        match sup.restart(name).await {
            Ok(()) => restarted.push(name.clone()),
            // The applied revision stays; the supervisor's own restart
            // policy keeps retrying the service.
            Err(e) => warn!("restart of {name} after deploy failed: {e:#}"),
        }
    }

    info!(
        "deployed {} -> {} (restarted: [{}])",
        short(&local),
        short(&remote_rev),
        restarted.join(", ")
    );
    Ok(DeployOutcome::Deployed {
        from: local,
        to: remote_rev,
        restarted,
    })
}

/// Run one configured build step. An empty argv disables the step.
pub(crate) async fn run_step(argv: &[String], cwd: &Path) -> Result<(), String> {
    let Some((program, rest)) = argv.split_first() else {
        return Ok(());
    };
    let out = Command::new(program)
        .args(rest)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| format!("spawning {program}: {e}"))?;
    if !out.status.success() {
        return Err(format!(
            "`{}` exited with {}: {}",
            argv.join(" "),
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(())
}

fn short(rev: &str) -> &str {
    &rev[..rev.len().min(8)]
}
