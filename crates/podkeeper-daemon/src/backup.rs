use crate::config::{host_identity, PodConfig};
use crate::deploy::DEPLOY_LOCK;
use crate::gpu;
use crate::lock::LockManager;
use crate::vcs::GitRepo;
use anyhow::{Context, Result};
use podkeeper_core::{now_ms, redact_env, BackupOutcome, SnapshotMeta};
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lease name serializing backup invocations.
pub const BACKUP_LOCK: &str = "backup";

/// One backup-manager invocation: snapshot the database and a redacted
/// env copy onto the dedicated branch of the remote.
pub async fn run_backup_cycle(cfg: &PodConfig, locks: &LockManager) -> Result<BackupOutcome> {
    if !cfg.db_file.exists() {
        debug!("no database yet; nothing to back up");
        return Ok(BackupOutcome::NothingToProtect);
    }
    let Some(_lease) = locks.try_acquire(BACKUP_LOCK)? else {
        return Ok(BackupOutcome::AlreadyRunning);
    };
    // Zero-wait probe of the deploy lease; a backup taken mid-deploy
    // could capture a half-updated tree.
    if locks.is_locked(DEPLOY_LOCK)? {
        info!("deploy in progress; skipping this backup cycle");
        return Ok(BackupOutcome::DeployInProgress);
    }

    let repo = GitRepo::new(&cfg.repo_root);
    let original_branch = repo.current_branch().await?;

    let outcome = stage_and_commit(cfg, &repo).await;

    // The working state must come back to the original branch on every
    // path, including push failures. An orphan staging pass leaves the
    // primary branch's files behind as identical untracked copies, so
    // the checkout is forced.
    if let Err(e) = repo.checkout_forced(&original_branch).await {
        error!("switching back to {original_branch} failed: {e:#}");
    }
    outcome
}

async fn stage_and_commit(cfg: &PodConfig, repo: &GitRepo) -> Result<BackupOutcome> {
    switch_to_backup_branch(cfg, repo).await?;

    let staging = cfg.repo_root.join(&cfg.backup_dir);
    std::fs::create_dir_all(&staging)
        .with_context(|| format!("creating {}", staging.display()))?;

    let db_name = file_name(&cfg.db_file, "studio.db");
    std::fs::copy(&cfg.db_file, staging.join(&db_name))
        .with_context(|| format!("copying {}", cfg.db_file.display()))?;

    if cfg.env_file.exists() {
        let raw = std::fs::read_to_string(&cfg.env_file)
            .with_context(|| format!("reading {}", cfg.env_file.display()))?;
        let env_name = file_name(&cfg.env_file, ".env");
        std::fs::write(staging.join(&env_name), redact_env(&raw, &cfg.secret_keys))
            .with_context(|| format!("staging redacted {env_name}"))?;
    }

    repo.add_forced(&cfg.backup_dir).await?;
    let head_exists = repo.rev_parse("HEAD").await?.is_some();

    let committed = if head_exists && repo.staged_matches_head().await? {
        // Byte-identical to the branch tip: repeated backups with no
        // change add no history entries.
        debug!("backup staging identical to branch tip; no new commit");
        false
    } else {
        let meta = SnapshotMeta {
            id: Uuid::new_v4(),
            timestamp_ms: now_ms(),
            host: host_identity(),
            revision: repo.rev_parse(&cfg.branch).await?,
            gpu: gpu::probe().await.first().map(|g| g.name.clone()),
        };
        std::fs::write(
            staging.join("meta.json"),
            serde_json::to_vec_pretty(&meta).context("encoding meta.json")?,
        )
        .context("staging meta.json")?;
        repo.add_forced(&cfg.backup_dir).await?;
        repo.commit(&format!("state snapshot from {}", meta.host))
            .await?;
        info!("captured state snapshot from {}", meta.host);
        true
    };

    // Push whenever the local tip differs from the remote tip, so a
    // failed push is retried next cycle even without a new commit.
    let local_tip = repo.rev_parse("HEAD").await?;
    let remote_tip = repo
        .rev_parse(&format!("{}/{}", cfg.remote, cfg.backup_branch))
        .await?;
    let mut pushed = false;
    if local_tip != remote_tip {
        match repo.push_forced(&cfg.remote, &cfg.backup_branch).await {
            Ok(()) => pushed = true,
            Err(e) => warn!(
                "pushing {} failed (retried next cycle): {e:#}",
                cfg.backup_branch
            ),
        }
    }

    if committed {
        Ok(BackupOutcome::Committed { pushed })
    } else {
        Ok(BackupOutcome::Unchanged)
    }
}

async fn switch_to_backup_branch(cfg: &PodConfig, repo: &GitRepo) -> Result<()> {
    let remote_ref = format!("{}/{}", cfg.remote, cfg.backup_branch);
    if repo
        .rev_parse(&format!("refs/heads/{}", cfg.backup_branch))
        .await?
        .is_some()
    {
        repo.checkout(&cfg.backup_branch).await
    } else if repo.rev_parse(&remote_ref).await?.is_some() {
        repo.checkout_tracking(&cfg.backup_branch, &remote_ref).await
    } else {
        // First snapshot ever: an orphan branch keeps backup content out
        // of the primary history entirely.
        repo.checkout_orphan(&cfg.backup_branch).await
    }
}

fn file_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{commit_file, head_branch, run_git, test_config};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        tmp: TempDir,
        cfg: PodConfig,
    }

    fn fixture() -> Fixture {
        let tmp = tempdir().unwrap();
        let origin = tmp.path().join("origin.git");
        std::fs::create_dir_all(&origin).unwrap();
        run_git(tmp.path(), &["init", "--bare", "--quiet", "origin.git"]);

        let local = tmp.path().join("local");
        run_git(
            tmp.path(),
            &["clone", origin.to_str().unwrap(), local.to_str().unwrap()],
        );
        run_git(&local, &["config", "user.email", "podkeeper@example.com"]);
        run_git(&local, &["config", "user.name", "podkeeper"]);
        commit_file(&local, "README.md", "studio", "init");
        let branch = head_branch(&local);
        run_git(&local, &["push", "--quiet", "origin", &branch]);

        let mut cfg = test_config(&local, tmp.path());
        cfg.branch = branch;
        std::fs::create_dir_all(cfg.db_file.parent().unwrap()).unwrap();
        std::fs::write(&cfg.db_file, "db-v1").unwrap();
        std::fs::write(&cfg.env_file, "WYBE_API_KEY=abc123\nFOO=bar\n").unwrap();

        Fixture { tmp, cfg }
    }

    fn backup_commit_count(repo: &Path, branch: &str) -> u32 {
        run_git(repo, &["rev-list", "--count", branch])
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn repeated_backups_without_change_commit_once() {
        let f = fixture();
        let locks = LockManager::new(&f.cfg.lock_dir);

        let first = run_backup_cycle(&f.cfg, &locks).await.unwrap();
        assert_eq!(first, BackupOutcome::Committed { pushed: true });
        assert_eq!(backup_commit_count(&f.cfg.repo_root, "pod-backups"), 1);
        // The working state is back on the original branch.
        assert_eq!(head_branch(&f.cfg.repo_root), f.cfg.branch);

        let second = run_backup_cycle(&f.cfg, &locks).await.unwrap();
        assert_eq!(second, BackupOutcome::Unchanged);
        assert_eq!(backup_commit_count(&f.cfg.repo_root, "pod-backups"), 1);

        // A real change produces exactly one more snapshot commit.
        std::fs::write(&f.cfg.db_file, "db-v2").unwrap();
        let third = run_backup_cycle(&f.cfg, &locks).await.unwrap();
        assert_eq!(third, BackupOutcome::Committed { pushed: true });
        assert_eq!(backup_commit_count(&f.cfg.repo_root, "pod-backups"), 2);
    }

    #[tokio::test]
    async fn snapshot_redacts_secrets_and_reaches_the_remote() {
        let f = fixture();
        let locks = LockManager::new(&f.cfg.lock_dir);
        run_backup_cycle(&f.cfg, &locks).await.unwrap();

        let env = run_git(&f.cfg.repo_root, &["show", "pod-backups:pod_backup/.env"]);
        assert!(env.contains("WYBE_API_KEY=REDACTED"));
        assert!(env.contains("FOO=bar"));
        assert!(!env.contains("abc123"));

        let db = run_git(&f.cfg.repo_root, &["show", "pod-backups:pod_backup/studio.db"]);
        assert_eq!(db, "db-v1");

        // The branch tip was force-pushed to the remote.
        let origin = f.tmp.path().join("origin.git");
        assert_eq!(
            run_git(&origin, &["rev-parse", "pod-backups"]),
            run_git(&f.cfg.repo_root, &["rev-parse", "pod-backups"]),
        );
    }

    #[tokio::test]
    async fn missing_database_is_a_quiet_success() {
        let f = fixture();
        std::fs::remove_file(&f.cfg.db_file).unwrap();
        let locks = LockManager::new(&f.cfg.lock_dir);
        let out = run_backup_cycle(&f.cfg, &locks).await.unwrap();
        assert_eq!(out, BackupOutcome::NothingToProtect);
    }

    #[tokio::test]
    async fn in_flight_deploy_skips_the_cycle() {
        let f = fixture();
        let locks = LockManager::new(&f.cfg.lock_dir);
        let deploy_lease = locks.try_acquire(DEPLOY_LOCK).unwrap().unwrap();

        let out = run_backup_cycle(&f.cfg, &locks).await.unwrap();
        assert_eq!(out, BackupOutcome::DeployInProgress);
        drop(deploy_lease);

        // The probe never stole the deploy lease.
        assert!(locks.try_acquire(DEPLOY_LOCK).unwrap().is_some());
    }

    #[tokio::test]
    async fn held_backup_lease_skips() {
        let f = fixture();
        let locks = LockManager::new(&f.cfg.lock_dir);
        let held = locks.try_acquire(BACKUP_LOCK).unwrap().unwrap();
        let out = run_backup_cycle(&f.cfg, &locks).await.unwrap();
        assert_eq!(out, BackupOutcome::AlreadyRunning);
        drop(held);
    }
}
