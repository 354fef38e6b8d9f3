use crate::config::PodConfig;
use crate::vcs::GitRepo;
use podkeeper_core::{RestoreError, SnapshotMeta};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What a restore wrote back onto the node.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    pub snapshot: Option<SnapshotMeta>,
}

/// Pull the latest snapshot from the backup branch onto this node.
///
/// Extraction is read-only (`git show` against FETCH_HEAD); the local
/// working branch is never switched. Existing files are renamed to a
/// `.pre-restore` sibling before being overwritten, and the restore is a
/// pure overwrite, never a merge.
pub async fn run_restore(cfg: &PodConfig) -> Result<RestoreReport, RestoreError> {
    let repo = GitRepo::new(&cfg.repo_root);
    repo.fetch(&cfg.remote, &cfg.backup_branch)
        .await
        .map_err(|e| {
            let msg = format!("{e:#}");
            if msg.contains("couldn't find remote ref") {
                RestoreError::NothingToRestore
            } else {
                RestoreError::Fetch(msg)
            }
        })?;

    let mut report = RestoreReport::default();
    report.snapshot = match repo
        .show_bytes("FETCH_HEAD", &format!("{}/meta.json", cfg.backup_dir))
        .await
    {
        Ok(bytes) => serde_json::from_slice(&bytes).ok(),
        Err(_) => None,
    };
    if let Some(meta) = &report.snapshot {
        info!(
            "restoring snapshot {} taken on {} at {}",
            meta.id, meta.host, meta.timestamp_ms
        );
    }

    for target in [cfg.db_file.clone(), cfg.env_file.clone()] {
        let name = match target.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let stored = format!("{}/{}", cfg.backup_dir, name);
        let bytes = match repo.show_bytes("FETCH_HEAD", &stored).await {
            Ok(bytes) => bytes,
            Err(_) => {
                debug!("{stored} absent from the snapshot; skipping");
                continue;
            }
        };

        if target.exists() {
            let aside = sibling_with_suffix(&target, ".pre-restore");
            std::fs::rename(&target, &aside)?;
            info!(
                "existing {} preserved as {}",
                target.display(),
                aside.display()
            );
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, &bytes)?;
        report.restored.push(target);
    }

    info!("restored {} file(s) from the backup branch", report.restored.len());
    Ok(report)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
