use crate::config::{PodConfig, VolumeMapping};
use crate::supervisor::Supervisor;
use podkeeper_core::MigrateError;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Outcome for one mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// The logical path is already a redirect.
    AlreadyMigrated,
    /// No persistent volume is attached.
    NoVolume,
    Migrated,
}

/// Migrate every configured mapping. A redirect failure is surfaced
/// immediately; it must never be retried automatically.
pub async fn run_migration(
    cfg: &PodConfig,
    sup: &impl Supervisor,
) -> Result<Vec<(PathBuf, MigrateOutcome)>, MigrateError> {
    let mut results = Vec::new();
    for mapping in &cfg.volume_mappings {
        let outcome = migrate_mapping(&cfg.volume_root, sup, mapping).await?;
        if outcome == MigrateOutcome::Migrated {
            info!(
                "migrated {} onto the volume at {}",
                mapping.logical.display(),
                cfg.volume_root.join(&mapping.target).display()
            );
        }
        results.push((mapping.logical.clone(), outcome));
    }
    Ok(results)
}

/// Move `mapping.logical` onto the volume and leave a symlink behind so
/// every other component keeps using the same logical path.
pub async fn migrate_mapping(
    volume_root: &Path,
    sup: &impl Supervisor,
    mapping: &VolumeMapping,
) -> Result<MigrateOutcome, MigrateError> {
    let is_redirect = std::fs::symlink_metadata(&mapping.logical)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if is_redirect {
        return Ok(MigrateOutcome::AlreadyMigrated);
    }
    if !volume_root.is_dir() {
        return Ok(MigrateOutcome::NoVolume);
    }

    let target = volume_root.join(&mapping.target);
    let source_exists = mapping.logical.exists();

    // Open database files must not be copied while in active use; this
    // is the one mandatory coordination point with the supervisor.
    let stopped = if mapping.stop_services && source_exists && sup.is_running().await {
        sup.stop("all")
            .await
            .map_err(|e| MigrateError::ServiceStop(format!("{e:#}")))?;
        true
    } else {
        false
    };

    let result = relocate(mapping, &target);

    if stopped {
        if let Err(e) = sup.start("all").await {
            warn!("restarting services after migration failed: {e:#}");
        }
    }
    if let Err(e @ MigrateError::RedirectFailed { .. }) = &result {
        // Both the .bak original and the copy now exist; future writes
        // would silently diverge between them.
        error!("{e}");
    }
    result
}

fn relocate(mapping: &VolumeMapping, target: &Path) -> Result<MigrateOutcome, MigrateError> {
    if mapping.logical.exists() {
        copy_dir_all(&mapping.logical, target)?;
        let backup = sibling_with_suffix(&mapping.logical, ".bak");
        std::fs::rename(&mapping.logical, &backup)?;
        if let Err(e) = std::os::unix::fs::symlink(target, &mapping.logical) {
            return Err(MigrateError::RedirectFailed {
                logical: mapping.logical.display().to_string(),
                copy: target.display().to_string(),
                backup: backup.display().to_string(),
                reason: e.to_string(),
            });
        }
    } else {
        std::fs::create_dir_all(target)?;
        if let Some(parent) = mapping.logical.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(target, &mapping.logical)?;
    }
    Ok(MigrateOutcome::Migrated)
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let dest = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockSupervisor;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn mapping(logical: &Path, stop_services: bool) -> VolumeMapping {
        VolumeMapping {
            logical: logical.to_path_buf(),
            target: PathBuf::from("wybe_studio"),
            stop_services,
        }
    }

    #[tokio::test]
    async fn migrates_then_idempotent() {
        let dir = tempdir().unwrap();
        let logical = dir.path().join("data");
        std::fs::create_dir_all(logical.join("process_logs")).unwrap();
        std::fs::write(logical.join("studio.db"), "db-content").unwrap();
        std::fs::write(logical.join("process_logs/api.log"), "log").unwrap();
        let volume = dir.path().join("volume");
        std::fs::create_dir_all(&volume).unwrap();

        let sup = MockSupervisor::default();
        let m = mapping(&logical, false);

        let first = migrate_mapping(&volume, &sup, &m).await.unwrap();
        assert_eq!(first, MigrateOutcome::Migrated);
        assert!(std::fs::symlink_metadata(&logical)
            .unwrap()
            .file_type()
            .is_symlink());
        // Reads through the logical path resolve to the copy.
        assert_eq!(
            std::fs::read_to_string(logical.join("studio.db")).unwrap(),
            "db-content"
        );
        assert_eq!(
            std::fs::read_to_string(volume.join("wybe_studio/process_logs/api.log")).unwrap(),
            "log"
        );
        // The original is kept aside, never deleted.
        assert!(dir.path().join("data.bak").join("studio.db").exists());

        let second = migrate_mapping(&volume, &sup, &m).await.unwrap();
        assert_eq!(second, MigrateOutcome::AlreadyMigrated);
    }

    #[tokio::test]
    async fn absent_volume_is_a_noop() {
        let dir = tempdir().unwrap();
        let logical = dir.path().join("data");
        std::fs::create_dir_all(&logical).unwrap();

        let sup = MockSupervisor::default();
        let out = migrate_mapping(&dir.path().join("missing-volume"), &sup, &mapping(&logical, true))
            .await
            .unwrap();
        assert_eq!(out, MigrateOutcome::NoVolume);
        assert!(!std::fs::symlink_metadata(&logical)
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[tokio::test]
    async fn database_migration_stops_and_restarts_services() {
        let dir = tempdir().unwrap();
        let logical = dir.path().join("data");
        std::fs::create_dir_all(&logical).unwrap();
        std::fs::write(logical.join("studio.db"), "db").unwrap();
        let volume = dir.path().join("volume");
        std::fs::create_dir_all(&volume).unwrap();

        let sup = MockSupervisor::default();
        sup.running.store(true, Ordering::SeqCst);

        let out = migrate_mapping(&volume, &sup, &mapping(&logical, true))
            .await
            .unwrap();
        assert_eq!(out, MigrateOutcome::Migrated);
        assert_eq!(*sup.stopped.lock().unwrap(), vec!["all".to_string()]);
        assert_eq!(*sup.started.lock().unwrap(), vec!["all".to_string()]);
    }

    #[tokio::test]
    async fn missing_source_becomes_empty_volume_dir() {
        let dir = tempdir().unwrap();
        let logical = dir.path().join("data");
        let volume = dir.path().join("volume");
        std::fs::create_dir_all(&volume).unwrap();

        let sup = MockSupervisor::default();
        let out = migrate_mapping(&volume, &sup, &mapping(&logical, true))
            .await
            .unwrap();
        assert_eq!(out, MigrateOutcome::Migrated);
        assert!(volume.join("wybe_studio").is_dir());
        assert!(std::fs::symlink_metadata(&logical)
            .unwrap()
            .file_type()
            .is_symlink());
        // No services were running and nothing was copied.
        assert!(sup.stopped.lock().unwrap().is_empty());
    }
}
