use anyhow::{anyhow, Context, Result};
use nix::fcntl::{Flock, FlockArg};
use podkeeper_core::now_ms;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Named, non-blocking advisory leases backed by OS file locks.
///
/// The kernel drops a flock when the holding process exits, by any
/// means, so a crashed holder never wedges a lease and no cleanup step
/// exists.
pub struct LockManager {
    dir: PathBuf,
}

/// A held lease. Dropping it (or the holding process exiting) releases
/// the lock.
pub struct Lease {
    name: String,
    _lock: Flock<File>,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Non-blocking acquire. `Ok(None)` means another live holder
    /// exists; callers treat that as "skip this cycle", not as an error.
    pub fn try_acquire(&self, name: &str) -> Result<Option<Lease>> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating lock dir {}", self.dir.display()))?;
        let path = self.dir.join(format!("{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock file {}", path.display()))?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(mut lock) => {
                // Holder metadata is informational only; the flock itself
                // is the authoritative state.
                lock.set_len(0).ok();
                writeln!(
                    &mut *lock,
                    "pid={} acquired_at_ms={}",
                    std::process::id(),
                    now_ms()
                )
                .ok();
                Ok(Some(Lease {
                    name: name.to_string(),
                    _lock: lock,
                }))
            }
            Err((_, errno)) if errno == nix::errno::Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(anyhow!("flock {}: {errno}", path.display())),
        }
    }

    /// Zero-wait test: is `name` currently held by someone else? The
    /// probe acquires and immediately releases without ever waiting.
    pub fn is_locked(&self, name: &str) -> Result<bool> {
        Ok(self.try_acquire(name)?.is_none())
    }
}

impl Lease {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicit release; dropping the lease has the same effect.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new(dir.path());

        let first = locks.try_acquire("deploy").unwrap();
        assert!(first.is_some());
        assert!(locks.try_acquire("deploy").unwrap().is_none());

        drop(first);
        assert!(locks.try_acquire("deploy").unwrap().is_some());
    }

    #[test]
    fn distinct_names_do_not_contend() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new(dir.path());

        let deploy = locks.try_acquire("deploy").unwrap();
        let backup = locks.try_acquire("backup").unwrap();
        assert!(deploy.is_some());
        assert!(backup.is_some());
    }

    #[test]
    fn is_locked_reports_without_holding() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new(dir.path());

        assert!(!locks.is_locked("deploy").unwrap());
        let lease = locks.try_acquire("deploy").unwrap();
        assert!(locks.is_locked("deploy").unwrap());
        drop(lease);
        // The probe itself must not leave the lease held.
        assert!(!locks.is_locked("deploy").unwrap());
        assert!(locks.try_acquire("deploy").unwrap().is_some());
    }

    #[test]
    fn explicit_release_frees_the_lease() {
        let dir = tempdir().unwrap();
        let locks = LockManager::new(dir.path());

        let lease = locks.try_acquire("backup").unwrap().unwrap();
        assert_eq!(lease.name(), "backup");
        lease.release();
        assert!(locks.try_acquire("backup").unwrap().is_some());
    }
}
