use thiserror::Error;

/// Failures that abort one deploy invocation. Skips (contention, active
/// training jobs, nothing new) are outcomes, not errors.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Remote interaction failed; retried on the next tick.
    #[error("fetching from remote failed: {0}")]
    Fetch(String),
    #[error("repository query failed: {0}")]
    Vcs(String),
    #[error("lease acquisition failed: {0}")]
    Lock(String),
    /// The active-jobs gate could not be read; deploying past an
    /// unreadable gate is not allowed.
    #[error("active-jobs query failed: {0}")]
    Gate(String),
    /// Aborts the deploy with the previous revision still running.
    #[error("asset rebuild failed: {0}")]
    AssetBuild(String),
    /// Aborts the deploy with the previous revision still running.
    #[error("dependency install failed: {0}")]
    DependencyInstall(String),
    /// The local branch diverged from the remote; never overwritten.
    #[error("fast-forward to {revision} failed: {reason}")]
    FastForward { revision: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("no backup branch on the remote; nothing to restore")]
    NothingToRestore,
    #[error("fetching the backup branch failed: {0}")]
    Fetch(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MigrateError {
    /// The copy finished but the redirect could not be created: data now
    /// exists at both `copy` and `backup`, and future writes would
    /// diverge. Left for manual intervention, never auto-retried.
    #[error(
        "copy completed but creating the redirect at {logical} failed: {reason}; \
         copied data is at {copy}, the original was kept at {backup}"
    )]
    RedirectFailed {
        logical: String,
        copy: String,
        backup: String,
        reason: String,
    },
    #[error("stopping services for migration failed: {0}")]
    ServiceStop(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
