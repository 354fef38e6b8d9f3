use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use tokio::process::Command;

/// Control surface of the external process supervisor. The orchestrator
/// never touches process signals itself; everything goes through these
/// operations.
pub trait Supervisor: Send + Sync {
    /// Restart one supervised service.
    fn restart(&self, service: &str) -> impl Future<Output = Result<()>> + Send;
    /// Start a service, or every service with `"all"`.
    fn start(&self, target: &str) -> impl Future<Output = Result<()>> + Send;
    /// Stop a service, or every service with `"all"`.
    fn stop(&self, target: &str) -> impl Future<Output = Result<()>> + Send;
    /// Re-register service configurations after they changed on disk.
    fn reload(&self) -> impl Future<Output = Result<()>> + Send;
    /// Per-service state as reported by the supervisor.
    fn status(&self) -> impl Future<Output = Result<BTreeMap<String, String>>> + Send;
    /// Whether the supervisor itself is up.
    fn is_running(&self) -> impl Future<Output = bool> + Send;
}

/// `supervisorctl`-backed implementation.
#[derive(Debug, Clone)]
pub struct Supervisorctl {
    conf: Option<PathBuf>,
}

impl Supervisorctl {
    pub fn new(conf: Option<PathBuf>) -> Self {
        Self { conf }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("supervisorctl");
        if let Some(conf) = &self.conf {
            cmd.arg("-c").arg(conf);
        }
        cmd
    }

    async fn ctl(&self, args: &[&str]) -> Result<String> {
        let out = self
            .command()
            .args(args)
            .output()
            .await
            .context("running supervisorctl")?;
        if !out.status.success() {
            let detail = if out.stderr.is_empty() {
                String::from_utf8_lossy(&out.stdout).trim().to_string()
            } else {
                String::from_utf8_lossy(&out.stderr).trim().to_string()
            };
            return Err(anyhow!("supervisorctl {args:?} failed: {detail}"));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    /// Launch supervisord when it is not already up.
    pub async fn ensure_running(&self) -> Result<()> {
        if self.is_running().await {
            return Ok(());
        }
        let mut cmd = Command::new("supervisord");
        if let Some(conf) = &self.conf {
            cmd.arg("-c").arg(conf);
        }
        let status = cmd.status().await.context("launching supervisord")?;
        if !status.success() {
            return Err(anyhow!("supervisord exited with {status}"));
        }
        Ok(())
    }
}

impl Supervisor for Supervisorctl {
    async fn restart(&self, service: &str) -> Result<()> {
        self.ctl(&["restart", service]).await?;
        Ok(())
    }

    async fn start(&self, target: &str) -> Result<()> {
        self.ctl(&["start", target]).await?;
        Ok(())
    }

    async fn stop(&self, target: &str) -> Result<()> {
        self.ctl(&["stop", target]).await?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.ctl(&["reread"]).await?;
        self.ctl(&["update"]).await?;
        Ok(())
    }

    async fn status(&self) -> Result<BTreeMap<String, String>> {
        // `supervisorctl status` exits non-zero when any service is
        // down; the listing on stdout is still complete.
        let out = self
            .command()
            .arg("status")
            .output()
            .await
            .context("running supervisorctl status")?;
        Ok(parse_status(&String::from_utf8_lossy(&out.stdout)))
    }

    async fn is_running(&self) -> bool {
        self.ctl(&["pid"]).await.is_ok()
    }
}

fn parse_status(out: &str) -> BTreeMap<String, String> {
    out.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let state = parts.next()?;
            Some((name.to_string(), state.to_string()))
        })
        .collect()
}
