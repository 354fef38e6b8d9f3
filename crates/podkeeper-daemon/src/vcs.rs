use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Thin wrapper over the `git` CLI for one repository working copy.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .output()
            .await
            .with_context(|| format!("running git {args:?}"))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// Like `run`, but stdout comes back raw (file contents may be
    /// binary).
    async fn run_bytes(&self, args: &[&str]) -> Result<Vec<u8>> {
        let out = Command::new("git")
            .current_dir(&self.root)
            .args(args)
            .output()
            .await
            .with_context(|| format!("running git {args:?}"))?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(out.stdout)
    }

    pub async fn fetch(&self, remote: &str, refspec: &str) -> Result<()> {
        self.run(&["fetch", "--quiet", remote, refspec]).await?;
        Ok(())
    }

    pub async fn current_revision(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"]).await
    }

    pub async fn current_branch(&self) -> Result<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// Resolve a revision; a missing ref is `None`, not an error.
    pub async fn rev_parse(&self, rev: &str) -> Result<Option<String>> {
        let out = Command::new("git")
            .current_dir(&self.root)
            .args(["rev-parse", "--verify", "--quiet", rev])
            .output()
            .await
            .context("running git rev-parse")?;
        if !out.status.success() {
            return Ok(None);
        }
        let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok(if s.is_empty() { None } else { Some(s) })
    }

    pub async fn changed_paths(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let out = self
            .run(&["diff", "--name-only", &format!("{from}..{to}")])
            .await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Non-destructive advance of the local pointer: fails loudly on
    /// divergence instead of overwriting local commits.
    pub async fn fast_forward(&self, rev: &str) -> Result<()> {
        self.run(&["merge", "--ff-only", rev]).await?;
        Ok(())
    }

    pub async fn checkout(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", branch]).await?;
        Ok(())
    }

    /// Forced checkout: overwrites untracked leftovers from an orphan
    /// staging pass with the branch's identical tracked content.
    pub async fn checkout_forced(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", "--force", branch]).await?;
        Ok(())
    }

    pub async fn checkout_tracking(&self, branch: &str, start_point: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", "-B", branch, start_point])
            .await?;
        Ok(())
    }

    /// Create and switch to a branch with no shared history. The index
    /// is reset so nothing from the previous branch gets committed.
    pub async fn checkout_orphan(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", "--orphan", branch]).await?;
        self.run(&["reset"]).await?;
        Ok(())
    }

    /// Stage a path even when an ignore rule matches it (`.env` copies
    /// under the staging dir are commonly ignored at the repo root).
    pub async fn add_forced(&self, path: &str) -> Result<()> {
        self.run(&["add", "--force", path]).await?;
        Ok(())
    }

    /// True when the index is byte-identical to HEAD. Only meaningful
    /// when HEAD exists.
    pub async fn staged_matches_head(&self) -> Result<bool> {
        let out = Command::new("git")
            .current_dir(&self.root)
            .args(["diff", "--cached", "--quiet"])
            .output()
            .await
            .context("running git diff --cached")?;
        Ok(out.status.success())
    }

    pub async fn commit(&self, message: &str) -> Result<()> {
        self.run(&[
            "-c",
            "user.name=podkeeper",
            "-c",
            "user.email=podkeeper@localhost",
            "commit",
            "--quiet",
            "-m",
            message,
        ])
        .await?;
        Ok(())
    }

    pub async fn push_forced(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&[
            "push",
            "--quiet",
            "--force",
            remote,
            &format!("{branch}:{branch}"),
        ])
        .await?;
        Ok(())
    }

    /// Read one file out of a revision without touching the working
    /// tree.
    pub async fn show_bytes(&self, rev: &str, path: &str) -> Result<Vec<u8>> {
        self.run_bytes(&["show", &format!("{rev}:{path}")]).await
    }
}
