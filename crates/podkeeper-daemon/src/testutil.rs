//! Shared fixtures for daemon tests: real-git repositories, a recording
//! mock supervisor, and a config builder over temp directories.

use crate::config::PodConfig;
use crate::supervisor::Supervisor;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let out = std::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("running git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Minimal repo fixture with identity configured.
pub fn init_repo(dir: &Path) {
    run_git(dir, &["init", "--quiet"]);
    run_git(dir, &["config", "user.email", "podkeeper@example.com"]);
    run_git(dir, &["config", "user.name", "podkeeper"]);
}

pub fn commit_file(dir: &Path, rel: &str, content: &str, message: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "--quiet", "-m", message]);
}

/// The fixture's default branch name; `git init` defaults vary.
pub fn head_branch(dir: &Path) -> String {
    run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Config over temp directories: no services, no volume, instant grace.
pub fn test_config(repo_root: &Path, scratch: &Path) -> PodConfig {
    let data_dir = scratch.join("data");
    let log_dir = scratch.join("logs");
    PodConfig {
        repo_root: repo_root.to_path_buf(),
        db_file: data_dir.join("studio.db"),
        env_file: repo_root.join(".env"),
        status_file: log_dir.join("health_status.json"),
        data_dir,
        log_dir,
        lock_dir: scratch.join("locks"),
        volume_root: scratch.join("no-volume"),
        remote: "origin".into(),
        branch: "main".into(),
        backup_branch: "pod-backups".into(),
        backup_dir: "pod_backup".into(),
        services: vec![],
        rules: crate::config::default_rules(),
        secret_keys: crate::config::default_secret_keys(),
        volume_mappings: vec![],
        asset_build: vec![],
        deps_install: vec![],
        supervisord_conf: None,
        probe_timeout_secs: 2,
        restart_grace_secs: 0,
        deploy_interval_secs: 60,
        health_interval_secs: 60,
        backup_interval_secs: 60,
    }
}

/// Records every control call; optionally flips a per-service flag on
/// restart so probe stubs can turn healthy after remediation.
#[derive(Default)]
pub struct MockSupervisor {
    pub running: AtomicBool,
    pub restarted: Mutex<Vec<String>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub recover_on_restart: Mutex<BTreeMap<String, Arc<AtomicBool>>>,
}

impl MockSupervisor {
    pub fn recover_after_restart(&self, service: &str, flag: Arc<AtomicBool>) {
        self.recover_on_restart
            .lock()
            .unwrap()
            .insert(service.to_string(), flag);
    }
}

impl Supervisor for MockSupervisor {
    async fn restart(&self, service: &str) -> Result<()> {
        self.restarted.lock().unwrap().push(service.to_string());
        if let Some(flag) = self.recover_on_restart.lock().unwrap().get(service) {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn start(&self, target: &str) -> Result<()> {
        self.started.lock().unwrap().push(target.to_string());
        Ok(())
    }

    async fn stop(&self, target: &str) -> Result<()> {
        self.stopped.lock().unwrap().push(target.to_string());
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }

    async fn status(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
