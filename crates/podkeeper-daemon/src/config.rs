use anyhow::{Context, Result};
use podkeeper_core::{ClassifyRule, RuleAction};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Immutable configuration snapshot, loaded once per invocation and
/// passed explicitly to every component.
#[derive(Debug, Clone)]
pub struct PodConfig {
    /// Repository working copy the pod runs from.
    pub repo_root: PathBuf,
    /// Durable-state directory (database, logs).
    pub data_dir: PathBuf,
    pub db_file: PathBuf,
    pub env_file: PathBuf,
    pub log_dir: PathBuf,
    /// Consolidated status snapshot rewritten each health cycle.
    pub status_file: PathBuf,
    pub lock_dir: PathBuf,
    /// Persistent volume mount point; migration no-ops while absent.
    pub volume_root: PathBuf,

    pub remote: String,
    pub branch: String,
    pub backup_branch: String,
    /// Staging directory name committed to the backup branch.
    pub backup_dir: String,

    pub services: Vec<ServiceSpec>,
    pub rules: Vec<ClassifyRule>,
    pub secret_keys: Vec<String>,
    pub volume_mappings: Vec<VolumeMapping>,

    /// Argv for the full asset rebuild; empty disables the step.
    pub asset_build: Vec<String>,
    /// Argv for dependency reinstall; empty disables the step.
    pub deps_install: Vec<String>,
    pub supervisord_conf: Option<PathBuf>,

    pub probe_timeout_secs: u64,
    pub restart_grace_secs: u64,
    pub deploy_interval_secs: u64,
    pub health_interval_secs: u64,
    pub backup_interval_secs: u64,
}

/// One supervised service and its liveness endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub health_url: String,
}

/// One directory to relocate onto the persistent volume.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeMapping {
    /// Path every component keeps using after migration.
    pub logical: PathBuf,
    /// Destination, relative to the volume root.
    pub target: PathBuf,
    /// Services must not hold the contents open while it is copied
    /// (open database files).
    #[serde(default)]
    pub stop_services: bool,
}

/// CLI surface shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct ConfigFlags {
    /// Repository working copy the pod runs from.
    #[arg(long, default_value = "/root/IntelligenceLayer")]
    pub repo_root: PathBuf,

    /// Durable-state directory. Defaults to $WYBE_DATA_DIR, then
    /// ~/.wybe_studio.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// TOML config file. Defaults to <repo-root>/podkeeper.toml when
    /// that file exists.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Persistent volume mount point.
    #[arg(long, default_value = "/runpod-volume")]
    pub volume_root: PathBuf,

    /// Supervisord configuration file passed to supervisorctl -c.
    #[arg(long)]
    pub supervisord_conf: Option<PathBuf>,

    #[arg(long, default_value_t = 60)]
    pub deploy_interval_secs: u64,

    #[arg(long, default_value_t = 120)]
    pub health_interval_secs: u64,

    #[arg(long, default_value_t = 900)]
    pub backup_interval_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub probe_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub restart_grace_secs: u64,
}

/// Optional `podkeeper.toml` overrides, merged under the CLI flags.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub remote: Option<String>,
    pub branch: Option<String>,
    pub backup_branch: Option<String>,
    pub lock_dir: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub asset_build: Option<Vec<String>>,
    pub deps_install: Option<Vec<String>>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub rules: Vec<ClassifyRule>,
    #[serde(default)]
    pub secret_keys: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
    }
}

impl PodConfig {
    pub fn resolve(flags: &ConfigFlags) -> Result<PodConfig> {
        let file = match &flags.config {
            Some(path) => FileConfig::load(path)?,
            None => {
                let default = flags.repo_root.join("podkeeper.toml");
                if default.exists() {
                    FileConfig::load(&default)?
                } else {
                    FileConfig::default()
                }
            }
        };

        let data_dir = flags.data_dir.clone().unwrap_or_else(default_data_dir);
        let log_dir = file.log_dir.clone().unwrap_or_else(|| {
            std::env::var_os("WYBE_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("logs"))
        });
        let volume_mappings = if file.volumes.is_empty() {
            vec![VolumeMapping {
                logical: data_dir.clone(),
                target: PathBuf::from("wybe_studio"),
                stop_services: true,
            }]
        } else {
            file.volumes
        };

        Ok(PodConfig {
            db_file: data_dir.join("studio.db"),
            env_file: file
                .env_file
                .unwrap_or_else(|| flags.repo_root.join(".env")),
            status_file: log_dir.join("health_status.json"),
            log_dir,
            lock_dir: file
                .lock_dir
                .unwrap_or_else(|| PathBuf::from("/tmp/podkeeper-locks")),
            repo_root: flags.repo_root.clone(),
            data_dir,
            volume_root: flags.volume_root.clone(),
            remote: file.remote.unwrap_or_else(|| "origin".to_string()),
            branch: file.branch.unwrap_or_else(|| "main".to_string()),
            backup_branch: file
                .backup_branch
                .unwrap_or_else(|| "pod-backups".to_string()),
            backup_dir: "pod_backup".to_string(),
            services: if file.services.is_empty() {
                default_services()
            } else {
                file.services
            },
            rules: if file.rules.is_empty() {
                default_rules()
            } else {
                file.rules
            },
            secret_keys: if file.secret_keys.is_empty() {
                default_secret_keys()
            } else {
                file.secret_keys
            },
            volume_mappings,
            asset_build: file.asset_build.unwrap_or_else(|| {
                vec!["npm", "--prefix", "web", "run", "build"]
                    .into_iter()
                    .map(String::from)
                    .collect()
            }),
            deps_install: file.deps_install.unwrap_or_else(|| {
                vec![".venv/bin/pip", "install", "-r", "requirements.txt"]
                    .into_iter()
                    .map(String::from)
                    .collect()
            }),
            supervisord_conf: flags.supervisord_conf.clone(),
            probe_timeout_secs: flags.probe_timeout_secs,
            restart_grace_secs: flags.restart_grace_secs,
            deploy_interval_secs: flags.deploy_interval_secs,
            health_interval_secs: flags.health_interval_secs,
            backup_interval_secs: flags.backup_interval_secs,
        })
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("WYBE_DATA_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".wybe_studio")
}

pub(crate) fn default_services() -> Vec<ServiceSpec> {
    [
        ("api", "http://127.0.0.1:8000/api/health"),
        ("studio", "http://127.0.0.1:3000/"),
        ("soul", "http://127.0.0.1:8600/health"),
    ]
    .into_iter()
    .map(|(name, url)| ServiceSpec {
        name: name.to_string(),
        health_url: url.to_string(),
    })
    .collect()
}

pub(crate) fn default_rules() -> Vec<ClassifyRule> {
    vec![
        ClassifyRule::new("web/", RuleAction::RebuildAssets),
        ClassifyRule::new("requirements.txt", RuleAction::ReinstallDeps),
        ClassifyRule::new("supervisor/", RuleAction::ReloadSupervisor),
        ClassifyRule::new("api/", RuleAction::RestartService("api".into())),
        ClassifyRule::new("frontend/", RuleAction::RestartService("studio".into())),
        ClassifyRule::new("soul/", RuleAction::RestartService("soul".into())),
    ]
}

/// Recognized secret-bearing keys. Part of the backup contract: review
/// this list whenever a new secret key lands upstream.
pub(crate) fn default_secret_keys() -> Vec<String> {
    [
        "WYBE_API_KEY",
        "ANTHROPIC_API_KEY",
        "OPENAI_API_KEY",
        "HF_TOKEN",
        "HUGGINGFACE_TOKEN",
        "RUNPOD_API_KEY",
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Stable identity of this pod for snapshot metadata.
pub fn host_identity() -> String {
    for key in ["RUNPOD_POD_ID", "HOSTNAME"] {
        if let Ok(value) = std::env::var(key) {
            if !value.is_empty() {
                return value;
            }
        }
    }
    "unknown-pod".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_parses_full_example() {
        let cfg: FileConfig = toml::from_str(
            r#"
            branch = "main"
            backup_branch = "backups"
            asset_build = ["npm", "run", "build"]
            secret_keys = ["WYBE_API_KEY"]

            [[services]]
            name = "api"
            health_url = "http://127.0.0.1:8000/api/health"

            [[rules]]
            prefix = "api/"
            kind = "restart_service"
            service = "api"

            [[rules]]
            prefix = "web/"
            kind = "rebuild_assets"

            [[volumes]]
            logical = "/root/.wybe_studio"
            target = "wybe_studio"
            stop_services = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.branch.as_deref(), Some("main"));
        assert_eq!(cfg.services.len(), 1);
        assert_eq!(cfg.rules.len(), 2);
        assert_eq!(
            cfg.rules[0].action,
            RuleAction::RestartService("api".into())
        );
        assert_eq!(cfg.rules[1].action, RuleAction::RebuildAssets);
        assert!(cfg.volumes[0].stop_services);
    }

    #[test]
    fn empty_file_config_is_valid() {
        let cfg: FileConfig = toml::from_str("").unwrap();
        assert!(cfg.services.is_empty());
        assert!(cfg.branch.is_none());
    }
}
