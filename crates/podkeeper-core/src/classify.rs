use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a matched path asks the deploy poller to do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "service")]
pub enum RuleAction {
    /// Full web-asset rebuild; failure aborts the whole deploy.
    RebuildAssets,
    /// Reinstall dependencies; failure aborts the whole deploy.
    ReinstallDeps,
    /// Restart the owning service only, no rebuild.
    RestartService(String),
    /// Re-register service configurations with the supervisor.
    ReloadSupervisor,
}

/// One ordered entry of the change-classification table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifyRule {
    /// Path prefix relative to the repository root. A prefix naming a
    /// file (e.g. `requirements.txt`) matches that file itself.
    pub prefix: String,
    #[serde(flatten)]
    pub action: RuleAction,
}

impl ClassifyRule {
    pub fn new(prefix: impl Into<String>, action: RuleAction) -> Self {
        Self {
            prefix: prefix.into(),
            action,
        }
    }
}

/// Everything one deploy has to do, derived from the changed-path set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployPlan {
    pub rebuild_assets: bool,
    pub reinstall_deps: bool,
    pub restart: BTreeSet<String>,
    pub reload_supervisor: bool,
}

impl DeployPlan {
    pub fn is_empty(&self) -> bool {
        !self.rebuild_assets
            && !self.reinstall_deps
            && !self.reload_supervisor
            && self.restart.is_empty()
    }

    /// Build-type actions must complete before the revision pointer moves.
    pub fn has_build_actions(&self) -> bool {
        self.rebuild_assets || self.reinstall_deps
    }
}

/// Classify a changed-path set against an ordered rule table.
///
/// The first rule whose prefix matches a path claims that path; paths
/// matching no rule contribute no action.
pub fn classify(rules: &[ClassifyRule], changed_paths: &[String]) -> DeployPlan {
    let mut plan = DeployPlan::default();
    for path in changed_paths {
        let Some(rule) = rules.iter().find(|r| path.starts_with(&r.prefix)) else {
            continue;
        };
        match &rule.action {
            RuleAction::RebuildAssets => plan.rebuild_assets = true,
            RuleAction::ReinstallDeps => plan.reinstall_deps = true,
            RuleAction::RestartService(name) => {
                plan.restart.insert(name.clone());
            }
            RuleAction::ReloadSupervisor => plan.reload_supervisor = true,
        }
    }
    plan
}
