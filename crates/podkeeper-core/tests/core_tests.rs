//! Integration tests for the core crate.

use podkeeper_core::{
    BackupOutcome, ClassifyRule, DeployOutcome, RuleAction, ServiceStatus, StatusSnapshot,
};
use std::collections::BTreeMap;

#[test]
fn test_service_status_serde() {
    let ok = ServiceStatus::Ok;
    let serialized = serde_json::to_string(&ok).unwrap();
    assert_eq!(serialized, r#""ok""#);
    let deserialized: ServiceStatus = serde_json::from_str(&serialized).unwrap();
    assert_eq!(deserialized, ok);

    let recovered = serde_json::to_string(&ServiceStatus::Recovered).unwrap();
    assert_eq!(recovered, r#""recovered""#);
}

#[test]
fn test_status_snapshot_shape() {
    let mut services = BTreeMap::new();
    services.insert("api".to_string(), ServiceStatus::Ok);
    services.insert("soul".to_string(), ServiceStatus::Failing);
    let snapshot = StatusSnapshot {
        timestamp_ms: 1_700_000_000_000,
        services,
        disk_pct: 42,
        gpu_ok: true,
    };

    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["timestamp_ms"], 1_700_000_000_000i64);
    assert_eq!(value["services"]["api"], "ok");
    assert_eq!(value["services"]["soul"], "failing");
    assert_eq!(value["disk_pct"], 42);
    assert_eq!(value["gpu_ok"], true);

    let roundtrip: StatusSnapshot = serde_json::from_value(value).unwrap();
    assert_eq!(roundtrip, snapshot);
}

#[test]
fn test_deploy_outcome_serde() {
    let gated = DeployOutcome::Gated { active_jobs: 2 };
    let value = serde_json::to_value(&gated).unwrap();
    assert_eq!(value["outcome"], "gated");
    assert_eq!(value["active_jobs"], 2);

    let up_to_date = serde_json::to_string(&DeployOutcome::UpToDate).unwrap();
    assert_eq!(up_to_date, r#"{"outcome":"up_to_date"}"#);
}

#[test]
fn test_backup_outcome_serde() {
    let committed = BackupOutcome::Committed { pushed: false };
    let value = serde_json::to_value(&committed).unwrap();
    assert_eq!(value["outcome"], "committed");
    assert_eq!(value["pushed"], false);
}

#[test]
fn test_classify_rule_serde() {
    let rule: ClassifyRule = serde_json::from_str(
        r#"{"prefix": "api/", "kind": "restart_service", "service": "api"}"#,
    )
    .unwrap();
    assert_eq!(rule.prefix, "api/");
    assert_eq!(rule.action, RuleAction::RestartService("api".into()));

    let unit: ClassifyRule =
        serde_json::from_str(r#"{"prefix": "web/", "kind": "rebuild_assets"}"#).unwrap();
    assert_eq!(unit.action, RuleAction::RebuildAssets);
}
