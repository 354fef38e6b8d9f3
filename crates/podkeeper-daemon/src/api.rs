use crate::config::PodConfig;
use crate::lock::LockManager;
use crate::supervisor::Supervisorctl;
use crate::{backup, deploy};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use podkeeper_core::{BackupOutcome, DeployOutcome, StatusSnapshot};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PodConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .route("/v1/deploy", post(trigger_deploy))
        .route("/v1/backup", post(trigger_backup))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Latest consolidated snapshot. 404 until the first monitor cycle has
/// written one; consumers treat that as "unknown".
async fn status(State(state): State<AppState>) -> Result<Json<StatusSnapshot>, StatusCode> {
    let bytes =
        std::fs::read(&state.config.status_file).map_err(|_| StatusCode::NOT_FOUND)?;
    let snapshot =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(snapshot))
}

/// Fire one deploy cycle immediately. Contention with a scheduled tick
/// resolves through the lease, same as any other invocation.
async fn trigger_deploy(
    State(state): State<AppState>,
) -> Result<Json<DeployOutcome>, (StatusCode, String)> {
    let locks = LockManager::new(&state.config.lock_dir);
    let sup = Supervisorctl::new(state.config.supervisord_conf.clone());
    deploy::run_deploy_cycle(&state.config, &locks, &sup)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("manual deploy failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

async fn trigger_backup(
    State(state): State<AppState>,
) -> Result<Json<BackupOutcome>, (StatusCode, String)> {
    let locks = LockManager::new(&state.config.lock_dir);
    backup::run_backup_cycle(&state.config, &locks)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("manual backup failed: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_config;
    use podkeeper_core::ServiceStatus;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn status_is_not_found_before_first_cycle() {
        let dir = tempdir().unwrap();
        let state = AppState {
            config: Arc::new(test_config(dir.path(), dir.path())),
        };
        let err = status(State(state)).await.unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_serves_the_snapshot_file() {
        let dir = tempdir().unwrap();
        let config = Arc::new(test_config(dir.path(), dir.path()));

        let mut services = BTreeMap::new();
        services.insert("api".to_string(), ServiceStatus::Ok);
        let snapshot = StatusSnapshot {
            timestamp_ms: 1,
            services,
            disk_pct: 10,
            gpu_ok: false,
        };
        std::fs::create_dir_all(config.status_file.parent().unwrap()).unwrap();
        std::fs::write(
            &config.status_file,
            serde_json::to_vec(&snapshot).unwrap(),
        )
        .unwrap();

        let Json(served) = status(State(AppState { config })).await.unwrap();
        assert_eq!(served, snapshot);
    }
}
