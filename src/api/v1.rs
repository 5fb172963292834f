use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::path::Path;
use tokio::time::Duration;
use tracing::info;

use super::error::ApiError;
use crate::{
    controller::{AppState, Status},
    domain::VoltVarConfig,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/mode", post(set_mode))
        .route("/remote", post(set_remote))
        .route("/config", get(get_config).post(update_config))
        .with_state(state)
}

pub async fn get_status(State(st): State<AppState>) -> Json<Status> {
    Json(st.controller.status())
}

#[derive(Debug, Deserialize)]
pub struct SetModeRequest {
    pub mode: String,
}

pub async fn set_mode(
    State(st): State<AppState>,
    req: Result<Json<SetModeRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = req?;
    st.controller.set_mode(&req.mode)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SetRemoteRequest {
    pub q_set_mvar: f64,
    /// Advisory; staleness is governed by fallbacks.remote_timeout_s
    #[serde(default)]
    pub ttl_s: u64,
}

pub async fn set_remote(
    State(st): State<AppState>,
    req: Result<Json<SetRemoteRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = req?;
    st.controller
        .set_remote(req.q_set_mvar, Duration::from_secs(req.ttl_s))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_config(State(st): State<AppState>) -> impl IntoResponse {
    Json((*st.controller.config()).clone())
}

/// Validate a YAML (or JSON) site config, persist it, then swap it in.
pub async fn update_config(
    State(st): State<AppState>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let cfg = VoltVarConfig::from_yaml(&body)?;

    let _guard = st.config_write.lock().await;
    persist(&st.site_config_path, &body)
        .await
        .map_err(|e| ApiError::InternalError(format!("write failed: {e}")))?;
    st.controller.update_config(cfg)?;
    info!(path = %st.site_config_path.display(), "site config persisted");
    Ok(StatusCode::NO_CONTENT)
}

/// Write to a sibling temp file and rename over the target.
async fn persist(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}
