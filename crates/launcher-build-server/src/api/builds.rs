//! Build intake and read-back endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use launcher_builder::BuildRequest;
use launcher_db::entities::plugin_build;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{build_error_response, error_response, ApiError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitBuildRequest {
    /// Caller-chosen id; generated when absent.
    #[serde(default)]
    pub build_id: Option<Uuid>,
    #[serde(flatten)]
    pub request: BuildRequest,
}

#[derive(Debug, Serialize)]
pub struct SubmitBuildResponse {
    pub build_id: Uuid,
    pub status: &'static str,
}

/// POST /api/builds — Accept a build request and schedule it.
pub async fn submit_build(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitBuildRequest>,
) -> Result<(StatusCode, Json<SubmitBuildResponse>), ApiError> {
    let SubmitBuildRequest { build_id, request } = body;
    let build_id = build_id.unwrap_or_else(Uuid::new_v4);

    request
        .validate(state.pipeline.config().allow_insecure_urls)
        .map_err(|e| build_error_response(&e))?;

    let plugin = state.store.get_plugin(request.plugin_id).await.map_err(|e| {
        tracing::error!(plugin_id = %request.plugin_id, "failed to load plugin: {e}");
        build_error_response(&e)
    })?;
    if plugin.is_none() {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("plugin {} not found", request.plugin_id),
        ));
    }

    state
        .store
        .accept_build(build_id, &request)
        .await
        .map_err(|e| build_error_response(&e))?;

    crate::schedule(&state, build_id, request);

    tracing::info!(build_id = %build_id, "build scheduled");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitBuildResponse {
            build_id,
            status: "pending",
        }),
    ))
}

/// GET /api/builds/{id} — Read a build record.
pub async fn get_build(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<plugin_build::Model>, ApiError> {
    match state.store.get_build(id).await {
        Ok(Some(build)) => Ok(Json(build)),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("build {id} not found"),
        )),
        Err(e) => {
            tracing::error!(build_id = %id, "failed to load build: {e}");
            Err(build_error_response(&e))
        }
    }
}
