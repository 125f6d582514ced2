//! Build worker HTTP surface.
//!
//! The release orchestrator submits build requests here; builds run in the
//! background on a bounded worker pool and their records are read back by
//! id.

pub mod api;

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use launcher_builder::{BuildError, BuildPipeline, BuildRequest, BuildStore};
use serde::Serialize;
use tokio::sync::Semaphore;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Default number of builds allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_BUILDS: usize = 4;

pub struct AppState {
    pub store: Arc<dyn BuildStore>,
    pub pipeline: Arc<BuildPipeline>,
    /// One permit per running build.
    pub workers: Arc<Semaphore>,
}

impl AppState {
    pub fn new(pipeline: BuildPipeline, max_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            store: pipeline.store().clone(),
            pipeline: Arc::new(pipeline),
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }
}

/// Run an accepted build in the background once a worker slot frees up.
pub fn schedule(state: &Arc<AppState>, build_id: Uuid, request: BuildRequest) {
    let pipeline = state.pipeline.clone();
    let workers = state.workers.clone();
    tokio::spawn(async move {
        let _permit = match workers.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!(build_id = %build_id, "worker pool closed, build not started");
                return;
            }
        };
        if let Err(e) = pipeline.run(build_id, &request).await {
            tracing::debug!(build_id = %build_id, kind = e.kind(), "build run ended with error");
        }
    });
}

/// Settle builds a previous process left unfinished and schedule the ones
/// that never started. Returns how many were scheduled.
pub async fn resume_unfinished(state: &Arc<AppState>) -> Result<usize, BuildError> {
    let requeue = state.pipeline.recover_interrupted().await?;
    let count = requeue.len();
    for (build_id, request) in requeue {
        schedule(state, build_id, request);
    }
    Ok(count)
}

#[derive(Serialize)]
struct ApiStatus {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the router. `artifact_dir` serves locally stored artifacts under
/// `/artifacts` when the local storage backend is in use.
pub fn app(state: Arc<AppState>, artifact_dir: Option<PathBuf>) -> Router {
    let api_routes = Router::new()
        .route("/builds", post(api::builds::submit_build))
        .route("/builds/{id}", get(api::builds::get_build));

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api_routes);

    if let Some(dir) = artifact_dir {
        router = router.nest_service("/artifacts", ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
