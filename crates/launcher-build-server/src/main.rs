use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use launcher_build_server::{app, resume_unfinished, AppState, DEFAULT_MAX_CONCURRENT_BUILDS};
use launcher_builder::{BuildPipeline, BuilderConfig, SeaOrmBuildStore};
use launcher_storage::{ArtifactStorage, LocalArtifactStorage, S3ArtifactStorage, StorageError};
use sea_orm_migration::MigratorTrait;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Selected by `ARTIFACT_STORAGE_BACKEND`. The directory is set for the
/// local backend so the server can expose it under `/artifacts`.
fn artifact_storage() -> Result<(Arc<dyn ArtifactStorage>, Option<PathBuf>), StorageError> {
    let backend = std::env::var("ARTIFACT_STORAGE_BACKEND").unwrap_or_default();
    match backend.trim().to_ascii_lowercase().as_str() {
        "s3" => {
            let s3 = S3ArtifactStorage::from_env()?;
            tracing::info!("artifact storage: s3");
            Ok((Arc::new(s3), None))
        }
        "" | "local" => {
            let local = LocalArtifactStorage::from_env();
            tracing::info!(path = %local.base().display(), "artifact storage: local");
            let dir = local.base().to_path_buf();
            Ok((Arc::new(local), Some(dir)))
        }
        other => Err(StorageError::Config(format!(
            "unknown ARTIFACT_STORAGE_BACKEND '{other}' (expected 'local' or 's3')"
        ))),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let db = launcher_db::connect(&launcher_db::DatabaseConfig::from_env())
        .await
        .expect("failed to connect to database");
    launcher_migration::Migrator::up(&db, None)
        .await
        .expect("failed to apply migrations");
    tracing::info!("database ready");

    let (storage, artifact_dir) = artifact_storage().expect("invalid artifact storage config");

    let config = BuilderConfig::from_env();
    tracing::info!(
        workspace_root = %config.workspace_root.display(),
        install_timeout_secs = config.install_timeout.as_secs(),
        compile_timeout_secs = config.compile_timeout.as_secs(),
        "build pipeline configured"
    );
    if config.allow_insecure_urls {
        tracing::warn!("BUILD_ALLOW_INSECURE_URLS is set; plain HTTP archive URLs are accepted");
    }

    let pipeline = BuildPipeline::new(config, storage, Arc::new(SeaOrmBuildStore::new(db)))
        .expect("failed to create build pipeline");

    let max_concurrent =
        env_parse("BUILD_MAX_CONCURRENT").unwrap_or(DEFAULT_MAX_CONCURRENT_BUILDS);
    let addr = env_parse::<SocketAddr>("BUILD_SERVER_ADDR")
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

    let state = AppState::new(pipeline, max_concurrent);
    let resumed = resume_unfinished(&state)
        .await
        .expect("failed to recover unfinished builds");
    tracing::info!(resumed, "unfinished builds settled");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind listen address");
    tracing::info!(%addr, max_concurrent, "build server listening");

    axum::serve(listener, app(state, artifact_dir))
        .await
        .expect("server error");
}
