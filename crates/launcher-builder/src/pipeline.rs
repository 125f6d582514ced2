//! The build orchestrator.
//!
//! [`BuildPipeline::run`] drives one build id through every stage in order:
//! fetch, extract, locate, manifest, detect, build, finalize, upload,
//! promote. The first failing stage short-circuits the rest and the build
//! is recorded as failed. The workspace is removed on every exit path,
//! including a panic inside a stage.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use launcher_db::entities::{plugin_version, BuildStatus};
use launcher_storage::{ArtifactStorage, StoredArtifact};
use uuid::Uuid;

use crate::artifact::{self, ArtifactInfo};
use crate::builder::{BuilderRegistry, ARTIFACT_FILE_NAME};
use crate::config::BuilderConfig;
use crate::detect::{detect_type, PluginType};
use crate::error::BuildError;
use crate::extract::extract;
use crate::fetch::ArchiveFetcher;
use crate::locate::locate_plugin_root;
use crate::log::BuildLog;
use crate::manifest::PluginManifest;
use crate::request::BuildRequest;
use crate::state::{BuildStore, NewVersion};
use crate::workspace::Workspace;

/// Failure message for builds cut off by a worker restart.
pub const INTERRUPTED_MESSAGE: &str = "build interrupted by worker restart";

/// Everything the stages produced, ready for promotion.
struct StagedArtifact {
    manifest: PluginManifest,
    artifact: ArtifactInfo,
    stored: StoredArtifact,
}

pub struct BuildPipeline {
    config: BuilderConfig,
    fetcher: ArchiveFetcher,
    registry: BuilderRegistry,
    storage: Arc<dyn ArtifactStorage>,
    store: Arc<dyn BuildStore>,
}

impl BuildPipeline {
    pub fn new(
        config: BuilderConfig,
        storage: Arc<dyn ArtifactStorage>,
        store: Arc<dyn BuildStore>,
    ) -> Result<Self, BuildError> {
        let fetcher = ArchiveFetcher::new(
            config.download_timeout,
            config.max_archive_size,
            config.allow_insecure_urls,
        )?;
        let registry = BuilderRegistry::with_defaults(&config);
        Ok(Self {
            config,
            fetcher,
            registry,
            storage,
            store,
        })
    }

    /// Replace the builder registry.
    pub fn with_registry(mut self, registry: BuilderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BuildStore> {
        &self.store
    }

    /// Run the build `build_id`, which must have been accepted and still be
    /// `pending`.
    ///
    /// Returns the published version on success. On failure the build
    /// record is already marked failed when this returns, except when the
    /// build could not be started at all (`InvalidState`), in which case
    /// nothing was touched.
    pub async fn run(
        &self,
        build_id: Uuid,
        request: &BuildRequest,
    ) -> Result<plugin_version::Model, BuildError> {
        let mut log = BuildLog::new(build_id);
        log.push(format!(
            "Building plugin {} version {}",
            request.plugin_id, request.target_version
        ));
        log.push(format!("Release tag: {}", request.release_tag));
        if let Some(ref path) = request.plugin_path {
            log.push(format!("Plugin path: {path}"));
        }
        if request.is_prerelease {
            log.push("Prerelease: will not become the latest version");
        }

        self.store.mark_building(build_id, log.lines()).await?;
        tracing::info!(
            build_id = %build_id,
            plugin_id = %request.plugin_id,
            version = %request.target_version,
            "build started"
        );

        let mut workspace = match Workspace::create(&self.config.workspace_root, build_id).await {
            Ok(ws) => ws,
            Err(e) => return Err(self.fail(build_id, e, log).await),
        };

        let staged = AssertUnwindSafe(self.execute(&workspace, request, &mut log))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(BuildError::Panicked(panic_message(payload.as_ref()))));

        workspace.cleanup().await;

        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => return Err(self.fail(build_id, e, log).await),
        };

        log.push(format!(
            "Publishing version {} (latest: {})",
            request.target_version, !request.is_prerelease
        ));
        let new_version = NewVersion {
            plugin_id: request.plugin_id,
            version: request.target_version.clone(),
            download_url: staged.stored.download_url.clone(),
            checksum: staged.artifact.checksum.clone(),
            file_size: staged.artifact.size,
            permissions: staged.manifest.permissions.clone(),
            ai_tool_schemas: staged.manifest.ai_tool_schemas.clone(),
            min_launcher_version: staged.manifest.min_launcher_version.clone(),
            changelog: request.changelog.clone(),
            release_tag: request.release_tag.clone(),
            is_prerelease: request.is_prerelease,
        };

        let mut final_log = log.clone();
        final_log.push("Build succeeded");
        match self
            .store
            .complete_success(build_id, new_version, final_log.lines())
            .await
        {
            Ok(version) => {
                tracing::info!(
                    build_id = %build_id,
                    version_id = %version.id,
                    checksum = %version.checksum,
                    "build succeeded"
                );
                Ok(version)
            }
            Err(e) => {
                // The version row was never committed; don't leave its
                // artifact behind.
                if let Err(delete_err) = self.storage.delete(&staged.stored.key).await {
                    tracing::warn!(
                        build_id = %build_id,
                        key = %staged.stored.key,
                        error = %delete_err,
                        "failed to delete orphaned artifact"
                    );
                }
                Err(self.fail(build_id, e, log).await)
            }
        }
    }

    /// Settle records left unfinished by a previous worker process.
    ///
    /// `building` records can never complete and are marked failed.
    /// `pending` records were never started; their requests are returned
    /// so the caller can schedule them again.
    pub async fn recover_interrupted(&self) -> Result<Vec<(Uuid, BuildRequest)>, BuildError> {
        let mut requeue = Vec::new();
        for build in self.store.unfinished_builds().await? {
            match build.build_status() {
                Some(BuildStatus::Building) => {
                    let mut log = build.log_lines();
                    log.push(format!("ERROR: {INTERRUPTED_MESSAGE}"));
                    self.store
                        .mark_failed(build.id, INTERRUPTED_MESSAGE, &log)
                        .await?;
                    tracing::warn!(build_id = %build.id, "interrupted build marked failed");
                }
                Some(BuildStatus::Pending) => {
                    tracing::info!(build_id = %build.id, "requeueing pending build");
                    requeue.push((build.id, BuildRequest::from(&build)));
                }
                _ => {}
            }
        }
        Ok(requeue)
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        request: &BuildRequest,
        log: &mut BuildLog,
    ) -> Result<StagedArtifact, BuildError> {
        // Library callers may skip intake validation; the plugin path in
        // particular must never escape the extracted tree.
        request.validate(self.config.allow_insecure_urls)?;

        log.push(format!("Downloading {}", request.archive_url));
        let archive = workspace.archive_path();
        let bytes = self
            .fetcher
            .fetch(&request.archive_url, &archive, request.auth_token.as_deref())
            .await?;
        log.push(format!("Downloaded {bytes} bytes"));

        let extract_dir = workspace.extract_dir();
        let root = extract(&archive, &extract_dir, self.config.max_extracted_size).await?;
        log.push(format!("Extracted archive root: {}", display_name(&root)));

        let plugin_dir = locate_plugin_root(&root, request.plugin_path.as_deref()).await?;
        log.push(format!(
            "Plugin root: {}",
            relative_display(&plugin_dir, &root)
        ));

        let manifest = PluginManifest::load(&plugin_dir).await?;
        log.push(format!("Manifest: {} {}", manifest.name, manifest.version));
        if manifest.version != request.target_version {
            log.warn(format!(
                "manifest version {} differs from release version {}",
                manifest.version, request.target_version
            ));
        }

        let plugin_type = detect_type(&plugin_dir).await;
        log.push(format!("Detected plugin type: {plugin_type}"));
        if plugin_type == PluginType::Unknown {
            return Err(BuildError::UnsupportedPluginType(relative_display(
                &plugin_dir,
                &root,
            )));
        }
        let builder = self.registry.get(plugin_type)?;

        let artifact_path = builder.build(&plugin_dir, &manifest, log).await?;

        let artifact = artifact::finalize(&artifact_path, self.config.max_wasm_size).await?;
        log.push(format!(
            "Artifact: {} bytes, sha256 {}",
            artifact.size, artifact.checksum
        ));

        let stored = self
            .storage
            .upload(
                request.plugin_id,
                &request.target_version,
                &artifact.bytes,
                ARTIFACT_FILE_NAME,
            )
            .await?;
        log.push(format!("Uploaded to {}", stored.download_url));

        Ok(StagedArtifact {
            manifest,
            artifact,
            stored,
        })
    }

    /// Record the failure and hand the error back to the caller.
    async fn fail(&self, build_id: Uuid, error: BuildError, mut log: BuildLog) -> BuildError {
        log.push(format!("ERROR: {error}"));
        tracing::warn!(build_id = %build_id, kind = error.kind(), error = %error, "build failed");

        if let Err(state_err) = self
            .store
            .mark_failed(build_id, &error.to_string(), log.lines())
            .await
        {
            tracing::error!(
                build_id = %build_id,
                error = %state_err,
                "failed to record build failure"
            );
        }
        error
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn relative_display(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(boxed.as_ref()), "kaboom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_relative_display() {
        let root = Path::new("/ws/src/repo-abc");
        assert_eq!(relative_display(root, root), ".");
        assert_eq!(
            relative_display(&root.join("pkg/my-plugin"), root),
            "pkg/my-plugin"
        );
    }
}
