//! Build pipeline error types.
//!
//! One variant per pipeline stage. Every variant is fatal to the current
//! run; the orchestrator records its message as the build's error.

use launcher_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid build request: {0}")]
    InvalidRequest(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unsupported plugin type: no known toolchain files in {0}")]
    UnsupportedPluginType(String),

    #[error("{0} plugins are not yet supported")]
    ToolchainNotSupported(String),

    #[error("entry point not found: {0}")]
    EntryPointNotFound(String),

    #[error("dependency install failed: {0}")]
    DependencyInstall(String),

    #[error("compilation failed: {0}")]
    Compile(String),

    #[error("build artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("WASM validation error: {0}")]
    WasmValidation(String),

    #[error("checksum error: {0}")]
    Checksum(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("state transaction failed: {0}")]
    StateTransaction(String),

    #[error("invalid build state: {0}")]
    InvalidState(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("build panicked: {0}")]
    Panicked(String),
}

impl BuildError {
    /// Stable machine-readable name of the failing stage.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::InvalidRequest(_) => "invalid_request",
            BuildError::Download(_) => "download",
            BuildError::Extraction(_) => "extraction",
            BuildError::PluginNotFound(_) => "plugin_not_found",
            BuildError::InvalidManifest(_) => "invalid_manifest",
            BuildError::UnsupportedPluginType(_) => "unsupported_plugin_type",
            BuildError::ToolchainNotSupported(_) => "toolchain_not_supported",
            BuildError::EntryPointNotFound(_) => "entry_point_not_found",
            BuildError::DependencyInstall(_) => "dependency_install",
            BuildError::Compile(_) => "compile",
            BuildError::ArtifactMissing(_) => "artifact_missing",
            BuildError::WasmValidation(_) => "wasm_validation",
            BuildError::Checksum(_) => "checksum",
            BuildError::Upload(_) => "upload",
            BuildError::StateTransaction(_) => "state_transaction",
            BuildError::InvalidState(_) => "invalid_state",
            BuildError::Workspace(_) => "workspace",
            BuildError::Panicked(_) => "panicked",
        }
    }
}

impl From<sea_orm::DbErr> for BuildError {
    fn from(err: sea_orm::DbErr) -> Self {
        BuildError::StateTransaction(err.to_string())
    }
}

impl From<StorageError> for BuildError {
    fn from(err: StorageError) -> Self {
        BuildError::Upload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Display messages ──────────────────────────────────────────────

    #[test]
    fn test_display_plugin_not_found() {
        let err = BuildError::PluginNotFound("no manifest.json at 'pkg/my-plugin'".into());
        assert_eq!(
            err.to_string(),
            "plugin not found: no manifest.json at 'pkg/my-plugin'"
        );
    }

    #[test]
    fn test_display_toolchain_not_supported() {
        let err = BuildError::ToolchainNotSupported("rust".into());
        assert_eq!(err.to_string(), "rust plugins are not yet supported");
    }

    #[test]
    fn test_display_unsupported_type() {
        let err = BuildError::UnsupportedPluginType("/tmp/x".into());
        assert!(err.to_string().starts_with("unsupported plugin type"));
    }

    #[test]
    fn test_display_entry_point() {
        let err = BuildError::EntryPointNotFound("src/index.ts".into());
        assert_eq!(err.to_string(), "entry point not found: src/index.ts");
    }

    // ── From conversions ──────────────────────────────────────────────

    #[test]
    fn test_from_db_error() {
        let err: BuildError = sea_orm::DbErr::Custom("deadlock detected".into()).into();
        assert!(matches!(err, BuildError::StateTransaction(_)));
        assert!(err.to_string().contains("deadlock detected"));
    }

    #[test]
    fn test_from_storage_error() {
        let err: BuildError = StorageError::S3("PutObject failed".into()).into();
        assert!(matches!(err, BuildError::Upload(_)));
        assert_eq!(err.kind(), "upload");
    }

    #[test]
    fn test_kind_is_snake_case() {
        assert_eq!(BuildError::ArtifactMissing(String::new()).kind(), "artifact_missing");
        assert_eq!(BuildError::Panicked(String::new()).kind(), "panicked");
    }
}
