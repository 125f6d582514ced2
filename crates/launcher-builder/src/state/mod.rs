//! Build record state machine and version promotion.
//!
//! A build record moves `pending -> building -> {success, failed}` and is
//! written exactly three times. Success is a single atomic unit: supersede
//! the previous latest version, insert the new version, refresh the plugin
//! summary and close the build record.

mod memory;
mod sea_orm_store;

use async_trait::async_trait;
use launcher_db::entities::{plugin, plugin_build, plugin_version, BuildStatus};
use uuid::Uuid;

use crate::error::BuildError;
use crate::request::BuildRequest;

pub use memory::MemoryBuildStore;
pub use sea_orm_store::SeaOrmBuildStore;

/// Fields of the version row created when a build succeeds.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub plugin_id: Uuid,
    pub version: String,
    pub download_url: String,
    pub checksum: String,
    pub file_size: u64,
    pub permissions: Vec<serde_json::Value>,
    pub ai_tool_schemas: serde_json::Value,
    pub min_launcher_version: Option<String>,
    pub changelog: Option<String>,
    pub release_tag: String,
    pub is_prerelease: bool,
}

#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Create the `pending` record for an accepted request.
    async fn accept_build(
        &self,
        build_id: Uuid,
        request: &BuildRequest,
    ) -> Result<plugin_build::Model, BuildError>;

    /// `pending -> building`. Fails with `InvalidState` and changes nothing
    /// if the record is in any other state.
    async fn mark_building(&self, build_id: Uuid, log: &[String]) -> Result<(), BuildError>;

    /// `building -> success` together with version promotion, atomically.
    async fn complete_success(
        &self,
        build_id: Uuid,
        version: NewVersion,
        log: &[String],
    ) -> Result<plugin_version::Model, BuildError>;

    /// `building -> failed`. No plugin or version rows are touched.
    async fn mark_failed(
        &self,
        build_id: Uuid,
        error_message: &str,
        log: &[String],
    ) -> Result<(), BuildError>;

    async fn get_build(&self, build_id: Uuid) -> Result<Option<plugin_build::Model>, BuildError>;

    /// Records still `pending` or `building`, oldest first.
    async fn unfinished_builds(&self) -> Result<Vec<plugin_build::Model>, BuildError>;

    async fn get_plugin(&self, plugin_id: Uuid) -> Result<Option<plugin::Model>, BuildError>;

    /// All versions of a plugin, oldest first.
    async fn versions_for_plugin(
        &self,
        plugin_id: Uuid,
    ) -> Result<Vec<plugin_version::Model>, BuildError>;
}

/// Check a transition against the record's current status.
pub(crate) fn check_transition(
    build: &plugin_build::Model,
    next: BuildStatus,
) -> Result<(), BuildError> {
    let current = build.build_status().ok_or_else(|| {
        BuildError::InvalidState(format!(
            "build {} has unknown status '{}'",
            build.id, build.status
        ))
    })?;
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(BuildError::InvalidState(format!(
            "build {} cannot move from {current} to {next}",
            build.id
        )))
    }
}

pub(crate) fn logs_json(log: &[String]) -> serde_json::Value {
    serde_json::Value::from(log.to_vec())
}

pub(crate) fn file_size_i64(size: u64) -> Result<i64, BuildError> {
    i64::try_from(size)
        .map_err(|_| BuildError::Checksum(format!("artifact size {size} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_with_status(status: &str) -> plugin_build::Model {
        let now = chrono::Utc::now().fixed_offset();
        plugin_build::Model {
            id: Uuid::new_v4(),
            plugin_id: Uuid::new_v4(),
            version: "1.0.0".into(),
            release_tag: "v1.0.0".into(),
            archive_url: "https://example.com/a.tar.gz".into(),
            plugin_path: None,
            is_prerelease: false,
            changelog: None,
            status: status.into(),
            logs: serde_json::json!([]),
            error_message: None,
            version_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_check_transition() {
        assert!(check_transition(&build_with_status("pending"), BuildStatus::Building).is_ok());
        let err =
            check_transition(&build_with_status("success"), BuildStatus::Building).unwrap_err();
        assert!(matches!(err, BuildError::InvalidState(_)));
        assert!(err.to_string().contains("from success to building"));
    }

    #[test]
    fn test_unknown_status_is_invalid_state() {
        let err = check_transition(&build_with_status("queued"), BuildStatus::Building).unwrap_err();
        assert!(err.to_string().contains("unknown status"));
    }

    #[test]
    fn test_logs_json_is_array_of_strings() {
        let json = logs_json(&["a".to_string(), "b".to_string()]);
        assert_eq!(json, serde_json::json!(["a", "b"]));
    }
}
