//! In-memory [`BuildStore`] for tests and local runs without a database.
//!
//! One mutex guards all three tables, so promotion is trivially atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use launcher_db::entities::{plugin, plugin_build, plugin_version, BuildStatus, PluginStatus};
use uuid::Uuid;

use super::{check_transition, file_size_i64, logs_json, BuildStore, NewVersion};
use crate::error::BuildError;
use crate::request::BuildRequest;

#[derive(Debug, Default)]
struct Tables {
    plugins: HashMap<Uuid, plugin::Model>,
    versions: Vec<plugin_version::Model>,
    builds: HashMap<Uuid, plugin_build::Model>,
    fail_next_promotion: bool,
}

#[derive(Debug, Default)]
pub struct MemoryBuildStore {
    tables: Mutex<Tables>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, BuildError> {
        self.tables
            .lock()
            .map_err(|_| BuildError::StateTransaction("build store lock poisoned".into()))
    }

    /// Seed a plugin row in `draft` status and return its id.
    pub fn insert_plugin(&self, name: &str) -> Result<Uuid, BuildError> {
        let now = Utc::now().fixed_offset();
        let model = plugin::Model {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: PluginStatus::Draft.as_str().to_string(),
            current_version: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        };
        let id = model.id;
        self.lock()?.plugins.insert(id, model);
        Ok(id)
    }

    /// Make the next `complete_success` fail as if the transaction aborted.
    pub fn fail_next_promotion(&self) -> Result<(), BuildError> {
        self.lock()?.fail_next_promotion = true;
        Ok(())
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn accept_build(
        &self,
        build_id: Uuid,
        request: &BuildRequest,
    ) -> Result<plugin_build::Model, BuildError> {
        let mut tables = self.lock()?;
        if !tables.plugins.contains_key(&request.plugin_id) {
            return Err(BuildError::StateTransaction(format!(
                "plugin {} does not exist",
                request.plugin_id
            )));
        }
        if tables.builds.contains_key(&build_id) {
            return Err(BuildError::InvalidState(format!(
                "build {build_id} already exists"
            )));
        }

        let model = plugin_build::Model {
            id: build_id,
            plugin_id: request.plugin_id,
            version: request.target_version.clone(),
            release_tag: request.release_tag.clone(),
            archive_url: request.archive_url.clone(),
            plugin_path: request.plugin_path.clone(),
            is_prerelease: request.is_prerelease,
            changelog: request.changelog.clone(),
            status: BuildStatus::Pending.as_str().to_string(),
            logs: logs_json(&[]),
            error_message: None,
            version_id: None,
            created_at: Utc::now().fixed_offset(),
            started_at: None,
            completed_at: None,
        };
        tables.builds.insert(build_id, model.clone());
        Ok(model)
    }

    async fn mark_building(&self, build_id: Uuid, log: &[String]) -> Result<(), BuildError> {
        let mut tables = self.lock()?;
        let build = tables
            .builds
            .get_mut(&build_id)
            .ok_or_else(|| BuildError::InvalidState(format!("build {build_id} not found")))?;
        check_transition(build, BuildStatus::Building)?;

        build.status = BuildStatus::Building.as_str().to_string();
        build.started_at = Some(Utc::now().fixed_offset());
        build.logs = logs_json(log);
        Ok(())
    }

    async fn complete_success(
        &self,
        build_id: Uuid,
        version: NewVersion,
        log: &[String],
    ) -> Result<plugin_version::Model, BuildError> {
        let mut tables = self.lock()?;
        if std::mem::take(&mut tables.fail_next_promotion) {
            return Err(BuildError::StateTransaction(
                "simulated transaction failure".into(),
            ));
        }

        // Validate everything before the first write.
        let build = tables
            .builds
            .get(&build_id)
            .ok_or_else(|| BuildError::InvalidState(format!("build {build_id} not found")))?;
        check_transition(build, BuildStatus::Success)?;
        if !tables.plugins.contains_key(&version.plugin_id) {
            return Err(BuildError::StateTransaction(format!(
                "plugin {} does not exist",
                version.plugin_id
            )));
        }
        if tables
            .versions
            .iter()
            .any(|v| v.plugin_id == version.plugin_id && v.version == version.version)
        {
            return Err(BuildError::StateTransaction(format!(
                "version {} already exists for plugin {}",
                version.version, version.plugin_id
            )));
        }
        let file_size = file_size_i64(version.file_size)?;
        let now = Utc::now().fixed_offset();

        if !version.is_prerelease {
            for existing in tables
                .versions
                .iter_mut()
                .filter(|v| v.plugin_id == version.plugin_id && v.is_latest)
            {
                existing.is_latest = false;
            }
        }

        let model = plugin_version::Model {
            id: Uuid::new_v4(),
            plugin_id: version.plugin_id,
            version: version.version.clone(),
            download_url: version.download_url,
            checksum: version.checksum,
            file_size,
            permissions: serde_json::Value::from(version.permissions),
            ai_tool_schemas: version.ai_tool_schemas,
            min_launcher_version: version.min_launcher_version,
            changelog: version.changelog,
            release_tag: Some(version.release_tag),
            build_id: Some(build_id),
            is_latest: !version.is_prerelease,
            is_prerelease: version.is_prerelease,
            published_at: now,
        };
        tables.versions.push(model.clone());

        if let Some(plugin) = tables.plugins.get_mut(&version.plugin_id) {
            plugin.status = PluginStatus::Published.as_str().to_string();
            if !version.is_prerelease {
                plugin.current_version = Some(version.version);
            }
            plugin.published_at = Some(now);
            plugin.updated_at = now;
        }

        if let Some(build) = tables.builds.get_mut(&build_id) {
            build.status = BuildStatus::Success.as_str().to_string();
            build.version_id = Some(model.id);
            build.completed_at = Some(now);
            build.logs = logs_json(log);
        }

        Ok(model)
    }

    async fn mark_failed(
        &self,
        build_id: Uuid,
        error_message: &str,
        log: &[String],
    ) -> Result<(), BuildError> {
        let mut tables = self.lock()?;
        let build = tables
            .builds
            .get_mut(&build_id)
            .ok_or_else(|| BuildError::InvalidState(format!("build {build_id} not found")))?;
        check_transition(build, BuildStatus::Failed)?;

        build.status = BuildStatus::Failed.as_str().to_string();
        build.error_message = Some(error_message.to_string());
        build.completed_at = Some(Utc::now().fixed_offset());
        build.logs = logs_json(log);
        Ok(())
    }

    async fn get_build(&self, build_id: Uuid) -> Result<Option<plugin_build::Model>, BuildError> {
        Ok(self.lock()?.builds.get(&build_id).cloned())
    }

    async fn unfinished_builds(&self) -> Result<Vec<plugin_build::Model>, BuildError> {
        let mut builds: Vec<_> = self
            .lock()?
            .builds
            .values()
            .filter(|b| b.build_status().is_some_and(|s| !s.is_terminal()))
            .cloned()
            .collect();
        builds.sort_by_key(|b| b.created_at);
        Ok(builds)
    }

    async fn get_plugin(&self, plugin_id: Uuid) -> Result<Option<plugin::Model>, BuildError> {
        Ok(self.lock()?.plugins.get(&plugin_id).cloned())
    }

    async fn versions_for_plugin(
        &self,
        plugin_id: Uuid,
    ) -> Result<Vec<plugin_version::Model>, BuildError> {
        Ok(self
            .lock()?
            .versions
            .iter()
            .filter(|v| v.plugin_id == plugin_id)
            .cloned()
            .collect())
    }
}
