//! Database-backed [`BuildStore`].
//!
//! Promotion runs in one transaction holding a row lock on the plugin, so
//! concurrent successful builds of the same plugin serialize. The partial
//! unique index on `plugin_versions(plugin_id) WHERE is_latest AND NOT
//! is_prerelease` backs the same invariant at the schema level.

use async_trait::async_trait;
use chrono::Utc;
use launcher_db::entities::{plugin, plugin_build, plugin_version, BuildStatus, PluginStatus};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use super::{check_transition, file_size_i64, logs_json, BuildStore, NewVersion};
use crate::error::BuildError;
use crate::request::BuildRequest;

#[derive(Clone)]
pub struct SeaOrmBuildStore {
    db: DatabaseConnection,
}

impl SeaOrmBuildStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn require_build(&self, build_id: Uuid) -> Result<plugin_build::Model, BuildError> {
        plugin_build::Entity::find_by_id(build_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| BuildError::InvalidState(format!("build {build_id} not found")))
    }
}

#[async_trait]
impl BuildStore for SeaOrmBuildStore {
    async fn accept_build(
        &self,
        build_id: Uuid,
        request: &BuildRequest,
    ) -> Result<plugin_build::Model, BuildError> {
        if plugin::Entity::find_by_id(request.plugin_id)
            .one(&self.db)
            .await?
            .is_none()
        {
            return Err(BuildError::StateTransaction(format!(
                "plugin {} does not exist",
                request.plugin_id
            )));
        }
        if plugin_build::Entity::find_by_id(build_id)
            .one(&self.db)
            .await?
            .is_some()
        {
            return Err(BuildError::InvalidState(format!(
                "build {build_id} already exists"
            )));
        }

        let model = plugin_build::ActiveModel {
            id: Set(build_id),
            plugin_id: Set(request.plugin_id),
            version: Set(request.target_version.clone()),
            release_tag: Set(request.release_tag.clone()),
            archive_url: Set(request.archive_url.clone()),
            plugin_path: Set(request.plugin_path.clone()),
            is_prerelease: Set(request.is_prerelease),
            changelog: Set(request.changelog.clone()),
            status: Set(BuildStatus::Pending.as_str().to_string()),
            logs: Set(logs_json(&[])),
            error_message: Set(None),
            version_id: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
            started_at: Set(None),
            completed_at: Set(None),
        }
        .insert(&self.db)
        .await?;

        tracing::info!(build_id = %build_id, plugin_id = %request.plugin_id, "build accepted");
        Ok(model)
    }

    async fn mark_building(&self, build_id: Uuid, log: &[String]) -> Result<(), BuildError> {
        // Compare-and-set on status so two starters cannot both win.
        let result = plugin_build::Entity::update_many()
            .col_expr(
                plugin_build::Column::Status,
                Expr::value(BuildStatus::Building.as_str()),
            )
            .col_expr(
                plugin_build::Column::StartedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .col_expr(plugin_build::Column::Logs, Expr::value(logs_json(log)))
            .filter(plugin_build::Column::Id.eq(build_id))
            .filter(plugin_build::Column::Status.eq(BuildStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 1 {
            return Ok(());
        }

        let build = self.require_build(build_id).await?;
        check_transition(&build, BuildStatus::Building)?;
        // Status was pending on re-read; a concurrent writer raced us.
        Err(BuildError::InvalidState(format!(
            "build {build_id} changed state concurrently"
        )))
    }

    async fn complete_success(
        &self,
        build_id: Uuid,
        version: NewVersion,
        log: &[String],
    ) -> Result<plugin_version::Model, BuildError> {
        let txn = self.db.begin().await?;

        // Row lock on the plugin serializes promotions for the same plugin.
        let plugin = plugin::Entity::find_by_id(version.plugin_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                BuildError::StateTransaction(format!(
                    "plugin {} does not exist",
                    version.plugin_id
                ))
            })?;

        let build = plugin_build::Entity::find_by_id(build_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| BuildError::InvalidState(format!("build {build_id} not found")))?;
        check_transition(&build, BuildStatus::Success)?;

        let now = Utc::now().fixed_offset();

        // (a) supersede the previous latest
        if !version.is_prerelease {
            plugin_version::Entity::update_many()
                .col_expr(plugin_version::Column::IsLatest, Expr::value(false))
                .filter(plugin_version::Column::PluginId.eq(version.plugin_id))
                .filter(plugin_version::Column::IsLatest.eq(true))
                .exec(&txn)
                .await?;
        }

        // (b) insert the new version
        let inserted = plugin_version::ActiveModel {
            id: Set(Uuid::new_v4()),
            plugin_id: Set(version.plugin_id),
            version: Set(version.version.clone()),
            download_url: Set(version.download_url),
            checksum: Set(version.checksum),
            file_size: Set(file_size_i64(version.file_size)?),
            permissions: Set(serde_json::Value::from(version.permissions)),
            ai_tool_schemas: Set(version.ai_tool_schemas),
            min_launcher_version: Set(version.min_launcher_version),
            changelog: Set(version.changelog),
            release_tag: Set(Some(version.release_tag)),
            build_id: Set(Some(build_id)),
            is_latest: Set(!version.is_prerelease),
            is_prerelease: Set(version.is_prerelease),
            published_at: Set(now),
        }
        .insert(&txn)
        .await?;

        // (c) plugin summary
        let mut plugin: plugin::ActiveModel = plugin.into();
        plugin.status = Set(PluginStatus::Published.as_str().to_string());
        if !version.is_prerelease {
            plugin.current_version = Set(Some(version.version));
        }
        plugin.published_at = Set(Some(now));
        plugin.updated_at = Set(now);
        plugin.update(&txn).await?;

        // (d) close the build record
        let mut build: plugin_build::ActiveModel = build.into();
        build.status = Set(BuildStatus::Success.as_str().to_string());
        build.version_id = Set(Some(inserted.id));
        build.completed_at = Set(Some(now));
        build.logs = Set(logs_json(log));
        build.update(&txn).await?;

        txn.commit().await?;

        tracing::info!(
            build_id = %build_id,
            plugin_id = %inserted.plugin_id,
            version = %inserted.version,
            is_latest = inserted.is_latest,
            "version promoted"
        );
        Ok(inserted)
    }

    async fn mark_failed(
        &self,
        build_id: Uuid,
        error_message: &str,
        log: &[String],
    ) -> Result<(), BuildError> {
        let build = self.require_build(build_id).await?;
        check_transition(&build, BuildStatus::Failed)?;

        let mut build: plugin_build::ActiveModel = build.into();
        build.status = Set(BuildStatus::Failed.as_str().to_string());
        build.error_message = Set(Some(error_message.to_string()));
        build.completed_at = Set(Some(Utc::now().fixed_offset()));
        build.logs = Set(logs_json(log));
        build.update(&self.db).await?;
        Ok(())
    }

    async fn get_build(&self, build_id: Uuid) -> Result<Option<plugin_build::Model>, BuildError> {
        Ok(plugin_build::Entity::find_by_id(build_id)
            .one(&self.db)
            .await?)
    }

    async fn unfinished_builds(&self) -> Result<Vec<plugin_build::Model>, BuildError> {
        Ok(plugin_build::Entity::find()
            .filter(plugin_build::Column::Status.is_in([
                BuildStatus::Pending.as_str(),
                BuildStatus::Building.as_str(),
            ]))
            .order_by_asc(plugin_build::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn get_plugin(&self, plugin_id: Uuid) -> Result<Option<plugin::Model>, BuildError> {
        Ok(plugin::Entity::find_by_id(plugin_id).one(&self.db).await?)
    }

    async fn versions_for_plugin(
        &self,
        plugin_id: Uuid,
    ) -> Result<Vec<plugin_version::Model>, BuildError> {
        Ok(plugin_version::Entity::find()
            .filter(plugin_version::Column::PluginId.eq(plugin_id))
            .order_by_asc(plugin_version::Column::PublishedAt)
            .all(&self.db)
            .await?)
    }
}
