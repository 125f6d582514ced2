use sea_orm_migration::prelude::*;

/// Migration 2: published plugin versions.
///
/// The partial unique index backs the promotion transaction: a plugin can
/// never hold two latest non-prerelease versions, even if two builds race.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        db.execute_unprepared(
            "CREATE TABLE IF NOT EXISTS plugin_versions (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                plugin_id UUID NOT NULL REFERENCES plugins(id) ON DELETE CASCADE,
                version VARCHAR(50) NOT NULL,
                download_url VARCHAR(1000) NOT NULL,
                checksum CHAR(64) NOT NULL,
                file_size BIGINT NOT NULL,
                permissions JSONB NOT NULL DEFAULT '[]',
                ai_tool_schemas JSONB NOT NULL DEFAULT '{}',
                min_launcher_version VARCHAR(50),
                changelog TEXT,
                release_tag VARCHAR(255),
                build_id UUID,
                is_latest BOOLEAN NOT NULL DEFAULT FALSE,
                is_prerelease BOOLEAN NOT NULL DEFAULT FALSE,
                published_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE(plugin_id, version)
            )",
        )
        .await?;

        db.execute_unprepared(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_plugin_versions_one_latest
             ON plugin_versions(plugin_id)
             WHERE is_latest AND NOT is_prerelease",
        )
        .await?;

        db.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_plugin_versions_plugin_id
             ON plugin_versions(plugin_id)",
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared("DROP TABLE IF EXISTS plugin_versions")
            .await?;
        Ok(())
    }
}
