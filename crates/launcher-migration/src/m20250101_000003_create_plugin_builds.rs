use sea_orm_migration::prelude::*;

/// Migration 3: build records.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        db.execute_unprepared(
            "CREATE TABLE IF NOT EXISTS plugin_builds (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                plugin_id UUID NOT NULL REFERENCES plugins(id) ON DELETE CASCADE,
                version VARCHAR(50) NOT NULL,
                release_tag VARCHAR(255) NOT NULL,
                archive_url VARCHAR(1000) NOT NULL,
                plugin_path VARCHAR(500),
                is_prerelease BOOLEAN NOT NULL DEFAULT FALSE,
                changelog TEXT,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                logs JSONB NOT NULL DEFAULT '[]',
                error_message TEXT,
                version_id UUID REFERENCES plugin_versions(id) ON DELETE SET NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                CHECK (status IN ('pending', 'building', 'success', 'failed'))
            )",
        )
        .await?;

        db.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_plugin_builds_plugin_id
             ON plugin_builds(plugin_id)",
        )
        .await?;

        db.execute_unprepared(
            "CREATE INDEX IF NOT EXISTS idx_plugin_builds_status
             ON plugin_builds(status)",
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared("DROP TABLE IF EXISTS plugin_builds")
            .await?;
        Ok(())
    }
}
