use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plugin_versions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub plugin_id: Uuid,
    pub version: String,
    pub download_url: String,
    /// Hex-encoded SHA-256 of the artifact bytes.
    pub checksum: String,
    pub file_size: i64,
    #[sea_orm(column_type = "JsonBinary")]
    pub permissions: serde_json::Value,
    #[sea_orm(column_type = "JsonBinary")]
    pub ai_tool_schemas: serde_json::Value,
    pub min_launcher_version: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub changelog: Option<String>,
    pub release_tag: Option<String>,
    pub build_id: Option<Uuid>,
    pub is_latest: bool,
    pub is_prerelease: bool,
    pub published_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::plugin::Entity",
        from = "Column::PluginId",
        to = "super::plugin::Column::Id"
    )]
    Plugin,
}

impl Related<super::plugin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Plugin.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
