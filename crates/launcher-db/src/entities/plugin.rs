use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plugins")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    pub status: String,
    /// Latest non-prerelease version string.
    pub current_version: Option<String>,
    pub published_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::plugin_version::Entity")]
    PluginVersions,
    #[sea_orm(has_many = "super::plugin_build::Entity")]
    PluginBuilds,
}

impl Related<super::plugin_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PluginVersions.def()
    }
}

impl Related<super::plugin_build::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PluginBuilds.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed lifecycle status, `None` if the column holds an unknown value.
    pub fn plugin_status(&self) -> Option<PluginStatus> {
        self.status.parse().ok()
    }
}

/// Marketplace lifecycle of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Draft,
    PendingReview,
    Published,
    Archived,
}

impl PluginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginStatus::Draft => "draft",
            PluginStatus::PendingReview => "pending_review",
            PluginStatus::Published => "published",
            PluginStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PluginStatus::Draft),
            "pending_review" => Ok(PluginStatus::PendingReview),
            "published" => Ok(PluginStatus::Published),
            "archived" => Ok(PluginStatus::Archived),
            other => Err(format!("unknown plugin status '{other}'")),
        }
    }
}
