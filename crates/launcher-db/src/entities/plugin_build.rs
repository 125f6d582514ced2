use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plugin_builds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub plugin_id: Uuid,
    pub version: String,
    pub release_tag: String,
    pub archive_url: String,
    pub plugin_path: Option<String>,
    pub is_prerelease: bool,
    #[sea_orm(column_type = "Text", nullable)]
    pub changelog: Option<String>,
    pub status: String,
    /// Ordered list of human-readable log lines.
    #[sea_orm(column_type = "JsonBinary")]
    pub logs: serde_json::Value,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    /// Set iff `status == "success"`.
    pub version_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
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

impl Model {
    pub fn build_status(&self) -> Option<BuildStatus> {
        self.status.parse().ok()
    }

    /// Persisted log lines; non-string entries are skipped.
    pub fn log_lines(&self) -> Vec<String> {
        self.logs
            .as_array()
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Build record state machine: `pending -> building -> {success, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Building,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Building => "building",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        matches!(
            (self, next),
            (BuildStatus::Pending, BuildStatus::Building)
                | (BuildStatus::Building, BuildStatus::Success)
                | (BuildStatus::Building, BuildStatus::Failed)
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "building" => Ok(BuildStatus::Building),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            other => Err(format!("unknown build status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Building));
        assert!(BuildStatus::Building.can_transition_to(BuildStatus::Success));
        assert!(BuildStatus::Building.can_transition_to(BuildStatus::Failed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!BuildStatus::Pending.can_transition_to(BuildStatus::Success));
        assert!(!BuildStatus::Building.can_transition_to(BuildStatus::Building));
        assert!(!BuildStatus::Success.can_transition_to(BuildStatus::Failed));
        assert!(!BuildStatus::Failed.can_transition_to(BuildStatus::Building));
    }

    #[test]
    fn test_terminal_states() {
        assert!(BuildStatus::Success.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(!BuildStatus::Pending.is_terminal());
        assert!(!BuildStatus::Building.is_terminal());
    }

    #[test]
    fn test_parse_unknown_status() {
        let err = "queued".parse::<BuildStatus>().unwrap_err();
        assert!(err.contains("queued"));
    }

    #[test]
    fn test_log_lines_skips_non_strings() {
        let now = chrono::Utc::now().fixed_offset();
        let model = Model {
            id: Uuid::new_v4(),
            plugin_id: Uuid::new_v4(),
            version: "1.0.0".into(),
            release_tag: "v1.0.0".into(),
            archive_url: "https://example.com/a.tar.gz".into(),
            plugin_path: None,
            is_prerelease: false,
            changelog: None,
            status: "pending".into(),
            logs: serde_json::json!(["one", 2, "three"]),
            error_message: None,
            version_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        assert_eq!(model.log_lines(), vec!["one", "three"]);
        assert_eq!(model.build_status(), Some(BuildStatus::Pending));
    }
}
