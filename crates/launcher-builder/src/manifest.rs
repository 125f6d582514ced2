//! Plugin manifest parsing and validation.
//!
//! Parses the `manifest.json` at the plugin root, which declares plugin
//! metadata, requested permissions and the tool schemas exposed to the
//! assistant.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::request::validate_relative_path;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Plugin manifest parsed from `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Requested capabilities, stored verbatim on the published version.
    /// Entries are either plain names (`"network"`) or single-key objects
    /// carrying an argument (`{"oauth": "google"}`).
    #[serde(default)]
    pub permissions: Vec<serde_json::Value>,
    #[serde(default = "empty_object")]
    pub ai_tool_schemas: serde_json::Value,
    #[serde(default)]
    pub min_launcher_version: Option<String>,
    /// Name of the compiled artifact as referenced by the host.
    #[serde(default)]
    pub entry: Option<String>,
    /// TypeScript source file to compile, relative to the plugin root.
    #[serde(default)]
    pub entry_point: Option<String>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl PluginManifest {
    /// Parse a manifest from a JSON string.
    pub fn parse(json: &str) -> Result<Self, BuildError> {
        let mut manifest: PluginManifest = serde_json::from_str(json)
            .map_err(|e| BuildError::InvalidManifest(format!("failed to parse manifest: {e}")))?;
        if manifest.ai_tool_schemas.is_null() {
            manifest.ai_tool_schemas = empty_object();
        }
        Ok(manifest)
    }

    /// Read, parse and validate `<plugin_dir>/manifest.json`.
    pub async fn load(plugin_dir: &Path) -> Result<Self, BuildError> {
        let path = plugin_dir.join(MANIFEST_FILE_NAME);
        let json = tokio::fs::read_to_string(&path).await.map_err(|e| {
            BuildError::InvalidManifest(format!("failed to read {}: {e}", path.display()))
        })?;
        let manifest = Self::parse(&json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.name.trim().is_empty() {
            return Err(BuildError::InvalidManifest("name must not be empty".into()));
        }

        validate_semver(&self.version, "version")?;

        if let Some(ref min) = self.min_launcher_version {
            validate_semver(min, "min_launcher_version")?;
        }

        if let Some(ref entry_point) = self.entry_point {
            if entry_point.trim().is_empty() {
                return Err(BuildError::InvalidManifest(
                    "entry_point must not be empty".into(),
                ));
            }
            validate_relative_path(entry_point, "entry_point")
                .map_err(BuildError::InvalidManifest)?;
        }

        if let Some(bad) = self.permissions.iter().find(|p| !is_valid_permission(p)) {
            return Err(BuildError::InvalidManifest(format!(
                "permission entries must be a non-empty name or object, got {bad}"
            )));
        }

        if !(self.ai_tool_schemas.is_object() || self.ai_tool_schemas.is_array()) {
            return Err(BuildError::InvalidManifest(
                "ai_tool_schemas must be an object or an array".into(),
            ));
        }

        Ok(())
    }
}

fn is_valid_permission(entry: &serde_json::Value) -> bool {
    match entry {
        serde_json::Value::String(name) => !name.trim().is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => false,
    }
}

fn validate_semver(value: &str, field_name: &str) -> Result<(), BuildError> {
    semver::Version::parse(value).map_err(|_| {
        BuildError::InvalidManifest(format!("{field_name} is not valid semver: '{value}'"))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> &'static str {
        r#"{
            "id": "weather",
            "name": "Weather",
            "version": "1.2.0",
            "description": "Forecasts in the sidebar",
            "author": "Acme",
            "permissions": ["network:api.weather.example", "storage"],
            "ai_tool_schemas": {"get_forecast": {"type": "object"}},
            "min_launcher_version": "0.9.0",
            "entry": "plugin.wasm"
        }"#
    }

    #[test]
    fn test_parse_valid_manifest() {
        let m = PluginManifest::parse(valid_json()).unwrap();
        m.validate().unwrap();
        assert_eq!(m.name, "Weather");
        assert_eq!(m.permissions.len(), 2);
        assert_eq!(m.min_launcher_version.as_deref(), Some("0.9.0"));
        assert!(m.ai_tool_schemas.get("get_forecast").is_some());
        assert!(m.entry_point.is_none());
    }

    #[test]
    fn test_optional_fields_default_to_empty() {
        let m = PluginManifest::parse(r#"{"name": "minimal", "version": "0.1.0"}"#).unwrap();
        m.validate().unwrap();
        assert!(m.permissions.is_empty());
        assert_eq!(m.ai_tool_schemas, serde_json::json!({}));
        assert!(m.min_launcher_version.is_none());
    }

    #[test]
    fn test_null_tool_schemas_become_empty_object() {
        let m = PluginManifest::parse(
            r#"{"name": "x", "version": "0.1.0", "ai_tool_schemas": null}"#,
        )
        .unwrap();
        assert_eq!(m.ai_tool_schemas, serde_json::json!({}));
    }

    #[test]
    fn test_missing_name_is_parse_error() {
        let err = PluginManifest::parse(r#"{"version": "0.1.0"}"#).unwrap_err();
        assert!(matches!(err, BuildError::InvalidManifest(_)));
    }

    #[test]
    fn test_invalid_json() {
        let err = PluginManifest::parse("{ not json").unwrap_err();
        assert!(err.to_string().contains("failed to parse manifest"));
    }

    #[test]
    fn test_reject_empty_name() {
        let m = PluginManifest::parse(r#"{"name": " ", "version": "0.1.0"}"#).unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_reject_bad_version() {
        let m = PluginManifest::parse(r#"{"name": "x", "version": "one"}"#).unwrap();
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("version is not valid semver"));
    }

    #[test]
    fn test_reject_bad_min_launcher_version() {
        let m = PluginManifest::parse(
            r#"{"name": "x", "version": "0.1.0", "min_launcher_version": ">=1"}"#,
        )
        .unwrap();
        assert!(m
            .validate()
            .unwrap_err()
            .to_string()
            .contains("min_launcher_version"));
    }

    #[test]
    fn test_reject_entry_point_traversal() {
        let m = PluginManifest::parse(
            r#"{"name": "x", "version": "0.1.0", "entry_point": "../../etc/passwd"}"#,
        )
        .unwrap();
        assert!(m.validate().unwrap_err().to_string().contains(".."));
    }

    #[test]
    fn test_permissions_with_arguments_kept_verbatim() {
        let m = PluginManifest::parse(
            r#"{
                "name": "calendar",
                "version": "0.3.0",
                "permissions": ["network", "filesystem:read", {"oauth": "google"}]
            }"#,
        )
        .unwrap();
        m.validate().unwrap();
        assert_eq!(
            serde_json::Value::from(m.permissions),
            serde_json::json!(["network", "filesystem:read", {"oauth": "google"}])
        );
    }

    #[test]
    fn test_reject_malformed_permission_entries() {
        for bad in [r#""""#, "42", "null", "{}", "[]"] {
            let json = format!(r#"{{"name": "x", "version": "0.1.0", "permissions": [{bad}]}}"#);
            let m = PluginManifest::parse(&json).unwrap();
            let err = m.validate().unwrap_err();
            assert!(
                err.to_string().contains("permission entries"),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn test_reject_scalar_tool_schemas() {
        let m = PluginManifest::parse(
            r#"{"name": "x", "version": "0.1.0", "ai_tool_schemas": "nope"}"#,
        )
        .unwrap();
        assert!(m.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE_NAME), valid_json()).unwrap();
        let m = PluginManifest::load(dir.path()).await.unwrap();
        assert_eq!(m.version, "1.2.0");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PluginManifest::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, BuildError::InvalidManifest(_)));
    }
}
