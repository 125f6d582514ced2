//! Finds the plugin root inside an extracted source tree.

use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::manifest::MANIFEST_FILE_NAME;

/// Conventional plugin directories probed, in order, when no path hint is
/// given and the archive root has no manifest.
pub const CONVENTIONAL_PLUGIN_DIRS: &[&str] = &["plugin", "src", "packages/plugin"];

/// Resolve the directory holding `manifest.json`.
///
/// With a `hint` (monorepo sub-path) the manifest must be exactly at
/// `<root>/<hint>/manifest.json`; there is no fallback.
pub async fn locate_plugin_root(root: &Path, hint: Option<&str>) -> Result<PathBuf, BuildError> {
    if let Some(hint) = hint {
        let hint = hint.trim_matches('/');
        let dir = root.join(hint);
        if is_file(&dir.join(MANIFEST_FILE_NAME)).await {
            return Ok(dir);
        }
        return Err(BuildError::PluginNotFound(format!(
            "no {MANIFEST_FILE_NAME} at plugin path '{hint}'"
        )));
    }

    if is_file(&root.join(MANIFEST_FILE_NAME)).await {
        return Ok(root.to_path_buf());
    }

    for candidate in CONVENTIONAL_PLUGIN_DIRS {
        let dir = root.join(candidate);
        if is_file(&dir.join(MANIFEST_FILE_NAME)).await {
            tracing::debug!(dir = %candidate, "plugin root found in conventional directory");
            return Ok(dir);
        }
    }

    Err(BuildError::PluginNotFound(format!(
        "no {MANIFEST_FILE_NAME} at the archive root or in {}",
        CONVENTIONAL_PLUGIN_DIRS.join(", ")
    )))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch_manifest(root: &Path, sub: &str) {
        let dir = root.join(sub);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE_NAME), "{}").unwrap();
    }

    #[tokio::test]
    async fn test_manifest_at_root_wins() {
        let dir = tempfile::tempdir().unwrap();
        touch_manifest(dir.path(), "");
        touch_manifest(dir.path(), "plugin");

        let found = locate_plugin_root(dir.path(), None).await.unwrap();
        assert_eq!(found, dir.path());
    }

    #[tokio::test]
    async fn test_conventional_dirs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        touch_manifest(dir.path(), "packages/plugin");
        touch_manifest(dir.path(), "src");

        let found = locate_plugin_root(dir.path(), None).await.unwrap();
        assert_eq!(found, dir.path().join("src"));
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("plugin")).unwrap();

        let err = locate_plugin_root(dir.path(), None).await.unwrap_err();
        assert!(matches!(err, BuildError::PluginNotFound(_)));
    }

    #[tokio::test]
    async fn test_hint_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        touch_manifest(dir.path(), "pkg/my-plugin");

        let found = locate_plugin_root(dir.path(), Some("pkg/my-plugin"))
            .await
            .unwrap();
        assert_eq!(found, dir.path().join("pkg/my-plugin"));
    }

    #[tokio::test]
    async fn test_hint_does_not_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        // A manifest at the root must not satisfy a wrong hint.
        touch_manifest(dir.path(), "");

        let err = locate_plugin_root(dir.path(), Some("pkg/other"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::PluginNotFound(_)));
        assert!(err.to_string().contains("pkg/other"));
    }

    #[tokio::test]
    async fn test_manifest_directory_is_not_a_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("manifest.json")).unwrap();
        assert!(locate_plugin_root(dir.path(), None).await.is_err());
    }
}
