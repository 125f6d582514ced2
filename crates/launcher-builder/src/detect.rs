//! Plugin source-language detection.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Toolchain family of a plugin source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    TypeScript,
    Rust,
    Unknown,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::TypeScript => "typescript",
            PluginType::Rust => "rust",
            PluginType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TYPESCRIPT_MARKERS: &[&str] = &["package.json", "tsconfig.json"];
const TYPESCRIPT_EXTENSIONS: &[&str] = &["ts", "js", "mts", "mjs"];

/// Classify `plugin_dir` by the files it contains.
///
/// A `Cargo.toml` makes it Rust. Otherwise a package descriptor, a
/// tsconfig, or TypeScript/JavaScript sources in the root or `src/` make it
/// TypeScript. Anything else is [`PluginType::Unknown`], which is a result,
/// not an error.
pub async fn detect_type(plugin_dir: &Path) -> PluginType {
    if exists(&plugin_dir.join("Cargo.toml")).await {
        return PluginType::Rust;
    }

    for marker in TYPESCRIPT_MARKERS {
        if exists(&plugin_dir.join(marker)).await {
            return PluginType::TypeScript;
        }
    }

    if has_script_sources(plugin_dir).await || has_script_sources(&plugin_dir.join("src")).await {
        return PluginType::TypeScript;
    }

    PluginType::Unknown
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn has_script_sources(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_script = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| TYPESCRIPT_EXTENSIONS.contains(&ext));
        if is_script && path.is_file() {
            return true;
        }
    }
    false
}
