//! Toolchain-specific build strategies.
//!
//! Each [`PluginType`] the pipeline can compile has one [`BuilderStrategy`]
//! registered in a [`BuilderRegistry`]. Adding a toolchain means adding one
//! implementation and registering it.

pub mod process;
pub mod rust;
pub mod typescript;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BuilderConfig;
use crate::detect::PluginType;
use crate::error::BuildError;
use crate::log::BuildLog;
use crate::manifest::PluginManifest;

pub use rust::RustBuilder;
pub use typescript::TypeScriptBuilder;

/// Fixed name of the compiled artifact inside the plugin root.
pub const ARTIFACT_FILE_NAME: &str = "plugin.wasm";

#[async_trait]
pub trait BuilderStrategy: Send + Sync {
    fn plugin_type(&self) -> PluginType;

    /// Install dependencies and compile `plugin_dir`, returning the path of
    /// the produced artifact.
    async fn build(
        &self,
        plugin_dir: &Path,
        manifest: &PluginManifest,
        log: &mut BuildLog,
    ) -> Result<PathBuf, BuildError>;
}

#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: HashMap<PluginType, Arc<dyn BuilderStrategy>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in toolchain.
    pub fn with_defaults(config: &BuilderConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TypeScriptBuilder::new(config)));
        registry.register(Arc::new(RustBuilder::new(config)));
        registry
    }

    /// Register a strategy, replacing any previous one for the same type.
    pub fn register(&mut self, builder: Arc<dyn BuilderStrategy>) {
        self.builders.insert(builder.plugin_type(), builder);
    }

    pub fn get(&self, plugin_type: PluginType) -> Result<Arc<dyn BuilderStrategy>, BuildError> {
        if plugin_type == PluginType::Unknown {
            return Err(BuildError::UnsupportedPluginType(
                "plugin source tree".into(),
            ));
        }
        self.builders
            .get(&plugin_type)
            .cloned()
            .ok_or_else(|| BuildError::ToolchainNotSupported(plugin_type.to_string()))
    }
}

/// Fail with `ArtifactMissing` unless `path` is a regular file.
pub(crate) async fn require_artifact(path: &Path) -> Result<(), BuildError> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => Ok(()),
        _ => Err(BuildError::ArtifactMissing(format!(
            "compiler exited successfully but {} was not produced",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_typescript_and_rust() {
        let registry = BuilderRegistry::with_defaults(&BuilderConfig::default());
        assert_eq!(
            registry.get(PluginType::TypeScript).unwrap().plugin_type(),
            PluginType::TypeScript
        );
        assert_eq!(
            registry.get(PluginType::Rust).unwrap().plugin_type(),
            PluginType::Rust
        );
    }

    #[test]
    fn test_unregistered_toolchain_not_supported() {
        let registry = BuilderRegistry::new();
        let err = registry.get(PluginType::Rust).err().unwrap();
        assert!(matches!(err, BuildError::ToolchainNotSupported(_)));
        assert_eq!(err.to_string(), "rust plugins are not yet supported");
    }

    #[test]
    fn test_unknown_never_resolves() {
        let registry = BuilderRegistry::with_defaults(&BuilderConfig::default());
        let err = registry.get(PluginType::Unknown).err().unwrap();
        assert!(matches!(err, BuildError::UnsupportedPluginType(_)));
    }

    #[tokio::test]
    async fn test_require_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ARTIFACT_FILE_NAME);
        assert!(matches!(
            require_artifact(&path).await,
            Err(BuildError::ArtifactMissing(_))
        ));
        std::fs::write(&path, b"\0asm").unwrap();
        assert!(require_artifact(&path).await.is_ok());
    }
}
