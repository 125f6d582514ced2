//! Rust plugins, compiled for `wasm32-unknown-unknown`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::process::run_command;
use super::{require_artifact, BuilderStrategy, ARTIFACT_FILE_NAME};
use crate::config::BuilderConfig;
use crate::detect::PluginType;
use crate::error::BuildError;
use crate::log::BuildLog;
use crate::manifest::PluginManifest;

pub const WASM_TARGET: &str = "wasm32-unknown-unknown";

pub struct RustBuilder {
    cargo: PathBuf,
    install_timeout: Duration,
    compile_timeout: Duration,
}

impl RustBuilder {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            cargo: config.toolchain.cargo.clone(),
            install_timeout: config.install_timeout,
            compile_timeout: config.compile_timeout,
        }
    }

    /// Download crate dependencies so the compile step is bounded by
    /// compilation alone.
    async fn fetch_dependencies(
        &self,
        plugin_dir: &Path,
        log: &mut BuildLog,
    ) -> Result<(), BuildError> {
        log.push("Fetching crate dependencies");
        let outcome = run_command(
            &self.cargo,
            ["fetch"],
            plugin_dir,
            self.install_timeout,
            log,
        )
        .await
        .map_err(BuildError::DependencyInstall)?;

        if outcome.is_success() {
            Ok(())
        } else {
            Err(BuildError::DependencyInstall(
                outcome.describe("cargo fetch", self.install_timeout),
            ))
        }
    }
}

/// Read `[package].name` from `Cargo.toml` and map it to the file name
/// cargo gives the compiled library (`-` becomes `_`).
pub async fn wasm_output_name(plugin_dir: &Path) -> Result<String, BuildError> {
    let cargo_toml = plugin_dir.join("Cargo.toml");
    let contents = tokio::fs::read_to_string(&cargo_toml)
        .await
        .map_err(|e| BuildError::Compile(format!("failed to read Cargo.toml: {e}")))?;

    let parsed: toml::Value = toml::from_str(&contents)
        .map_err(|e| BuildError::Compile(format!("failed to parse Cargo.toml: {e}")))?;

    let name = parsed
        .get("lib")
        .and_then(|lib| lib.get("name"))
        .or_else(|| parsed.get("package").and_then(|p| p.get("name")))
        .and_then(|n| n.as_str())
        .ok_or_else(|| BuildError::Compile("Cargo.toml has no package name".into()))?;

    Ok(format!("{}.wasm", name.replace('-', "_")))
}

#[async_trait]
impl BuilderStrategy for RustBuilder {
    fn plugin_type(&self) -> PluginType {
        PluginType::Rust
    }

    async fn build(
        &self,
        plugin_dir: &Path,
        _manifest: &PluginManifest,
        log: &mut BuildLog,
    ) -> Result<PathBuf, BuildError> {
        let output_name = wasm_output_name(plugin_dir).await?;

        self.fetch_dependencies(plugin_dir, log).await?;

        log.push(format!("Compiling Rust plugin for {WASM_TARGET}"));
        let outcome = run_command(
            &self.cargo,
            ["build", "--target", WASM_TARGET, "--release"],
            plugin_dir,
            self.compile_timeout,
            log,
        )
        .await
        .map_err(BuildError::Compile)?;

        if !outcome.is_success() {
            return Err(BuildError::Compile(
                outcome.describe("cargo build", self.compile_timeout),
            ));
        }

        let produced = plugin_dir
            .join("target")
            .join(WASM_TARGET)
            .join("release")
            .join(&output_name);
        require_artifact(&produced).await?;

        let artifact = plugin_dir.join(ARTIFACT_FILE_NAME);
        tokio::fs::copy(&produced, &artifact).await.map_err(|e| {
            BuildError::Compile(format!("failed to copy {output_name}: {e}"))
        })?;
        log.push(format!("Copied {output_name} to {ARTIFACT_FILE_NAME}"));

        Ok(artifact)
    }
}
