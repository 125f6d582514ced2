//! TypeScript plugins, compiled to WASM with the Extism JS PDK.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::process::{run_command, CommandOutcome};
use super::{require_artifact, BuilderStrategy, ARTIFACT_FILE_NAME};
use crate::config::BuilderConfig;
use crate::detect::PluginType;
use crate::error::BuildError;
use crate::log::BuildLog;
use crate::manifest::PluginManifest;

/// Entry files probed when the manifest does not name one.
pub const ENTRY_POINT_CANDIDATES: &[&str] =
    &["src/index.ts", "src/plugin.ts", "plugin.ts", "index.ts"];

const JS_PDK_PACKAGE: &str = "@extism/js-pdk";

pub struct TypeScriptBuilder {
    npm: PathBuf,
    npx: PathBuf,
    install_timeout: Duration,
    compile_timeout: Duration,
}

impl TypeScriptBuilder {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            npm: config.toolchain.npm.clone(),
            npx: config.toolchain.npx.clone(),
            install_timeout: config.install_timeout,
            compile_timeout: config.compile_timeout,
        }
    }

    /// `npm ci` against the lockfile, then once more with `npm install` if
    /// that fails. Lockfile drift is common and recoverable; nothing else in
    /// the pipeline retries.
    async fn install_dependencies(
        &self,
        plugin_dir: &Path,
        log: &mut BuildLog,
    ) -> Result<(), BuildError> {
        log.push("Installing dependencies (npm ci)");
        let strict = run_command(&self.npm, ["ci"], plugin_dir, self.install_timeout, log)
            .await
            .map_err(BuildError::DependencyInstall)?;

        match strict {
            CommandOutcome::Success => return Ok(()),
            CommandOutcome::TimedOut => {
                return Err(BuildError::DependencyInstall(
                    strict.describe("npm ci", self.install_timeout),
                ))
            }
            CommandOutcome::Failed { .. } => {
                log.warn(format!(
                    "{}; retrying with npm install",
                    strict.describe("npm ci", self.install_timeout)
                ));
            }
        }

        let relaxed = run_command(
            &self.npm,
            ["install"],
            plugin_dir,
            self.install_timeout,
            log,
        )
        .await
        .map_err(BuildError::DependencyInstall)?;

        if relaxed.is_success() {
            Ok(())
        } else {
            Err(BuildError::DependencyInstall(
                relaxed.describe("npm install", self.install_timeout),
            ))
        }
    }
}

/// Resolve the source file to compile, relative to `plugin_dir`.
///
/// A manifest `entry_point` is authoritative: if it is declared but absent,
/// the candidates are not consulted.
pub async fn resolve_entry_point(
    plugin_dir: &Path,
    manifest: &PluginManifest,
) -> Result<String, BuildError> {
    if let Some(ref declared) = manifest.entry_point {
        if is_file(&plugin_dir.join(declared)).await {
            return Ok(declared.clone());
        }
        return Err(BuildError::EntryPointNotFound(format!(
            "manifest entry_point '{declared}' does not exist"
        )));
    }

    for candidate in ENTRY_POINT_CANDIDATES {
        if is_file(&plugin_dir.join(candidate)).await {
            return Ok((*candidate).to_string());
        }
    }

    Err(BuildError::EntryPointNotFound(format!(
        "none of {} exist",
        ENTRY_POINT_CANDIDATES.join(", ")
    )))
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[async_trait]
impl BuilderStrategy for TypeScriptBuilder {
    fn plugin_type(&self) -> PluginType {
        PluginType::TypeScript
    }

    async fn build(
        &self,
        plugin_dir: &Path,
        manifest: &PluginManifest,
        log: &mut BuildLog,
    ) -> Result<PathBuf, BuildError> {
        let entry = resolve_entry_point(plugin_dir, manifest).await?;
        log.push(format!("Entry point: {entry}"));

        if is_file(&plugin_dir.join("package.json")).await {
            self.install_dependencies(plugin_dir, log).await?;
        } else {
            log.push("No package.json, skipping dependency install");
        }

        let artifact = plugin_dir.join(ARTIFACT_FILE_NAME);
        // A stale artifact shipped in the archive must not pass for output.
        if let Err(e) = tokio::fs::remove_file(&artifact).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(BuildError::Compile(format!(
                    "failed to remove stale {ARTIFACT_FILE_NAME}: {e}"
                )));
            }
        }

        log.push(format!("Compiling {entry} to {ARTIFACT_FILE_NAME}"));
        let outcome = run_command(
            &self.npx,
            [JS_PDK_PACKAGE, entry.as_str(), "-o", ARTIFACT_FILE_NAME],
            plugin_dir,
            self.compile_timeout,
            log,
        )
        .await
        .map_err(BuildError::Compile)?;

        if !outcome.is_success() {
            return Err(BuildError::Compile(
                outcome.describe(JS_PDK_PACKAGE, self.compile_timeout),
            ));
        }

        require_artifact(&artifact).await?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(entry_point: Option<&str>) -> PluginManifest {
        let mut json = serde_json::json!({"name": "weather", "version": "1.0.0"});
        if let Some(e) = entry_point {
            json["entry_point"] = e.into();
        }
        serde_json::from_value(json).unwrap()
    }

    fn write(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "export {}").unwrap();
    }

    #[tokio::test]
    async fn test_entry_point_candidates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.ts");
        write(dir.path(), "src/plugin.ts");

        let entry = resolve_entry_point(dir.path(), &manifest(None)).await.unwrap();
        assert_eq!(entry, "src/plugin.ts");
    }

    #[tokio::test]
    async fn test_manifest_entry_point_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.ts");
        write(dir.path(), "lib/main.ts");

        let entry = resolve_entry_point(dir.path(), &manifest(Some("lib/main.ts")))
            .await
            .unwrap();
        assert_eq!(entry, "lib/main.ts");
    }

    #[tokio::test]
    async fn test_declared_entry_point_missing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.ts");

        let err = resolve_entry_point(dir.path(), &manifest(Some("lib/main.ts")))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::EntryPointNotFound(_)));
        assert!(err.to_string().contains("lib/main.ts"));
    }

    #[tokio::test]
    async fn test_no_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/util.ts");

        let err = resolve_entry_point(dir.path(), &manifest(None))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::EntryPointNotFound(_)));
    }

    #[cfg(unix)]
    mod toolchain {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use uuid::Uuid;

        /// Write an executable shell script and return its path.
        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn builder(bin: &Path, npm_body: &str, npx_body: &str) -> TypeScriptBuilder {
            let mut config = BuilderConfig::default();
            config.toolchain.npm = script(bin, "npm", npm_body);
            config.toolchain.npx = script(bin, "npx", npx_body);
            config.install_timeout = Duration::from_secs(10);
            config.compile_timeout = Duration::from_secs(10);
            TypeScriptBuilder::new(&config)
        }

        // Writes the file named after `-o`.
        const COMPILE_OK: &str = r#"printf '\000asm\001\000\000\000' > "$4""#;

        #[tokio::test]
        async fn test_build_success() {
            let bin = tempfile::tempdir().unwrap();
            let plugin = tempfile::tempdir().unwrap();
            write(plugin.path(), "package.json");
            write(plugin.path(), "src/index.ts");

            let b = builder(bin.path(), "echo installed", COMPILE_OK);
            let mut log = BuildLog::new(Uuid::new_v4());
            let artifact = b
                .build(plugin.path(), &manifest(None), &mut log)
                .await
                .unwrap();

            assert_eq!(artifact, plugin.path().join(ARTIFACT_FILE_NAME));
            assert!(artifact.is_file());
            assert!(log.lines().iter().any(|l| l == "$ npm ci"));
        }

        #[tokio::test]
        async fn test_install_retries_without_lockfile() {
            let bin = tempfile::tempdir().unwrap();
            let plugin = tempfile::tempdir().unwrap();
            write(plugin.path(), "package.json");
            write(plugin.path(), "src/index.ts");

            let npm = r#"if [ "$1" = "ci" ]; then echo "lockfile mismatch" >&2; exit 1; fi
echo "added 12 packages""#;
            let b = builder(bin.path(), npm, COMPILE_OK);
            let mut log = BuildLog::new(Uuid::new_v4());
            b.build(plugin.path(), &manifest(None), &mut log)
                .await
                .unwrap();

            let lines = log.lines();
            assert!(lines.iter().any(|l| l.starts_with("WARNING: npm ci exited with 1")));
            assert!(lines.iter().any(|l| l == "$ npm install"));
            assert!(lines.iter().any(|l| l == "[npm] added 12 packages"));
        }

        #[tokio::test]
        async fn test_install_fails_after_one_retry() {
            let bin = tempfile::tempdir().unwrap();
            let plugin = tempfile::tempdir().unwrap();
            write(plugin.path(), "package.json");
            write(plugin.path(), "src/index.ts");

            let marker = plugin.path().join("compiled");
            let npx = format!("touch {}", marker.display());
            let b = builder(bin.path(), "echo 'registry unreachable' >&2; exit 1", &npx);
            let mut log = BuildLog::new(Uuid::new_v4());
            let err = b
                .build(plugin.path(), &manifest(None), &mut log)
                .await
                .unwrap_err();

            assert!(matches!(err, BuildError::DependencyInstall(_)));
            assert!(err.to_string().contains("registry unreachable"));
            assert!(!marker.exists());
        }

        #[tokio::test]
        async fn test_no_package_json_skips_install() {
            let bin = tempfile::tempdir().unwrap();
            let plugin = tempfile::tempdir().unwrap();
            write(plugin.path(), "index.ts");

            let b = builder(bin.path(), "exit 1", COMPILE_OK);
            let mut log = BuildLog::new(Uuid::new_v4());
            b.build(plugin.path(), &manifest(None), &mut log)
                .await
                .unwrap();
            assert!(!log.lines().iter().any(|l| l.starts_with("$ npm")));
        }

        #[tokio::test]
        async fn test_silent_compiler_is_artifact_missing() {
            let bin = tempfile::tempdir().unwrap();
            let plugin = tempfile::tempdir().unwrap();
            write(plugin.path(), "src/index.ts");
            // Stale artifact from the archive is removed before compiling.
            std::fs::write(plugin.path().join(ARTIFACT_FILE_NAME), b"stale").unwrap();

            let b = builder(bin.path(), "exit 0", "exit 0");
            let mut log = BuildLog::new(Uuid::new_v4());
            let err = b
                .build(plugin.path(), &manifest(None), &mut log)
                .await
                .unwrap_err();
            assert!(matches!(err, BuildError::ArtifactMissing(_)));
        }

        #[tokio::test]
        async fn test_compile_failure() {
            let bin = tempfile::tempdir().unwrap();
            let plugin = tempfile::tempdir().unwrap();
            write(plugin.path(), "src/index.ts");

            let b = builder(
                bin.path(),
                "exit 0",
                "echo 'TS2304: Cannot find name' >&2; exit 2",
            );
            let mut log = BuildLog::new(Uuid::new_v4());
            let err = b
                .build(plugin.path(), &manifest(None), &mut log)
                .await
                .unwrap_err();
            assert!(matches!(err, BuildError::Compile(_)));
            assert!(err.to_string().contains("TS2304"));
        }
    }
}
