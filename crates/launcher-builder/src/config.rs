//! Pipeline configuration, read from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Default download cap: 100 MB.
const DEFAULT_MAX_ARCHIVE_SIZE_MB: u64 = 100;

/// Default extracted-tree cap: 500 MB.
const DEFAULT_MAX_EXTRACTED_SIZE_MB: u64 = 500;

/// Default max WASM artifact size: 50 MB.
const DEFAULT_MAX_WASM_SIZE_MB: u64 = 50;

const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;
const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 600;

/// Toolchain executables. Overridable so hosts can pin absolute paths.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    pub npm: PathBuf,
    pub npx: PathBuf,
    pub cargo: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            npm: PathBuf::from("npm"),
            npx: PathBuf::from("npx"),
            cargo: PathBuf::from("cargo"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Scratch-space root; each build gets `build-<id>` below it.
    pub workspace_root: PathBuf,
    pub download_timeout: Duration,
    pub max_archive_size: u64,
    pub max_extracted_size: u64,
    pub install_timeout: Duration,
    pub compile_timeout: Duration,
    pub max_wasm_size: u64,
    /// Accept plain `http://` archive URLs (local development only).
    pub allow_insecure_urls: bool,
    pub toolchain: ToolchainConfig,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("launcher-builds"),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            max_archive_size: DEFAULT_MAX_ARCHIVE_SIZE_MB * 1024 * 1024,
            max_extracted_size: DEFAULT_MAX_EXTRACTED_SIZE_MB * 1024 * 1024,
            install_timeout: Duration::from_secs(DEFAULT_INSTALL_TIMEOUT_SECS),
            compile_timeout: Duration::from_secs(DEFAULT_COMPILE_TIMEOUT_SECS),
            max_wasm_size: DEFAULT_MAX_WASM_SIZE_MB * 1024 * 1024,
            allow_insecure_urls: false,
            toolchain: ToolchainConfig::default(),
        }
    }
}

/// Size caps are configured in MB; absurd values clamp instead of wrapping.
fn megabytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok())
}

impl BuilderConfig {
    /// Create a configuration from environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let workspace_root = std::env::var("BUILD_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_root);

        let toolchain = ToolchainConfig {
            npm: std::env::var("BUILD_NPM_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.toolchain.npm),
            npx: std::env::var("BUILD_NPX_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.toolchain.npx),
            cargo: std::env::var("BUILD_CARGO_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.toolchain.cargo),
        };

        Self {
            workspace_root,
            download_timeout: env_u64("BUILD_DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            max_archive_size: env_u64("BUILD_MAX_ARCHIVE_SIZE_MB")
                .map(megabytes)
                .unwrap_or(defaults.max_archive_size),
            max_extracted_size: env_u64("BUILD_MAX_EXTRACTED_SIZE_MB")
                .map(megabytes)
                .unwrap_or(defaults.max_extracted_size),
            install_timeout: env_u64("BUILD_INSTALL_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.install_timeout),
            compile_timeout: env_u64("BUILD_COMPILE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compile_timeout),
            max_wasm_size: env_u64("PLUGIN_WASM_MAX_SIZE_MB")
                .map(megabytes)
                .unwrap_or(defaults.max_wasm_size),
            allow_insecure_urls: std::env::var("BUILD_ALLOW_INSECURE_URLS")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
            toolchain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BuilderConfig::default();
        assert_eq!(config.max_wasm_size, 50 * 1024 * 1024);
        assert_eq!(config.max_archive_size, 100 * 1024 * 1024);
        assert_eq!(config.install_timeout, Duration::from_secs(300));
        assert_eq!(config.compile_timeout, Duration::from_secs(600));
        assert!(!config.allow_insecure_urls);
        assert!(config.workspace_root.ends_with("launcher-builds"));
    }

    #[test]
    fn test_install_and_compile_timeouts_are_distinct_and_finite() {
        let config = BuilderConfig::default();
        assert!(config.install_timeout < config.compile_timeout);
        assert!(config.compile_timeout < Duration::from_secs(3600));
    }

    #[test]
    fn test_megabyte_caps_saturate() {
        assert_eq!(megabytes(50), 50 * 1024 * 1024);
        assert_eq!(megabytes(u64::MAX), u64::MAX);
        assert_eq!(megabytes(u64::MAX / 1024), u64::MAX);
    }

    #[test]
    fn test_default_toolchain_binaries() {
        let toolchain = ToolchainConfig::default();
        assert_eq!(toolchain.npm, PathBuf::from("npm"));
        assert_eq!(toolchain.cargo, PathBuf::from("cargo"));
    }
}
