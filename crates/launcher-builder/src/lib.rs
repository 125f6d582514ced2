//! Plugin build pipeline.
//!
//! Turns a released plugin source archive into a verified WASM artifact,
//! uploads it, and promotes it to a published plugin version.

pub mod artifact;
pub mod builder;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod locate;
pub mod log;
pub mod manifest;
pub mod pipeline;
pub mod request;
pub mod state;
pub mod workspace;

pub use builder::{BuilderRegistry, BuilderStrategy, ARTIFACT_FILE_NAME};
pub use config::{BuilderConfig, ToolchainConfig};
pub use detect::PluginType;
pub use error::BuildError;
pub use log::BuildLog;
pub use manifest::PluginManifest;
pub use pipeline::{BuildPipeline, INTERRUPTED_MESSAGE};
pub use request::BuildRequest;
pub use state::{BuildStore, MemoryBuildStore, NewVersion, SeaOrmBuildStore};
