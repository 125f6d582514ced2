//! Rows written by the build pipeline and read back by marketplace
//! collaborators.

pub mod plugin;
pub mod plugin_build;
pub mod plugin_version;

pub use plugin::PluginStatus;
pub use plugin_build::BuildStatus;
