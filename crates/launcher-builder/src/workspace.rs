//! Per-build scratch directory.
//!
//! A [`Workspace`] owns `<root>/build-<build_id>` for exactly one pipeline
//! run. [`Workspace::cleanup`] is the normal release path; `Drop` removes the
//! directory synchronously if the run exits without calling it.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::BuildError;

#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    cleaned: bool,
}

impl Workspace {
    /// Create a fresh workspace for `build_id` under `root`.
    ///
    /// Fails if the directory already exists: two runs must never share a
    /// workspace.
    pub async fn create(root: &Path, build_id: Uuid) -> Result<Self, BuildError> {
        tokio::fs::create_dir_all(root).await.map_err(|e| {
            BuildError::Workspace(format!(
                "failed to create workspace root {}: {e}",
                root.display()
            ))
        })?;

        let dir = root.join(format!("build-{build_id}"));
        tokio::fs::create_dir(&dir).await.map_err(|e| {
            BuildError::Workspace(format!(
                "failed to create workspace {}: {e}",
                dir.display()
            ))
        })?;

        let workspace = Self {
            dir,
            cleaned: false,
        };
        tokio::fs::create_dir(workspace.extract_dir())
            .await
            .map_err(|e| BuildError::Workspace(format!("failed to create extract dir: {e}")))?;

        tracing::debug!(build_id = %build_id, path = %workspace.dir.display(), "workspace created");
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Where the downloaded archive is written.
    pub fn archive_path(&self) -> PathBuf {
        self.dir.join("source.tar.gz")
    }

    /// Where the archive is unpacked.
    pub fn extract_dir(&self) -> PathBuf {
        self.dir.join("src")
    }

    /// Remove the workspace. Best-effort: failures are logged and swallowed.
    pub async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => tracing::debug!(path = %self.dir.display(), "workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.dir.display(),
                error = %e,
                "failed to remove build workspace"
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.dir.display(),
                    error = %e,
                    "failed to remove build workspace on drop"
                );
            }
        }
    }
}
