//! Gzip tarball extraction.
//!
//! Release archives unpack into a single top-level directory with an
//! unpredictable name (`org-repo-<sha>/`). [`extract`] unpacks into the
//! workspace and returns that directory.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use crate::error::BuildError;

const MAX_ENTRY_COUNT: usize = 10_000;

/// Extract `archive` into `dest` and return the absolute path of the single
/// top-level directory it produced.
pub async fn extract(archive: &Path, dest: &Path, max_size: u64) -> Result<PathBuf, BuildError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        unpack_tarball(&archive, &dest, max_size)?;
        find_single_root(&dest)
    })
    .await
    .map_err(|e| BuildError::Extraction(format!("extraction task failed: {e}")))?
}

fn unpack_tarball(archive: &Path, dest: &Path, max_size: u64) -> Result<(), BuildError> {
    let file = File::open(archive)
        .map_err(|e| BuildError::Extraction(format!("failed to open archive: {e}")))?;
    let mut tarball = tar::Archive::new(flate2::read::GzDecoder::new(file));
    // Never restore setuid/setgid bits from untrusted archives.
    tarball.set_preserve_permissions(false);

    let dest = dest
        .canonicalize()
        .map_err(|e| BuildError::Extraction(format!("failed to resolve destination: {e}")))?;

    let mut entry_count = 0usize;
    let mut total_size: u64 = 0;

    let entries = tarball
        .entries()
        .map_err(|e| BuildError::Extraction(format!("failed to read archive entries: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| BuildError::Extraction(format!("corrupt archive entry: {e}")))?;

        entry_count += 1;
        if entry_count > MAX_ENTRY_COUNT {
            return Err(BuildError::Extraction(format!(
                "archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"
            )));
        }

        let entry_path = entry
            .path()
            .map_err(|e| BuildError::Extraction(format!("invalid entry path: {e}")))?
            .into_owned();

        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::Regular | tar::EntryType::Directory => {}
            // Metadata records; the tar crate applies them to the next entry.
            tar::EntryType::GNULongName | tar::EntryType::XHeader | tar::EntryType::XGlobalHeader => {
                continue
            }
            other => {
                return Err(BuildError::Extraction(format!(
                    "unsupported entry type {other:?} at '{}'",
                    entry_path.display()
                )))
            }
        }

        if entry_path.is_absolute()
            || entry_path.components().any(|c| {
                matches!(
                    c,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            })
        {
            return Err(BuildError::Extraction(format!(
                "path traversal in archive entry '{}'",
                entry_path.display()
            )));
        }

        // `./` and similar carry nothing to unpack.
        if !entry_path
            .components()
            .any(|c| matches!(c, Component::Normal(_)))
        {
            continue;
        }

        let entry_size = entry
            .header()
            .size()
            .map_err(|e| BuildError::Extraction(format!("invalid entry size: {e}")))?;
        total_size = total_size.saturating_add(entry_size);
        if total_size > max_size {
            return Err(BuildError::Extraction(format!(
                "archive exceeds maximum extracted size ({max_size} bytes)"
            )));
        }

        let target = dest.join(&entry_path);
        if !target.starts_with(&dest) {
            return Err(BuildError::Extraction(format!(
                "path traversal in archive entry '{}'",
                entry_path.display()
            )));
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BuildError::Extraction(format!(
                    "failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        entry.unpack(&target).map_err(|e| {
            BuildError::Extraction(format!("failed to unpack {}: {e}", entry_path.display()))
        })?;
    }

    if entry_count == 0 {
        return Err(BuildError::Extraction("archive is empty".into()));
    }

    Ok(())
}

/// The extraction root is the one directory among `dest`'s immediate
/// children. Regular files at the top level are ignored; zero or several
/// directories is an error.
fn find_single_root(dest: &Path) -> Result<PathBuf, BuildError> {
    let read_dir = std::fs::read_dir(dest)
        .map_err(|e| BuildError::Extraction(format!("failed to list extracted files: {e}")))?;

    let mut dirs = Vec::new();
    for entry in read_dir {
        let entry =
            entry.map_err(|e| BuildError::Extraction(format!("failed to list extracted files: {e}")))?;
        let file_type = entry
            .file_type()
            .map_err(|e| BuildError::Extraction(format!("failed to stat extracted entry: {e}")))?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }

    match dirs.len() {
        0 => Err(BuildError::Extraction(
            "archive did not contain a top-level directory".into(),
        )),
        1 => {
            let root = dirs.remove(0);
            root.canonicalize()
                .map_err(|e| BuildError::Extraction(format!("failed to resolve root: {e}")))
        }
        n => {
            dirs.sort();
            let names: Vec<String> = dirs
                .iter()
                .filter_map(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            Err(BuildError::Extraction(format!(
                "expected exactly one top-level directory, found {n}: {}",
                names.join(", ")
            )))
        }
    }
}
