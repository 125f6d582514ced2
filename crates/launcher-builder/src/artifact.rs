//! Artifact verification and content hashing.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::BuildError;

/// WASM magic bytes: `\0asm`.
const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Import namespaces the launcher's plugin host provides.
pub const ALLOWED_IMPORT_NAMESPACES: &[&str] = &[
    "env",                    // Extism host functions
    "extism:host/env",        // Extism host functions (component model)
    "wasi_snapshot_preview1", // WASI preview 1
    "wasi_unstable",          // Legacy WASI
];

/// A verified artifact, ready to upload.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    /// Lowercase hex SHA-256 of `bytes`.
    pub checksum: String,
    pub size: u64,
    pub bytes: Vec<u8>,
}

/// Read the artifact, validate it as a plugin module and compute its
/// checksum and size.
pub async fn finalize(path: &Path, max_size: u64) -> Result<ArtifactInfo, BuildError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        BuildError::ArtifactMissing(format!("failed to stat {}: {e}", path.display()))
    })?;
    if metadata.len() > max_size {
        return Err(BuildError::WasmValidation(format!(
            "WASM binary too large: {} bytes (max: {max_size} bytes)",
            metadata.len()
        )));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| BuildError::Checksum(format!("failed to read artifact: {e}")))?;

    validate_wasm(&bytes, max_size)?;

    Ok(ArtifactInfo {
        checksum: sha256_hex(&bytes),
        size: bytes.len() as u64,
        bytes,
    })
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Check size, magic bytes, and that every import comes from a namespace
/// the host provides.
pub fn validate_wasm(bytes: &[u8], max_size: u64) -> Result<(), BuildError> {
    if bytes.len() as u64 > max_size {
        return Err(BuildError::WasmValidation(format!(
            "WASM binary too large: {} bytes (max: {max_size} bytes)",
            bytes.len()
        )));
    }

    if bytes.len() < 4 || &bytes[..4] != WASM_MAGIC {
        return Err(BuildError::WasmValidation(
            "invalid WASM binary: magic bytes mismatch".into(),
        ));
    }

    validate_imports(bytes)
}

fn validate_imports(bytes: &[u8]) -> Result<(), BuildError> {
    use wasmparser::{Parser, Payload};

    for payload in Parser::new(0).parse_all(bytes) {
        let payload =
            payload.map_err(|e| BuildError::WasmValidation(format!("failed to parse WASM: {e}")))?;

        if let Payload::ImportSection(reader) = payload {
            for import in reader {
                let import = import.map_err(|e| {
                    BuildError::WasmValidation(format!("failed to read import: {e}"))
                })?;

                if !ALLOWED_IMPORT_NAMESPACES.contains(&import.module) {
                    return Err(BuildError::WasmValidation(format!(
                        "unauthorized import namespace: '{}' (function: '{}'); \
                         allowed namespaces: {:?}",
                        import.module, import.name, ALLOWED_IMPORT_NAMESPACES
                    )));
                }
            }
        }
    }

    Ok(())
}
