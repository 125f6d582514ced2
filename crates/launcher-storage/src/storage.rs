use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("object store: {0}")]
    S3(String),
    #[error("storage misconfigured: {0}")]
    Config(String),
}

/// Where an uploaded artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Backend-relative key, usable with [`ArtifactStorage::delete`].
    pub key: String,
    /// Stable retrieval URL handed to clients.
    pub download_url: String,
}

/// Operations every artifact storage backend must implement.
///
/// Uploads never overwrite: when the key for a plugin/version/file already
/// exists, a unique suffix is appended so an earlier artifact stays reachable.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    async fn upload(
        &self,
        plugin_id: Uuid,
        version: &str,
        data: &[u8],
        file_name: &str,
    ) -> Result<StoredArtifact, StorageError>;

    async fn exists(&self, key: &str) -> bool;

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Storage key for an artifact: `plugins/{plugin_id}/{version}/{file_name}`.
pub fn artifact_key(plugin_id: Uuid, version: &str, file_name: &str) -> String {
    format!(
        "plugins/{plugin_id}/{}/{}",
        sanitize_filename(version),
        sanitize_filename(file_name)
    )
}

/// Same key with a random suffix before the extension.
fn unique_key(plugin_id: Uuid, version: &str, file_name: &str) -> String {
    let sanitized = sanitize_filename(file_name);
    let stem = Path::new(&sanitized)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact");
    let ext = Path::new(&sanitized)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    artifact_key(
        plugin_id,
        version,
        &format!("{stem}_{}.{ext}", Uuid::new_v4()),
    )
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

// ─── Local Filesystem Backend ──────────────────────────────────────

/// Artifacts on a local volume, served by a static file server at
/// `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStorage {
    base_path: PathBuf,
    public_base_url: String,
}

impl LocalArtifactStorage {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("ARTIFACT_STORAGE_PATH")
            .unwrap_or_else(|_| "./data/artifacts".to_string());
        let public = std::env::var("ARTIFACT_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:8080/artifacts".to_string());
        Self::new(base, public)
    }

    pub fn base(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl ArtifactStorage for LocalArtifactStorage {
    async fn upload(
        &self,
        plugin_id: Uuid,
        version: &str,
        data: &[u8],
        file_name: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let mut key = artifact_key(plugin_id, version, file_name);
        if fs::metadata(self.full_path(&key)).await.is_ok() {
            key = unique_key(plugin_id, version, file_name);
        }

        let path = self.full_path(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        tracing::debug!(key = %key, bytes = data.len(), "stored artifact on local volume");

        Ok(StoredArtifact {
            download_url: join_url(&self.public_base_url, &key),
            key,
        })
    }

    async fn exists(&self, key: &str) -> bool {
        fs::metadata(self.full_path(key)).await.is_ok()
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.full_path(key))
            .await
            .map_err(|_| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.full_path(key);
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }
}

// ─── S3 Backend ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct S3ArtifactStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    public_base_url: String,
}

impl S3ArtifactStorage {
    /// Build a client for an S3-compatible endpoint.
    ///
    /// Without `public_url`, download URLs point at the endpoint in path
    /// style, or at the AWS virtual-hosted bucket URL when no endpoint is set.
    pub fn from_config(
        endpoint: Option<&str>,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        prefix: &str,
        public_url: Option<&str>,
    ) -> Result<Self, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::Config("S3 bucket must not be empty".into()));
        }

        let creds =
            aws_sdk_s3::config::Credentials::new(access_key, secret_key, None, None, "launcher");

        let mut config_builder = aws_sdk_s3::Config::builder()
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .credentials_provider(creds)
            .behavior_version_latest();

        if let Some(ep) = endpoint {
            config_builder = config_builder.endpoint_url(ep).force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(config_builder.build());

        let public_base_url = match (public_url, endpoint) {
            (Some(url), _) => url.to_string(),
            (None, Some(ep)) => join_url(ep, bucket),
            (None, None) => format!("https://{bucket}.s3.{region}.amazonaws.com"),
        };

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            public_base_url,
        })
    }

    /// Read `S3_*` variables. Access key, secret key and bucket are required.
    pub fn from_env() -> Result<Self, StorageError> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| {
                StorageError::Config(format!(
                    "{key} is required when ARTIFACT_STORAGE_BACKEND=s3"
                ))
            })
        };
        let access_key = required("S3_ACCESS_KEY")?;
        let secret_key = required("S3_SECRET_KEY")?;
        let bucket = required("S3_BUCKET")?;
        let endpoint = std::env::var("S3_ENDPOINT").ok();
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let prefix = std::env::var("S3_PREFIX").unwrap_or_default();
        let public_url = std::env::var("S3_PUBLIC_URL").ok();

        Self::from_config(
            endpoint.as_deref(),
            &region,
            &access_key,
            &secret_key,
            &bucket,
            &prefix,
            public_url.as_deref(),
        )
    }

    fn s3_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }

    async fn head(&self, key: &str) -> bool {
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(self.s3_key(key))
            .send()
            .await
            .is_ok()
    }
}

#[async_trait]
impl ArtifactStorage for S3ArtifactStorage {
    async fn upload(
        &self,
        plugin_id: Uuid,
        version: &str,
        data: &[u8],
        file_name: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let mut key = artifact_key(plugin_id, version, file_name);
        if self.head(&key).await {
            key = unique_key(plugin_id, version, file_name);
        }

        let object_key = self.s3_key(&key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(data.to_vec().into())
            .content_type("application/wasm")
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("PutObject failed: {e}")))?;

        tracing::debug!(bucket = %self.bucket, key = %object_key, bytes = data.len(), "stored artifact in S3");

        Ok(StoredArtifact {
            download_url: join_url(&self.public_base_url, &object_key),
            key,
        })
    }

    async fn exists(&self, key: &str) -> bool {
        self.head(key).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.s3_key(key))
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("GetObject failed: {e}")))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(format!("Read body: {e}")))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.s3_key(key))
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("DeleteObject failed: {e}")))?;
        Ok(())
    }
}

// ─── Helpers ───────────────────────────────────────────────────────

pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string();
    // SECURITY: reject path traversal sequences
    if sanitized == ".." || sanitized == "." || sanitized.contains("..") {
        return sanitized.replace("..", "__");
    }
    sanitized
}
