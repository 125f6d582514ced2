//! Shared fixtures for pipeline integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use launcher_builder::{BuildError, BuildPipeline, BuildRequest, BuilderConfig, MemoryBuildStore};
use launcher_builder::state::BuildStore;
use launcher_db::entities::plugin_version;
use launcher_storage::{ArtifactStorage, LocalArtifactStorage, StorageError, StoredArtifact};
use tempfile::TempDir;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Module with a single `env` import, the shape a JS PDK build produces.
pub const FIXTURE_WASM: &[u8] = &[
    0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
    0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type section
    0x02, 0x0b, 0x01, 0x03, b'e', b'n', b'v', 0x03, b'r', b'u', b'n', 0x00, 0x00, // imports
];

/// Build a `.tar.gz` from `(path, contents)` pairs.
pub fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn manifest_json(name: &str, version: &str) -> String {
    serde_json::json!({
        "name": name,
        "version": version,
        "permissions": ["network:api.weather.example", {"oauth": "google"}],
        "ai_tool_schemas": {"get_forecast": {"type": "object"}},
        "min_launcher_version": "0.9.0"
    })
    .to_string()
}

/// Wraps local storage and counts calls.
pub struct CountingStorage {
    inner: LocalArtifactStorage,
    pub uploads: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CountingStorage {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn base(&self) -> &Path {
        self.inner.base()
    }
}

#[async_trait]
impl ArtifactStorage for CountingStorage {
    async fn upload(
        &self,
        plugin_id: Uuid,
        version: &str,
        data: &[u8],
        file_name: &str,
    ) -> Result<StoredArtifact, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(plugin_id, version, data, file_name).await
    }

    async fn exists(&self, key: &str) -> bool {
        self.inner.exists(key).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.read(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key).await
    }
}

pub struct Harness {
    pub server: MockServer,
    pub store: Arc<MemoryBuildStore>,
    pub storage: Arc<CountingStorage>,
    pub config: BuilderConfig,
    /// Created by the fake compilers whenever they run.
    pub compile_marker: PathBuf,
    _dirs: Vec<TempDir>,
}

#[cfg(unix)]
fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

impl Harness {
    pub async fn new() -> Self {
        let workspaces = tempfile::tempdir().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();

        let fixture = bin.path().join("fixture.wasm");
        std::fs::write(&fixture, FIXTURE_WASM).unwrap();
        let compile_marker = bin.path().join("compiled");

        let mut config = BuilderConfig {
            workspace_root: workspaces.path().to_path_buf(),
            allow_insecure_urls: true,
            install_timeout: Duration::from_secs(10),
            compile_timeout: Duration::from_secs(10),
            ..BuilderConfig::default()
        };
        config.toolchain.npm = script(bin.path(), "npm", "echo \"added 1 package\"");
        // Args: @extism/js-pdk <entry> -o <output>
        config.toolchain.npx = script(
            bin.path(),
            "npx",
            &format!(
                "touch {}\ncp {} \"$4\"",
                compile_marker.display(),
                fixture.display()
            ),
        );
        config.toolchain.cargo = script(
            bin.path(),
            "cargo",
            &format!(
                "[ \"$1\" = fetch ] && exit 0\ntouch {}\nexit 1",
                compile_marker.display()
            ),
        );

        let storage = Arc::new(CountingStorage {
            inner: LocalArtifactStorage::new(artifacts.path(), "https://cdn.example.com"),
            uploads: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        });

        Self {
            server: MockServer::start().await,
            store: Arc::new(MemoryBuildStore::new()),
            storage,
            config,
            compile_marker,
            _dirs: vec![workspaces, artifacts, bin],
        }
    }

    pub fn pipeline(&self) -> BuildPipeline {
        BuildPipeline::new(self.config.clone(), self.storage.clone(), self.store.clone()).unwrap()
    }

    /// Serve `bytes` at `url_path` and return the full URL.
    pub async fn serve_archive(&self, url_path: &str, bytes: Vec<u8>) -> String {
        Mock::given(method("GET"))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .mount(&self.server)
            .await;
        format!("{}{url_path}", self.server.uri())
    }

    pub fn request(&self, plugin_id: Uuid, version: &str, archive_url: &str) -> BuildRequest {
        BuildRequest {
            plugin_id,
            target_version: version.to_string(),
            archive_url: archive_url.to_string(),
            release_tag: format!("v{version}"),
            changelog: Some(format!("Release {version}")),
            is_prerelease: false,
            plugin_path: None,
            auth_token: None,
        }
    }

    /// Accept and run one build through `pipeline`.
    pub async fn submit(
        &self,
        pipeline: &BuildPipeline,
        request: &BuildRequest,
    ) -> (Uuid, Result<plugin_version::Model, BuildError>) {
        let build_id = Uuid::new_v4();
        self.store.accept_build(build_id, request).await.unwrap();
        let result = pipeline.run(build_id, request).await;
        (build_id, result)
    }

    pub fn workspace_dir(&self, build_id: Uuid) -> PathBuf {
        self.config.workspace_root.join(format!("build-{build_id}"))
    }

    pub fn compiler_ran(&self) -> bool {
        self.compile_marker.exists()
    }
}
