//! Source archive download.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::BuildError;
use crate::request::validate_parsed_url;

const USER_AGENT: &str = concat!("launcher-plugin-builder/", env!("CARGO_PKG_VERSION"));

/// Maximum redirect hops followed for one download.
const MAX_REDIRECTS: usize = 10;

/// Downloads release archives over HTTP(S), streaming straight to disk.
///
/// No retries: a failed download fails the build. Every redirect target is
/// checked with the same URL rules as the submitted URL.
#[derive(Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
    max_size: u64,
}

impl ArchiveFetcher {
    pub fn new(
        timeout: Duration,
        max_size: u64,
        allow_insecure: bool,
    ) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(redirect_policy(allow_insecure))
            .timeout(timeout)
            .build()
            .map_err(|e| BuildError::Download(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, max_size })
    }

    /// Download `url` into `dest`, returning the number of bytes written.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        auth_token: Option<&str>,
    ) -> Result<u64, BuildError> {
        let mut request = self.client.get(url);
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            BuildError::Download(format!("request to {url} failed: {}", error_chain(&e)))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BuildError::Download(format!(
                "server returned {status} for {url}"
            )));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_size {
                return Err(BuildError::Download(format!(
                    "archive too large: {len} bytes (max: {} bytes)",
                    self.max_size
                )));
            }
        }

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            BuildError::Download(format!("failed to create {}: {e}", dest.display()))
        })?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BuildError::Download(format!("download error: {e}")))?;
            written = written.saturating_add(chunk.len() as u64);
            if written > self.max_size {
                return Err(BuildError::Download(format!(
                    "archive exceeds maximum size of {} bytes",
                    self.max_size
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| BuildError::Download(format!("failed to write archive: {e}")))?;
        }

        file.flush()
            .await
            .map_err(|e| BuildError::Download(format!("failed to write archive: {e}")))?;

        tracing::info!(url = %url, bytes = written, "archive downloaded");
        Ok(written)
    }
}

fn redirect_policy(allow_insecure: bool) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        match validate_parsed_url(attempt.url(), allow_insecure) {
            Ok(()) => attempt.follow(),
            Err(e) => {
                tracing::warn!(target_url = %attempt.url(), "refusing archive redirect: {e}");
                attempt.error(format!("redirect refused: {e}"))
            }
        }
    })
}

/// reqwest hides the redirect policy's reason in the source chain.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
