//! Build requests submitted by the release orchestrator.

use std::net::{Ipv4Addr, Ipv6Addr};

use launcher_db::entities::plugin_build;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BuildError;

/// One plugin release to compile. Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub plugin_id: Uuid,
    /// Semver of the version being published.
    pub target_version: String,
    pub archive_url: String,
    pub release_tag: String,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub is_prerelease: bool,
    /// Directory of the plugin inside a monorepo archive.
    #[serde(default)]
    pub plugin_path: Option<String>,
    /// Bearer token for private archive downloads. Never persisted.
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
}

impl BuildRequest {
    /// Reject requests that can never build, before any state is created.
    pub fn validate(&self, allow_insecure_urls: bool) -> Result<(), BuildError> {
        semver::Version::parse(&self.target_version).map_err(|_| {
            BuildError::InvalidRequest(format!(
                "target version is not valid semver: '{}'",
                self.target_version
            ))
        })?;

        if self.release_tag.trim().is_empty() {
            return Err(BuildError::InvalidRequest(
                "release tag must not be empty".into(),
            ));
        }

        if let Some(ref path) = self.plugin_path {
            validate_relative_path(path, "plugin path").map_err(BuildError::InvalidRequest)?;
        }

        validate_archive_url(&self.archive_url, allow_insecure_urls)
    }
}

impl From<&plugin_build::Model> for BuildRequest {
    /// Rebuild the request a record was accepted for. The auth token is
    /// never persisted, so it is absent.
    fn from(build: &plugin_build::Model) -> Self {
        Self {
            plugin_id: build.plugin_id,
            target_version: build.version.clone(),
            archive_url: build.archive_url.clone(),
            release_tag: build.release_tag.clone(),
            changelog: build.changelog.clone(),
            is_prerelease: build.is_prerelease,
            plugin_path: build.plugin_path.clone(),
            auth_token: None,
        }
    }
}

/// Validate that a path is safe (no `..` components, not absolute).
pub(crate) fn validate_relative_path(path: &str, field_name: &str) -> Result<(), String> {
    let p = std::path::Path::new(path);
    if p.is_absolute() {
        return Err(format!(
            "{field_name} must be a relative path, got absolute: '{path}'"
        ));
    }
    for component in p.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err(format!("{field_name} must not contain '..': '{path}'"));
        }
    }
    Ok(())
}

/// Validate an archive URL for security.
///
/// Only HTTPS URLs are allowed (plain HTTP when `allow_insecure` is set).
/// Loopback, private, link-local and cloud metadata hosts are blocked to
/// prevent SSRF. The fetcher re-applies this to every redirect hop.
pub fn validate_archive_url(url: &str, allow_insecure: bool) -> Result<(), BuildError> {
    let parsed = url::Url::parse(url)
        .map_err(|_| BuildError::Download(format!("invalid archive URL: '{url}'")))?;
    validate_parsed_url(&parsed, allow_insecure)
}

pub(crate) fn validate_parsed_url(
    parsed: &url::Url,
    allow_insecure: bool,
) -> Result<(), BuildError> {
    match parsed.scheme() {
        "https" => {}
        "http" if allow_insecure => return Ok(()),
        other => {
            return Err(BuildError::Download(format!(
                "only HTTPS archive URLs are allowed, got scheme '{other}' in '{parsed}'"
            )))
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| BuildError::Download(format!("archive URL has no host: '{parsed}'")))?;

    let blocked = match host {
        url::Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            BLOCKED_DOMAINS.contains(&domain.as_str()) || domain.ends_with(".localhost")
        }
        url::Host::Ipv4(v4) => is_blocked_ipv4(v4),
        url::Host::Ipv6(v6) => is_blocked_ipv6(v6),
    };
    if blocked {
        return Err(BuildError::Download(format!(
            "archive URL host '{host}' is blocked (private/reserved address)"
        )));
    }

    Ok(())
}

const BLOCKED_DOMAINS: &[&str] = &["localhost", "metadata.google.internal"];

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
}
