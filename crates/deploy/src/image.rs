//! Image references.

use std::{fmt, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ImageTag;

/// A Docker image reference with repository and tag (or digest).
///
/// The repository may include a registry host with a port
/// (`localhost:5000/team/app`), which is why the tag separator is the last
/// `:` after the last `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// The repository, e.g. `ghcr.io/acme/application-api`.
    pub repository: String,
    /// The tag, e.g. `20240101T000000Z`.
    pub tag: Option<String>,
    /// The content digest, e.g. `sha256:...`.
    pub digest: Option<String>,
}

impl ImageRef {
    /// Create a tagged reference.
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// The registry reference `<registry>/<name>:<tag>` pushed by the pipeline.
    pub fn in_registry(registry: &str, name: &str, tag: &ImageTag) -> Self {
        let registry = registry.trim_end_matches('/');
        Self::new(format!("{registry}/{name}"), tag.to_string())
    }

    /// The registry host this reference points at.
    ///
    /// Follows the Docker convention: the first path component is a host only
    /// if it contains a `.` or `:` or is `localhost`. Otherwise it is Docker Hub.
    pub fn registry_host(&self) -> &str {
        match self.repository.split_once('/') {
            Some((first, _))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                first
            }
            _ => "docker.io",
        }
    }

    /// Whether this reference names an immutable build: a digest, or a tag other than `latest`.
    pub fn is_pinned(&self) -> bool {
        if self.digest.is_some() {
            return true;
        }
        matches!(self.tag.as_deref(), Some(tag) if !tag.is_empty() && tag != "latest")
    }

    /// The tag, or `latest` when absent (the Docker default).
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// Get the full image reference.
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("Image reference is empty");
        }

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (s, None),
        };

        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };

        if repository.is_empty() {
            anyhow::bail!("Image reference '{s}' has no repository");
        }
        if !is_valid_repository(repository) {
            anyhow::bail!("Image reference '{s}' has an invalid repository name");
        }
        if matches!(&tag, Some(t) if t.is_empty()) {
            anyhow::bail!("Image reference '{s}' has an empty tag");
        }

        Ok(Self {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}

/// Check a repository path: lowercase components of `[a-z0-9._-]`, an
/// optional `host[:port]` first component.
pub fn is_valid_repository(repository: &str) -> bool {
    let mut components = repository.split('/').peekable();
    let mut first = true;

    while let Some(component) = components.next() {
        if component.is_empty() {
            return false;
        }
        let is_host = first && components.peek().is_some();
        let valid = component.chars().all(|c| {
            c.is_ascii_lowercase()
                || c.is_ascii_digit()
                || matches!(c, '.' | '_' | '-')
                || (is_host && (c == ':' || c.is_ascii_uppercase()))
        });
        if !valid {
            return false;
        }
        first = false;
    }

    true
}

/// An image that exists in the local Docker store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    /// Local reference, `<name>:<tag>`.
    pub reference: ImageRef,
    /// Image ID reported by the daemon, when known.
    pub id: Option<String>,
}
