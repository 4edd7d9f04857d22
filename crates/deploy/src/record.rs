//! Record of the last successful deployment, kept in the state directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{AppliedResource, Endpoint, ImageRef, ImageTag};

/// File name of the record of the last successful deployment.
pub const RECORD_FILENAME: &str = "last-deploy.json";

/// Record of a successful pipeline run.
///
/// Saved to `{state_dir}/last-deploy.json` after the manifest is applied. It
/// is informational: nothing in the pipeline reads it back to make decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// The pushed registry reference.
    pub image: ImageRef,
    /// The tag shared by the push and the manifest.
    pub tag: ImageTag,
    /// SHA-256 of the applied manifest.
    pub manifest_sha256: String,
    /// Resources the cluster reported.
    pub resources: Vec<AppliedResource>,
    /// Reported endpoints.
    pub endpoints: Vec<Endpoint>,
    /// When the manifest was accepted.
    pub deployed_at: DateTime<Utc>,
    /// Shipwright version that performed the deployment.
    pub shipwright_version: String,
}

impl DeploymentRecord {
    /// Create a record stamped with the current time and crate version.
    pub fn new(
        image: ImageRef,
        tag: ImageTag,
        manifest_sha256: String,
        resources: Vec<AppliedResource>,
        endpoints: Vec<Endpoint>,
    ) -> Self {
        Self {
            image,
            tag,
            manifest_sha256,
            resources,
            endpoints,
            deployed_at: Utc::now(),
            shipwright_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Save this record into a state directory, creating it if needed.
    ///
    /// The file is written as formatted JSON for human readability.
    pub fn save(&self, state_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(state_dir).context(format!(
            "Failed to create state directory {}",
            state_dir.display()
        ))?;

        let path = state_dir.join(RECORD_FILENAME);
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment record")?;

        std::fs::write(&path, json).context(format!(
            "Failed to write deployment record to {}",
            path.display()
        ))?;

        Ok(path)
    }

    /// Load the record of a state directory.
    ///
    /// Returns an error if the file doesn't exist, is malformed, or cannot be read.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(RECORD_FILENAME);
        if !path.exists() {
            anyhow::bail!("Deployment record does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(&path).context(format!(
            "Failed to read deployment record from {}",
            path.display()
        ))?;

        serde_json::from_str(&content).context("Failed to parse deployment record JSON")
    }
}
