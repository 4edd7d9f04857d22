//! Pipeline stages.

use serde::{Deserialize, Serialize};

/// A step of the pipeline, in execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Compile the artifact and build the runtime image.
    Build,
    /// Tag the local image with its registry reference.
    Tag,
    /// Push the registry reference.
    Push,
    /// Substitute variables into the manifest template.
    Render,
    /// Submit the manifest to the cluster.
    Apply,
    /// Emit endpoints and record the deployment.
    Report,
}
