//! Cluster manifest application.

use std::{future::Future, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Submits rendered manifests with create-or-update semantics.
///
/// Success means the control plane accepted the desired state, not that the
/// workload is running.
pub trait ClusterApplier {
    fn apply(&self, manifest: &str) -> impl Future<Output = Result<ApplyOutcome>> + Send;
}

/// What the control plane did with a resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Created,
    Configured,
    Unchanged,
}

/// A resource touched by an apply, e.g. `deployment.apps/application-api`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppliedResource {
    /// `kind.group/name` as printed by the cluster.
    pub resource: String,
    pub action: ApplyAction,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub resources: Vec<AppliedResource>,
}

impl ApplyOutcome {
    /// Parse `kubectl apply` output lines such as
    /// `deployment.apps/application-api configured`.
    ///
    /// Lines that do not match (warnings, dry-run suffixes) are skipped.
    pub fn parse(output: &str) -> Self {
        let resources = output
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let resource = parts.next()?;
                let action = ApplyAction::from_str(parts.next()?).ok()?;
                resource.contains('/').then(|| AppliedResource {
                    resource: resource.to_string(),
                    action,
                })
            })
            .collect();

        Self { resources }
    }
}
