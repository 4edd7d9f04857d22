//! Pipeline failure taxonomy.

use crate::{Stage, TemplateError, kubectl::ApplyError};

/// Why a pipeline run stopped.
///
/// Every variant is fatal; the pipeline neither retries nor rolls back.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A required setting is missing or invalid. Nothing has run yet.
    #[error("invalid configuration: {0:#}")]
    Config(#[source] anyhow::Error),

    /// Compilation or runtime dependency installation failed. No image was tagged.
    #[error("build failed: {0:#}")]
    Build(#[source] anyhow::Error),

    /// Tagging or pushing failed. No manifest was applied.
    #[error("registry error during {stage}: {source:#}")]
    Registry {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// The manifest could not be rendered. Nothing was applied.
    #[error("manifest error: {0}")]
    Template(#[from] TemplateError),

    /// The cluster rejected the manifest.
    #[error("cluster rejected manifest: {source:#}")]
    Cluster {
        /// Exit status of the cluster client, if known.
        status: Option<i32>,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Wrap an apply failure, keeping the cluster client's exit status.
    pub fn cluster(source: anyhow::Error) -> Self {
        let status = source.downcast_ref::<ApplyError>().and_then(|e| e.status);
        Self::Cluster { status, source }
    }

    /// The stage that failed, `None` for configuration errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Config(_) => None,
            Self::Build(_) => Some(Stage::Build),
            Self::Registry { stage, .. } => Some(*stage),
            Self::Template(_) => Some(Stage::Render),
            Self::Cluster { .. } => Some(Stage::Apply),
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Build(_) => 3,
            Self::Registry { .. } => 4,
            Self::Template(_) => 5,
            Self::Cluster { status, .. } => status.filter(|s| *s != 0).unwrap_or(6),
        }
    }
}
