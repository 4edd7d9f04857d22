//! Builder module for creating a [`Pipeline`].
//!
//! This module provides the [`PipelineBuilder`] struct which layers explicit
//! overrides (typically CLI flags) on top of a loaded [`PipelineConfig`] and
//! connects the production backends.

use std::path::PathBuf;

use crate::{KubectlApplier, Pipeline, PipelineConfig, PipelineError, ShipDocker};

/// The production pipeline: Docker Engine for images, `kubectl` for the cluster.
pub type DockerPipeline = Pipeline<ShipDocker, KubectlApplier>;

/// Builder for a [`Pipeline`].
///
/// Every setter overrides the corresponding configuration key. Unset values
/// keep what the configuration file and environment provided.
///
/// # Example
///
/// ```no_run
/// use shipwright_deploy::{PipelineBuilder, PipelineConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let pipeline = PipelineBuilder::new(PipelineConfig::load(None)?)
///     .registry("ghcr.io/acme")
///     .workspace("fluffy-space-guide")
///     .build()?;
/// let report = pipeline.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    registry: Option<String>,
    image_name: Option<String>,
    workspace: Option<String>,
    source_dir: Option<PathBuf>,
    manifest: Option<PathBuf>,
    context: Option<String>,
    namespace: Option<String>,
}

impl PipelineBuilder {
    /// Create a new [`PipelineBuilder`] on top of a loaded configuration.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: None,
            image_name: None,
            workspace: None,
            source_dir: None,
            manifest: None,
            context: None,
            namespace: None,
        }
    }

    /// Set the registry the image is pushed to.
    pub fn registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Set the repository name of the image.
    pub fn image_name(mut self, name: impl Into<String>) -> Self {
        self.image_name = Some(name.into());
        self
    }

    /// Set the workspace identifier used in reported URLs.
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Set the source directory.
    pub fn source_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(path.into());
        self
    }

    /// Set the manifest template file or directory.
    pub fn manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest = Some(path.into());
        self
    }

    /// Set the kubeconfig context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set the default namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Resolve the final configuration without validating it.
    pub fn into_config(self) -> PipelineConfig {
        let mut config = self.config;

        if let Some(registry) = self.registry {
            config.registry = registry;
        }
        if let Some(image_name) = self.image_name {
            config.image_name = image_name;
        }
        if let Some(workspace) = self.workspace {
            config.report.workspace = Some(workspace);
        }
        if let Some(source_dir) = self.source_dir {
            config.source_dir = source_dir;
        }
        if let Some(manifest) = self.manifest {
            config.cluster.manifest = manifest;
        }
        if let Some(context) = self.context {
            config.cluster.kubectl.context = Some(context);
        }
        if let Some(namespace) = self.namespace {
            config.cluster.kubectl.namespace = Some(namespace);
        }

        config
    }

    /// Build the production pipeline.
    ///
    /// This method:
    /// 1. Applies the overrides
    /// 2. Validates the configuration (fail-fast, before any side effect)
    /// 3. Connects to the Docker daemon
    pub fn build(self) -> Result<DockerPipeline, PipelineError> {
        let config = self.into_config();
        config.validate().map_err(PipelineError::Config)?;

        tracing::info!(
            registry = %config.registry,
            image_name = %config.image_name,
            source_dir = %config.source_dir.display(),
            manifest = %config.cluster.manifest.display(),
            "Building deployment pipeline..."
        );

        let docker = ShipDocker::new(config.registry_auth.clone()).map_err(PipelineError::Config)?;
        let applier = config.cluster.kubectl.clone();

        Pipeline::new(config, docker, applier)
    }
}
