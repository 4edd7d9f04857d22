//! Pipeline configuration.
//!
//! Layers, lowest to highest precedence: defaults, a TOML file, `SHIPWRIGHT_`
//! environment variables (`__` separates nested keys, e.g.
//! `SHIPWRIGHT_CLUSTER__NAMESPACE`). The binary applies CLI flags on top.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    ImageSpec, KubectlApplier, RegistryAuth, ReportConfig, dockerfile::DEFAULT_BINARY,
    image::is_valid_repository,
};

/// The default name of the configuration file.
pub const CONFIG_FILENAME: &str = "Shipwright.toml";
/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "SHIPWRIGHT_";
/// Default manifest template location, relative to the working directory.
pub const DEFAULT_MANIFEST: &str = "deploy/k8s.yaml";
/// Default state directory, relative to the source directory.
pub const DEFAULT_STATE_DIR: &str = ".shipwright";

/// Cluster configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Manifest template file or directory.
    pub manifest: PathBuf,
    #[serde(flatten)]
    pub kubectl: KubectlApplier,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            kubectl: KubectlApplier::default(),
        }
    }
}

/// Everything a pipeline run needs to know, resolved once at start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Registry the image is pushed to, e.g. `ghcr.io/acme`.
    pub registry: String,
    /// Repository name of the image inside the registry.
    pub image_name: String,
    /// Root of the source tree.
    pub source_dir: PathBuf,
    /// Where deployment records are written. Relative paths are resolved against `source_dir`.
    pub state_dir: PathBuf,

    /// Runtime image definition.
    pub image: ImageSpec,
    /// Registry credentials.
    pub registry_auth: RegistryAuth,
    /// Cluster settings.
    pub cluster: ClusterConfig,
    /// Endpoint reporting.
    pub report: ReportConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            registry: String::new(),
            image_name: DEFAULT_BINARY.to_string(),
            source_dir: PathBuf::from("."),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            image: ImageSpec::default(),
            registry_auth: RegistryAuth::default(),
            cluster: ClusterConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// The figment with defaults, an optional TOML file and the environment.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));

        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load the configuration.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path
            && !path.exists()
        {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }

        let config: Self = Self::figment(path)
            .extract()
            .context("Failed to load configuration")?;

        tracing::debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Check every required key before anything with side effects runs.
    pub fn validate(&self) -> Result<()> {
        let registry = self.registry.trim().trim_end_matches('/');
        if registry.is_empty() {
            anyhow::bail!(
                "No registry configured. Set `registry` in {} or {}REGISTRY",
                CONFIG_FILENAME,
                ENV_PREFIX
            );
        }

        if !is_valid_repository(&format!("{}/{}", registry, self.image_name)) {
            anyhow::bail!(
                "'{}/{}' is not a valid image repository",
                registry,
                self.image_name
            );
        }

        self.image.validate().context("Invalid image definition")?;

        if !self.source_dir.is_dir() {
            anyhow::bail!("Source directory not found: {}", self.source_dir.display());
        }

        if !self.cluster.manifest.exists() {
            anyhow::bail!(
                "Manifest template not found: {}",
                self.cluster.manifest.display()
            );
        }

        if !self.report.endpoints.is_empty()
            && self
                .report
                .workspace
                .as_deref()
                .is_none_or(|w| w.trim().is_empty())
        {
            anyhow::bail!(
                "No workspace identifier configured. Set `report.workspace` or {}REPORT__WORKSPACE",
                ENV_PREFIX
            );
        }

        Ok(())
    }

    /// The state directory, resolved against the source directory.
    pub fn state_path(&self) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            self.source_dir.join(&self.state_dir)
        }
    }
}
