use std::path::PathBuf;

use clap::Parser;
use shipwright_deploy::{ImageTag, PipelineBuilder, PipelineConfig};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(
    author,
    version,
    about = "Build a Rust service image, push it and roll it out to Kubernetes"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "SHIPWRIGHT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Shipwright.toml configuration file.
    ///
    /// If not provided, ./Shipwright.toml is used when it exists.
    #[arg(short, long, alias = "conf", env = "SHIPWRIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The registry to push to, e.g. ghcr.io/acme.
    #[arg(short, long, env = "SHIPWRIGHT_REGISTRY")]
    pub registry: Option<String>,

    /// The repository name of the image inside the registry.
    #[arg(long, alias = "name", env = "SHIPWRIGHT_IMAGE_NAME")]
    pub image_name: Option<String>,

    /// The workspace identifier used to build the reported URLs.
    #[arg(short, long, env = "SHIPWRIGHT_WORKSPACE")]
    pub workspace: Option<String>,

    /// The root of the source tree to build.
    #[arg(long, alias = "src", env = "SHIPWRIGHT_SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    /// The manifest template, a file or a directory of YAML files.
    #[arg(short, long, env = "SHIPWRIGHT_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// The kubeconfig context to apply to.
    #[arg(long, env = "SHIPWRIGHT_CONTEXT")]
    pub context: Option<String>,

    /// The namespace for resources that do not declare one.
    #[arg(short, long, env = "SHIPWRIGHT_NAMESPACE")]
    pub namespace: Option<String>,

    /// Render and print the manifest without building, pushing or applying.
    #[arg(long, env = "SHIPWRIGHT_DRY_RUN")]
    pub dry_run: bool,

    /// Reuse the local image built earlier under --tag instead of building.
    #[arg(long, env = "SHIPWRIGHT_SKIP_BUILD", requires = "tag")]
    pub skip_build: bool,

    /// Use this tag (YYYYMMDDTHHMMSSZ) instead of generating one.
    #[arg(long, env = "SHIPWRIGHT_TAG")]
    pub tag: Option<ImageTag>,

    /// Write the resolved configuration, flags included, to this TOML file before running.
    #[arg(long, env = "SHIPWRIGHT_SAVE_CONFIG")]
    pub save_config: Option<PathBuf>,
}

impl Cli {
    /// Layer the flags on top of a loaded configuration.
    pub fn builder(&self, config: PipelineConfig) -> PipelineBuilder {
        let mut builder = PipelineBuilder::new(config);

        if let Some(registry) = &self.registry {
            builder = builder.registry(registry);
        }
        if let Some(image_name) = &self.image_name {
            builder = builder.image_name(image_name);
        }
        if let Some(workspace) = &self.workspace {
            builder = builder.workspace(workspace);
        }
        if let Some(source_dir) = &self.source_dir {
            builder = builder.source_dir(source_dir);
        }
        if let Some(manifest) = &self.manifest {
            builder = builder.manifest(manifest);
        }
        if let Some(context) = &self.context {
            builder = builder.context(context);
        }
        if let Some(namespace) = &self.namespace {
            builder = builder.namespace(namespace);
        }

        builder
    }
}
