//! The build-and-deploy pipeline.
//!
//! One run is a linear sequence of [`Stage`]s. The first failure stops the
//! run and is returned as a [`PipelineError`]; whatever completed before it
//! stays in place (an image pushed without a manifest applied is a valid
//! partial state, re-running fixes it).

use std::path::PathBuf;

use crate::{
    ApplyOutcome, BuildRequest, ClusterApplier, DeploymentRecord, Endpoint, ImageBackend, ImageRef,
    ImageTag, ManifestTemplate, PipelineConfig, PipelineError, Stage, Variables,
    manifest::manifest_digest,
};

/// Template variables set by the pipeline. They take precedence over the environment.
pub mod vars {
    /// The image tag, e.g. `20240101T000000Z`.
    pub const TAG: &str = "TAG";
    /// The full registry reference, e.g. `ghcr.io/acme/application-api:20240101T000000Z`.
    pub const IMAGE: &str = "IMAGE";
    /// The registry, e.g. `ghcr.io/acme`.
    pub const REGISTRY: &str = "REGISTRY";
    /// The repository name inside the registry, e.g. `application-api`.
    pub const IMAGE_NAME: &str = "IMAGE_NAME";
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Use this tag instead of generating one.
    pub tag: Option<ImageTag>,
    /// Reuse the local image `<name>:<tag>` instead of building. Requires `tag`.
    pub skip_build: bool,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub tag: ImageTag,
    /// The pushed registry reference.
    pub image: ImageRef,
    /// The applied manifest.
    pub manifest: String,
    pub outcome: ApplyOutcome,
    pub endpoints: Vec<Endpoint>,
    /// Where the deployment record was written, if it could be written.
    pub record_path: Option<PathBuf>,
}

/// A configured pipeline, generic over its image and cluster backends.
pub struct Pipeline<B, A> {
    config: PipelineConfig,
    backend: B,
    applier: A,
    env: Variables,
}

impl<B, A> Pipeline<B, A>
where
    B: ImageBackend,
    A: ClusterApplier,
{
    /// Create a pipeline, validating the configuration first.
    ///
    /// The environment of the process is captured here, once.
    pub fn new(config: PipelineConfig, backend: B, applier: A) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Config)?;

        Ok(Self {
            config,
            backend,
            applier,
            env: capture_env(),
        })
    }

    /// Replace the captured environment.
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn registry(&self) -> &str {
        self.config.registry.trim().trim_end_matches('/')
    }

    /// The local reference of the image built for a tag.
    pub fn local_image(&self, tag: &ImageTag) -> ImageRef {
        ImageRef::new(&self.config.image_name, tag.to_string())
    }

    /// The registry reference pushed for a tag.
    pub fn target_image(&self, tag: &ImageTag) -> ImageRef {
        ImageRef::in_registry(self.registry(), &self.config.image_name, tag)
    }

    /// Template variables: the captured environment overlaid with the pipeline's own.
    pub fn variables(&self, tag: &ImageTag) -> Variables {
        let mut vars = self.env.clone();
        vars.insert(vars::TAG.to_string(), tag.to_string());
        vars.insert(vars::IMAGE.to_string(), self.target_image(tag).full_name());
        vars.insert(vars::REGISTRY.to_string(), self.registry().to_string());
        vars.insert(vars::IMAGE_NAME.to_string(), self.config.image_name.clone());
        vars
    }

    fn load_template(&self) -> Result<ManifestTemplate, PipelineError> {
        Ok(ManifestTemplate::load(&self.config.cluster.manifest)?)
    }

    /// Render the manifest for a tag without touching the registry or the cluster.
    pub fn render(&self, tag: &ImageTag) -> Result<String, PipelineError> {
        let template = self.load_template()?;
        tracing::debug!(variables = ?template.variables(), "Manifest template variables");
        Ok(template.render(&self.variables(tag))?)
    }

    /// Run the pipeline with a freshly generated tag.
    pub async fn run(&self) -> Result<DeployReport, PipelineError> {
        self.run_with(RunOptions::default()).await
    }

    /// Run the pipeline.
    pub async fn run_with(&self, options: RunOptions) -> Result<DeployReport, PipelineError> {
        if options.skip_build && options.tag.is_none() {
            return Err(PipelineError::Config(anyhow::anyhow!(
                "Skipping the build requires the tag of an existing image"
            )));
        }

        // Generated exactly once; every stage below uses this value.
        let tag = options.tag.unwrap_or_else(ImageTag::now);
        let local = self.local_image(&tag);
        let target = self.target_image(&tag);
        let vars = self.variables(&tag);

        tracing::info!(%tag, image = %target, "Starting pipeline...");

        // Preflight: nothing below may leave a pushed image behind an unrenderable manifest.
        let template = self.load_template()?;
        tracing::debug!(variables = ?template.variables(), "Manifest template variables");
        template.check(&vars)?;
        let endpoints = self
            .config
            .report
            .endpoints()
            .map_err(PipelineError::Config)?;

        let image = if options.skip_build {
            tracing::info!(stage = %Stage::Build, image = %local, "Reusing existing image");
            self.backend
                .existing(&local)
                .await
                .map_err(PipelineError::Build)?
        } else {
            tracing::info!(stage = %Stage::Build, image = %local, "Building runtime image...");
            self.backend
                .build(&self.build_request(&local))
                .await
                .map_err(PipelineError::Build)?
        };

        tracing::info!(stage = %Stage::Tag, source = %image.reference, target = %target, "Tagging image...");
        self.backend
            .tag(&image, &target)
            .await
            .map_err(|source| PipelineError::Registry {
                stage: Stage::Tag,
                source,
            })?;

        tracing::info!(stage = %Stage::Push, image = %target, "Pushing image...");
        self.backend
            .push(&target)
            .await
            .map_err(|source| PipelineError::Registry {
                stage: Stage::Push,
                source,
            })?;

        tracing::info!(stage = %Stage::Render, manifest = %self.config.cluster.manifest.display(), "Rendering manifest...");
        let manifest = template.render(&vars)?;

        tracing::info!(stage = %Stage::Apply, "Applying manifest...");
        let outcome = self
            .applier
            .apply(&manifest)
            .await
            .map_err(PipelineError::cluster)?;

        tracing::info!(stage = %Stage::Report, "✓ Deployment complete!");
        for endpoint in &endpoints {
            tracing::info!("{:<12} {}", endpoint.name, endpoint.url);
        }

        let record = DeploymentRecord::new(
            target.clone(),
            tag,
            manifest_digest(&manifest),
            outcome.resources.clone(),
            endpoints.clone(),
        );
        // The manifest is already applied; a missing record does not fail the run.
        let record_path = match record.save(&self.config.state_path()) {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "Deployment record saved");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(error = ?e, "Failed to save deployment record");
                None
            }
        };

        Ok(DeployReport {
            tag,
            image: target,
            manifest,
            outcome,
            endpoints,
            record_path,
        })
    }

    fn build_request(&self, local: &ImageRef) -> BuildRequest {
        let mut exclude = Vec::new();
        if let Ok(state_dir) = self
            .config
            .state_path()
            .strip_prefix(&self.config.source_dir)
        {
            exclude.push(state_dir.to_path_buf());
        }

        BuildRequest {
            spec: self.config.image.clone(),
            source_dir: self.config.source_dir.clone(),
            exclude,
            local: local.clone(),
        }
    }
}

/// The process environment. Variables whose name or value is not UTF-8 are skipped.
fn capture_env() -> Variables {
    std::env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) => {
                tracing::debug!(%key, "Skipping environment variable with a non UTF-8 value");
                None
            }
            (Err(key), _) => {
                tracing::debug!(key = ?key, "Skipping environment variable with a non UTF-8 name");
                None
            }
        })
        .collect()
}
