//! Docker Engine client for building, tagging and pushing images.

use anyhow::{Context, Result};
use bollard::{
    Docker,
    image::{BuildImageOptions, PushImageOptions, TagImageOptions},
};
use derive_more::Deref;
use futures::StreamExt;

use crate::{
    BuildContext, BuildRequest, ImageBackend, ImageRef, LocalImage, RegistryAuth,
    dockerfile::GENERATED_DOCKERFILE,
};

/// Docker client wrapper for the image pipeline.
#[derive(Deref)]
pub struct ShipDocker {
    #[deref]
    docker: Docker,

    /// Credentials used for pushes.
    pub auth: RegistryAuth,
}

impl ShipDocker {
    /// Connect to the local Docker daemon.
    pub fn new(auth: RegistryAuth) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        Ok(Self { docker, auth })
    }

    /// Pack the build context for a request.
    ///
    /// A generated Dockerfile is injected under a reserved name unless the
    /// image definition points at a Dockerfile of the source tree.
    fn build_context(request: &BuildRequest) -> Result<(Vec<u8>, String)> {
        let mut context = BuildContext::new(&request.source_dir);
        for path in &request.exclude {
            context = context.exclude(path);
        }

        let dockerfile = match &request.spec.dockerfile {
            Some(path) => path.display().to_string(),
            None => {
                context = context.file(GENERATED_DOCKERFILE, request.spec.dockerfile());
                GENERATED_DOCKERFILE.to_string()
            }
        };

        Ok((context.archive()?, dockerfile))
    }
}

impl ImageBackend for ShipDocker {
    async fn build(&self, request: &BuildRequest) -> Result<LocalImage> {
        let (archive, dockerfile) = Self::build_context(request)?;
        let local = request.local.full_name();

        tracing::info!(
            image = %local,
            dockerfile,
            builder = %request.spec.builder_image,
            runtime = %request.spec.runtime_image,
            "Building image..."
        );

        let options = BuildImageOptions {
            dockerfile,
            t: local.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(archive.into()));
        let mut image_id = None;

        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| anyhow::anyhow!("Failed to build image '{}': {}", local, e))?;

            if let Some(error) = info.error {
                anyhow::bail!("Failed to build image '{}': {}", local, error.trim());
            }
            if let Some(line) = info.stream.as_deref().map(str::trim_end)
                && !line.is_empty()
            {
                tracing::debug!(image = %local, "{}", line);
            }
            if let Some(id) = info.aux.and_then(|aux| aux.id) {
                image_id = Some(id);
            }
        }

        tracing::info!(image = %local, id = ?image_id, "Image built");

        Ok(LocalImage {
            reference: request.local.clone(),
            id: image_id,
        })
    }

    async fn existing(&self, local: &ImageRef) -> Result<LocalImage> {
        let inspect = self
            .docker
            .inspect_image(&local.full_name())
            .await
            .with_context(|| format!("Image '{}' not found locally", local))?;

        Ok(LocalImage {
            reference: local.clone(),
            id: inspect.id,
        })
    }

    async fn tag(&self, image: &LocalImage, target: &ImageRef) -> Result<()> {
        let source = image.reference.full_name();
        tracing::debug!(source, target = %target, "Tagging image");

        self.docker
            .tag_image(
                &source,
                Some(TagImageOptions {
                    repo: target.repository.clone(),
                    tag: target.tag_or_latest().to_string(),
                }),
            )
            .await
            .with_context(|| format!("Failed to tag '{}' as '{}'", source, target))?;

        Ok(())
    }

    async fn push(&self, target: &ImageRef) -> Result<()> {
        let credentials = self
            .auth
            .credentials_for(target.registry_host())
            .context("Failed to resolve registry credentials")?;

        tracing::info!(
            image = %target,
            authenticated = credentials.is_some(),
            "Pushing image..."
        );

        let mut stream = self.docker.push_image(
            &target.repository,
            Some(PushImageOptions {
                tag: target.tag_or_latest().to_string(),
            }),
            credentials,
        );

        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| anyhow::anyhow!("Failed to push image '{}': {}", target, e))?;

            if let Some(error) = info.error {
                anyhow::bail!("Failed to push image '{}': {}", target, error);
            }
            if let Some(status) = info.status {
                tracing::trace!(image = %target, status, "Image push");
            }
        }

        tracing::info!(image = %target, "Image pushed");
        Ok(())
    }
}
