//! Image build and registry operations.

use std::{future::Future, path::PathBuf};

use anyhow::Result;

use crate::{ImageRef, ImageSpec, LocalImage};

/// Everything needed to build the runtime image.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// The runtime image definition.
    pub spec: ImageSpec,
    /// Root of the source tree sent as build context.
    pub source_dir: PathBuf,
    /// Paths under `source_dir` left out of the build context.
    pub exclude: Vec<PathBuf>,
    /// Local reference the built image gets, `<name>:<tag>`.
    pub local: ImageRef,
}

/// Builds, tags and pushes images.
///
/// A failed `build` must leave no image under `request.local`.
pub trait ImageBackend {
    /// Build the runtime image.
    fn build(&self, request: &BuildRequest) -> impl Future<Output = Result<LocalImage>> + Send;

    /// Look up an image that was built earlier.
    fn existing(&self, local: &ImageRef) -> impl Future<Output = Result<LocalImage>> + Send;

    /// Add the registry reference to a local image.
    fn tag(&self, image: &LocalImage, target: &ImageRef)
    -> impl Future<Output = Result<()>> + Send;

    /// Push a registry reference.
    fn push(&self, target: &ImageRef) -> impl Future<Output = Result<()>> + Send;
}
