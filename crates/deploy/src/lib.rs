//! shipwright-deploy - Build-and-deploy pipeline for containerized Rust services.
//!
//! This crate builds a minimal runtime image for a Rust binary, pushes it to a
//! registry under a UTC timestamp tag, renders a Kubernetes manifest that
//! references the same tag, applies it with `kubectl` and reports the
//! resulting URLs.

pub mod traits;
pub use traits::{
    AppliedResource, ApplyAction, ApplyOutcome, BuildRequest, ClusterApplier, ImageBackend, Stage,
};

mod auth;
pub use auth::RegistryAuth;

mod builder;
pub use builder::{DockerPipeline, PipelineBuilder};

pub mod config;
pub use config::{ClusterConfig, PipelineConfig};

mod context;
pub use context::BuildContext;

mod docker;
pub use docker::ShipDocker;

pub mod dockerfile;
pub use dockerfile::ImageSpec;

mod endpoints;
pub use endpoints::{DEFAULT_DOMAIN, Endpoint, PortConvention, ReportConfig};

mod error;
pub use error::PipelineError;

pub mod image;
pub use image::{ImageRef, LocalImage};

pub mod kubectl;
pub use kubectl::{ApplyError, KubectlApplier, KubectlCmdBuilder};

pub mod manifest;
pub use manifest::{ManifestTemplate, TemplateError, TemplateFile, Variables, manifest_digest};

mod pipeline;
pub use pipeline::{DeployReport, Pipeline, RunOptions, vars};

mod record;
pub use record::{DeploymentRecord, RECORD_FILENAME};

mod tag;
pub use tag::{ImageTag, TAG_FORMAT};
