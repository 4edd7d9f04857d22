//! Seams between the pipeline and the outside world.
//!
//! The pipeline runs a fixed stage order: Build -> Tag -> Push -> Render ->
//! Apply -> Report. Image operations go through an [`ImageBackend`] and
//! cluster operations through a [`ClusterApplier`], so the orchestration can
//! run against the Docker Engine and `kubectl` or against test doubles.

mod applier;
mod backend;
mod stages;

pub use applier::{AppliedResource, ApplyAction, ApplyOutcome, ClusterApplier};
pub use backend::{BuildRequest, ImageBackend};
pub use stages::Stage;
