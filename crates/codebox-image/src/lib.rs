//! Image provisioning for code-runner containers.
//!
//! A recipe is lowered into a [`Plan`] of [`Step`]s which the [`Pipeline`]
//! applies, in order, to an in-memory [`Snapshot`] of the image. The finished
//! snapshot can be checked with [`simulate_start`] and the same recipe rendered
//! as a Dockerfile with [`render_dockerfile`].

pub mod base;
pub mod container;
pub mod dockerfile;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod packages;
pub mod pipeline;
pub mod plan;
pub mod snapshot;
pub mod step;
pub mod users;

pub use base::ensure_supported as ensure_supported_base;
pub use container::{simulate_start, StartupReport};
pub use dockerfile::render as render_dockerfile;
pub use error::{ErrorKind, ProvisionError};
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{FileFetcher, Fetcher, MemoryFetcher};
pub use packages::{AptCatalog, PackageCatalog};
pub use pipeline::{BuildFailure, BuildOutcome, Pipeline, StepRecord};
pub use plan::Plan;
pub use snapshot::Snapshot;
pub use step::Step;
