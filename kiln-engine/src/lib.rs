//! Kiln Engine Facade
//!
//! The narrow capability surface the builder needs from a container engine:
//! listing labelled images and containers, pulling, running containers,
//! committing them to images, uploading archives and removing resources.
//!
//! The [`Engine`] trait is what the builder depends on. [`CliEngine`] is the
//! production implementation, driving a Docker-compatible command line
//! (`docker` or `podman`) as subprocesses.
//!
//! # Example
//!
//! ```no_run
//! use kiln_engine::{CliEngine, Engine};
//!
//! #[tokio::main]
//! async fn main() -> kiln_engine::Result<()> {
//!     let engine = CliEngine::new("docker");
//!     let images = engine.list_images("kiln.repo=demo").await?;
//!     println!("{} cached image(s)", images.len());
//!     Ok(())
//! }
//! ```

mod cli;
mod engine;
pub mod error;

pub use cli::CliEngine;
pub use engine::{Archive, Engine, NullSink, ProgressSink};
pub use error::{EngineError, Result};
