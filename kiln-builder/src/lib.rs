//! Kiln builder
//!
//! Runs a pipeline of image build steps against a container engine, reusing
//! images from earlier runs whenever a step's configuration is unchanged.
//!
//! # Example
//!
//! ```no_run
//! use kiln_builder::{BuildOptions, Orchestrator};
//! use kiln_core::domain::config::PipelineConfig;
//! use kiln_engine::{CliEngine, NullSink};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = PipelineConfig::from_file(Path::new("kiln.yaml"))?;
//!     let engine = Arc::new(CliEngine::new("docker"));
//!
//!     let orchestrator = Orchestrator::new(engine, pipeline, BuildOptions::default());
//!     let report = orchestrator.build(&mut NullSink).await?;
//!
//!     println!("Built {}", report.image);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod step;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::BuildOptions;
pub use error::{BuildError, Result};
pub use orchestrator::Orchestrator;
pub use report::{BuildReport, CleanReport, StepReport};
