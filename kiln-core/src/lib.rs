//! Kiln Core
//!
//! Core types and abstractions for the Kiln image build orchestrator.
//!
//! This crate contains:
//! - Domain types: pipeline configuration, steps, image records, labels and fingerprints
//! - DTOs: engine descriptors as returned by a Docker-compatible engine
//! - Error types shared by the engine facade and the builder

pub mod domain;
pub mod dto;
pub mod error;

pub use error::{ConfigError, RecordError};
