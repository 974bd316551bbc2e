//! Core domain types
//!
//! This module contains the domain structures shared by the engine facade
//! (which produces raw descriptors) and the builder (which executes steps and
//! resolves the cache).

pub mod config;
pub mod fingerprint;
pub mod image;
pub mod labels;
pub mod progress;
