//! Data Transfer Objects for engine communication
//!
//! Raw image descriptors in the shapes a Docker-compatible engine reports
//! them. They are converted into [`crate::domain::image::ImageRecord`] before
//! any cache logic looks at them.

pub mod image;
