//! Error types for Kiln core

use thiserror::Error;

/// Errors raised while loading or validating a pipeline configuration
///
/// All of these are detected before the engine is touched for the step
/// they concern.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or does not match the expected shape
    #[error("Failed to parse pipeline config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The `repo` identifier is empty or contains characters unusable in a label
    #[error("Invalid repo identifier '{0}'")]
    InvalidRepo(String),

    /// The pipeline has no steps
    #[error("Pipeline has no steps")]
    NoSteps,

    /// A step mapping names a kind that does not exist
    #[error("Step {step}: '{kind}' is an invalid step type")]
    UnknownStepKind { step: usize, kind: String },

    /// A step mapping does not hold exactly one kind key
    #[error("Step {step}: expected exactly one step kind, found {found}")]
    AmbiguousStep { step: usize, found: usize },

    /// The parameters of a step do not match its kind
    #[error("Step {step}: malformed {kind} parameters: {message}")]
    MalformedStep {
        step: usize,
        kind: String,
        message: String,
    },

    /// A pull step appears after the first position
    #[error("Step {step}: pull can only be the first step")]
    PullNotFirst { step: usize },

    /// A step that needs a previous image has none
    #[error("Step {step}: {kind} requires the image of a previous step")]
    MissingBaseImage { step: usize, kind: String },
}

/// Errors raised while turning an engine descriptor into an image record
#[derive(Debug, Error)]
pub enum RecordError {
    /// The image identity is not a 64 character hex digest
    #[error("Invalid image id '{0}': expected 64 hex characters")]
    InvalidId(String),

    /// A reserved label is absent
    #[error("Image {image} is missing label '{label}'")]
    MissingLabel { image: String, label: String },

    /// A reserved label holds an unparseable value
    #[error("Image {image} has invalid label '{label}': {value}")]
    InvalidLabel {
        image: String,
        label: String,
        value: String,
    },

    /// The engine's creation timestamp could not be parsed
    #[error("Invalid image timestamp '{0}'")]
    InvalidTimestamp(String),
}

impl RecordError {
    /// Integrity violations are fatal, label problems only disqualify the image
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::InvalidId(_))
    }
}
