//! Pipeline configuration types
//!
//! A pipeline is a repo identifier plus an ordered list of steps. The YAML
//! document is first read into a loose shape (each step is a mapping with one
//! kind key and optional flags), then converted into the strongly typed
//! [`PipelineConfig`] and validated, so that unknown kinds or a misplaced pull
//! are rejected before any engine call is made.

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Tag pulled when a pull step names none
pub const DEFAULT_TAG: &str = "latest";

/// Separator used to join a list of commands into one shell line
pub const DEFAULT_JOIN: &str = " && ";

/// Shell used to run command steps
pub const DEFAULT_SHELL: &str = "/bin/sh";

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

fn default_join() -> String {
    DEFAULT_JOIN.to_string()
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

/// A validated pipeline definition
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Identifier written to every image label produced by this pipeline
    pub repo: String,
    /// Steps, executed strictly in order
    pub steps: Vec<StepSpec>,
}

/// One step of a pipeline: what to do plus its cache flags
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub kind: StepKind,
    /// Never reuse a cached image for this step
    pub nocache: bool,
    /// Reject cached images older than this
    pub invalidate_after: Option<Duration>,
}

/// The step variants and their parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Pull(PullParams),
    Command(CommandParams),
    Copy(CopyParams),
}

/// Parameters of a pull step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PullParams {
    pub image: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

/// Parameters of a command step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandParams {
    pub run: RunCommand,
    #[serde(default = "default_join")]
    pub join: String,
    #[serde(default = "default_shell")]
    pub shell: String,
}

/// A command given either as one line or as a list of lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunCommand {
    Single(String),
    Sequence(Vec<String>),
}

/// Parameters of a copy step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyParams {
    /// Host path to upload
    pub source: String,
    /// Directory in the image that receives the source under its basename
    pub dest: String,
}

// =============================================================================
// Raw document shape
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawPipeline {
    repo: String,
    #[serde(alias = "build")]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    nocache: bool,
    #[serde(default)]
    invalidate_after: Option<u64>,
    #[serde(flatten)]
    kinds: BTreeMap<String, JsonValue>,
}

impl RawStep {
    fn into_spec(self, step: usize) -> Result<StepSpec, ConfigError> {
        if self.kinds.len() != 1 {
            return Err(ConfigError::AmbiguousStep {
                step,
                found: self.kinds.len(),
            });
        }

        let Some((kind, params)) = self.kinds.into_iter().next() else {
            return Err(ConfigError::AmbiguousStep { step, found: 0 });
        };

        let malformed = |e: serde_json::Error| ConfigError::MalformedStep {
            step,
            kind: kind.clone(),
            message: e.to_string(),
        };

        let kind = match kind.as_str() {
            "pull" => StepKind::Pull(serde_json::from_value(params).map_err(malformed)?),
            "command" => StepKind::Command(serde_json::from_value(params).map_err(malformed)?),
            "copy" => StepKind::Copy(serde_json::from_value(params).map_err(malformed)?),
            other => {
                return Err(ConfigError::UnknownStepKind {
                    step,
                    kind: other.to_string(),
                });
            }
        };

        Ok(StepSpec {
            kind,
            nocache: self.nocache,
            invalidate_after: self.invalidate_after.map(Duration::from_secs),
        })
    }
}

// =============================================================================
// PipelineConfig
// =============================================================================

impl PipelineConfig {
    /// Creates a pipeline from already typed steps
    pub fn new(repo: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            repo: repo.into(),
            steps,
        }
    }

    /// Reads, parses and validates a pipeline file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parses and validates a pipeline from YAML text
    ///
    /// # Example
    /// ```
    /// use kiln_core::domain::config::PipelineConfig;
    ///
    /// let config = PipelineConfig::from_yaml_str(
    ///     "repo: demo\nsteps:\n  - pull:\n      image: busybox\n",
    /// ).unwrap();
    /// assert_eq!(config.steps.len(), 1);
    /// ```
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawPipeline = serde_yaml::from_str(content)?;

        let steps = raw
            .steps
            .into_iter()
            .enumerate()
            .map(|(idx, step)| step.into_spec(idx))
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self {
            repo: raw.repo,
            steps,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the pipeline
    ///
    /// The first step must be a pull and no later step may be one; command
    /// and pull parameters must not be empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo.is_empty()
            || self
                .repo
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || c == ',')
        {
            return Err(ConfigError::InvalidRepo(self.repo.clone()));
        }

        if self.steps.is_empty() {
            return Err(ConfigError::NoSteps);
        }

        for (idx, step) in self.steps.iter().enumerate() {
            match &step.kind {
                StepKind::Pull(params) => {
                    if idx > 0 {
                        return Err(ConfigError::PullNotFirst { step: idx });
                    }
                    if params.image.trim().is_empty() || params.tag.trim().is_empty() {
                        return Err(ConfigError::MalformedStep {
                            step: idx,
                            kind: "pull".to_string(),
                            message: "image and tag must not be empty".to_string(),
                        });
                    }
                }
                StepKind::Command(params) => {
                    if params.command_line().trim().is_empty() {
                        return Err(ConfigError::MalformedStep {
                            step: idx,
                            kind: "command".to_string(),
                            message: "run must not be empty".to_string(),
                        });
                    }
                }
                StepKind::Copy(params) => {
                    if params.source.is_empty() || params.dest.is_empty() {
                        return Err(ConfigError::MalformedStep {
                            step: idx,
                            kind: "copy".to_string(),
                            message: "source and dest must not be empty".to_string(),
                        });
                    }
                }
            }

            if idx == 0 && step.requires_base_image() {
                return Err(ConfigError::MissingBaseImage {
                    step: idx,
                    kind: step.kind_name().to_string(),
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// StepSpec
// =============================================================================

impl StepSpec {
    /// Creates a step with default flags
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            nocache: false,
            invalidate_after: None,
        }
    }

    /// Shorthand for a pull step
    pub fn pull(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::new(StepKind::Pull(PullParams {
            image: image.into(),
            tag: tag.into(),
        }))
    }

    /// Shorthand for a command step built from a list of lines
    pub fn command<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(StepKind::Command(CommandParams {
            run: RunCommand::Sequence(lines.into_iter().map(Into::into).collect()),
            join: default_join(),
            shell: default_shell(),
        }))
    }

    /// Shorthand for a copy step
    pub fn copy(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self::new(StepKind::Copy(CopyParams {
            source: source.into(),
            dest: dest.into(),
        }))
    }

    pub fn with_nocache(mut self, nocache: bool) -> Self {
        self.nocache = nocache;
        self
    }

    pub fn with_invalidate_after(mut self, after: Duration) -> Self {
        self.invalidate_after = Some(after);
        self
    }

    /// Name of the step kind as written in the config file
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Whether this step builds on the image of the previous step
    pub fn requires_base_image(&self) -> bool {
        !matches!(self.kind, StepKind::Pull(_))
    }

    /// Canonical JSON of everything that identifies this step's configuration
    ///
    /// Stored as an image label and hashed into the config fingerprint.
    pub fn config_json(&self) -> JsonValue {
        json!({
            "kind": self.kind_name(),
            "params": self.kind.params_json(),
            "nocache": self.nocache,
            "invalidate_after": self.invalidate_after.map(|d| d.as_secs()),
        })
    }
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Pull(_) => "pull",
            StepKind::Command(_) => "command",
            StepKind::Copy(_) => "copy",
        }
    }

    fn params_json(&self) -> JsonValue {
        match self {
            StepKind::Pull(p) => json!({ "image": p.image, "tag": p.tag }),
            StepKind::Command(p) => {
                let run = match &p.run {
                    RunCommand::Single(line) => json!(line),
                    RunCommand::Sequence(lines) => json!(lines),
                };
                json!({ "run": run, "join": p.join, "shell": p.shell })
            }
            StepKind::Copy(p) => json!({ "source": p.source, "dest": p.dest }),
        }
    }
}

impl PullParams {
    /// `image:tag` reference passed to the engine
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl CommandParams {
    /// The single shell line this step runs
    pub fn command_line(&self) -> String {
        match &self.run {
            RunCommand::Single(line) => line.clone(),
            RunCommand::Sequence(lines) => lines.join(&self.join),
        }
    }

    /// Container command: the shell invoked with `-c` and the command line
    pub fn argv(&self) -> Vec<String> {
        vec![self.shell.clone(), "-c".to_string(), self.command_line()]
    }
}
