//! Error types for pipeline construction and mutation.
//!
//! Errors fall into three groups:
//!
//! - **Configuration errors** ([`PipelineError::UnknownStage`],
//!   [`PipelineError::DuplicateStage`], [`PipelineError::InvalidTranslation`], ...)
//!   are detected before any host resource is touched.
//! - **Resource errors** ([`HostError`], [`ShaderError`]) come from the host or
//!   from reading shader sources. They abort a `build`, but incremental
//!   mutations report them and leave the previously working stage untouched.
//! - **Persistence errors** ([`ConfigError`]) come from the INI-style graphics
//!   configuration.

use std::path::PathBuf;

use crate::host::{NodeId, TargetId};

/// Convenience alias used throughout the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// A failure reported by a [`RenderHost`](crate::RenderHost) implementation.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The host could not allocate an off-screen render target.
    #[error("failed to create render target '{name}': {reason}")]
    TargetCreation { name: String, reason: String },
    /// A render target handle does not refer to a live target.
    #[error("unknown render target {0:?}")]
    UnknownTarget(TargetId),
    /// A node handle does not refer to a live scene-graph node.
    #[error("unknown scene node {0:?}")]
    UnknownNode(NodeId),
    /// A texture path could not be resolved or decoded.
    #[error("failed to load texture '{path}': {reason}")]
    TextureLoad { path: String, reason: String },
    /// A model path could not be resolved.
    #[error("failed to load model '{path}': {reason}")]
    ModelLoad { path: String, reason: String },
    /// No adapter or device could be acquired.
    #[error("no usable GPU device: {0}")]
    Device(String),
    /// The host's shader compiler rejected a program.
    #[error("shader compilation failed for '{label}': {details}")]
    ShaderCompile { label: String, details: String },
}

/// A failure while locating or preprocessing shader sources.
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    /// The templated source path does not exist.
    #[error("shader source '{}' not found", .0.display())]
    MissingSource(PathBuf),
    /// The source exists but could not be read.
    #[error("failed to read shader source '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Defines were requested but the version line is not present verbatim.
    #[error("shader '{}' has no '{version}' line to inject defines after", .path.display())]
    MissingVersionLine { path: PathBuf, version: String },
}

/// A failure while reading or writing the persisted graphics configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The INI reader rejected the text, or an entry sits outside any section.
    #[error("malformed config: {0}")]
    Syntax(String),
    /// A stage section has no `shader` key.
    #[error("stage section [{0}] has no 'shader' key")]
    MissingShader(String),
    /// A section name is neither `SETUP`, `SHADOWS` nor a stage index.
    #[error("unexpected section [{0}]")]
    UnknownSection(String),
    /// A preset name that is not one of the built-in presets.
    #[error("unknown preset '{0}' (expected custom, full, medium or minimal)")]
    UnknownPreset(String),
    /// A value could not be interpreted for its key.
    #[error("section [{section}], key '{key}': {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },
}

/// The top-level error of every pipeline operation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A name-keyed operation referenced a stage that is not live.
    #[error("no filter stage named '{0}'")]
    UnknownStage(String),
    /// Two descriptors resolve to the same display name.
    #[error("duplicate filter stage name '{0}'")]
    DuplicateStage(String),
    /// A translation entry references a stage that is not defined earlier.
    #[error("stage '{stage}' translates '{source_stage}', which is not an earlier stage")]
    InvalidTranslation { stage: String, source_stage: String },
    /// The descriptor list is empty.
    #[error("a filter graph needs at least one stage")]
    EmptyGraph,
    /// No descriptor carries the terminal marker.
    #[error("no terminal stage in the filter list")]
    MissingTerminal,
    /// More than one descriptor carries the terminal marker.
    #[error("stages '{0}' and '{1}' are both marked terminal")]
    MultipleTerminals(String, String),
    /// The terminal stage is not the last descriptor.
    #[error("terminal stage '{0}' must be the last stage")]
    TerminalNotLast(String),
    /// A combine operation referenced an input the stage does not declare.
    #[error("stage '{stage}' declares no input '{input}'")]
    UnknownInput { stage: String, input: String },
    /// A combine function could not merge the current and new values.
    #[error("cannot combine values for input '{input}' of stage '{stage}'")]
    InputMismatch { stage: String, input: String },
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Returns `true` for errors caused by the descriptor list or a bad stage name.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            PipelineError::Host(_) | PipelineError::Shader(_) | PipelineError::Config(_)
        )
    }
}
