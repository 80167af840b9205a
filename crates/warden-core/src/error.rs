//! Error types for Warden Core
//!
//! This module defines the error types used throughout the governance core.
//! We use `thiserror` for ergonomic error definitions with automatic Display/Error implementations.
//!
//! These are *library* errors. The orchestrator never inspects them directly: each phase
//! classifies what it caught into a recoverable or fatal [`PhaseError`](crate::orchestrator::PhaseError)
//! before it reaches the pipeline state.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Main error type for Warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    /// Template-related errors
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Scope guardrail errors
    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),

    /// Reasoning engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// The working directory does not exist or is not a directory
    #[error("Working directory not found: {0}")]
    WorkdirNotFound(PathBuf),

    /// The engine reported activity but no patch could be extracted
    #[error("No changes produced: {items} run log item(s) yielded no usable patch")]
    NoChangesProduced { items: usize },

    /// A suspended run could not be reopened
    #[error("Invalid suspended state: {0}")]
    InvalidSuspension(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML write errors
    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<WardenError>,
    },
}

/// Errors related to architecture templates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template has no name")]
    MissingName,

    #[error("Layer #{0} has an empty name")]
    EmptyLayerName(usize),

    #[error("Duplicate layer name: {0}")]
    DuplicateLayer(String),

    #[error("Layer {layer} has an invalid path prefix {prefix:?}: {reason}")]
    InvalidPrefix {
        layer: String,
        prefix: String,
        reason: String,
    },

    #[error("Layer {layer} has an invalid filename pattern {pattern:?}")]
    InvalidPattern { layer: String, pattern: String },

    #[error("Unknown template: {0}")]
    Unknown(String),

    #[error("Unsupported template format: {0}")]
    UnsupportedFormat(String),
}

/// Errors related to scope normalization and guarded writes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Empty path")]
    EmptyPath,

    #[error("Path escapes the working directory: {0}")]
    OutsideWorkdir(String),

    #[error("Cannot resolve {path}: {reason}")]
    Unresolvable { path: String, reason: String },

    #[error("Path is not in scope: {0}")]
    NotAllowed(String),

    #[error("Replacement target does not exist: {0}")]
    ReplaceTargetMissing(String),

    #[error("Replacement text not found in {0}")]
    ReplaceMismatch(String),
}

/// Errors raised while driving a reasoning engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Failed to start engine: {0}")]
    Spawn(String),

    #[error("Engine protocol violation: {0}")]
    Protocol(String),

    #[error("Engine timeout after {0}s")]
    Timeout(u64),

    #[error("Engine failed: {0}")]
    Failed(String),
}

impl WardenError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Unwrap context layers down to the originating error
    pub fn root(&self) -> &WardenError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}
