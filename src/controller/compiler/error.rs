//! # Compile Errors
//!
//! Errors raised while translating one monitoring resource. They are reported
//! on that resource's status and never abort compilation of other resources.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("endpoint {index}: port must be set")]
    MissingPort { index: usize },

    #[error("endpoint {index}: port {port} is scraped more than once")]
    DuplicatePort { index: usize, port: String },

    #[error("invalid {field} '{value}': {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("scrape timeout {timeout} must not be greater than scrape interval {interval}")]
    TimeoutExceedsInterval { timeout: String, interval: String },

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("invalid regex '{regex}': {reason}")]
    InvalidRegex { regex: String, reason: String },

    #[error("label '{0}' is protected and cannot be set")]
    ProtectedLabel(String),

    #[error("invalid label name '{0}'")]
    InvalidLabelName(String),

    #[error("unknown metadata label '{0}', expected one of pod, container, node")]
    InvalidMetadataLabel(String),

    #[error("invalid relabeling action '{0}'")]
    InvalidRelabelAction(String),

    #[error("invalid scheme '{0}', expected http or https")]
    InvalidScheme(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("failed to serialize configuration: {0}")]
    Serialize(String),
}

impl From<serde_yaml::Error> for CompileError {
    fn from(e: serde_yaml::Error) -> Self {
        CompileError::Serialize(e.to_string())
    }
}
