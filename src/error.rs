//! Error types for the pipeline runtime.
//!
//! Validation and binding errors are synchronous and local to the call that
//! caused them. A critical error detected inside a transform hook is not
//! raised through this type at all: the hook returns failure, the owning
//! component emits an end-of-stream signal and stops itself.

use thiserror::Error;

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A config value failed its node's validation predicate.
    /// The node's prior value is retained.
    #[error("invalid value {value:?}: {constraint}")]
    Validation { value: String, constraint: String },

    /// A config operation addressed a child node that does not exist.
    #[error("unknown config item: {0}")]
    UnknownConfigItem(String),

    /// A frame had an unexpected shape or type at a transform boundary.
    #[error("port mismatch: {0}")]
    PortMismatch(String),

    /// The pool's factory failed while building a replacement object.
    /// Fatal to the pool: replenishment stops, no retry.
    #[error("pool factory failure: {0}")]
    PoolFailure(String),

    /// A linkage referred to a nonexistent component or port.
    #[error("invalid binding: {0}")]
    Binding(String),

    /// A saved graph named a component kind with no registered factory.
    #[error("unknown component kind: {0}")]
    UnknownComponentKind(String),

    /// The linkage map of a compound contains a cycle.
    #[error("cycle detected in component graph")]
    CycleDetected,

    /// A lifecycle call was made in a state that does not permit it.
    #[error("component {name} is {state}, cannot {operation}")]
    Lifecycle {
        name: String,
        state: &'static str,
        operation: &'static str,
    },

    /// A pool's internal delivery channel disconnected unexpectedly.
    #[error("channel receive error")]
    ChannelRecv,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Build a validation error from the offending value and the constraint
    /// it violated.
    pub fn validation(value: impl std::fmt::Debug, constraint: impl Into<String>) -> Self {
        PipelineError::Validation {
            value: format!("{value:?}"),
            constraint: constraint.into(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_names_value_and_constraint() {
        let err = PipelineError::validation(42, "must be <= 10");
        assert_eq!(err.to_string(), "invalid value \"42\": must be <= 10");
    }

    #[test]
    fn test_unknown_kind_display() {
        let err = PipelineError::UnknownComponentKind("Flip".into());
        assert!(err.to_string().contains("Flip"));
    }
}
