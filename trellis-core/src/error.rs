//! Error types for the reactive engine.
//!
//! Only two kinds of failure ever reach a caller as an `Err`: wrapping a value
//! that cannot become reactive, and a strict-mode schema rejection. Policy
//! violations and access to dead states are reported through `tracing` and
//! recovered locally, so the variants for them exist mostly to give those log
//! lines a uniform shape.

use thiserror::Error;

use crate::schema::SchemaError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// The value is not a supported container kind (object, array, map, set).
    #[error("cannot create reactive state from a {kind} value")]
    Unsupported {
        /// Kind name of the rejected value.
        kind: &'static str,
    },

    /// A write failed schema validation.
    #[error("validation failed for `{key}`: {source}")]
    Validation {
        /// The key (or `<root>`) that failed.
        key: String,
        /// The schema's explanation.
        #[source]
        source: SchemaError,
    },

    /// A mutation was refused by policy (immutable state, required field,
    /// reentrant mutation).
    #[error("policy violation: {0}")]
    Violation(String),

    /// The target is not a live reactive state.
    #[error("access error: {0}")]
    Access(String),
}

impl ReactiveError {
    pub(crate) fn validation(key: impl ToString, source: SchemaError) -> Self {
        Self::Validation {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn violation(message: impl Into<String>) -> Self {
        Self::Violation(message.into())
    }

    pub(crate) fn access(message: impl Into<String>) -> Self {
        Self::Access(message.into())
    }
}
