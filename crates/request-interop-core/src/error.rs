//! Error types for request interop

use thiserror::Error;

/// Result type alias for request interop operations
pub type Result<T, E = InteropError> = std::result::Result<T, E>;

/// Errors surfaced while building or mapping request values.
///
/// Malformed JSON or XML bodies never show up here: they degrade to an empty
/// decoded-input map. Failed file moves are reported as `false`.
#[derive(Error, Debug)]
pub enum InteropError {
    /// A value copied between representations was not null, scalar, or a
    /// nested container
    #[error("cannot transfer value of type `{found}` at key `{key}`")]
    TypeTransfer {
        /// Key under which the value was found
        key: String,
        /// Type name of the offending value
        found: String,
    },

    /// A frozen value was given a leaf that is not null, scalar, or a nested
    /// container
    #[error("frozen values must be null, scalar, or array/nested-container; found `{found}`")]
    Validation {
        /// Type name of the offending value
        found: String,
    },

    /// The operation has no mapping in the current variant
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Opening or reading a stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A URL string could not be split into components
    #[error("invalid URL `{0}`")]
    InvalidUrl(String),

    /// The standardized message rejected a method, URI, or header
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl InteropError {
    /// Create a type-transfer error
    pub fn type_transfer(key: impl ToString, found: impl Into<String>) -> Self {
        Self::TypeTransfer {
            key: key.to_string(),
            found: found.into(),
        }
    }

    /// Create a frozen-variant validation error
    pub fn validation(found: impl Into<String>) -> Self {
        Self::Validation {
            found: found.into(),
        }
    }

    /// Check whether this error signals a programming error rather than bad
    /// input data
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_allowed_types() {
        let err = InteropError::validation("stream");
        let message = err.to_string();
        assert!(message.contains("must be null, scalar, or array/nested-container"));
        assert!(message.contains("stream"));
    }

    #[test]
    fn test_type_transfer_names_key() {
        let err = InteropError::type_transfer("foo", "resource");
        assert_eq!(
            err.to_string(),
            "cannot transfer value of type `resource` at key `foo`"
        );
        assert!(!err.is_unsupported());
        assert!(InteropError::Unsupported("nope").is_unsupported());
    }
}
