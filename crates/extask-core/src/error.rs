//! Core domain errors.

use thiserror::Error;

use crate::variable::ValueType;

/// Errors returned by typed variable access and encoding.
///
/// These are value errors for the caller to handle; none of them are fatal
/// for the task being processed.
#[derive(Debug, Error)]
pub enum VariableError {
    /// No variable with this name.
    #[error("variable '{0}' not found")]
    NotFound(String),

    /// The stored type tag does not match the requested interpretation.
    #[error("cannot convert variable '{name}' of type {actual} to {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: ValueType,
    },

    /// The tag matches but the value cannot be decoded.
    #[error("cannot decode variable '{name}': {message}")]
    Decode { name: String, message: String },

    /// A native value could not be turned into a variable.
    #[error("cannot encode variable: {0}")]
    Encode(String),
}

/// Errors from the remote task service.
///
/// Every transport maps its failures onto these variants, so the engine can
/// react the same way regardless of how the service is reached.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The task (or its lock) no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine rejected the request (conflict, validation, lock owned by
    /// another worker, ...).
    #[error("engine rejected request ({status} {kind}): {message}")]
    Rejected {
        status: u16,
        kind: String,
        message: String,
    },

    /// Connectivity problem or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine answered with something that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ServiceError {
    /// Returns true for connectivity failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true when the task or its lock is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_message() {
        let err = VariableError::TypeMismatch {
            name: "amount".to_string(),
            expected: "Long",
            actual: ValueType::String,
        };
        assert_eq!(
            err.to_string(),
            "cannot convert variable 'amount' of type String to Long"
        );
    }

    #[test]
    fn test_service_error_helpers() {
        assert!(ServiceError::Transport("refused".into()).is_transport());
        assert!(ServiceError::NotFound("task".into()).is_not_found());
        assert!(!ServiceError::Protocol("bad json".into()).is_transport());
    }
}
