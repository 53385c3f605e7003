//! Error types for the tunnel operator

use thiserror::Error;

/// Main error type for tunnel operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A field the API server always sets was missing
    #[error("missing field: {0}")]
    MissingField(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a missing field error naming the field
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Whether the next scheduled attempt may succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(ae)) => ae.code >= 500 || ae.code == 409 || ae.code == 429,
            Self::Kube(_) => true,
            Self::Serialization(_) => true,
            Self::Validation(_) | Self::MissingField(_) => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    // ==========================================================================
    // Story Tests: How failures surface during reconciliation
    // ==========================================================================

    /// Story: A malformed tunnel is reported with the offending detail
    #[test]
    fn story_validation_names_the_bad_field() {
        let err = Error::validation("tunnel db: host must not be empty");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("host must not be empty"));

        match Error::validation("any message") {
            Error::Validation(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Validation variant"),
        }
    }

    /// Story: Encoding failures in config generation surface as serialization errors
    #[test]
    fn story_encoding_failures_become_serialization_errors() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json")
            .expect_err("input is not json");
        let err: Error = json_err.into();

        assert!(err.to_string().starts_with("serialization error"));
        assert!(err.is_retryable());
    }

    /// Story: Missing server-populated metadata is a hard error, not a retry
    #[test]
    fn story_missing_metadata_is_not_retried() {
        let err = Error::missing_field("metadata.namespace");
        assert_eq!(err.to_string(), "missing field: metadata.namespace");
        assert!(!err.is_retryable());
    }

    /// Story: Transient API server failures are retried, client mistakes are not
    #[test]
    fn story_api_errors_are_categorized_by_status_code() {
        assert!(api_error(500).is_retryable());
        assert!(api_error(503).is_retryable());
        assert!(api_error(429).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!api_error(422).is_retryable());
        assert!(!Error::validation("bad").is_retryable());
    }
}
