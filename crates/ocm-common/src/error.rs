//! Error types for the OCM operators
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries the context a controller needs to decide whether to
//! requeue: transient I/O retries, authorization failures surface as
//! Degraded conditions, and parse failures on our own artifacts are treated
//! as "regenerate".

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for OCM operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs or agent options
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Certificate generation or parsing error
    #[error("certificate error: {message}")]
    Certificate {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// The API server rejected a write for authorization reasons
    #[error("forbidden: {message}")]
    Forbidden {
        /// Description of the rejected operation
        message: String,
    },

    /// Unrecognized feature gates on a spec
    #[error("unknown feature gates: {}", names.join(","))]
    UnknownFeatureGates {
        /// The offending gate names, verbatim from the spec
        names: Vec<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "rotation")
        context: String,
    },
}

impl Error {
    /// Create a validation error with resource context
    pub fn validation(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a certificate error with the given message
    pub fn certificate(msg: impl Into<String>) -> Self {
        Self::Certificate {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a forbidden error with the given message
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Validation, serialization and unknown-feature-gate errors are not
    /// retryable (require a spec fix). Certificate errors are retryable at
    /// the resync cadence. Kubernetes errors depend on the status code:
    /// conflicts retry, other 4xx do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) => false,
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Certificate { .. } => true,
            Error::Serialization { .. } => false,
            Error::Forbidden { .. } => false,
            Error::UnknownFeatureGates { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this wraps a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Check if this wraps a Kubernetes 409 conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "test".to_string(),
                reason: "test".to_string(),
                code,
            }),
        }
    }

    /// Story: transient API failures requeue, spec mistakes do not
    ///
    /// A reconciler picks its requeue policy off `is_retryable()`: conflicts
    /// and server errors come back at the next resync, while validation
    /// failures wait for the user to fix the spec.
    #[test]
    fn story_retry_classification_drives_requeue() {
        assert!(api_error(409).is_retryable(), "conflicts retry");
        assert!(api_error(500).is_retryable(), "server errors retry");
        assert!(!api_error(403).is_retryable(), "forbidden does not retry");
        assert!(!api_error(404).is_retryable(), "not-found is handled, not retried");

        assert!(!Error::validation("cluster-manager", "bad image").is_retryable());
        assert!(!Error::serialization("bad yaml").is_retryable());
        assert!(Error::certificate("mint failed").is_retryable());
        assert!(Error::internal("watch closed").is_retryable());
        assert!(!Error::UnknownFeatureGates {
            names: vec!["Bogus".to_string()]
        }
        .is_retryable());
    }

    #[test]
    fn kube_status_helpers() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(404).is_conflict());
        assert!(api_error(409).is_conflict());
        assert!(!Error::internal("x").is_not_found());
    }

    #[test]
    fn unknown_feature_gates_message_names_offenders() {
        let err = Error::UnknownFeatureGates {
            names: vec!["Foo".to_string(), "Bar".to_string()],
        };
        assert!(err.to_string().contains("Foo,Bar"));
    }

    #[test]
    fn validation_error_includes_resource() {
        let err = Error::validation("klusterlet", "namespace required");
        assert!(err.to_string().contains("klusterlet"));
        assert!(err.to_string().contains("namespace required"));
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert!(err.to_string().contains("[unknown]"));

        let err = Error::internal_with_context("rotation", "mint failed");
        assert!(err.to_string().contains("[rotation]"));
    }
}
