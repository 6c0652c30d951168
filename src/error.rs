//! Error types for the gateway.
//!
//! Nothing here is fatal: every failure degrades to a conservative verdict,
//! stale-but-valid configuration, or pass-through admission.
use std::time::Duration;

/// Errors surfaced by gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The path has no registered method.
    #[error("path '{path}' is not registered")]
    UnknownPath {
        /// Path that failed to resolve.
        path: String,
    },
    /// Bounded admission gave up before the limiter granted a permit.
    #[error("admission to '{path}' timed out after {timeout:?}")]
    AdmissionTimeout {
        /// Path being admitted.
        path: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The method is degraded (`second_limit == -1`) or the limiter had no
    /// permit for a non-waiting admission.
    #[error("admission to '{path}' rejected")]
    Rejected {
        /// Path being admitted.
        path: String,
    },
    /// A method definition failed validation and was skipped.
    #[error("invalid method option for '{path}': {reason}")]
    InvalidOption {
        /// Path of the offending entry (may be empty).
        path: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The configuration provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GatewayError {
    /// Check if this error reports an unregistered path.
    pub fn is_unknown_path(&self) -> bool {
        matches!(self, Self::UnknownPath { .. })
    }

    /// Check if this error is a bounded-admission timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AdmissionTimeout { .. })
    }

    /// Check if this error is a policy rejection.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Path the error refers to, when it refers to one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::UnknownPath { path }
            | Self::AdmissionTimeout { path, .. }
            | Self::Rejected { path }
            | Self::InvalidOption { path, .. } => Some(path),
            Self::Provider(_) => None,
        }
    }
}

/// Failures of a [`MethodProvider`](crate::provider::MethodProvider).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Reading the backing source failed.
    #[error("provider i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The source held data that is not a method list.
    #[cfg(feature = "json")]
    #[error("provider returned malformed json: {0}")]
    Json(#[from] serde_json::Error),
    /// Any other failure reported by a custom provider.
    #[error("provider failed: {reason}")]
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl ProviderError {
    /// Build a [`ProviderError::Failed`] from anything displayable.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed { reason: reason.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path_and_timeout() {
        let err = GatewayError::AdmissionTimeout {
            path: "/checkout".into(),
            timeout: Duration::from_millis(250),
        };
        let msg = err.to_string();
        assert!(msg.contains("/checkout"));
        assert!(msg.contains("250ms"));
        assert!(err.is_timeout());
        assert!(!err.is_rejected());
    }

    #[test]
    fn provider_errors_convert_and_have_no_path() {
        let err: GatewayError = ProviderError::failed("table missing").into();
        assert_eq!(err.to_string(), "provider failed: table missing");
        assert!(err.path().is_none());
    }

    #[test]
    fn predicates_cover_path_variants() {
        let unknown = GatewayError::UnknownPath { path: "/x".into() };
        assert!(unknown.is_unknown_path());
        assert_eq!(unknown.path(), Some("/x"));

        let rejected = GatewayError::Rejected { path: "/y".into() };
        assert!(rejected.is_rejected());
        assert_eq!(rejected.path(), Some("/y"));
    }
}
