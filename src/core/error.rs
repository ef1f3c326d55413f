//! core::error
//!
//! The error taxonomy shared by every remote adapter.
//!
//! # Design
//!
//! Adapters classify provider failures once, at their boundary, into an
//! [`ApiError`]. Everything above the adapters branches on
//! [`ErrorKind`], never on provider-specific codes or message text.
//!
//! # Security
//!
//! Messages carry resource names and provider diagnostics only. They never
//! contain credential material.

use serde::Serialize;
use thiserror::Error;

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The resource already exists. Recoverable by adopting it.
    #[serde(rename = "ConflictError")]
    Conflict,
    /// A referenced resource is missing. Indicates an ordering bug.
    #[serde(rename = "NotFoundError")]
    NotFound,
    /// The caller lacks rights for the operation.
    #[serde(rename = "PermissionError")]
    PermissionDenied,
    /// A per-principal limit was hit (e.g. live access keys).
    #[serde(rename = "QuotaExceededError")]
    QuotaExceeded,
    /// Network-class failure, throttling, or timeout.
    #[serde(rename = "TransientError")]
    Transient,
    /// The remote answered with something the adapter cannot interpret.
    #[serde(rename = "MalformedResponseError")]
    Malformed,
}

impl ErrorKind {
    /// Whether an operation failing with this kind may be retried as-is.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    /// What an operator should do about a failure of this kind.
    pub fn operator_hint(self) -> &'static str {
        match self {
            ErrorKind::Conflict | ErrorKind::Transient => "retry the whole run",
            ErrorKind::PermissionDenied => "fix the account or token grants, then retry",
            ErrorKind::QuotaExceeded => {
                "revoke an unused access key for the principal manually, then retry"
            }
            ErrorKind::NotFound | ErrorKind::Malformed => {
                "investigate: this indicates a stage ordering or adapter bug"
            }
        }
    }

    /// Stable name used in reports and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::PermissionDenied => "PermissionError",
            ErrorKind::QuotaExceeded => "QuotaExceededError",
            ErrorKind::Transient => "TransientError",
            ErrorKind::Malformed => "MalformedResponseError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error returned by account and secret store adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication failed or the caller lacks permissions.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A per-principal quota was exceeded.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Network error, throttling, server error or timeout.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Response could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Conflict => ApiError::Conflict(message),
            ErrorKind::NotFound => ApiError::NotFound(message),
            ErrorKind::PermissionDenied => ApiError::PermissionDenied(message),
            ErrorKind::QuotaExceeded => ApiError::QuotaExceeded(message),
            ErrorKind::Transient => ApiError::Transient(message),
            ErrorKind::Malformed => ApiError::Malformed(message),
        }
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Conflict(_) => ErrorKind::Conflict,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ApiError::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            ApiError::Transient(_) => ErrorKind::Transient,
            ApiError::Malformed(_) => ErrorKind::Malformed,
        }
    }

    /// The underlying message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ApiError::Conflict(m)
            | ApiError::NotFound(m)
            | ApiError::PermissionDenied(m)
            | ApiError::QuotaExceeded(m)
            | ApiError::Transient(m)
            | ApiError::Malformed(m) => m,
        }
    }

    /// Whether this error may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(ApiError::Transient("timeout".into()).is_retryable());
        assert!(!ApiError::Conflict("x".into()).is_retryable());
        assert!(!ApiError::NotFound("x".into()).is_retryable());
        assert!(!ApiError::PermissionDenied("x".into()).is_retryable());
        assert!(!ApiError::QuotaExceeded("x".into()).is_retryable());
        assert!(!ApiError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn kind_names_match_taxonomy() {
        assert_eq!(ErrorKind::Conflict.to_string(), "ConflictError");
        assert_eq!(ErrorKind::QuotaExceeded.to_string(), "QuotaExceededError");
        assert_eq!(
            serde_json::to_string(&ErrorKind::PermissionDenied).unwrap(),
            "\"PermissionError\""
        );
    }

    #[test]
    fn message_strips_prefix() {
        let err = ApiError::QuotaExceeded("svc-user has 2 keys".into());
        assert_eq!(err.message(), "svc-user has 2 keys");
        assert_eq!(err.to_string(), "quota exceeded: svc-user has 2 keys");
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn new_preserves_kind() {
        for kind in [
            ErrorKind::Conflict,
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::QuotaExceeded,
            ErrorKind::Transient,
            ErrorKind::Malformed,
        ] {
            let err = ApiError::new(kind, "boom");
            assert_eq!(err.kind(), kind);
            assert_eq!(err.message(), "boom");
        }
    }

    #[test]
    fn hints_distinguish_operator_actions() {
        assert!(ErrorKind::Transient.operator_hint().contains("retry"));
        assert!(ErrorKind::PermissionDenied.operator_hint().contains("grants"));
        assert!(ErrorKind::QuotaExceeded.operator_hint().contains("revoke"));
        assert!(ErrorKind::NotFound.operator_hint().contains("investigate"));
    }
}
