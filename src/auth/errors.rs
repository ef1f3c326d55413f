//! auth::errors
//!
//! Token resolution errors.
//!
//! # Example
//!
//! ```
//! use keyrelay::auth::AuthError;
//!
//! let err = AuthError::MissingToken("GITHUB_TOKEN".to_string());
//! assert!(err.to_string().contains("GITHUB_TOKEN"));
//! ```

use thiserror::Error;

/// Errors from token resolution.
///
/// # Security
///
/// Error messages name where a token was looked for, never its value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The token variable is not set.
    #[error("no secret store token: environment variable '{0}' is not set")]
    MissingToken(String),

    /// The token variable is set but empty or not valid unicode.
    #[error("secret store token in '{0}' is empty or not valid unicode")]
    InvalidToken(String),
}

impl AuthError {
    /// Whether the operator can fix this by exporting a token.
    pub fn needs_token(&self) -> bool {
        matches!(self, AuthError::MissingToken(_) | AuthError::InvalidToken(_))
    }
}
