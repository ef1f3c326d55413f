//! auth
//!
//! Bearer tokens for the secret store API.
//!
//! # Architecture
//!
//! The secret store adapter asks a [`TokenProvider`] for a token on every
//! request instead of holding one. In CI the token comes from the
//! environment ([`EnvTokenProvider`]); tests use [`StaticTokenProvider`].
//!
//! # Security
//!
//! Tokens are returned as [`SecretValue`](crate::core::secret::SecretValue)
//! and never appear in logs, errors or debug output.
//!
//! # Example
//!
//! ```
//! use keyrelay::auth::{StaticTokenProvider, TokenProvider};
//!
//! # tokio_test::block_on(async {
//! let provider = StaticTokenProvider::new("ghs_example");
//! let token = provider.bearer_token().await.unwrap();
//! assert_eq!(format!("{:?}", token), "SecretValue(<redacted>)");
//! # });
//! ```

mod errors;
mod provider;

pub use errors::AuthError;
pub use provider::{EnvTokenProvider, StaticTokenProvider};

use crate::core::secret::SecretValue;

/// Provides bearer tokens to the secret store adapter.
///
/// Implementors must never log or expose token values.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a bearer token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingToken`] if no token is configured
    /// - [`AuthError::InvalidToken`] if the configured token is unusable
    async fn bearer_token(&self) -> Result<SecretValue, AuthError>;

    /// Where tokens come from, for diagnostics.
    fn source(&self) -> String;
}
