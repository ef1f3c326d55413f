//! auth::provider
//!
//! Token providers for the secret store adapter.
//!
//! # Design
//!
//! [`EnvTokenProvider`] reads its variable on every call rather than once
//! at construction, so a CI step that rotates the token mid-run is picked
//! up. [`StaticTokenProvider`] serves tests and embedding callers.

use std::fmt;

use super::errors::AuthError;
use super::TokenProvider;
use crate::core::secret::SecretValue;

/// Reads a bearer token from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    var: String,
}

impl EnvTokenProvider {
    /// A provider reading `var`.
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// The variable this provider reads.
    pub fn var(&self) -> &str {
        &self.var
    }
}

#[async_trait::async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn bearer_token(&self) -> Result<SecretValue, AuthError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(SecretValue::new(token.trim())),
            Ok(_) | Err(std::env::VarError::NotUnicode(_)) => {
                Err(AuthError::InvalidToken(self.var.clone()))
            }
            Err(std::env::VarError::NotPresent) => Err(AuthError::MissingToken(self.var.clone())),
        }
    }

    fn source(&self) -> String {
        format!("${}", self.var)
    }
}

/// A fixed bearer token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: SecretValue,
}

impl StaticTokenProvider {
    /// A provider that always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretValue::new(token),
        }
    }
}

// Custom Debug to avoid exposing the token
impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<SecretValue, AuthError> {
        Ok(self.token.clone())
    }

    fn source(&self) -> String {
        "static".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_variable_is_reported() {
        let provider = EnvTokenProvider::new("KEYRELAY_TEST_TOKEN_THAT_IS_NEVER_SET");
        let err = provider.bearer_token().await.unwrap_err();
        assert_eq!(
            err,
            AuthError::MissingToken("KEYRELAY_TEST_TOKEN_THAT_IS_NEVER_SET".into())
        );
        assert_eq!(provider.source(), "$KEYRELAY_TEST_TOKEN_THAT_IS_NEVER_SET");
    }

    #[tokio::test]
    async fn static_provider_returns_token() {
        let provider = StaticTokenProvider::new("ghs_example");
        let token = provider.bearer_token().await.unwrap();
        assert_eq!(token.expose(), "ghs_example");
    }

    #[test]
    fn static_provider_debug_redacts() {
        let provider = StaticTokenProvider::new("ghs_example");
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("ghs_example"));
        assert!(debug.contains("REDACTED"));
    }
}
