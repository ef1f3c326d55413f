//! secrets::traits
//!
//! Secret sink trait definition.
//!
//! # Design
//!
//! The `SecretSink` trait is write-only: upsert a named value into a
//! namespace. There is no read operation because the store never returns
//! secret values and the engine never needs them back.
//!
//! # Security
//!
//! Implementations MUST:
//! - Never log, print, or include secret values in error messages
//! - Call [`SecretValue::expose`] only to encrypt or transmit the value
//! - Be thread-safe (Send + Sync)

use async_trait::async_trait;

use crate::core::error::ApiError;
use crate::core::secret::SecretValue;
use crate::core::types::{Namespace, SecretName};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// The secret did not exist before.
    Created,
    /// An existing secret was overwritten.
    Updated,
}

/// Write-only access to an external secret store.
///
/// # Example
///
/// ```
/// use keyrelay::core::secret::SecretValue;
/// use keyrelay::core::types::{Namespace, SecretName};
/// use keyrelay::secrets::{mock::MockSecretSink, SecretSink, UpsertOutcome};
///
/// # tokio_test::block_on(async {
/// let sink = MockSecretSink::new();
/// let ns = Namespace::new("org/repo").unwrap();
/// let name = SecretName::new("ACCESS_ID").unwrap();
///
/// let first = sink.upsert(&ns, &name, &SecretValue::new("a")).await.unwrap();
/// let second = sink.upsert(&ns, &name, &SecretValue::new("b")).await.unwrap();
/// assert_eq!(first, UpsertOutcome::Created);
/// assert_eq!(second, UpsertOutcome::Updated);
/// # });
/// ```
#[async_trait]
pub trait SecretSink: Send + Sync {
    /// Sink name, for logs.
    fn name(&self) -> &'static str;

    /// Create or overwrite `name` in `namespace` with `value`.
    async fn upsert(
        &self,
        namespace: &Namespace,
        name: &SecretName,
        value: &SecretValue,
    ) -> Result<UpsertOutcome, ApiError>;
}
