//! secrets::mock
//!
//! In-memory secret sink for deterministic testing.
//!
//! # Example
//!
//! ```
//! use keyrelay::core::error::ApiError;
//! use keyrelay::core::secret::SecretValue;
//! use keyrelay::core::types::{Namespace, SecretName};
//! use keyrelay::secrets::{mock::MockSecretSink, SecretSink};
//!
//! # tokio_test::block_on(async {
//! let ns = Namespace::new("org/repo").unwrap();
//! let sink = MockSecretSink::new()
//!     .fail_on_name("ACCESS_SECRET", ApiError::PermissionDenied("403".into()));
//!
//! let id = SecretName::new("ACCESS_ID").unwrap();
//! let secret = SecretName::new("ACCESS_SECRET").unwrap();
//! assert!(sink.upsert(&ns, &id, &SecretValue::new("x")).await.is_ok());
//! assert!(sink.upsert(&ns, &secret, &SecretValue::new("y")).await.is_err());
//! assert_eq!(sink.secret_names(&ns), vec!["ACCESS_ID".to_string()]);
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::traits::{SecretSink, UpsertOutcome};
use crate::core::error::ApiError;
use crate::core::secret::SecretValue;
use crate::core::types::{Namespace, SecretName};

/// Mock secret sink for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping.
#[derive(Debug, Clone, Default)]
pub struct MockSecretSink {
    inner: Arc<Mutex<MockSinkInner>>,
}

#[derive(Debug, Default)]
struct MockSinkInner {
    /// Stored values by namespace then name.
    secrets: BTreeMap<Namespace, BTreeMap<String, SecretValue>>,
    /// Failures by secret name, with an optional remaining count.
    failures: Vec<(String, ApiError, Option<u32>)>,
    /// Recorded operations for verification.
    operations: Vec<SinkOperation>,
}

/// Recorded upsert (names only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOperation {
    pub namespace: String,
    pub name: String,
}

impl MockSecretSink {
    /// Create a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every upsert of `name` with `error`.
    pub fn fail_on_name(self, name: &str, error: ApiError) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failures
            .push((name.to_string(), error, None));
        self
    }

    /// Fail the next `times` upserts of `name`, then succeed.
    pub fn fail_times(self, name: &str, error: ApiError, times: u32) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failures
            .push((name.to_string(), error, Some(times)));
        self
    }

    /// Clear the failure configuration.
    pub fn clear_fail_on(&self) {
        self.inner.lock().unwrap().failures.clear();
    }

    /// Get all recorded upserts, including failed ones.
    pub fn operations(&self) -> Vec<SinkOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Names currently stored in `namespace`, sorted.
    pub fn secret_names(&self, namespace: &Namespace) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .secrets
            .get(namespace)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The stored value (for test verification).
    pub fn value(&self, namespace: &Namespace, name: &str) -> Option<SecretValue> {
        self.inner
            .lock()
            .unwrap()
            .secrets
            .get(namespace)
            .and_then(|s| s.get(name).cloned())
    }

    fn check_fail(&self, name: &str) -> Option<ApiError> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner
            .failures
            .iter()
            .position(|(n, _, remaining)| n == name && remaining != &Some(0))?;
        let (_, error, remaining) = &mut inner.failures[index];
        if let Some(n) = remaining {
            *n -= 1;
        }
        Some(error.clone())
    }
}

#[async_trait]
impl SecretSink for MockSecretSink {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn upsert(
        &self,
        namespace: &Namespace,
        name: &SecretName,
        value: &SecretValue,
    ) -> Result<UpsertOutcome, ApiError> {
        self.inner.lock().unwrap().operations.push(SinkOperation {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        if let Some(err) = self.check_fail(name.as_str()) {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        let previous = inner
            .secrets
            .entry(namespace.clone())
            .or_default()
            .insert(name.to_string(), value.clone());
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> Namespace {
        Namespace::new("org/repo").unwrap()
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let sink = MockSecretSink::new();
        let name = SecretName::new("ACCESS_ID").unwrap();
        sink.upsert(&ns(), &name, &SecretValue::new("old")).await.unwrap();
        sink.upsert(&ns(), &name, &SecretValue::new("new")).await.unwrap();

        assert_eq!(sink.value(&ns(), "ACCESS_ID").unwrap().expose(), "new");
        assert_eq!(sink.operations().len(), 2);
    }

    #[tokio::test]
    async fn fail_times_recovers() {
        let sink = MockSecretSink::new().fail_times(
            "ACCESS_ID",
            ApiError::Transient("502".into()),
            1,
        );
        let name = SecretName::new("ACCESS_ID").unwrap();
        assert!(sink.upsert(&ns(), &name, &SecretValue::new("v")).await.is_err());
        assert!(sink.upsert(&ns(), &name, &SecretValue::new("v")).await.is_ok());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let sink = MockSecretSink::new();
        let other = Namespace::new("org/other").unwrap();
        let name = SecretName::new("ACCESS_ID").unwrap();
        sink.upsert(&ns(), &name, &SecretValue::new("v")).await.unwrap();

        assert!(sink.secret_names(&other).is_empty());
        assert!(sink.value(&other, "ACCESS_ID").is_none());
    }
}
