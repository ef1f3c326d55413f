//! engine::publisher
//!
//! Write named secret values into one namespace.
//!
//! # Invariants
//!
//! - Entries are written in order; the first failure stops the batch and
//!   the report names what succeeded, what failed and what was not tried
//! - Upserts overwrite, so a retried batch converges
//! - Values are never logged; only names appear in reports and logs

use serde::Serialize;
use thiserror::Error;

use super::retry::RetryPolicy;
use crate::core::error::ApiError;
use crate::core::secret::{CredentialPair, SecretValue};
use crate::core::types::{Namespace, SecretName};
use crate::secrets::{SecretSink, UpsertOutcome};

/// One secret to publish.
#[derive(Debug, Clone)]
pub struct SecretEntry {
    pub name: SecretName,
    pub value: SecretValue,
}

impl SecretEntry {
    pub fn new(name: SecretName, value: SecretValue) -> Self {
        Self { name, value }
    }

    /// The id/secret entries for a freshly minted pair.
    pub fn for_pair(
        pair: &CredentialPair,
        access_id_name: &SecretName,
        access_secret_name: &SecretName,
    ) -> Vec<Self> {
        vec![
            Self::new(access_id_name.clone(), SecretValue::new(pair.access_id.clone())),
            Self::new(access_secret_name.clone(), pair.access_secret.clone()),
        ]
    }
}

/// A secret that was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedSecret {
    pub name: SecretName,
    pub outcome: UpsertOutcome,
}

/// What a publish batch did, by secret name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub namespace: Namespace,
    pub succeeded: Vec<PublishedSecret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<SecretName>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_attempted: Vec<SecretName>,
}

impl PublishReport {
    fn new(namespace: &Namespace) -> Self {
        Self {
            namespace: namespace.clone(),
            succeeded: Vec::new(),
            failed: None,
            not_attempted: Vec::new(),
        }
    }

    /// Whether every entry was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_none() && self.not_attempted.is_empty()
    }

    /// Names written, in order.
    pub fn succeeded_names(&self) -> Vec<&str> {
        self.succeeded.iter().map(|s| s.name.as_str()).collect()
    }
}

/// A batch that stopped early.
#[derive(Debug, Error)]
#[error("publishing {} to {} failed: {source}", .report.failed.as_ref().map(|n| n.as_str()).unwrap_or("?"), .report.namespace)]
pub struct PublishFailure {
    pub report: PublishReport,
    pub source: ApiError,
}

/// Secret publication over a [`SecretSink`].
pub struct SecretPublisher<'a> {
    sink: &'a dyn SecretSink,
    retry: &'a RetryPolicy,
}

impl<'a> SecretPublisher<'a> {
    pub fn new(sink: &'a dyn SecretSink, retry: &'a RetryPolicy) -> Self {
        Self { sink, retry }
    }

    /// Upsert every entry into `namespace`, stopping at the first failure.
    pub async fn publish(
        &self,
        namespace: &Namespace,
        entries: &[SecretEntry],
    ) -> Result<PublishReport, PublishFailure> {
        let mut report = PublishReport::new(namespace);

        for (index, entry) in entries.iter().enumerate() {
            let result = self
                .retry
                .run("UpsertSecret", || {
                    self.sink.upsert(namespace, &entry.name, &entry.value)
                })
                .await;

            match result {
                Ok(outcome) => {
                    tracing::info!(
                        sink = self.sink.name(),
                        namespace = %namespace,
                        secret = %entry.name,
                        ?outcome,
                        "published secret"
                    );
                    report.succeeded.push(PublishedSecret {
                        name: entry.name.clone(),
                        outcome,
                    });
                }
                Err(source) => {
                    tracing::warn!(
                        sink = self.sink.name(),
                        namespace = %namespace,
                        secret = %entry.name,
                        kind = %source.kind(),
                        "secret publish failed"
                    );
                    report.failed = Some(entry.name.clone());
                    report.not_attempted =
                        entries[index + 1..].iter().map(|e| e.name.clone()).collect();
                    return Err(PublishFailure { report, source });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::secrets::mock::MockSecretSink;
    use std::time::Duration;

    fn ns() -> Namespace {
        Namespace::new("org/repo").unwrap()
    }

    fn entries() -> Vec<SecretEntry> {
        vec![
            SecretEntry::new(SecretName::new("ACCESS_ID").unwrap(), SecretValue::new("AKIA")),
            SecretEntry::new(SecretName::new("ACCESS_SECRET").unwrap(), SecretValue::new("shh")),
        ]
    }

    #[tokio::test]
    async fn publishes_all_in_order() {
        let sink = MockSecretSink::new();
        let retry = RetryPolicy::default();
        let publisher = SecretPublisher::new(&sink, &retry);

        let report = publisher.publish(&ns(), &entries()).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.succeeded_names(), vec!["ACCESS_ID", "ACCESS_SECRET"]);
        assert_eq!(sink.value(&ns(), "ACCESS_SECRET").unwrap().expose(), "shh");
    }

    #[tokio::test]
    async fn partial_failure_names_each_secret() {
        let sink = MockSecretSink::new()
            .fail_on_name("ACCESS_ID", ApiError::PermissionDenied("403".into()));
        let retry = RetryPolicy::default();
        let publisher = SecretPublisher::new(&sink, &retry);

        let failure = publisher.publish(&ns(), &entries()).await.unwrap_err();

        assert_eq!(failure.source.kind(), ErrorKind::PermissionDenied);
        assert!(failure.report.succeeded.is_empty());
        assert_eq!(failure.report.failed.as_ref().unwrap().as_str(), "ACCESS_ID");
        assert_eq!(failure.report.not_attempted.len(), 1);
        assert_eq!(sink.operations().len(), 1);
    }

    #[tokio::test]
    async fn second_entry_failure_keeps_first() {
        let sink = MockSecretSink::new()
            .fail_on_name("ACCESS_SECRET", ApiError::NotFound("repo".into()));
        let retry = RetryPolicy::default();
        let publisher = SecretPublisher::new(&sink, &retry);

        let failure = publisher.publish(&ns(), &entries()).await.unwrap_err();

        assert_eq!(failure.report.succeeded_names(), vec!["ACCESS_ID"]);
        assert!(failure.report.not_attempted.is_empty());
        assert!(failure.to_string().contains("ACCESS_SECRET"));
    }

    #[tokio::test]
    async fn transient_upsert_is_retried() {
        let sink = MockSecretSink::new().fail_times(
            "ACCESS_ID",
            ApiError::Transient("502".into()),
            2,
        );
        let retry = RetryPolicy::new(3, Duration::ZERO, Duration::from_secs(5));
        let publisher = SecretPublisher::new(&sink, &retry);

        assert!(publisher.publish(&ns(), &entries()).await.is_ok());
    }

    #[test]
    fn debug_never_shows_values() {
        let debug = format!("{:?}", entries());
        assert!(!debug.contains("shh"));
    }
}
