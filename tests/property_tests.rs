//! Property-based tests for the stage components.
//!
//! These tests use proptest to verify invariants hold across randomly
//! generated account states and inputs.

mod integration;

use proptest::prelude::*;

use integration::{fast_retry, namespace, principal};

use keyrelay::account::mock::{MockAccount, MockOperation};
use keyrelay::core::error::{ApiError, ErrorKind};
use keyrelay::core::policy::{PolicyDocument, Statement};
use keyrelay::core::secret::SecretValue;
use keyrelay::core::types::{BucketName, PolicyName, SecretName};
use keyrelay::engine::binder::PolicyBinder;
use keyrelay::engine::minter::CredentialMinter;
use keyrelay::engine::principal::{EnsureOutcome, PrincipalStore};
use keyrelay::engine::publisher::{SecretEntry, SecretPublisher};
use keyrelay::secrets::mock::MockSecretSink;

/// Strategy for generating valid bucket names.
fn valid_bucket() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{1,30}[a-z0-9]"
}

fn document(bucket: &str, introspection: bool) -> PolicyDocument {
    PolicyDocument::for_bucket(
        PolicyName::default_for(&principal()),
        &principal(),
        &BucketName::new(bucket).unwrap(),
        introspection,
    )
}

proptest! {
    /// Two ensures never both create, whatever the account held before.
    #[test]
    fn ensure_twice_creates_at_most_once(pre_exists in any::<bool>(), tracked in any::<bool>()) {
        let account = if pre_exists {
            MockAccount::new().with_user(&principal())
        } else {
            MockAccount::new()
        };
        let retry = fast_retry();
        let store = PrincipalStore::new(&account, &retry);

        let (first, second) = tokio_test::block_on(async {
            let (_, first) = store.ensure(&principal(), "/", tracked && pre_exists).await.unwrap();
            let (_, second) = store.ensure(&principal(), "/", true).await.unwrap();
            (first, second)
        });

        prop_assert_eq!(first == EnsureOutcome::Created, !pre_exists);
        prop_assert_eq!(second, EnsureOutcome::Unchanged);
        let creates = account
            .operations()
            .iter()
            .filter(|op| matches!(op, MockOperation::CreateUser { .. }))
            .count();
        prop_assert!(creates <= 1);
    }

    /// The second ensure_attached with the same document mutates nothing.
    #[test]
    fn ensure_attached_converges(
        bucket in valid_bucket(),
        previous in prop::option::of(valid_bucket()),
        introspection in any::<bool>(),
    ) {
        let account = match &previous {
            Some(old) => MockAccount::new().with_policy(&document(old, introspection), None),
            None => MockAccount::new(),
        }
        .with_user(&principal());
        let retry = fast_retry();
        let binder = PolicyBinder::new(&account, &retry);
        let desired = document(&bucket, introspection);

        let first = tokio_test::block_on(binder.ensure_attached(&principal(), &desired)).unwrap();
        prop_assert!(first.mutated());
        account.clear_operations();

        let second = tokio_test::block_on(binder.ensure_attached(&principal(), &desired)).unwrap();
        prop_assert!(!second.mutated());
        prop_assert!(account.mutations().is_empty());
        prop_assert_eq!(first.arn, second.arn);
    }

    /// Statement order never changes the fingerprint.
    #[test]
    fn fingerprint_ignores_statement_order(
        bucket in valid_bucket(),
        order in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let doc = document(&bucket, true);
        let shuffled: Vec<Statement> = order.iter().map(|&i| doc.statements()[i].clone()).collect();
        let reordered = PolicyDocument::new(doc.name().clone(), shuffled);

        prop_assert_eq!(doc.fingerprint(), reordered.fingerprint());
        prop_assert!(doc.is_equivalent(&reordered));
    }

    /// Minting at the limit fails with QuotaExceeded and creates nothing.
    #[test]
    fn mint_respects_key_limit(existing in 0usize..=2, limit in 1u32..=2) {
        let account = MockAccount::new().with_access_keys(&principal(), existing);
        let retry = fast_retry();
        let minter = CredentialMinter::new(&account, &retry, limit);

        let result = tokio_test::block_on(minter.mint(&principal()));

        if existing >= limit as usize {
            let err = result.unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
            prop_assert_eq!(account.access_key_count(&principal()), existing);
        } else {
            let pair = result.unwrap();
            prop_assert!(!pair.access_secret.is_empty());
            prop_assert_eq!(account.access_key_count(&principal()), existing + 1);
        }
    }

    /// A failure at entry k leaves 0..k written, k failed, the rest untried.
    #[test]
    fn publish_reports_prefix_on_failure(count in 1usize..8, fail_at in 0usize..8) {
        let fail_at = fail_at % count;
        let names: Vec<String> = (0..count).map(|i| format!("SECRET_{}", i)).collect();
        let sink = MockSecretSink::new()
            .fail_on_name(&names[fail_at], ApiError::PermissionDenied("403".into()));
        let retry = fast_retry();
        let publisher = SecretPublisher::new(&sink, &retry);
        let entries: Vec<SecretEntry> = names
            .iter()
            .map(|n| SecretEntry::new(SecretName::new(n.as_str()).unwrap(), SecretValue::new("v")))
            .collect();

        let failure = tokio_test::block_on(publisher.publish(&namespace(), &entries)).unwrap_err();

        let succeeded: Vec<String> =
            failure.report.succeeded_names().iter().map(|s| s.to_string()).collect();
        prop_assert_eq!(&succeeded[..], &names[..fail_at]);
        prop_assert_eq!(failure.report.failed.as_ref().unwrap().as_str(), names[fail_at].as_str());
        prop_assert_eq!(failure.report.not_attempted.len(), count - fail_at - 1);
        prop_assert!(!failure.report.is_complete());
        prop_assert_eq!(sink.secret_names(&namespace()).len(), fail_at);
    }
}
