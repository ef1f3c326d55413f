//! Shared fixtures for keyrelay integration tests.
//!
//! Each test file pulls this in with `mod integration;` and uses the parts
//! it needs.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use keyrelay::account::mock::MockAccount;
use keyrelay::core::config::RotationPolicy;
use keyrelay::core::policy::PolicyDocument;
use keyrelay::core::state::{ReconcileState, StateStore};
use keyrelay::core::types::{BucketName, Namespace, PolicyName, PrincipalName, SecretName};
use keyrelay::engine::{ReconcileRequest, Reconciler, RetryPolicy};
use keyrelay::secrets::mock::MockSecretSink;

pub const PRINCIPAL: &str = "svc-user";
pub const BUCKET: &str = "data-bucket";
pub const NAMESPACE: &str = "org/repo";

pub fn principal() -> PrincipalName {
    PrincipalName::new(PRINCIPAL).unwrap()
}

pub fn namespace() -> Namespace {
    Namespace::new(NAMESPACE).unwrap()
}

pub fn policy() -> PolicyDocument {
    PolicyDocument::for_bucket(
        PolicyName::default_for(&principal()),
        &principal(),
        &BucketName::new(BUCKET).unwrap(),
        true,
    )
}

pub fn request() -> ReconcileRequest {
    ReconcileRequest {
        principal: principal(),
        principal_path: "/".into(),
        policy: policy(),
        namespace: namespace(),
        access_id_name: SecretName::new("ACCESS_ID").unwrap(),
        access_secret_name: SecretName::new("ACCESS_SECRET").unwrap(),
        max_access_keys: 2,
        rotation: RotationPolicy::Always,
    }
}

/// Retries without backoff so transient-failure tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::ZERO, Duration::from_secs(5))
}

/// A mock account, a mock sink and a private state directory.
pub struct Harness {
    pub account: MockAccount,
    pub sink: MockSecretSink,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(account: MockAccount) -> Self {
        Self::with_sink(account, MockSecretSink::new())
    }

    pub fn with_sink(account: MockAccount, sink: MockSecretSink) -> Self {
        Self {
            account,
            sink,
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    /// A reconciler sharing this harness's fakes and state directory.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::new(self.account.clone()),
            Arc::new(self.sink.clone()),
            self.store(),
        )
        .with_retry(fast_retry())
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(self.dir.path())
    }

    pub fn state(&self) -> ReconcileState {
        self.store().load().expect("load state")
    }
}
