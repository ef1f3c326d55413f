//! engine::reconciler
//!
//! The provisioning state machine.
//!
//! # Architecture
//!
//! ```text
//! Start -> PrincipalEnsured -> CredentialMinted -> PolicyAttached
//!       -> SecretsPublished -> Done
//!
//! any stage --error--> Failed(stage, kind)
//! ```
//!
//! Stages run strictly in order; each one's output feeds the next. The
//! first error stops the run and is reported with the stage that was being
//! attempted and its [`ErrorKind`]. Nothing is rolled back: every stage is
//! convergent, so the operator's remedy is to fix the cause and run again.
//!
//! # Invariants
//!
//! - One run per principal at a time, enforced by [`RunLock`]
//! - State is saved after every stage, so an interrupted run leaves an
//!   accurate record of what happened
//! - A minted key is recorded as orphaned until both secrets are written;
//!   a run that fails in between reports the orphan by id
//! - Secret values never reach logs, state, or reports
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use keyrelay::account::mock::MockAccount;
//! use keyrelay::core::policy::PolicyDocument;
//! use keyrelay::core::state::StateStore;
//! use keyrelay::core::types::*;
//! use keyrelay::core::config::RotationPolicy;
//! use keyrelay::engine::reconciler::{ReconcileRequest, Reconciler, RunState};
//! use keyrelay::secrets::mock::MockSecretSink;
//!
//! # tokio_test::block_on(async {
//! let dir = tempfile::tempdir().unwrap();
//! let principal = PrincipalName::new("svc-user").unwrap();
//! let request = ReconcileRequest {
//!     policy: PolicyDocument::for_bucket(
//!         PolicyName::default_for(&principal),
//!         &principal,
//!         &BucketName::new("data-bucket").unwrap(),
//!         true,
//!     ),
//!     principal,
//!     principal_path: "/".into(),
//!     namespace: Namespace::new("org/repo").unwrap(),
//!     access_id_name: SecretName::new("ACCESS_ID").unwrap(),
//!     access_secret_name: SecretName::new("ACCESS_SECRET").unwrap(),
//!     max_access_keys: 2,
//!     rotation: RotationPolicy::Always,
//! };
//!
//! let reconciler = Reconciler::new(
//!     Arc::new(MockAccount::new()),
//!     Arc::new(MockSecretSink::new()),
//!     StateStore::new(dir.path()),
//! );
//! let report = reconciler.run(&request).await.unwrap();
//! assert_eq!(report.state, RunState::Done);
//! # });
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::binder::{BindOutcome, PolicyBinder};
use super::minter::CredentialMinter;
use super::principal::{EnsureOutcome, PrincipalStore};
use super::publisher::{PublishReport, SecretEntry, SecretPublisher};
use super::retry::RetryPolicy;
use crate::account::{AccessKeyInfo, AccountApi};
use crate::core::config::{RotationPolicy, Settings};
use crate::core::error::{ApiError, ErrorKind};
use crate::core::lock::{LockError, RunLock};
use crate::core::policy::PolicyDocument;
use crate::core::state::{
    MintedKey, PolicyRecord, PrincipalOrigin, PrincipalRecord, PublishedKey, ReconcileState,
    RunRecord, StateError, StateStore,
};
use crate::core::types::{Namespace, PrincipalName, SecretName};
use crate::secrets::SecretSink;

/// A stage of the run, named by the state it reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    PrincipalEnsured,
    CredentialMinted,
    PolicyAttached,
    SecretsPublished,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 4] = [
        Stage::PrincipalEnsured,
        Stage::CredentialMinted,
        Stage::PolicyAttached,
        Stage::SecretsPublished,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::PrincipalEnsured => "PrincipalEnsured",
            Stage::CredentialMinted => "CredentialMinted",
            Stage::PolicyAttached => "PolicyAttached",
            Stage::SecretsPublished => "SecretsPublished",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Where a run is, or where it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state")]
pub enum RunState {
    Start,
    PrincipalEnsured,
    CredentialMinted,
    PolicyAttached,
    SecretsPublished,
    Done,
    Failed {
        stage: Stage,
        kind: ErrorKind,
        message: String,
    },
}

impl RunState {
    /// Whether the run is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. })
    }
}

impl From<Stage> for RunState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::PrincipalEnsured => RunState::PrincipalEnsured,
            Stage::CredentialMinted => RunState::CredentialMinted,
            Stage::PolicyAttached => RunState::PolicyAttached,
            Stage::SecretsPublished => RunState::SecretsPublished,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Start => f.write_str("Start"),
            RunState::Done => f.write_str("Done"),
            RunState::Failed { stage, kind, .. } => write!(f, "Failed({}, {})", stage, kind),
            reached => {
                let stage = match reached {
                    RunState::PrincipalEnsured => Stage::PrincipalEnsured,
                    RunState::CredentialMinted => Stage::CredentialMinted,
                    RunState::PolicyAttached => Stage::PolicyAttached,
                    _ => Stage::SecretsPublished,
                };
                f.write_str(stage.as_str())
            }
        }
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped,
    Failed,
    NotRun,
}

/// One line of the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Everything a run did. Carries key ids, never secret values.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub run_id: String,
    pub principal: PrincipalName,
    pub namespace: Namespace,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: RunState,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_outcome: Option<EnsureOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<BindOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishReport>,
    /// Key minted by this run but not published as a complete pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphaned_key: Option<String>,
}

impl ReconcileReport {
    fn new(run_id: String, request: &ReconcileRequest) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            principal: request.principal.clone(),
            namespace: request.namespace.clone(),
            started_at: now,
            finished_at: now,
            state: RunState::Start,
            stages: Stage::ALL
                .iter()
                .map(|&stage| StageReport {
                    stage,
                    status: StageStatus::NotRun,
                    detail: None,
                })
                .collect(),
            principal_outcome: None,
            access_id: None,
            policy: None,
            publish: None,
            orphaned_key: None,
        }
    }

    /// Whether the run reached `Done`.
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }

    /// The report line for `stage`.
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    fn set(&mut self, stage: Stage, status: StageStatus, detail: String) {
        if let Some(line) = self.stages.iter_mut().find(|s| s.stage == stage) {
            line.status = status;
            line.detail = Some(detail);
        }
    }

    fn complete(&mut self, stage: Stage, detail: String) {
        tracing::info!(principal = %self.principal, stage = %stage, detail = %detail, "stage completed");
        self.set(stage, StageStatus::Completed, detail);
        self.state = stage.into();
    }

    fn skip(&mut self, stage: Stage, reason: String) {
        tracing::info!(principal = %self.principal, stage = %stage, reason = %reason, "stage skipped");
        self.set(stage, StageStatus::Skipped, reason);
        self.state = stage.into();
    }

    fn fail(&mut self, stage: Stage, error: &ApiError) {
        self.set(stage, StageStatus::Failed, error.message().to_string());
        self.state = RunState::Failed {
            stage,
            kind: error.kind(),
            message: error.message().to_string(),
        };
        self.finished_at = Utc::now();
    }
}

/// What to converge.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub principal: PrincipalName,
    pub principal_path: String,
    pub policy: PolicyDocument,
    pub namespace: Namespace,
    pub access_id_name: SecretName,
    pub access_secret_name: SecretName,
    pub max_access_keys: u32,
    pub rotation: RotationPolicy,
}

impl ReconcileRequest {
    /// Build a request from resolved settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            principal: settings.principal.clone(),
            principal_path: settings.principal_path.clone(),
            policy: PolicyDocument::for_bucket_at(
                settings.policy_name.clone(),
                &settings.principal,
                &settings.principal_path,
                &settings.bucket,
                settings.include_introspection,
            ),
            namespace: settings.namespace.clone(),
            access_id_name: settings.access_id_name.clone(),
            access_secret_name: settings.access_secret_name.clone(),
            max_access_keys: settings.max_access_keys,
            rotation: settings.rotation,
        }
    }
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Another run holds the principal's lock. Nothing was attempted.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The state file could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),

    /// A stage failed. The report covers the whole run.
    #[error("{stage} failed with {kind}: {message}")]
    Failed {
        stage: Stage,
        kind: ErrorKind,
        message: String,
        report: Box<ReconcileReport>,
    },
}

impl ReconcileError {
    /// The run report, when stages were attempted.
    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            ReconcileError::Failed { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }

    /// The failure kind, for stage failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ReconcileError::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// What the operator should do next.
    pub fn hint(&self) -> &'static str {
        match self {
            ReconcileError::Lock(LockError::AlreadyLocked(_)) => {
                "wait for the other run to finish, then retry"
            }
            ReconcileError::Lock(_) => "check permissions on the state directory",
            ReconcileError::State(_) => "inspect or remove the state file, then retry",
            ReconcileError::Failed { kind, .. } => kind.operator_hint(),
        }
    }
}

/// Internal reason a run stopped early.
enum Halt {
    Stage(Stage, ApiError),
    State(StateError),
}

impl From<StateError> for Halt {
    fn from(err: StateError) -> Self {
        Halt::State(err)
    }
}

/// Drives the provisioning stages against an account and a secret sink.
pub struct Reconciler {
    account: Arc<dyn AccountApi>,
    sink: Arc<dyn SecretSink>,
    store: StateStore,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(account: Arc<dyn AccountApi>, sink: Arc<dyn SecretSink>, store: StateStore) -> Self {
        Self {
            account,
            sink,
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Use `retry` for remote calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run every stage for `request`.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::Lock`] / [`ReconcileError::State`] before any
    ///   remote call, or when state cannot be saved mid-run
    /// - [`ReconcileError::Failed`] when a stage fails
    pub async fn run(&self, request: &ReconcileRequest) -> Result<ReconcileReport, ReconcileError> {
        let _lock = RunLock::acquire(self.store.dir(), &request.principal)?;
        let mut state = self.store.load()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            %run_id,
            principal = %request.principal,
            namespace = %request.namespace,
            account = self.account.name(),
            sink = self.sink.name(),
            "reconciliation started"
        );
        let mut report = ReconcileReport::new(run_id, request);

        match self.drive(request, &mut state, &mut report).await {
            Ok(()) => {
                report.state = RunState::Done;
                report.finished_at = Utc::now();
                record_run(&mut state, &report, "done".to_string());
                self.store.save(&state)?;
                tracing::info!(principal = %request.principal, "reconciliation done");
                Ok(report)
            }
            Err(Halt::State(err)) => {
                if let Some(id) = unpublished_key(&report) {
                    tracing::warn!(access_id = %id, "minted key was not published");
                }
                Err(ReconcileError::State(err))
            }
            Err(Halt::Stage(stage, err)) => {
                report.fail(stage, &err);
                report.orphaned_key = unpublished_key(&report);
                if let Some(id) = &report.orphaned_key {
                    tracing::warn!(
                        principal = %request.principal,
                        access_id = %id,
                        "minted key is orphaned; revoke it or let a later run replace it"
                    );
                }
                tracing::error!(
                    principal = %request.principal,
                    stage = %stage,
                    kind = %err.kind(),
                    error = %err,
                    "reconciliation failed"
                );

                if state.is_tracked(&request.principal) {
                    let outcome = format!("failed:{}:{}", stage, err.kind());
                    record_run(&mut state, &report, outcome);
                    if let Err(save_err) = self.store.save(&state) {
                        tracing::warn!(error = %save_err, "could not record failed run");
                    }
                }

                Err(ReconcileError::Failed {
                    stage,
                    kind: err.kind(),
                    message: err.message().to_string(),
                    report: Box::new(report),
                })
            }
        }
    }

    async fn drive(
        &self,
        request: &ReconcileRequest,
        state: &mut ReconcileState,
        report: &mut ReconcileReport,
    ) -> Result<(), Halt> {
        let principal = &request.principal;
        let account = &*self.account;

        // PrincipalEnsured
        let tracked = state.is_tracked(principal);
        let (remote, outcome) = PrincipalStore::new(account, &self.retry)
            .ensure(principal, &request.principal_path, tracked)
            .await
            .map_err(|e| Halt::Stage(Stage::PrincipalEnsured, e))?;
        let origin = match outcome {
            EnsureOutcome::Created => PrincipalOrigin::Created,
            _ => PrincipalOrigin::Adopted,
        };
        record(state, principal, origin).arn = Some(remote.arn.clone());
        self.store.save(state)?;
        report.principal_outcome = Some(outcome);
        report.complete(Stage::PrincipalEnsured, outcome.to_string());

        // CredentialMinted
        let minter = CredentialMinter::new(account, &self.retry, request.max_access_keys);
        let live = minter
            .live_keys(principal)
            .await
            .map_err(|e| Halt::Stage(Stage::CredentialMinted, e))?;
        let existing: Vec<&str> = live.iter().map(|k| k.access_id.as_str()).collect();
        let forgotten = record(state, principal, origin).forget_deleted_keys(&existing);
        if forgotten > 0 {
            tracing::debug!(principal = %principal, forgotten, "dropped deleted keys from state");
        }

        let pair = match rotation_skip(request, state, &live) {
            Some(reason) => {
                self.store.save(state)?;
                report.skip(Stage::CredentialMinted, reason);
                None
            }
            None => {
                let pair = minter
                    .mint_with(principal, &live)
                    .await
                    .map_err(|e| Halt::Stage(Stage::CredentialMinted, e))?;
                let entry = record(state, principal, origin);
                entry.minted_keys.push(MintedKey {
                    access_id: pair.access_id.clone(),
                    created_at: pair.created_at,
                });
                entry.orphaned_keys.push(pair.access_id.clone());
                self.store.save(state)?;
                report.access_id = Some(pair.access_id.clone());
                report.complete(Stage::CredentialMinted, pair.access_id.clone());
                Some(pair)
            }
        };

        // PolicyAttached
        let bound = PolicyBinder::new(account, &self.retry)
            .ensure_attached(principal, &request.policy)
            .await
            .map_err(|e| Halt::Stage(Stage::PolicyAttached, e))?;
        record(state, principal, origin).policy = Some(PolicyRecord {
            arn: bound.arn.clone(),
            fingerprint: bound.fingerprint.clone(),
            bound_at: Utc::now(),
        });
        self.store.save(state)?;
        let detail = format!(
            "{}{}",
            bound.change,
            if bound.newly_attached { ", attached" } else { "" }
        );
        report.policy = Some(bound);
        report.complete(Stage::PolicyAttached, detail);

        // SecretsPublished
        let Some(pair) = pair else {
            report.skip(
                Stage::SecretsPublished,
                "no new key minted; published secrets are current".to_string(),
            );
            return Ok(());
        };

        let entries =
            SecretEntry::for_pair(&pair, &request.access_id_name, &request.access_secret_name);
        let published = SecretPublisher::new(&*self.sink, &self.retry)
            .publish(&request.namespace, &entries)
            .await;
        let published = match published {
            Ok(published) => published,
            Err(failure) => {
                report.publish = Some(failure.report);
                return Err(Halt::Stage(Stage::SecretsPublished, failure.source));
            }
        };

        let entry = record(state, principal, origin);
        entry.orphaned_keys.retain(|id| id != &pair.access_id);
        entry.last_published = Some(PublishedKey {
            access_id: pair.access_id.clone(),
            namespace: request.namespace.clone(),
            published_at: Utc::now(),
        });
        self.store.save(state)?;
        let detail = published.succeeded_names().join(", ");
        report.publish = Some(published);
        report.complete(Stage::SecretsPublished, detail);
        Ok(())
    }
}

/// Why minting can be skipped this run, if it can. Only an active key
/// counts as current; a deactivated one is replaced.
fn rotation_skip(
    request: &ReconcileRequest,
    state: &ReconcileState,
    live: &[AccessKeyInfo],
) -> Option<String> {
    if request.rotation != RotationPolicy::IfUnpublished {
        return None;
    }
    let published = state
        .record(&request.principal)
        .and_then(|r| r.last_published.as_ref())
        .filter(|p| p.namespace == request.namespace)?;

    match live.iter().find(|k| k.access_id == published.access_id) {
        Some(key) if key.active => Some(format!(
            "key {} is active and published to {}",
            published.access_id, published.namespace
        )),
        Some(_) => {
            tracing::info!(
                access_id = %published.access_id,
                "published key is inactive, minting a new one"
            );
            None
        }
        None => {
            tracing::info!(
                access_id = %published.access_id,
                "published key no longer exists, minting a new one"
            );
            None
        }
    }
}

/// The principal's record, created with `origin` if missing.
fn record<'s>(
    state: &'s mut ReconcileState,
    principal: &PrincipalName,
    origin: PrincipalOrigin,
) -> &'s mut PrincipalRecord {
    state.track(principal, origin, None)
}

fn record_run(state: &mut ReconcileState, report: &ReconcileReport, outcome: String) {
    if let Some(entry) = state.record_mut(&report.principal) {
        entry.last_run = Some(RunRecord {
            run_id: report.run_id.clone(),
            finished_at: report.finished_at,
            outcome,
        });
    }
}

/// The key this run minted, if it was not fully published.
fn unpublished_key(report: &ReconcileReport) -> Option<String> {
    let complete = report.publish.as_ref().is_some_and(|p| p.is_complete());
    match (&report.access_id, complete) {
        (Some(id), false) => Some(id.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::mock::{FailOn, MockAccount, MockOperation};
    use crate::core::types::{BucketName, PolicyName};
    use crate::secrets::mock::MockSecretSink;
    use std::time::Duration;
    use tempfile::TempDir;

    fn user() -> PrincipalName {
        PrincipalName::new("svc-user").unwrap()
    }

    fn request() -> ReconcileRequest {
        ReconcileRequest {
            principal: user(),
            principal_path: "/".into(),
            policy: PolicyDocument::for_bucket(
                PolicyName::default_for(&user()),
                &user(),
                &BucketName::new("data-bucket").unwrap(),
                true,
            ),
            namespace: Namespace::new("org/repo").unwrap(),
            access_id_name: SecretName::new("ACCESS_ID").unwrap(),
            access_secret_name: SecretName::new("ACCESS_SECRET").unwrap(),
            max_access_keys: 2,
            rotation: RotationPolicy::Always,
        }
    }

    fn reconciler(account: &MockAccount, sink: &MockSecretSink, dir: &TempDir) -> Reconciler {
        Reconciler::new(
            Arc::new(account.clone()),
            Arc::new(sink.clone()),
            StateStore::new(dir.path()),
        )
        .with_retry(RetryPolicy::new(2, Duration::ZERO, Duration::from_secs(5)))
    }

    mod stages {
        use super::*;

        #[tokio::test]
        async fn fresh_principal_reaches_done() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new();

            let report = reconciler(&account, &sink, &temp).run(&request()).await.unwrap();

            assert!(report.succeeded());
            assert_eq!(report.principal_outcome, Some(EnsureOutcome::Created));
            assert!(report
                .stages
                .iter()
                .all(|s| s.status == StageStatus::Completed));
            let ns = request().namespace;
            let id = report.access_id.clone().unwrap();
            assert_eq!(sink.value(&ns, "ACCESS_ID").unwrap().expose(), id);
            assert!(report.orphaned_key.is_none());
        }

        #[tokio::test]
        async fn state_records_published_key() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new();
            let reconciler = reconciler(&account, &sink, &temp);

            let report = reconciler.run(&request()).await.unwrap();

            let state = reconciler.store().load().unwrap();
            let record = state.record(&user()).unwrap();
            assert_eq!(record.origin, PrincipalOrigin::Created);
            assert!(record.orphaned_keys.is_empty());
            assert_eq!(
                record.last_published.as_ref().map(|p| p.access_id.clone()),
                report.access_id
            );
            assert_eq!(record.last_run.as_ref().unwrap().outcome, "done");
        }

        #[tokio::test]
        async fn existing_principal_is_adopted() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new().with_user(&user());
            let sink = MockSecretSink::new();

            let report = reconciler(&account, &sink, &temp).run(&request()).await.unwrap();

            assert_eq!(report.principal_outcome, Some(EnsureOutcome::Adopted));
            assert!(!account
                .operations()
                .iter()
                .any(|op| matches!(op, MockOperation::CreateUser { .. })));
        }

        #[tokio::test]
        async fn second_run_is_unchanged_and_rotates() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new();
            let reconciler = reconciler(&account, &sink, &temp);

            let first = reconciler.run(&request()).await.unwrap();
            let second = reconciler.run(&request()).await.unwrap();

            assert_eq!(second.principal_outcome, Some(EnsureOutcome::Unchanged));
            assert_ne!(first.access_id, second.access_id);
            assert_eq!(
                sink.value(&request().namespace, "ACCESS_ID").unwrap().expose(),
                second.access_id.unwrap()
            );
            assert!(!second.policy.unwrap().mutated());
        }
    }

    mod failures {
        use super::*;

        #[tokio::test]
        async fn quota_stops_before_policy_and_publish() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new().with_access_keys(&user(), 2);
            let sink = MockSecretSink::new();

            let err = reconciler(&account, &sink, &temp)
                .run(&request())
                .await
                .unwrap_err();

            assert_eq!(err.kind(), Some(ErrorKind::QuotaExceeded));
            let report = err.report().unwrap();
            assert!(matches!(
                report.state,
                RunState::Failed { stage: Stage::CredentialMinted, kind: ErrorKind::QuotaExceeded, .. }
            ));
            assert_eq!(report.stage(Stage::PolicyAttached).unwrap().status, StageStatus::NotRun);
            assert!(sink.operations().is_empty());
            assert!(!account
                .operations()
                .iter()
                .any(|op| matches!(op, MockOperation::FindPolicy { .. })));
        }

        #[tokio::test]
        async fn publish_failure_reports_orphan() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new()
                .fail_on_name("ACCESS_SECRET", ApiError::PermissionDenied("403".into()));
            let reconciler = reconciler(&account, &sink, &temp);

            let err = reconciler.run(&request()).await.unwrap_err();

            let report = err.report().unwrap();
            let orphan = report.orphaned_key.clone().unwrap();
            assert_eq!(report.access_id.as_ref(), Some(&orphan));
            assert_eq!(report.publish.as_ref().unwrap().succeeded_names(), vec!["ACCESS_ID"]);

            let state = reconciler.store().load().unwrap();
            let record = state.record(&user()).unwrap();
            assert_eq!(record.orphaned_keys, vec![orphan]);
            assert!(record.last_published.is_none());
            assert!(record.last_run.as_ref().unwrap().outcome.starts_with("failed:SecretsPublished"));
        }

        #[tokio::test]
        async fn rerun_after_failure_converges() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new()
                .fail_on_name("ACCESS_ID", ApiError::NotFound("repo".into()));
            let reconciler = reconciler(&account, &sink, &temp);

            assert!(reconciler.run(&request()).await.is_err());
            sink.clear_fail_on();
            let report = reconciler.run(&request()).await.unwrap();

            assert!(report.succeeded());
            let state = reconciler.store().load().unwrap();
            assert_eq!(state.record(&user()).unwrap().orphaned_keys.len(), 1);
        }

        #[tokio::test]
        async fn principal_failure_leaves_no_record() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new()
                .fail_on(FailOn::CreateUser(ApiError::PermissionDenied("iam:CreateUser".into())));
            let sink = MockSecretSink::new();
            let reconciler = reconciler(&account, &sink, &temp);

            let err = reconciler.run(&request()).await.unwrap_err();

            assert_eq!(err.kind(), Some(ErrorKind::PermissionDenied));
            assert_eq!(err.hint(), ErrorKind::PermissionDenied.operator_hint());
            assert!(!reconciler.store().load().unwrap().is_tracked(&user()));
        }

        #[tokio::test]
        async fn held_lock_blocks_run() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new();
            let _held = RunLock::acquire(temp.path(), &user()).unwrap();

            let err = reconciler(&account, &sink, &temp)
                .run(&request())
                .await
                .unwrap_err();

            assert!(matches!(err, ReconcileError::Lock(LockError::AlreadyLocked(_))));
            assert!(account.operations().is_empty());
        }
    }

    mod rotation {
        use super::*;

        fn if_unpublished() -> ReconcileRequest {
            ReconcileRequest {
                rotation: RotationPolicy::IfUnpublished,
                ..request()
            }
        }

        #[tokio::test]
        async fn live_published_key_skips_mint_and_publish() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new();
            let reconciler = reconciler(&account, &sink, &temp);

            reconciler.run(&if_unpublished()).await.unwrap();
            let second = reconciler.run(&if_unpublished()).await.unwrap();

            assert!(second.succeeded());
            assert!(second.access_id.is_none());
            assert_eq!(
                second.stage(Stage::CredentialMinted).unwrap().status,
                StageStatus::Skipped
            );
            assert_eq!(
                second.stage(Stage::SecretsPublished).unwrap().status,
                StageStatus::Skipped
            );
            assert_eq!(account.access_key_count(&user()), 1);
            assert_eq!(sink.operations().len(), 2);
        }

        #[tokio::test]
        async fn revoked_published_key_is_replaced() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new();
            let reconciler = reconciler(&account, &sink, &temp);

            let first = reconciler.run(&if_unpublished()).await.unwrap();
            account.revoke_access_key(&user(), first.access_id.as_deref().unwrap());
            let second = reconciler.run(&if_unpublished()).await.unwrap();

            assert!(second.access_id.is_some());
            assert_ne!(second.access_id, first.access_id);
        }

        #[tokio::test]
        async fn inactive_published_key_is_replaced() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new();
            let reconciler = reconciler(&account, &sink, &temp);

            let first = reconciler.run(&if_unpublished()).await.unwrap();
            let first_id = first.access_id.clone().unwrap();
            account.deactivate_access_key(&user(), &first_id);
            let second = reconciler.run(&if_unpublished()).await.unwrap();

            assert_eq!(
                second.stage(Stage::CredentialMinted).unwrap().status,
                StageStatus::Completed
            );
            let second_id = second.access_id.clone().unwrap();
            assert_ne!(second_id, first_id);
            let ns = request().namespace;
            assert_eq!(sink.value(&ns, "ACCESS_ID").unwrap().expose(), second_id);
        }
    }

    mod key_bookkeeping {
        use super::*;

        #[tokio::test]
        async fn deleted_keys_leave_state() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new()
                .fail_on_name("ACCESS_SECRET", ApiError::PermissionDenied("403".into()));
            let reconciler = reconciler(&account, &sink, &temp);

            let failed = reconciler.run(&request()).await.unwrap_err();
            let orphan = failed.report().unwrap().orphaned_key.clone().unwrap();
            account.revoke_access_key(&user(), &orphan);
            sink.clear_fail_on();

            let report = reconciler.run(&request()).await.unwrap();

            let state = reconciler.store().load().unwrap();
            let entry = state.record(&user()).unwrap();
            assert!(entry.orphaned_keys.is_empty());
            let minted: Vec<&str> = entry.minted_keys.iter().map(|k| k.access_id.as_str()).collect();
            assert_eq!(minted, vec![report.access_id.as_deref().unwrap()]);
        }

        #[tokio::test]
        async fn minted_history_is_bounded_by_live_keys() {
            let temp = TempDir::new().unwrap();
            let account = MockAccount::new();
            let sink = MockSecretSink::new();
            let reconciler = reconciler(&account, &sink, &temp);

            for _ in 0..4 {
                let report = reconciler.run(&request()).await.unwrap();
                let ids = account.access_key_ids(&user());
                let stale = ids
                    .iter()
                    .find(|id| Some(id.as_str()) != report.access_id.as_deref())
                    .cloned();
                if let Some(stale) = stale {
                    account.revoke_access_key(&user(), &stale);
                }
            }

            let state = reconciler.store().load().unwrap();
            assert!(state.record(&user()).unwrap().minted_keys.len() <= 2);
        }
    }

    #[test]
    fn failed_state_display() {
        let state = RunState::Failed {
            stage: Stage::CredentialMinted,
            kind: ErrorKind::QuotaExceeded,
            message: "full".into(),
        };
        assert_eq!(state.to_string(), "Failed(CredentialMinted, QuotaExceededError)");
        assert!(state.is_terminal());
        assert!(!RunState::PolicyAttached.is_terminal());
    }

    #[test]
    fn report_serializes_flat_state() {
        let mut report = ReconcileReport::new("run-1".into(), &request());
        report.fail(Stage::CredentialMinted, &ApiError::QuotaExceeded("full".into()));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "Failed");
        assert_eq!(json["stage"], "CredentialMinted");
        assert_eq!(json["kind"], "QuotaExceededError");
    }
}
