//! engine::binder
//!
//! Converge a managed policy and its attachment to a principal.
//!
//! # Flow
//!
//! 1. Find the policy by name
//! 2. Absent: create it. Present with an equivalent document: leave it.
//!    Present and different: store the document as a new default version,
//!    first deleting the oldest non-default version when the account's
//!    version limit is reached
//! 3. Attach it to the principal unless already attached
//!
//! # Invariants
//!
//! - Documents are compared by their normalized statements, so ordering
//!   differences never cause an update
//! - A second `ensure_attached` with the same document performs no
//!   mutating call
//! - `NotFound` on attach (principal or policy missing) is fatal, never
//!   retried: it means an earlier stage did not hold

use serde::Serialize;

use super::retry::RetryPolicy;
use crate::account::{AccountApi, PolicyVersionInfo, RemotePolicy};
use crate::core::error::ApiError;
use crate::core::policy::PolicyDocument;
use crate::core::types::PrincipalName;

/// Versions a managed policy may hold at once.
pub const POLICY_VERSION_LIMIT: usize = 5;

/// What happened to the policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyChange {
    Created,
    Updated,
    Unchanged,
}

impl std::fmt::Display for PolicyChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PolicyChange::Created => "created",
            PolicyChange::Updated => "updated",
            PolicyChange::Unchanged => "unchanged",
        })
    }
}

/// Result of [`PolicyBinder::ensure_attached`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindOutcome {
    pub arn: String,
    pub change: PolicyChange,
    pub newly_attached: bool,
    pub fingerprint: String,
}

impl BindOutcome {
    /// Whether anything changed remotely.
    pub fn mutated(&self) -> bool {
        self.change != PolicyChange::Unchanged || self.newly_attached
    }
}

/// Read-only comparison of desired and remote policy state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDiff {
    pub arn: Option<String>,
    /// What `ensure_attached` would do to the document.
    pub change: PolicyChange,
    /// Whether `ensure_attached` would attach it.
    pub would_attach: bool,
    pub desired_fingerprint: String,
    pub remote_fingerprint: Option<String>,
}

/// Managed policy convergence over an [`AccountApi`].
pub struct PolicyBinder<'a> {
    account: &'a dyn AccountApi,
    retry: &'a RetryPolicy,
}

impl<'a> PolicyBinder<'a> {
    pub fn new(account: &'a dyn AccountApi, retry: &'a RetryPolicy) -> Self {
        Self { account, retry }
    }

    /// Make `document` the principal's attached policy.
    pub async fn ensure_attached(
        &self,
        principal: &PrincipalName,
        document: &PolicyDocument,
    ) -> Result<BindOutcome, ApiError> {
        let (arn, change) = match self.find(document).await? {
            None => self.create(document).await?,
            Some(remote) if remote.document.is_equivalent(document) => {
                tracing::debug!(policy = %document.name(), "policy document unchanged");
                (remote.arn, PolicyChange::Unchanged)
            }
            Some(remote) => {
                self.update(&remote, document).await?;
                (remote.arn, PolicyChange::Updated)
            }
        };

        let newly_attached = self.attach(principal, &arn).await?;

        Ok(BindOutcome {
            arn,
            change,
            newly_attached,
            fingerprint: document.fingerprint(),
        })
    }

    /// What [`ensure_attached`](Self::ensure_attached) would do, without
    /// doing it. The principal may not exist yet.
    pub async fn diff(
        &self,
        principal: &PrincipalName,
        principal_exists: bool,
        document: &PolicyDocument,
    ) -> Result<PolicyDiff, ApiError> {
        let desired_fingerprint = document.fingerprint();
        let Some(remote) = self.find(document).await? else {
            return Ok(PolicyDiff {
                arn: None,
                change: PolicyChange::Created,
                would_attach: true,
                desired_fingerprint,
                remote_fingerprint: None,
            });
        };

        let change = if remote.document.is_equivalent(document) {
            PolicyChange::Unchanged
        } else {
            PolicyChange::Updated
        };
        let would_attach = if principal_exists {
            !self.attached(principal).await?.contains(&remote.arn)
        } else {
            true
        };

        Ok(PolicyDiff {
            arn: Some(remote.arn),
            change,
            would_attach,
            desired_fingerprint,
            remote_fingerprint: Some(remote.document.fingerprint()),
        })
    }

    async fn find(&self, document: &PolicyDocument) -> Result<Option<RemotePolicy>, ApiError> {
        self.retry
            .run("FindPolicy", || self.account.find_policy(document.name()))
            .await
    }

    async fn create(&self, document: &PolicyDocument) -> Result<(String, PolicyChange), ApiError> {
        match self
            .retry
            .run("CreatePolicy", || self.account.create_policy(document))
            .await
        {
            Ok(created) => {
                tracing::info!(policy = %document.name(), arn = %created.arn, "created policy");
                Ok((created.arn, PolicyChange::Created))
            }
            // Created concurrently, or by a retried attempt whose response was lost.
            Err(ApiError::Conflict(message)) => {
                let remote = self.find(document).await?.ok_or(ApiError::Conflict(message))?;
                if remote.document.is_equivalent(document) {
                    Ok((remote.arn, PolicyChange::Created))
                } else {
                    self.update(&remote, document).await?;
                    Ok((remote.arn, PolicyChange::Updated))
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn update(&self, remote: &RemotePolicy, document: &PolicyDocument) -> Result<(), ApiError> {
        let versions = self
            .retry
            .run("ListPolicyVersions", || {
                self.account.list_policy_versions(&remote.arn)
            })
            .await?;

        if versions.len() >= POLICY_VERSION_LIMIT {
            if let Some(oldest) = oldest_non_default(&versions) {
                tracing::info!(
                    policy = %document.name(),
                    version = %oldest.version_id,
                    "deleting oldest policy version to make room"
                );
                self.retry
                    .run("DeletePolicyVersion", || {
                        self.account
                            .delete_policy_version(&remote.arn, &oldest.version_id)
                    })
                    .await?;
            }
        }

        let version = self
            .retry
            .run("CreatePolicyVersion", || {
                self.account.create_policy_version(&remote.arn, document)
            })
            .await?;
        tracing::info!(
            policy = %document.name(),
            %version,
            previous = %remote.default_version,
            "updated policy document"
        );
        Ok(())
    }

    async fn attached(&self, principal: &PrincipalName) -> Result<Vec<String>, ApiError> {
        self.retry
            .run("ListAttachedUserPolicies", || {
                self.account.list_attached_policies(principal)
            })
            .await
    }

    /// Attach unless already attached. Returns whether it attached.
    async fn attach(&self, principal: &PrincipalName, arn: &str) -> Result<bool, ApiError> {
        if self.attached(principal).await?.iter().any(|a| a == arn) {
            return Ok(false);
        }

        self.retry
            .run("AttachUserPolicy", || self.account.attach_policy(principal, arn))
            .await?;
        tracing::info!(principal = %principal, policy_arn = %arn, "attached policy");
        Ok(true)
    }
}

/// The oldest version that is not the default, by creation time then id.
fn oldest_non_default(versions: &[PolicyVersionInfo]) -> Option<&PolicyVersionInfo> {
    versions
        .iter()
        .filter(|v| !v.is_default)
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| version_number(&a.version_id).cmp(&version_number(&b.version_id)))
        })
}

/// Numeric part of a `vN` version id; unparseable ids sort last.
fn version_number(id: &str) -> u64 {
    id.trim_start_matches('v').parse().unwrap_or(u64::MAX)
}
