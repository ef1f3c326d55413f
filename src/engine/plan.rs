//! engine::plan
//!
//! Read-only preview of what a run would do.
//!
//! # Invariants
//!
//! - Planning issues only read calls; nothing remote or local changes
//! - A plan is advisory: the account can change between plan and run
//!
//! # Example
//!
//! ```
//! use keyrelay::account::mock::MockAccount;
//! use keyrelay::core::config::RotationPolicy;
//! use keyrelay::core::policy::PolicyDocument;
//! use keyrelay::core::state::ReconcileState;
//! use keyrelay::core::types::*;
//! use keyrelay::engine::plan::{plan, CredentialAction};
//! use keyrelay::engine::reconciler::ReconcileRequest;
//! use keyrelay::engine::retry::RetryPolicy;
//!
//! # tokio_test::block_on(async {
//! let principal = PrincipalName::new("svc-user").unwrap();
//! let account = MockAccount::new().with_access_keys(&principal, 2);
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
//! let plan = plan(&account, &ReconcileState::default(), &request, &RetryPolicy::default())
//!     .await
//!     .unwrap();
//! assert!(matches!(plan.credential, CredentialAction::BlockedByQuota { .. }));
//! assert!(plan.is_blocked());
//! # });
//! ```

use serde::Serialize;

use super::binder::{PolicyBinder, PolicyDiff};
use super::minter::CredentialMinter;
use super::principal::{EnsureOutcome, ExistenceState, PrincipalStore};
use super::reconciler::ReconcileRequest;
use super::retry::RetryPolicy;
use crate::account::AccountApi;
use crate::core::config::RotationPolicy;
use crate::core::error::ApiError;
use crate::core::state::ReconcileState;
use crate::core::types::{Namespace, PrincipalName, SecretName};

/// What would happen to the access keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CredentialAction {
    /// A new key would be minted.
    Mint { live: usize, limit: u32 },
    /// The published key is active and rotation is not forced.
    Keep { access_id: String },
    /// The principal is at its key limit; the run would fail.
    BlockedByQuota { live: usize, limit: u32 },
}

/// What would happen to the secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretsAction {
    pub namespace: Namespace,
    pub names: Vec<SecretName>,
    /// False when no new key would be minted.
    pub publish: bool,
}

/// A full preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub principal: PrincipalName,
    pub existence: ExistenceState,
    pub principal_action: EnsureOutcome,
    pub credential: CredentialAction,
    pub policy: PolicyDiff,
    pub secrets: SecretsAction,
}

impl PlanReport {
    /// Whether a run would fail for a reason visible now.
    pub fn is_blocked(&self) -> bool {
        matches!(self.credential, CredentialAction::BlockedByQuota { .. })
    }
}

/// Compute the plan for `request` against the account and local state.
pub async fn plan(
    account: &dyn AccountApi,
    state: &ReconcileState,
    request: &ReconcileRequest,
    retry: &RetryPolicy,
) -> Result<PlanReport, ApiError> {
    let principal = &request.principal;
    let tracked = state.is_tracked(principal);
    let (existence, _) = PrincipalStore::new(account, retry)
        .observe(principal, tracked)
        .await?;
    let principal_action = match existence {
        ExistenceState::Absent => EnsureOutcome::Created,
        ExistenceState::PresentUnmanaged => EnsureOutcome::Adopted,
        ExistenceState::PresentManaged => EnsureOutcome::Unchanged,
    };
    let exists = existence != ExistenceState::Absent;

    let minter = CredentialMinter::new(account, retry, request.max_access_keys);
    let live = if exists {
        minter.live_keys(principal).await?
    } else {
        Vec::new()
    };

    let kept = match request.rotation {
        RotationPolicy::IfUnpublished => state
            .record(principal)
            .and_then(|r| r.last_published.as_ref())
            .filter(|p| p.namespace == request.namespace)
            .filter(|p| live.iter().any(|k| k.active && k.access_id == p.access_id))
            .map(|p| p.access_id.clone()),
        RotationPolicy::Always => None,
    };
    let credential = match kept {
        Some(access_id) => CredentialAction::Keep { access_id },
        None if !minter.has_capacity(&live) => CredentialAction::BlockedByQuota {
            live: live.len(),
            limit: request.max_access_keys,
        },
        None => CredentialAction::Mint {
            live: live.len(),
            limit: request.max_access_keys,
        },
    };

    let policy = PolicyBinder::new(account, retry)
        .diff(principal, exists, &request.policy)
        .await?;

    let secrets = SecretsAction {
        namespace: request.namespace.clone(),
        names: vec![
            request.access_id_name.clone(),
            request.access_secret_name.clone(),
        ],
        publish: !matches!(credential, CredentialAction::Keep { .. }),
    };

    Ok(PlanReport {
        principal: principal.clone(),
        existence,
        principal_action,
        credential,
        policy,
        secrets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::mock::MockAccount;
    use crate::core::policy::PolicyDocument;
    use crate::core::state::{PrincipalOrigin, PublishedKey};
    use crate::core::types::{BucketName, PolicyName};
    use crate::engine::binder::PolicyChange;
    use chrono::Utc;

    fn user() -> PrincipalName {
        PrincipalName::new("svc-user").unwrap()
    }

    fn request(rotation: RotationPolicy) -> ReconcileRequest {
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
            rotation,
        }
    }

    #[tokio::test]
    async fn empty_account_plans_everything() {
        let account = MockAccount::new();
        let plan = plan(
            &account,
            &ReconcileState::default(),
            &request(RotationPolicy::Always),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(plan.principal_action, EnsureOutcome::Created);
        assert_eq!(plan.credential, CredentialAction::Mint { live: 0, limit: 2 });
        assert_eq!(plan.policy.change, PolicyChange::Created);
        assert!(plan.secrets.publish);
        assert!(account.mutations().is_empty());
    }

    #[tokio::test]
    async fn published_live_key_is_kept() {
        let account = MockAccount::new().with_access_keys(&user(), 1);
        let access_id = account.access_key_ids(&user())[0].clone();
        let mut state = ReconcileState::default();
        state.track(&user(), PrincipalOrigin::Created, None).last_published = Some(PublishedKey {
            access_id: access_id.clone(),
            namespace: Namespace::new("org/repo").unwrap(),
            published_at: Utc::now(),
        });

        let plan = plan(
            &account,
            &state,
            &request(RotationPolicy::IfUnpublished),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(plan.principal_action, EnsureOutcome::Unchanged);
        assert_eq!(plan.credential, CredentialAction::Keep { access_id });
        assert!(!plan.secrets.publish);
    }

    #[tokio::test]
    async fn inactive_published_key_is_rotated() {
        let account = MockAccount::new().with_access_keys(&user(), 1);
        let access_id = account.access_key_ids(&user())[0].clone();
        account.deactivate_access_key(&user(), &access_id);
        let mut state = ReconcileState::default();
        state.track(&user(), PrincipalOrigin::Created, None).last_published = Some(PublishedKey {
            access_id,
            namespace: Namespace::new("org/repo").unwrap(),
            published_at: Utc::now(),
        });

        let plan = plan(
            &account,
            &state,
            &request(RotationPolicy::IfUnpublished),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(plan.credential, CredentialAction::Mint { live: 1, limit: 2 });
        assert!(plan.secrets.publish);
    }

    #[tokio::test]
    async fn json_shape_is_tagged() {
        let account = MockAccount::new().with_user(&user());
        let plan = plan(
            &account,
            &ReconcileState::default(),
            &request(RotationPolicy::Always),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["existence"], "present-unmanaged");
        assert_eq!(json["credential"]["action"], "mint");
    }
}
