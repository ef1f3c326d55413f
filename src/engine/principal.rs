//! engine::principal
//!
//! Ensure a named principal exists, creating or adopting it.
//!
//! # Existence States
//!
//! | Remote  | Tracked locally | State               | Outcome    |
//! |---------|-----------------|---------------------|------------|
//! | absent  | -               | `Absent`            | `Created`  |
//! | present | no              | `PresentUnmanaged`  | `Adopted`  |
//! | present | yes             | `PresentManaged`    | `Unchanged`|
//!
//! # Invariants
//!
//! - At most one create call per [`PrincipalStore::ensure`]
//! - Creation is never retried; a `Conflict` (someone else created the
//!   principal first) resolves by adopting it
//! - A principal that already exists is never mutated

use serde::Serialize;

use super::retry::RetryPolicy;
use crate::account::{AccountApi, RemoteUser};
use crate::core::error::ApiError;
use crate::core::types::PrincipalName;

/// What the account held before [`PrincipalStore::ensure`] ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExistenceState {
    Absent,
    PresentUnmanaged,
    PresentManaged,
}

impl ExistenceState {
    /// Classify a lookup result against local tracking.
    pub fn classify(remote: Option<&RemoteUser>, tracked: bool) -> Self {
        match (remote, tracked) {
            (None, _) => ExistenceState::Absent,
            (Some(_), false) => ExistenceState::PresentUnmanaged,
            (Some(_), true) => ExistenceState::PresentManaged,
        }
    }
}

/// What [`PrincipalStore::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    Created,
    Adopted,
    Unchanged,
}

impl std::fmt::Display for EnsureOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EnsureOutcome::Created => "created",
            EnsureOutcome::Adopted => "adopted",
            EnsureOutcome::Unchanged => "unchanged",
        })
    }
}

/// A principal after ensure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: PrincipalName,
    pub arn: String,
    /// The state observed before any change.
    pub existence: ExistenceState,
}

/// Principal lookup and creation over an [`AccountApi`].
pub struct PrincipalStore<'a> {
    account: &'a dyn AccountApi,
    retry: &'a RetryPolicy,
}

impl<'a> PrincipalStore<'a> {
    pub fn new(account: &'a dyn AccountApi, retry: &'a RetryPolicy) -> Self {
        Self { account, retry }
    }

    /// Read-only lookup.
    pub async fn observe(
        &self,
        name: &PrincipalName,
        tracked: bool,
    ) -> Result<(ExistenceState, Option<RemoteUser>), ApiError> {
        let remote = self
            .retry
            .run("GetUser", || self.account.get_user(name))
            .await?;
        Ok((ExistenceState::classify(remote.as_ref(), tracked), remote))
    }

    /// Make sure `name` exists, creating it under `path` when absent.
    pub async fn ensure(
        &self,
        name: &PrincipalName,
        path: &str,
        tracked: bool,
    ) -> Result<(Principal, EnsureOutcome), ApiError> {
        let (existence, remote) = self.observe(name, tracked).await?;

        if let Some(user) = remote {
            let outcome = match existence {
                ExistenceState::PresentManaged => EnsureOutcome::Unchanged,
                _ => EnsureOutcome::Adopted,
            };
            tracing::debug!(principal = %name, %outcome, "principal already exists");
            return Ok((principal(user, existence), outcome));
        }

        match self
            .retry
            .once("CreateUser", self.account.create_user(name, path))
            .await
        {
            Ok(user) => {
                tracing::info!(principal = %name, arn = %user.arn, "created principal");
                Ok((principal(user, existence), EnsureOutcome::Created))
            }
            Err(ApiError::Conflict(message)) => {
                tracing::info!(
                    principal = %name,
                    "principal appeared concurrently, adopting it"
                );
                let user = self
                    .retry
                    .run("GetUser", || self.account.get_user(name))
                    .await?
                    .ok_or(ApiError::Conflict(message))?;
                Ok((principal(user, existence), EnsureOutcome::Adopted))
            }
            Err(err) => Err(err),
        }
    }
}

fn principal(user: RemoteUser, existence: ExistenceState) -> Principal {
    Principal {
        name: user.name,
        arn: user.arn,
        existence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::mock::{FailOn, MockAccount, MockOperation};

    fn user() -> PrincipalName {
        PrincipalName::new("svc-user").unwrap()
    }

    fn create_calls(account: &MockAccount) -> usize {
        account
            .operations()
            .iter()
            .filter(|op| matches!(op, MockOperation::CreateUser { .. }))
            .count()
    }

    #[tokio::test]
    async fn absent_principal_is_created() {
        let account = MockAccount::new();
        let retry = RetryPolicy::default();
        let store = PrincipalStore::new(&account, &retry);

        let (principal, outcome) = store.ensure(&user(), "/", false).await.unwrap();

        assert_eq!(outcome, EnsureOutcome::Created);
        assert_eq!(principal.existence, ExistenceState::Absent);
        assert!(account.user_exists(&user()));
        assert_eq!(create_calls(&account), 1);
    }

    #[tokio::test]
    async fn untracked_principal_is_adopted_without_create() {
        let account = MockAccount::new().with_user(&user());
        let retry = RetryPolicy::default();
        let store = PrincipalStore::new(&account, &retry);

        let (principal, outcome) = store.ensure(&user(), "/", false).await.unwrap();

        assert_eq!(outcome, EnsureOutcome::Adopted);
        assert_eq!(principal.existence, ExistenceState::PresentUnmanaged);
        assert_eq!(create_calls(&account), 0);
        assert!(account.mutations().is_empty());
    }

    #[tokio::test]
    async fn tracked_principal_is_unchanged() {
        let account = MockAccount::new().with_user(&user());
        let retry = RetryPolicy::default();
        let store = PrincipalStore::new(&account, &retry);

        let (_, outcome) = store.ensure(&user(), "/", true).await.unwrap();
        assert_eq!(outcome, EnsureOutcome::Unchanged);
    }

    #[tokio::test]
    async fn create_race_resolves_by_adopting() {
        let account = MockAccount::new().race_on_create_user();
        let retry = RetryPolicy::default();
        let store = PrincipalStore::new(&account, &retry);

        let (principal, outcome) = store.ensure(&user(), "/", false).await.unwrap();

        assert_eq!(outcome, EnsureOutcome::Adopted);
        assert!(principal.arn.ends_with(":user/svc-user"));
        assert_eq!(create_calls(&account), 1);
    }

    #[tokio::test]
    async fn transient_create_is_not_retried() {
        let account =
            MockAccount::new().fail_on(FailOn::CreateUser(ApiError::Transient("503".into())));
        let retry = RetryPolicy::new(3, std::time::Duration::ZERO, std::time::Duration::from_secs(5));
        let store = PrincipalStore::new(&account, &retry);

        let err = store.ensure(&user(), "/", false).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(create_calls(&account), 1);
    }

    #[tokio::test]
    async fn permission_error_propagates() {
        let account = MockAccount::new()
            .fail_on(FailOn::GetUser(ApiError::PermissionDenied("iam:GetUser".into())));
        let retry = RetryPolicy::default();
        let store = PrincipalStore::new(&account, &retry);

        let err = store.ensure(&user(), "/", false).await.unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));
    }
}
