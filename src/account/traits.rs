//! account::traits
//!
//! The cloud account contract: principals, access keys and managed policies.
//!
//! # Design
//!
//! The `AccountApi` trait is async because every operation is a network
//! call. Methods are thin: one method per remote operation, no retries, no
//! decisions. Deciding create-vs-adopt, quota checks and policy diffing is
//! the engine's job, so the same engine runs against the AWS adapter and
//! the in-memory mock.
//!
//! Every method returns [`ApiError`] already classified. Callers branch on
//! [`ApiError::kind`], never on message text.
//!
//! # Example
//!
//! ```
//! use keyrelay::account::{AccountApi, mock::MockAccount};
//! use keyrelay::core::types::PrincipalName;
//!
//! # tokio_test::block_on(async {
//! let account = MockAccount::new();
//! let user = PrincipalName::new("svc-user").unwrap();
//!
//! assert!(account.get_user(&user).await.unwrap().is_none());
//! let created = account.create_user(&user, "/").await.unwrap();
//! assert!(created.arn.ends_with(":user/svc-user"));
//! # });
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::error::ApiError;
use crate::core::policy::PolicyDocument;
use crate::core::secret::CredentialPair;
use crate::core::types::{PolicyName, PrincipalName};

/// A principal as the account reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub name: PrincipalName,
    pub arn: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Metadata of one access key. Never carries the secret half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyInfo {
    pub access_id: String,
    /// Inactive keys still count against the account limit.
    pub active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// A customer-managed policy with its current default document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePolicy {
    pub name: PolicyName,
    pub arn: String,
    pub default_version: String,
    pub document: PolicyDocument,
}

/// One stored version of a managed policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVersionInfo {
    pub version_id: String,
    pub is_default: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// Operations against the cloud account.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Error Handling
///
/// - `NotFound` from a lookup method (`get_user`, `find_policy`) is folded
///   into `Ok(None)`; from any other method it is an error
/// - `Conflict` from a create method means the resource already exists
/// - `QuotaExceeded` from `create_access_key` means the principal is at
///   its key limit and nothing was created
#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Adapter name, for logs.
    fn name(&self) -> &'static str;

    /// Look up a principal by name.
    async fn get_user(&self, name: &PrincipalName) -> Result<Option<RemoteUser>, ApiError>;

    /// Create a principal under `path`.
    async fn create_user(&self, name: &PrincipalName, path: &str)
        -> Result<RemoteUser, ApiError>;

    /// List the principal's access keys (ids and status only).
    async fn list_access_keys(&self, user: &PrincipalName)
        -> Result<Vec<AccessKeyInfo>, ApiError>;

    /// Create a new access key. The secret half is returned exactly once.
    async fn create_access_key(&self, user: &PrincipalName) -> Result<CredentialPair, ApiError>;

    /// Find a customer-managed policy by name, with its default document.
    async fn find_policy(&self, name: &PolicyName) -> Result<Option<RemotePolicy>, ApiError>;

    /// Create a managed policy from `document`.
    async fn create_policy(&self, document: &PolicyDocument) -> Result<RemotePolicy, ApiError>;

    /// List the stored versions of a policy.
    async fn list_policy_versions(&self, arn: &str) -> Result<Vec<PolicyVersionInfo>, ApiError>;

    /// Delete a non-default policy version.
    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<(), ApiError>;

    /// Store `document` as a new version and make it the default.
    ///
    /// Returns the new version id.
    async fn create_policy_version(
        &self,
        arn: &str,
        document: &PolicyDocument,
    ) -> Result<String, ApiError>;

    /// ARNs of the managed policies attached to the principal.
    async fn list_attached_policies(&self, user: &PrincipalName) -> Result<Vec<String>, ApiError>;

    /// Attach a managed policy to the principal.
    async fn attach_policy(&self, user: &PrincipalName, arn: &str) -> Result<(), ApiError>;
}
