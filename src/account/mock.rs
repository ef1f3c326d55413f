//! account::mock
//!
//! In-memory account for deterministic testing.
//!
//! # Design
//!
//! The mock keeps users, access keys and versioned policies in memory and
//! enforces the same limits as the real account: two access keys per
//! principal and five versions per policy. Every call is recorded so tests
//! can assert exactly which remote operations a run performed.
//!
//! # Example
//!
//! ```
//! use keyrelay::account::mock::{FailOn, MockAccount, MockOperation};
//! use keyrelay::account::AccountApi;
//! use keyrelay::core::error::ApiError;
//! use keyrelay::core::types::PrincipalName;
//!
//! # tokio_test::block_on(async {
//! let user = PrincipalName::new("svc-user").unwrap();
//! let account = MockAccount::new()
//!     .with_user(&user)
//!     .fail_on(FailOn::CreateAccessKey(ApiError::Transient("timeout".into())));
//!
//! assert!(account.create_access_key(&user).await.is_err());
//! assert_eq!(account.access_key_count(&user), 0);
//! assert!(matches!(
//!     account.operations().last(),
//!     Some(MockOperation::CreateAccessKey { .. })
//! ));
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::traits::{AccessKeyInfo, AccountApi, PolicyVersionInfo, RemotePolicy, RemoteUser};
use crate::core::error::ApiError;
use crate::core::policy::PolicyDocument;
use crate::core::secret::{CredentialPair, SecretValue};
use crate::core::types::{PolicyName, PrincipalName};

/// Account id used in every ARN the mock hands out.
pub const MOCK_ACCOUNT_ID: &str = "123456789012";

/// Access keys allowed per principal.
pub const MOCK_KEY_LIMIT: usize = 2;

/// Versions allowed per managed policy.
pub const MOCK_POLICY_VERSION_LIMIT: usize = 5;

/// Mock account for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping.
#[derive(Debug, Clone)]
pub struct MockAccount {
    /// Internal state shared across clones.
    inner: Arc<Mutex<MockAccountInner>>,
}

#[derive(Debug)]
struct MockUser {
    arn: String,
    keys: Vec<AccessKeyInfo>,
    attached: Vec<String>,
}

#[derive(Debug)]
struct MockPolicyVersion {
    id: String,
    document: PolicyDocument,
    is_default: bool,
    created_seq: u64,
}

#[derive(Debug)]
struct MockPolicy {
    name: PolicyName,
    versions: Vec<MockPolicyVersion>,
    next_version: u32,
}

/// Internal mutable state.
#[derive(Debug)]
struct MockAccountInner {
    users: BTreeMap<PrincipalName, MockUser>,
    /// Policies keyed by ARN.
    policies: BTreeMap<String, MockPolicy>,
    /// Counter behind key ids, secrets and version timestamps.
    sequence: u64,
    max_keys: usize,
    /// Failures to inject, with an optional remaining count.
    failures: Vec<(FailOn, Option<u32>)>,
    /// Simulate another actor creating the user just before our create.
    race_on_create_user: bool,
    /// Recorded operations for verification.
    operations: Vec<MockOperation>,
}

/// Configuration for which operation should fail.
#[derive(Debug, Clone)]
pub enum FailOn {
    GetUser(ApiError),
    CreateUser(ApiError),
    ListAccessKeys(ApiError),
    CreateAccessKey(ApiError),
    FindPolicy(ApiError),
    CreatePolicy(ApiError),
    ListPolicyVersions(ApiError),
    DeletePolicyVersion(ApiError),
    CreatePolicyVersion(ApiError),
    ListAttachedPolicies(ApiError),
    AttachPolicy(ApiError),
}

impl FailOn {
    fn operation(&self) -> &'static str {
        match self {
            FailOn::GetUser(_) => "get_user",
            FailOn::CreateUser(_) => "create_user",
            FailOn::ListAccessKeys(_) => "list_access_keys",
            FailOn::CreateAccessKey(_) => "create_access_key",
            FailOn::FindPolicy(_) => "find_policy",
            FailOn::CreatePolicy(_) => "create_policy",
            FailOn::ListPolicyVersions(_) => "list_policy_versions",
            FailOn::DeletePolicyVersion(_) => "delete_policy_version",
            FailOn::CreatePolicyVersion(_) => "create_policy_version",
            FailOn::ListAttachedPolicies(_) => "list_attached_policies",
            FailOn::AttachPolicy(_) => "attach_policy",
        }
    }

    fn error(&self) -> ApiError {
        match self {
            FailOn::GetUser(e)
            | FailOn::CreateUser(e)
            | FailOn::ListAccessKeys(e)
            | FailOn::CreateAccessKey(e)
            | FailOn::FindPolicy(e)
            | FailOn::CreatePolicy(e)
            | FailOn::ListPolicyVersions(e)
            | FailOn::DeletePolicyVersion(e)
            | FailOn::CreatePolicyVersion(e)
            | FailOn::ListAttachedPolicies(e)
            | FailOn::AttachPolicy(e) => e.clone(),
        }
    }
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    GetUser { name: String },
    CreateUser { name: String, path: String },
    ListAccessKeys { user: String },
    CreateAccessKey { user: String },
    FindPolicy { name: String },
    CreatePolicy { name: String },
    ListPolicyVersions { arn: String },
    DeletePolicyVersion { arn: String, version_id: String },
    CreatePolicyVersion { arn: String },
    ListAttachedPolicies { user: String },
    AttachPolicy { user: String, arn: String },
}

impl MockOperation {
    /// Whether the operation changes remote state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            MockOperation::CreateUser { .. }
                | MockOperation::CreateAccessKey { .. }
                | MockOperation::CreatePolicy { .. }
                | MockOperation::DeletePolicyVersion { .. }
                | MockOperation::CreatePolicyVersion { .. }
                | MockOperation::AttachPolicy { .. }
        )
    }
}

impl MockAccount {
    /// Create a new empty mock account.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockAccountInner {
                users: BTreeMap::new(),
                policies: BTreeMap::new(),
                sequence: 0,
                max_keys: MOCK_KEY_LIMIT,
                failures: Vec::new(),
                race_on_create_user: false,
                operations: Vec::new(),
            })),
        }
    }

    /// Seed a pre-existing principal.
    pub fn with_user(self, name: &PrincipalName) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let arn = user_arn("/", name);
            inner.users.entry(name.clone()).or_insert(MockUser {
                arn,
                keys: Vec::new(),
                attached: Vec::new(),
            });
        }
        self
    }

    /// Seed `count` pre-existing active access keys on a principal.
    ///
    /// Creates the principal if needed. Bypasses the key limit.
    pub fn with_access_keys(self, name: &PrincipalName, count: usize) -> Self {
        let account = self.with_user(name);
        {
            let mut inner = account.inner.lock().unwrap();
            for _ in 0..count {
                let seq = inner.next_sequence();
                let key = AccessKeyInfo {
                    access_id: access_id(seq),
                    active: true,
                    created_at: Some(timestamp(seq)),
                };
                if let Some(user) = inner.users.get_mut(name) {
                    user.keys.push(key);
                }
            }
        }
        account
    }

    /// Seed a pre-existing managed policy, optionally attached to `user`.
    pub fn with_policy(self, document: &PolicyDocument, attached_to: Option<&PrincipalName>) -> Self {
        let account = match attached_to {
            Some(user) => self.with_user(user),
            None => self,
        };
        {
            let mut inner = account.inner.lock().unwrap();
            let arn = policy_arn(document.name());
            let seq = inner.next_sequence();
            inner.policies.insert(
                arn.clone(),
                MockPolicy {
                    name: document.name().clone(),
                    versions: vec![MockPolicyVersion {
                        id: "v1".to_string(),
                        document: document.clone(),
                        is_default: true,
                        created_seq: seq,
                    }],
                    next_version: 2,
                },
            );
            if let Some(user) = attached_to.and_then(|u| inner.users.get_mut(u)) {
                user.attached.push(arn);
            }
        }
        account
    }

    /// Override the per-principal key limit.
    pub fn with_max_keys(self, max: usize) -> Self {
        self.inner.lock().unwrap().max_keys = max;
        self
    }

    /// Configure the mock to fail on a specific operation, every time.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.inner.lock().unwrap().failures.push((fail_on, None));
        self
    }

    /// Configure the mock to fail on a specific operation `times` times,
    /// then succeed.
    pub fn fail_times(self, fail_on: FailOn, times: u32) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failures
            .push((fail_on, Some(times)));
        self
    }

    /// Make `create_user` behave as if another actor created the user
    /// between our lookup and our create: the user appears, and the call
    /// returns `Conflict`.
    pub fn race_on_create_user(self) -> Self {
        self.inner.lock().unwrap().race_on_create_user = true;
        self
    }

    /// Clear the failure configuration.
    pub fn clear_fail_on(&self) {
        self.inner.lock().unwrap().failures.clear();
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Only the recorded operations that changed remote state.
    pub fn mutations(&self) -> Vec<MockOperation> {
        self.operations()
            .into_iter()
            .filter(MockOperation::is_mutating)
            .collect()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        self.inner.lock().unwrap().operations.clear();
    }

    /// Whether the principal exists (for test verification).
    pub fn user_exists(&self, name: &PrincipalName) -> bool {
        self.inner.lock().unwrap().users.contains_key(name)
    }

    /// Number of access keys on the principal (for test verification).
    pub fn access_key_count(&self, name: &PrincipalName) -> usize {
        self.inner
            .lock()
            .unwrap()
            .users
            .get(name)
            .map_or(0, |u| u.keys.len())
    }

    /// Ids of the principal's access keys (for test verification).
    pub fn access_key_ids(&self, name: &PrincipalName) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .users
            .get(name)
            .map(|u| u.keys.iter().map(|k| k.access_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Revoke an access key out of band (for test setup).
    pub fn revoke_access_key(&self, name: &PrincipalName, access_id: &str) {
        if let Some(user) = self.inner.lock().unwrap().users.get_mut(name) {
            user.keys.retain(|k| k.access_id != access_id);
        }
    }

    /// Deactivate an access key out of band (for test setup).
    pub fn deactivate_access_key(&self, name: &PrincipalName, access_id: &str) {
        if let Some(user) = self.inner.lock().unwrap().users.get_mut(name) {
            for key in user.keys.iter_mut().filter(|k| k.access_id == access_id) {
                key.active = false;
            }
        }
    }

    /// Policy ARNs attached to the principal (for test verification).
    pub fn attached_policies(&self, name: &PrincipalName) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .users
            .get(name)
            .map(|u| u.attached.clone())
            .unwrap_or_default()
    }

    /// The default document of a policy (for test verification).
    pub fn policy_document(&self, name: &PolicyName) -> Option<PolicyDocument> {
        let inner = self.inner.lock().unwrap();
        inner
            .policies
            .get(&policy_arn(name))
            .and_then(|p| p.versions.iter().find(|v| v.is_default))
            .map(|v| v.document.clone())
    }

    /// Number of stored versions of a policy (for test verification).
    pub fn policy_version_count(&self, name: &PolicyName) -> usize {
        self.inner
            .lock()
            .unwrap()
            .policies
            .get(&policy_arn(name))
            .map_or(0, |p| p.versions.len())
    }

    /// Record an operation.
    fn record(&self, op: MockOperation) {
        self.inner.lock().unwrap().operations.push(op);
    }

    /// Check if we should fail and return the error if so.
    fn check_fail(&self, expected: &str) -> Option<ApiError> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner
            .failures
            .iter()
            .position(|(f, remaining)| f.operation() == expected && remaining != &Some(0))?;
        let (fail_on, remaining) = &mut inner.failures[index];
        if let Some(n) = remaining {
            *n -= 1;
        }
        Some(fail_on.error())
    }
}

impl Default for MockAccount {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAccountInner {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn remote_policy(&self, arn: &str) -> Option<RemotePolicy> {
        let policy = self.policies.get(arn)?;
        let default = policy.versions.iter().find(|v| v.is_default)?;
        Some(RemotePolicy {
            name: policy.name.clone(),
            arn: arn.to_string(),
            default_version: default.id.clone(),
            document: default.document.clone(),
        })
    }
}

fn user_arn(path: &str, name: &PrincipalName) -> String {
    format!("arn:aws:iam::{}:user{}{}", MOCK_ACCOUNT_ID, path, name)
}

fn policy_arn(name: &PolicyName) -> String {
    format!("arn:aws:iam::{}:policy/{}", MOCK_ACCOUNT_ID, name)
}

/// Deterministic 20-character key id.
fn access_id(seq: u64) -> String {
    format!("AKIAMOCK{:012}", seq)
}

/// Deterministic 40-character secret.
fn access_secret(seq: u64) -> SecretValue {
    SecretValue::new(format!("mockSecret/{:029}", seq))
}

/// Strictly increasing timestamps so "oldest" is well defined.
fn timestamp(seq: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + seq as i64, 0).unwrap_or_default()
}

#[async_trait]
impl AccountApi for MockAccount {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_user(&self, name: &PrincipalName) -> Result<Option<RemoteUser>, ApiError> {
        self.record(MockOperation::GetUser {
            name: name.to_string(),
        });
        if let Some(err) = self.check_fail("get_user") {
            return Err(err);
        }

        let inner = self.inner.lock().unwrap();
        Ok(inner.users.get(name).map(|u| RemoteUser {
            name: name.clone(),
            arn: u.arn.clone(),
            created_at: None,
        }))
    }

    async fn create_user(
        &self,
        name: &PrincipalName,
        path: &str,
    ) -> Result<RemoteUser, ApiError> {
        self.record(MockOperation::CreateUser {
            name: name.to_string(),
            path: path.to_string(),
        });
        if let Some(err) = self.check_fail("create_user") {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.race_on_create_user {
            inner.race_on_create_user = false;
            inner.users.entry(name.clone()).or_insert(MockUser {
                arn: user_arn(path, name),
                keys: Vec::new(),
                attached: Vec::new(),
            });
        }
        if inner.users.contains_key(name) {
            return Err(ApiError::Conflict(format!("user '{}' already exists", name)));
        }

        let seq = inner.next_sequence();
        let arn = user_arn(path, name);
        inner.users.insert(
            name.clone(),
            MockUser {
                arn: arn.clone(),
                keys: Vec::new(),
                attached: Vec::new(),
            },
        );
        Ok(RemoteUser {
            name: name.clone(),
            arn,
            created_at: Some(timestamp(seq)),
        })
    }

    async fn list_access_keys(
        &self,
        user: &PrincipalName,
    ) -> Result<Vec<AccessKeyInfo>, ApiError> {
        self.record(MockOperation::ListAccessKeys {
            user: user.to_string(),
        });
        if let Some(err) = self.check_fail("list_access_keys") {
            return Err(err);
        }

        let inner = self.inner.lock().unwrap();
        inner
            .users
            .get(user)
            .map(|u| u.keys.clone())
            .ok_or_else(|| ApiError::NotFound(format!("user '{}'", user)))
    }

    async fn create_access_key(&self, user: &PrincipalName) -> Result<CredentialPair, ApiError> {
        self.record(MockOperation::CreateAccessKey {
            user: user.to_string(),
        });
        if let Some(err) = self.check_fail("create_access_key") {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        let max_keys = inner.max_keys;
        let key_count = inner
            .users
            .get(user)
            .ok_or_else(|| ApiError::NotFound(format!("user '{}'", user)))?
            .keys
            .len();
        if key_count >= max_keys {
            return Err(ApiError::QuotaExceeded(format!(
                "user '{}' already has {} access keys",
                user, key_count
            )));
        }

        let seq = inner.next_sequence();
        let created_at = timestamp(seq);
        let info = AccessKeyInfo {
            access_id: access_id(seq),
            active: true,
            created_at: Some(created_at),
        };
        if let Some(u) = inner.users.get_mut(user) {
            u.keys.push(info.clone());
        }

        Ok(CredentialPair {
            access_id: info.access_id,
            access_secret: access_secret(seq),
            principal: user.clone(),
            created_at,
        })
    }

    async fn find_policy(&self, name: &PolicyName) -> Result<Option<RemotePolicy>, ApiError> {
        self.record(MockOperation::FindPolicy {
            name: name.to_string(),
        });
        if let Some(err) = self.check_fail("find_policy") {
            return Err(err);
        }

        let inner = self.inner.lock().unwrap();
        Ok(inner.remote_policy(&policy_arn(name)))
    }

    async fn create_policy(&self, document: &PolicyDocument) -> Result<RemotePolicy, ApiError> {
        self.record(MockOperation::CreatePolicy {
            name: document.name().to_string(),
        });
        if let Some(err) = self.check_fail("create_policy") {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        let arn = policy_arn(document.name());
        if inner.policies.contains_key(&arn) {
            return Err(ApiError::Conflict(format!(
                "policy '{}' already exists",
                document.name()
            )));
        }

        let seq = inner.next_sequence();
        inner.policies.insert(
            arn.clone(),
            MockPolicy {
                name: document.name().clone(),
                versions: vec![MockPolicyVersion {
                    id: "v1".to_string(),
                    document: document.clone(),
                    is_default: true,
                    created_seq: seq,
                }],
                next_version: 2,
            },
        );
        inner
            .remote_policy(&arn)
            .ok_or_else(|| ApiError::Malformed(format!("policy '{}' vanished", arn)))
    }

    async fn list_policy_versions(&self, arn: &str) -> Result<Vec<PolicyVersionInfo>, ApiError> {
        self.record(MockOperation::ListPolicyVersions {
            arn: arn.to_string(),
        });
        if let Some(err) = self.check_fail("list_policy_versions") {
            return Err(err);
        }

        let inner = self.inner.lock().unwrap();
        let policy = inner
            .policies
            .get(arn)
            .ok_or_else(|| ApiError::NotFound(format!("policy '{}'", arn)))?;
        Ok(policy
            .versions
            .iter()
            .map(|v| PolicyVersionInfo {
                version_id: v.id.clone(),
                is_default: v.is_default,
                created_at: Some(timestamp(v.created_seq)),
            })
            .collect())
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<(), ApiError> {
        self.record(MockOperation::DeletePolicyVersion {
            arn: arn.to_string(),
            version_id: version_id.to_string(),
        });
        if let Some(err) = self.check_fail("delete_policy_version") {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        let policy = inner
            .policies
            .get_mut(arn)
            .ok_or_else(|| ApiError::NotFound(format!("policy '{}'", arn)))?;
        let index = policy
            .versions
            .iter()
            .position(|v| v.id == version_id)
            .ok_or_else(|| ApiError::NotFound(format!("version '{}' of '{}'", version_id, arn)))?;
        if policy.versions[index].is_default {
            return Err(ApiError::Conflict(format!(
                "cannot delete default version '{}'",
                version_id
            )));
        }
        policy.versions.remove(index);
        Ok(())
    }

    async fn create_policy_version(
        &self,
        arn: &str,
        document: &PolicyDocument,
    ) -> Result<String, ApiError> {
        self.record(MockOperation::CreatePolicyVersion {
            arn: arn.to_string(),
        });
        if let Some(err) = self.check_fail("create_policy_version") {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_sequence();
        let policy = inner
            .policies
            .get_mut(arn)
            .ok_or_else(|| ApiError::NotFound(format!("policy '{}'", arn)))?;
        if policy.versions.len() >= MOCK_POLICY_VERSION_LIMIT {
            return Err(ApiError::QuotaExceeded(format!(
                "policy '{}' already has {} versions",
                arn, MOCK_POLICY_VERSION_LIMIT
            )));
        }

        let id = format!("v{}", policy.next_version);
        policy.next_version += 1;
        for version in &mut policy.versions {
            version.is_default = false;
        }
        policy.versions.push(MockPolicyVersion {
            id: id.clone(),
            document: document.clone(),
            is_default: true,
            created_seq: seq,
        });
        Ok(id)
    }

    async fn list_attached_policies(&self, user: &PrincipalName) -> Result<Vec<String>, ApiError> {
        self.record(MockOperation::ListAttachedPolicies {
            user: user.to_string(),
        });
        if let Some(err) = self.check_fail("list_attached_policies") {
            return Err(err);
        }

        let inner = self.inner.lock().unwrap();
        inner
            .users
            .get(user)
            .map(|u| u.attached.clone())
            .ok_or_else(|| ApiError::NotFound(format!("user '{}'", user)))
    }

    async fn attach_policy(&self, user: &PrincipalName, arn: &str) -> Result<(), ApiError> {
        self.record(MockOperation::AttachPolicy {
            user: user.to_string(),
            arn: arn.to_string(),
        });
        if let Some(err) = self.check_fail("attach_policy") {
            return Err(err);
        }

        let mut inner = self.inner.lock().unwrap();
        if !inner.policies.contains_key(arn) {
            return Err(ApiError::NotFound(format!("policy '{}'", arn)));
        }
        let u = inner
            .users
            .get_mut(user)
            .ok_or_else(|| ApiError::NotFound(format!("user '{}'", user)))?;
        if !u.attached.iter().any(|a| a == arn) {
            u.attached.push(arn.to_string());
        }
        Ok(())
    }
}
