//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`PrincipalName`] - Validated IAM user name
//! - [`PolicyName`] - Validated IAM managed policy name
//! - [`BucketName`] - Validated object-storage bucket name
//! - [`Namespace`] - Secret store namespace (`owner/repo`)
//! - [`SecretName`] - Validated secret entry name
//!
//! # Validation
//!
//! These types enforce validity at construction time. A name that the
//! remote account would reject never reaches an adapter.
//!
//! # Examples
//!
//! ```
//! use keyrelay::core::types::{Namespace, PrincipalName, SecretName};
//!
//! let user = PrincipalName::new("svc-user").unwrap();
//! let ns = Namespace::new("org/repo").unwrap();
//! assert_eq!(ns.owner(), "org");
//! assert_eq!(ns.repo(), "repo");
//!
//! assert!(PrincipalName::new("has space").is_err());
//! assert!(SecretName::new("GITHUB_TOKEN").is_err());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid principal name: {0}")]
    InvalidPrincipalName(String),

    #[error("invalid policy name: {0}")]
    InvalidPolicyName(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("invalid secret name: {0}")]
    InvalidSecretName(String),
}

/// Shared trait impls for validated string newtypes.
macro_rules! validated_string {
    ($ty:ident) => {
        impl $ty {
            /// Get the value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $ty {
            type Error = TypeError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// Characters IAM accepts in user and policy names besides alphanumerics.
const IAM_NAME_PUNCTUATION: [char; 6] = ['+', '=', ',', '.', '@', '_'];

fn is_iam_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || IAM_NAME_PUNCTUATION.contains(&c)
}

/// A validated IAM user name.
///
/// 1 to 64 characters drawn from alphanumerics and `+=,.@_-`.
///
/// # Example
///
/// ```
/// use keyrelay::core::types::PrincipalName;
///
/// assert!(PrincipalName::new("svc-user").is_ok());
/// assert!(PrincipalName::new("").is_err());
/// assert!(PrincipalName::new("svc/user").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalName(String);

impl PrincipalName {
    /// Create a new validated principal name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidPrincipalName` if the name violates IAM naming rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidPrincipalName(
                "principal name cannot be empty".into(),
            ));
        }
        if name.len() > 64 {
            return Err(TypeError::InvalidPrincipalName(format!(
                "principal name '{}' is longer than 64 characters",
                name
            )));
        }
        if let Some(c) = name.chars().find(|c| !is_iam_name_char(*c)) {
            return Err(TypeError::InvalidPrincipalName(format!(
                "principal name cannot contain '{}'",
                c
            )));
        }
        Ok(Self(name))
    }
}

validated_string!(PrincipalName);

/// A validated IAM customer-managed policy name.
///
/// 1 to 128 characters drawn from alphanumerics and `+=,.@_-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PolicyName(String);

impl PolicyName {
    /// Create a new validated policy name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidPolicyName(
                "policy name cannot be empty".into(),
            ));
        }
        if name.len() > 128 {
            return Err(TypeError::InvalidPolicyName(format!(
                "policy name '{}' is longer than 128 characters",
                name
            )));
        }
        if let Some(c) = name.chars().find(|c| !is_iam_name_char(*c)) {
            return Err(TypeError::InvalidPolicyName(format!(
                "policy name cannot contain '{}'",
                c
            )));
        }
        Ok(Self(name))
    }

    /// Default policy name for a principal: `<principal>-data-access`.
    pub fn default_for(principal: &PrincipalName) -> Self {
        // 64 + 12 characters of valid input stays under the 128 limit.
        Self(format!("{}-data-access", principal.as_str()))
    }
}

validated_string!(PolicyName);

/// A validated S3 bucket name.
///
/// # Rules
///
/// - 3 to 63 characters
/// - Lowercase letters, digits, `.` and `-` only
/// - Must start and end with a letter or digit
/// - Cannot contain `..`
///
/// # Example
///
/// ```
/// use keyrelay::core::types::BucketName;
///
/// assert!(BucketName::new("data-bucket").is_ok());
/// assert!(BucketName::new("Data-Bucket").is_err());
/// assert!(BucketName::new("ab").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    /// Create a new validated bucket name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.len() < 3 || name.len() > 63 {
            return Err(TypeError::InvalidBucketName(format!(
                "bucket name '{}' must be 3 to 63 characters",
                name
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.' || *c == '-'))
        {
            return Err(TypeError::InvalidBucketName(format!(
                "bucket name cannot contain '{}'",
                c
            )));
        }
        let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
            return Err(TypeError::InvalidBucketName(
                "bucket name must start and end with a letter or digit".into(),
            ));
        }
        if name.contains("..") {
            return Err(TypeError::InvalidBucketName(
                "bucket name cannot contain '..'".into(),
            ));
        }
        Ok(Self(name))
    }

    /// ARN of the bucket itself (for bucket-level actions).
    pub fn arn(&self) -> String {
        format!("arn:aws:s3:::{}", self.0)
    }

    /// ARN matching every object in the bucket.
    pub fn objects_arn(&self) -> String {
        format!("arn:aws:s3:::{}/*", self.0)
    }
}

validated_string!(BucketName);

/// A secret store namespace in `owner/repo` form.
///
/// # Example
///
/// ```
/// use keyrelay::core::types::Namespace;
///
/// let ns = Namespace::new("org/repo").unwrap();
/// assert_eq!(ns.as_str(), "org/repo");
///
/// assert!(Namespace::new("org").is_err());
/// assert!(Namespace::new("org/repo/extra").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Create a new validated namespace.
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        let (owner, repo) = value.split_once('/').ok_or_else(|| {
            TypeError::InvalidNamespace(format!("'{}' is not in owner/repo form", value))
        })?;

        if owner.is_empty() || owner.len() > 39 {
            return Err(TypeError::InvalidNamespace(format!(
                "owner '{}' must be 1 to 39 characters",
                owner
            )));
        }
        if owner.starts_with('-') || !owner.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(TypeError::InvalidNamespace(format!(
                "owner '{}' may only contain alphanumerics and '-'",
                owner
            )));
        }

        if repo.is_empty() || repo.len() > 100 {
            return Err(TypeError::InvalidNamespace(format!(
                "repository '{}' must be 1 to 100 characters",
                repo
            )));
        }
        if repo == "." || repo == ".." {
            return Err(TypeError::InvalidNamespace(format!(
                "repository name '{}' is reserved",
                repo
            )));
        }
        if let Some(c) = repo
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(TypeError::InvalidNamespace(format!(
                "repository name cannot contain '{}'",
                c
            )));
        }

        Ok(Self(value))
    }

    /// The owner (user or organization) half.
    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(o, _)| o).unwrap_or_default()
    }

    /// The repository half.
    pub fn repo(&self) -> &str {
        self.0.split_once('/').map(|(_, r)| r).unwrap_or_default()
    }
}

validated_string!(Namespace);

/// A validated secret entry name.
///
/// Follows GitHub Actions rules: alphanumerics and `_` only, must not
/// start with a digit, must not start with the reserved `GITHUB_` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretName(String);

impl SecretName {
    /// Create a new validated secret name.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidSecretName(
                "secret name cannot be empty".into(),
            ));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(TypeError::InvalidSecretName(format!(
                "secret name cannot contain '{}'",
                c
            )));
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(TypeError::InvalidSecretName(
                "secret name cannot start with a digit".into(),
            ));
        }
        if name.to_ascii_uppercase().starts_with("GITHUB_") {
            return Err(TypeError::InvalidSecretName(
                "secret name cannot start with the reserved GITHUB_ prefix".into(),
            ));
        }
        Ok(Self(name))
    }
}

validated_string!(SecretName);

/// Default name of the published access id secret.
pub const DEFAULT_ACCESS_ID_SECRET: &str = "ACCESS_ID";

/// Default name of the published access secret.
pub const DEFAULT_ACCESS_SECRET_SECRET: &str = "ACCESS_SECRET";

#[cfg(test)]
mod tests {
    use super::*;

    mod principal_name {
        use super::*;

        #[test]
        fn accepts_iam_punctuation() {
            for name in ["svc-user", "svc_user", "svc.user", "svc+ci=1,a@b"] {
                assert!(PrincipalName::new(name).is_ok(), "{} should be valid", name);
            }
        }

        #[test]
        fn rejects_empty_and_long() {
            assert!(PrincipalName::new("").is_err());
            assert!(PrincipalName::new("a".repeat(64)).is_ok());
            assert!(PrincipalName::new("a".repeat(65)).is_err());
        }

        #[test]
        fn rejects_invalid_characters() {
            for name in ["svc user", "svc/user", "svc:user", "svc*"] {
                assert!(PrincipalName::new(name).is_err(), "{} should be invalid", name);
            }
        }

        #[test]
        fn serde_rejects_invalid() {
            let result: Result<PrincipalName, _> = serde_json::from_str("\"bad name\"");
            assert!(result.is_err());

            let ok: PrincipalName = serde_json::from_str("\"svc-user\"").unwrap();
            assert_eq!(ok.as_str(), "svc-user");
        }
    }

    mod policy_name {
        use super::*;

        #[test]
        fn default_for_principal() {
            let user = PrincipalName::new("svc-user").unwrap();
            assert_eq!(
                PolicyName::default_for(&user).as_str(),
                "svc-user-data-access"
            );
        }

        #[test]
        fn default_for_longest_principal_is_valid() {
            let user = PrincipalName::new("a".repeat(64)).unwrap();
            let policy = PolicyName::default_for(&user);
            assert!(PolicyName::new(policy.as_str()).is_ok());
        }
    }

    mod bucket_name {
        use super::*;

        #[test]
        fn valid_names() {
            for name in ["data-bucket", "abc", "my.bucket.1"] {
                assert!(BucketName::new(name).is_ok(), "{} should be valid", name);
            }
        }

        #[test]
        fn invalid_names() {
            for name in ["ab", "-bucket", "bucket-", "Bucket", "a..b", "under_score"] {
                assert!(BucketName::new(name).is_err(), "{} should be invalid", name);
            }
        }

        #[test]
        fn arns() {
            let bucket = BucketName::new("data-bucket").unwrap();
            assert_eq!(bucket.arn(), "arn:aws:s3:::data-bucket");
            assert_eq!(bucket.objects_arn(), "arn:aws:s3:::data-bucket/*");
        }
    }

    mod namespace {
        use super::*;

        #[test]
        fn splits_owner_and_repo() {
            let ns = Namespace::new("my-org/my.repo_1").unwrap();
            assert_eq!(ns.owner(), "my-org");
            assert_eq!(ns.repo(), "my.repo_1");
        }

        #[test]
        fn rejects_malformed() {
            for value in ["", "org", "/repo", "org/", "org/repo/x", "-org/repo", "org/.."] {
                assert!(Namespace::new(value).is_err(), "{} should be invalid", value);
            }
        }
    }

    mod secret_name {
        use super::*;

        #[test]
        fn defaults_are_valid() {
            assert!(SecretName::new(DEFAULT_ACCESS_ID_SECRET).is_ok());
            assert!(SecretName::new(DEFAULT_ACCESS_SECRET_SECRET).is_ok());
        }

        #[test]
        fn rejects_reserved_prefix() {
            assert!(SecretName::new("GITHUB_TOKEN").is_err());
            assert!(SecretName::new("github_token").is_err());
        }

        #[test]
        fn rejects_leading_digit_and_punctuation() {
            assert!(SecretName::new("1KEY").is_err());
            assert!(SecretName::new("ACCESS-ID").is_err());
            assert!(SecretName::new("").is_err());
        }
    }
}
