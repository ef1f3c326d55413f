//! core::config::schema
//!
//! Configuration file schema.
//!
//! # Example
//!
//! ```toml
//! [principal]
//! name = "svc-user"
//! path = "/automation/"
//!
//! [policy]
//! bucket = "data-bucket"
//! include_introspection = true
//!
//! [secrets]
//! namespace = "org/repo"
//! access_id_name = "ACCESS_ID"
//! access_secret_name = "ACCESS_SECRET"
//!
//! [account]
//! region = "us-east-1"
//! max_access_keys = 2
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 200
//! timeout_secs = 30
//!
//! [state]
//! dir = ".keyrelay"
//! rotation = "always"
//! ```
//!
//! # Validation
//!
//! Every section is optional and every field within it is optional. Values
//! are validated after parsing so a bad name is reported against the file
//! it came from rather than at first use.

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::{BucketName, Namespace, PolicyName, PrincipalName, SecretName};

/// Upper bound accepted for `max_access_keys`; IAM never allows more than two.
pub const ACCOUNT_KEY_LIMIT: u32 = 2;

/// When a run mints and publishes a new credential pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationPolicy {
    /// Every run rotates.
    #[default]
    Always,
    /// Skip minting while the last published key is still active.
    IfUnpublished,
}

impl std::fmt::Display for RotationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationPolicy::Always => f.write_str("always"),
            RotationPolicy::IfUnpublished => f.write_str("if-unpublished"),
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub principal: Option<PrincipalSection>,
    pub policy: Option<PolicySection>,
    pub secrets: Option<SecretsSection>,
    pub account: Option<AccountSection>,
    pub retry: Option<RetrySection>,
    pub state: Option<StateSection>,
}

impl FileConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(principal) = &self.principal {
            principal.validate()?;
        }
        if let Some(policy) = &self.policy {
            policy.validate()?;
        }
        if let Some(secrets) = &self.secrets {
            secrets.validate()?;
        }
        if let Some(account) = &self.account {
            account.validate()?;
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }
}

/// `[principal]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PrincipalSection {
    /// IAM user name.
    pub name: Option<String>,

    /// IAM path the user is created under (default `/`).
    pub path: Option<String>,
}

impl PrincipalSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.name {
            PrincipalName::new(name.as_str())
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        }
        if let Some(path) = &self.path {
            validate_iam_path(path)?;
        }
        Ok(())
    }
}

/// IAM paths start and end with `/` and contain printable ASCII.
pub fn validate_iam_path(path: &str) -> Result<(), ConfigError> {
    let well_formed = path.starts_with('/')
        && path.ends_with('/')
        && path.len() <= 512
        && path.chars().all(|c| c.is_ascii_graphic());
    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(format!(
            "invalid principal path '{}': must start and end with '/'",
            path
        )))
    }
}

/// `[policy]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySection {
    /// Managed policy name (default `<principal>-data-access`).
    pub name: Option<String>,

    /// The one bucket the principal may use.
    pub bucket: Option<String>,

    /// Grant read-only introspection of the principal's own user and policy.
    pub include_introspection: Option<bool>,
}

impl PolicySection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.name {
            PolicyName::new(name.as_str()).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        }
        if let Some(bucket) = &self.bucket {
            BucketName::new(bucket.as_str())
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        }
        Ok(())
    }
}

/// `[secrets]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsSection {
    /// Target repository (`owner/repo`).
    pub namespace: Option<String>,

    /// Secret holding the access key id (default `ACCESS_ID`).
    pub access_id_name: Option<String>,

    /// Secret holding the secret access key (default `ACCESS_SECRET`).
    pub access_secret_name: Option<String>,

    /// GitHub REST API base URL.
    pub api_base: Option<String>,

    /// Environment variable holding the GitHub token (default `GITHUB_TOKEN`).
    pub token_env: Option<String>,
}

impl SecretsSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(namespace) = &self.namespace {
            Namespace::new(namespace.as_str())
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        }
        for name in [&self.access_id_name, &self.access_secret_name]
            .into_iter()
            .flatten()
        {
            SecretName::new(name.as_str()).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        }
        if let (Some(id), Some(secret)) = (&self.access_id_name, &self.access_secret_name) {
            if id == secret {
                return Err(ConfigError::InvalidValue(format!(
                    "access_id_name and access_secret_name are both '{}'",
                    id
                )));
            }
        }
        if let Some(base) = &self.api_base {
            if !(base.starts_with("https://") || base.starts_with("http://")) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid api_base '{}': must be an http(s) URL",
                    base
                )));
            }
        }
        if let Some(var) = &self.token_env {
            if var.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "token_env cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// `[account]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AccountSection {
    /// AWS region override; the SDK's default chain applies otherwise.
    pub region: Option<String>,

    /// Live access keys allowed per principal (default and maximum 2).
    pub max_access_keys: Option<u32>,
}

impl AccountSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(max) = self.max_access_keys {
            if max == 0 || max > ACCOUNT_KEY_LIMIT {
                return Err(ConfigError::InvalidValue(format!(
                    "max_access_keys must be between 1 and {}, got {}",
                    ACCOUNT_KEY_LIMIT, max
                )));
            }
        }
        if let Some(region) = &self.region {
            if region.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "region cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// `[retry]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    /// Attempts per remote call, including the first (default 3).
    pub max_attempts: Option<u32>,

    /// Delay before the first retry; doubles each attempt (default 200).
    pub base_delay_ms: Option<u64>,

    /// Per-attempt timeout (default 30).
    pub timeout_secs: Option<u64>,
}

impl RetrySection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[state]`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StateSection {
    /// Directory holding `state.json` and run locks (default `.keyrelay`).
    pub dir: Option<std::path::PathBuf>,

    /// Rotation policy (default `always`).
    pub rotation: Option<RotationPolicy>,
}
