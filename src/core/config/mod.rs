//! core::config
//!
//! Configuration loading and resolution.
//!
//! # Precedence
//!
//! Values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Config file
//! 3. CLI flags ([`Overrides`])
//!
//! # Locations
//!
//! The first file found wins:
//! 1. `--config <path>` (must exist)
//! 2. `$KEYRELAY_CONFIG` if set
//! 3. `./keyrelay.toml`
//! 4. `$XDG_CONFIG_HOME/keyrelay/config.toml`
//! 5. `~/.keyrelay/config.toml`
//!
//! No file at all is not an error; defaults apply.
//!
//! # Example
//!
//! ```no_run
//! use keyrelay::core::config::{Config, Overrides};
//!
//! let loaded = Config::load(None).unwrap();
//! let settings = loaded
//!     .config
//!     .resolve(&Overrides {
//!         principal: Some("svc-user".into()),
//!         bucket: Some("data-bucket".into()),
//!         namespace: Some("org/repo".into()),
//!         ..Default::default()
//!     })
//!     .unwrap();
//! println!("state dir: {}", settings.state_dir.display());
//! ```

pub mod schema;

pub use schema::{FileConfig, RotationPolicy};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::policy::PolicyDocument;
use super::types::{
    BucketName, Namespace, PolicyName, PrincipalName, SecretName, DEFAULT_ACCESS_ID_SECRET,
    DEFAULT_ACCESS_SECRET_SECRET,
};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "KEYRELAY_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "keyrelay.toml";

/// Default GitHub REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default environment variable holding the GitHub token.
pub const DEFAULT_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Default state directory, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".keyrelay";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("config file '{0}' does not exist")]
    NotFound(PathBuf),

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("missing required setting '{0}' (set it in the config file or pass --{1})")]
    Missing(&'static str, &'static str),
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// The warning message.
    pub message: String,
    /// The path that triggered the warning.
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Any warnings generated during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// A loaded config file (or defaults when none was found).
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Parsed file contents.
    pub file: FileConfig,
    /// Where the file was read from.
    path: Option<PathBuf>,
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub principal: Option<String>,
    pub bucket: Option<String>,
    pub namespace: Option<String>,
    pub state_dir: Option<PathBuf>,
}

/// Retry and timeout settings for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Fully resolved, validated settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub principal: PrincipalName,
    pub principal_path: String,
    pub policy_name: PolicyName,
    pub bucket: BucketName,
    pub include_introspection: bool,
    pub namespace: Namespace,
    pub access_id_name: SecretName,
    pub access_secret_name: SecretName,
    pub github_api_base: String,
    pub token_env: String,
    pub region: Option<String>,
    pub max_access_keys: u32,
    pub retry: RetrySettings,
    pub state_dir: PathBuf,
    pub rotation: RotationPolicy,
}

impl Config {
    /// Load configuration from `explicit` or the standard locations.
    ///
    /// # Errors
    ///
    /// Returns an error if `explicit` does not exist, or if a config file
    /// exists but cannot be read, parsed or validated.
    pub fn load(explicit: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let xdg_home = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);
        let cwd = std::env::current_dir().ok();
        Self::load_from(
            explicit,
            env_path.as_deref(),
            cwd.as_deref(),
            xdg_home.as_deref(),
            dirs::home_dir().as_deref(),
        )
    }

    /// Load with every search location passed in explicitly.
    pub fn load_from(
        explicit: Option<&Path>,
        env_path: Option<&Path>,
        cwd: Option<&Path>,
        xdg_home: Option<&Path>,
        home: Option<&Path>,
    ) -> Result<ConfigLoadResult, ConfigError> {
        let mut warnings = Vec::new();

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Self::from_file(path, warnings);
        }

        if let Some(path) = env_path {
            if path.exists() {
                return Self::from_file(path, warnings);
            }
            warnings.push(ConfigWarning {
                message: format!("${} points at a missing file, ignoring it", CONFIG_ENV),
                path: path.to_path_buf(),
            });
        }

        let candidates = [
            cwd.map(|dir| dir.join(LOCAL_CONFIG_FILE)),
            xdg_home.map(|dir| dir.join("keyrelay/config.toml")),
            home.map(|dir| dir.join(".keyrelay/config.toml")),
        ];

        for path in candidates.into_iter().flatten() {
            if path.exists() {
                return Self::from_file(&path, warnings);
            }
        }

        Ok(ConfigLoadResult {
            config: Config::default(),
            warnings,
        })
    }

    fn from_file(
        path: &Path,
        warnings: Vec<ConfigWarning>,
    ) -> Result<ConfigLoadResult, ConfigError> {
        let file = Self::read_config(path)?;
        file.validate()?;
        Ok(ConfigLoadResult {
            config: Config {
                file,
                path: Some(path.to_path_buf()),
            },
            warnings,
        })
    }

    /// Read and parse a config file.
    fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Path of the loaded file, if one was found.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Merge file values, CLI overrides and defaults into [`Settings`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Missing`] if principal, bucket or namespace is unset
    /// - [`ConfigError::InvalidValue`] if an override is not a valid name
    pub fn resolve(&self, overrides: &Overrides) -> Result<Settings, ConfigError> {
        let principal_section = self.file.principal.clone().unwrap_or_default();
        let policy_section = self.file.policy.clone().unwrap_or_default();
        let secrets_section = self.file.secrets.clone().unwrap_or_default();
        let account_section = self.file.account.clone().unwrap_or_default();
        let retry_section = self.file.retry.clone().unwrap_or_default();
        let state_section = self.file.state.clone().unwrap_or_default();

        let principal = self.resolve_principal(overrides)?;
        let bucket = self.resolve_bucket(overrides)?;

        let namespace = overrides
            .namespace
            .clone()
            .or(secrets_section.namespace)
            .ok_or(ConfigError::Missing("secrets.namespace", "namespace"))?;
        let namespace = Namespace::new(namespace).map_err(invalid)?;

        let policy_name = self.resolve_policy_name(&principal)?;

        let access_id_name = SecretName::new(
            secrets_section
                .access_id_name
                .unwrap_or_else(|| DEFAULT_ACCESS_ID_SECRET.to_string()),
        )
        .map_err(invalid)?;
        let access_secret_name = SecretName::new(
            secrets_section
                .access_secret_name
                .unwrap_or_else(|| DEFAULT_ACCESS_SECRET_SECRET.to_string()),
        )
        .map_err(invalid)?;
        if access_id_name == access_secret_name {
            return Err(ConfigError::InvalidValue(format!(
                "both credential halves would be published as '{}'",
                access_id_name
            )));
        }

        let defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_attempts: retry_section.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: retry_section
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            timeout: retry_section
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        };

        let state_dir = self.resolve_state_dir(overrides);

        Ok(Settings {
            principal,
            principal_path: principal_section.path.unwrap_or_else(|| "/".to_string()),
            policy_name,
            bucket,
            include_introspection: policy_section.include_introspection.unwrap_or(true),
            namespace,
            access_id_name,
            access_secret_name,
            github_api_base: secrets_section
                .api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            token_env: secrets_section
                .token_env
                .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string()),
            region: account_section.region,
            max_access_keys: account_section
                .max_access_keys
                .unwrap_or(schema::ACCOUNT_KEY_LIMIT),
            retry,
            state_dir,
            rotation: state_section.rotation.unwrap_or_default(),
        })
    }

    /// The principal name, from the flag or `[principal] name`.
    pub fn resolve_principal(&self, overrides: &Overrides) -> Result<PrincipalName, ConfigError> {
        let name = overrides
            .principal
            .clone()
            .or_else(|| self.file.principal.as_ref().and_then(|p| p.name.clone()))
            .ok_or(ConfigError::Missing("principal.name", "principal"))?;
        PrincipalName::new(name).map_err(invalid)
    }

    /// The bucket, from the flag or `[policy] bucket`.
    pub fn resolve_bucket(&self, overrides: &Overrides) -> Result<BucketName, ConfigError> {
        let bucket = overrides
            .bucket
            .clone()
            .or_else(|| self.file.policy.as_ref().and_then(|p| p.bucket.clone()))
            .ok_or(ConfigError::Missing("policy.bucket", "bucket"))?;
        BucketName::new(bucket).map_err(invalid)
    }

    /// The state directory, from the flag, `[state] dir`, or the default.
    pub fn resolve_state_dir(&self, overrides: &Overrides) -> PathBuf {
        overrides
            .state_dir
            .clone()
            .or_else(|| self.file.state.as_ref().and_then(|s| s.dir.clone()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
    }

    /// The policy document for the principal and bucket, without requiring
    /// the secret settings.
    pub fn resolve_policy(&self, overrides: &Overrides) -> Result<PolicyDocument, ConfigError> {
        let principal = self.resolve_principal(overrides)?;
        let bucket = self.resolve_bucket(overrides)?;
        let include_introspection = self
            .file
            .policy
            .as_ref()
            .and_then(|p| p.include_introspection)
            .unwrap_or(true);
        let principal_path = self
            .file
            .principal
            .as_ref()
            .and_then(|p| p.path.as_deref())
            .unwrap_or("/");
        Ok(PolicyDocument::for_bucket_at(
            self.resolve_policy_name(&principal)?,
            &principal,
            principal_path,
            &bucket,
            include_introspection,
        ))
    }

    fn resolve_policy_name(&self, principal: &PrincipalName) -> Result<PolicyName, ConfigError> {
        match self.file.policy.as_ref().and_then(|p| p.name.clone()) {
            Some(name) => PolicyName::new(name).map_err(invalid),
            None => Ok(PolicyName::default_for(principal)),
        }
    }
}

fn invalid(e: super::types::TypeError) -> ConfigError {
    ConfigError::InvalidValue(e.to_string())
}
