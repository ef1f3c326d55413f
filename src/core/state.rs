//! core::state
//!
//! Local reconciliation state.
//!
//! # Design
//!
//! The state file records which principals this tool manages and what it
//! has done to them. A principal that exists remotely but has no record
//! here is "present-unmanaged" and gets adopted; one with a record is
//! "present-managed" and left unchanged.
//!
//! # Storage
//!
//! - `<state dir>/state.json`
//! - Writes are atomic (write to temp file, then rename)
//!
//! # Security
//!
//! Only access key **ids** are recorded. The state types hold no
//! [`SecretValue`](super::secret::SecretValue) and cannot be made to.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Namespace, PrincipalName};

/// Current state file schema version.
pub const STATE_VERSION: u32 = 1;

/// Name of the state file inside the state directory.
pub const STATE_FILE: &str = "state.json";

/// Errors from state file operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse state file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to write state file '{path}': {message}")]
    Write { path: PathBuf, message: String },

    #[error("unsupported state file version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// How a principal came under management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalOrigin {
    /// This tool created it.
    Created,
    /// It already existed and was adopted.
    Adopted,
}

/// A minted access key (id only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintedKey {
    pub access_id: String,
    pub created_at: DateTime<Utc>,
}

/// The key id last published as a complete pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKey {
    pub access_id: String,
    pub namespace: Namespace,
    pub published_at: DateTime<Utc>,
}

/// The policy last bound to the principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub arn: String,
    pub fingerprint: String,
    pub bound_at: DateTime<Utc>,
}

/// Summary of the most recent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub finished_at: DateTime<Utc>,
    /// `done` or `failed:<stage>:<kind>`.
    pub outcome: String,
}

/// Everything recorded about one managed principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub origin: PrincipalOrigin,
    pub managed_since: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default)]
    pub minted_keys: Vec<MintedKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_published: Option<PublishedKey>,
    /// Keys minted but never published as a complete pair.
    #[serde(default)]
    pub orphaned_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunRecord>,
}

impl PrincipalRecord {
    /// A fresh record for a principal entering management now.
    pub fn new(origin: PrincipalOrigin, arn: Option<String>) -> Self {
        Self {
            origin,
            managed_since: Utc::now(),
            arn,
            minted_keys: Vec::new(),
            last_published: None,
            orphaned_keys: Vec::new(),
            policy: None,
            last_run: None,
        }
    }

    /// Forget minted and orphaned key ids that are not in `existing`.
    /// Returns how many entries were dropped.
    pub fn forget_deleted_keys(&mut self, existing: &[&str]) -> usize {
        let before = self.minted_keys.len() + self.orphaned_keys.len();
        self.minted_keys.retain(|k| existing.contains(&k.access_id.as_str()));
        self.orphaned_keys.retain(|id| existing.contains(&id.as_str()));
        before - self.minted_keys.len() - self.orphaned_keys.len()
    }
}

/// The whole state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileState {
    pub version: u32,
    #[serde(default)]
    pub principals: BTreeMap<PrincipalName, PrincipalRecord>,
}

impl Default for ReconcileState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            principals: BTreeMap::new(),
        }
    }
}

impl ReconcileState {
    /// Whether the principal is tracked (present-managed).
    pub fn is_tracked(&self, name: &PrincipalName) -> bool {
        self.principals.contains_key(name)
    }

    /// The record for a principal, if tracked.
    pub fn record(&self, name: &PrincipalName) -> Option<&PrincipalRecord> {
        self.principals.get(name)
    }

    /// Mutable record for a principal, if tracked.
    pub fn record_mut(&mut self, name: &PrincipalName) -> Option<&mut PrincipalRecord> {
        self.principals.get_mut(name)
    }

    /// Start tracking a principal. An existing record is kept as-is.
    pub fn track(
        &mut self,
        name: &PrincipalName,
        origin: PrincipalOrigin,
        arn: Option<String>,
    ) -> &mut PrincipalRecord {
        self.principals
            .entry(name.clone())
            .or_insert_with(|| PrincipalRecord::new(origin, arn))
    }
}

/// Reads and writes the state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// A store rooted at `dir`. Nothing is created until the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The state directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the state file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Load the state, or an empty state if no file exists yet.
    pub fn load(&self) -> Result<ReconcileState, StateError> {
        let path = self.path();
        if !path.exists() {
            return Ok(ReconcileState::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| StateError::Read {
            path: path.clone(),
            source: e,
        })?;

        let state: ReconcileState =
            serde_json::from_str(&content).map_err(|e| StateError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if state.version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: state.version,
                expected: STATE_VERSION,
            });
        }

        Ok(state)
    }

    /// Persist the state atomically.
    pub fn save(&self, state: &ReconcileState) -> Result<(), StateError> {
        let path = self.path();
        let write_err = |message: String| StateError::Write {
            path: path.clone(),
            message,
        };

        fs::create_dir_all(&self.dir)
            .map_err(|e| write_err(format!("cannot create directory: {}", e)))?;

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| write_err(format!("cannot serialize state: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| write_err(format!("cannot create temp file: {}", e)))?;

            file.write_all(content.as_bytes())
                .map_err(|e| write_err(format!("cannot write state: {}", e)))?;

            file.sync_all()
                .map_err(|e| write_err(format!("cannot sync to disk: {}", e)))?;
        }

        fs::rename(&temp_path, &path)
            .map_err(|e| write_err(format!("cannot rename temp file: {}", e)))?;

        Ok(())
    }
}
