//! secrets
//!
//! Write-only publication of credential material into an external secret
//! store.
//!
//! # Architecture
//!
//! Secrets are written through the [`SecretSink`] trait:
//!
//! - [`github::GitHubSecretSink`]: GitHub Actions repository secrets
//! - [`mock::MockSecretSink`]: In-memory sink for deterministic testing
//!
//! # Security
//!
//! All sinks follow these rules:
//!
//! - Secret values are **never** logged or included in error messages
//! - Values are encrypted before leaving the process
//! - Nothing is ever read back

pub mod github;
pub mod mock;
mod traits;

pub use traits::{SecretSink, UpsertOutcome};
