//! engine
//!
//! Drives provisioning: ensure the principal, mint a key, bind the policy,
//! publish the secrets.
//!
//! # Architecture
//!
//! Each stage has its own component over an adapter trait:
//!
//! - [`principal::PrincipalStore`]: create-or-adopt a principal
//! - [`minter::CredentialMinter`]: quota-checked key minting
//! - [`binder::PolicyBinder`]: converge and attach the managed policy
//! - [`publisher::SecretPublisher`]: write the secrets
//!
//! [`reconciler::Reconciler`] sequences them as a state machine, holding the
//! run lock and persisting state between stages. [`plan::plan`] runs the
//! same lookups read-only. All remote calls go through
//! [`retry::RetryPolicy`].
//!
//! # Invariants
//!
//! - Stages run strictly in order; no stage starts before the previous one
//!   completed
//! - The first failure ends the run with its stage and error kind
//! - Nothing is rolled back; every stage converges on a rerun

pub mod binder;
pub mod minter;
pub mod plan;
pub mod principal;
pub mod publisher;
pub mod reconciler;
pub mod retry;

pub use reconciler::{ReconcileError, ReconcileReport, ReconcileRequest, Reconciler, RunState, Stage};
pub use retry::RetryPolicy;

use std::path::PathBuf;

use crate::core::config::Overrides;
use crate::ui::output::Verbosity;

/// Execution context for commands.
///
/// Contains global settings derived from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Explicit config file.
    pub config: Option<PathBuf>,
    /// Flag values that override the config file.
    pub overrides: Overrides,
    /// Debug logging enabled.
    pub debug: bool,
    /// Quiet mode (minimal output).
    pub quiet: bool,
}

impl Context {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.debug)
    }
}
