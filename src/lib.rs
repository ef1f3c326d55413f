//! keyrelay - Idempotent IAM credential provisioning and CI secret propagation
//!
//! keyrelay makes sure a named IAM user exists, mints a fresh access key
//! for it, binds a bucket-scoped managed policy, and publishes the key as
//! GitHub Actions repository secrets. Every step converges, so rerunning
//! after a failure is always safe.
//!
//! # Architecture
//!
//! The codebase follows a layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Stage components and the reconciliation state machine
//! - [`core`] - Domain types, errors, policy documents, config, state, locking
//! - [`account`] - Cloud account abstraction (AWS IAM, in-memory mock)
//! - [`secrets`] - Secret sink abstraction (GitHub Actions, in-memory mock)
//! - [`auth`] - Bearer token providers for the secret sink
//! - [`ui`] - User-facing output
//!
//! # Correctness Invariants
//!
//! 1. A principal is created at most once per run; existing ones are adopted
//! 2. No key is minted past the principal's key limit
//! 3. Policy comparison ignores statement and element order
//! 4. Secret values never appear in logs, errors, state, or reports

pub mod account;
pub mod auth;
pub mod cli;
pub mod core;
pub mod engine;
pub mod secrets;
pub mod ui;
