//! core
//!
//! Domain types, schemas and local persistence for keyrelay.
//!
//! # Modules
//!
//! - [`types`] - Strong types: PrincipalName, BucketName, Namespace, etc.
//! - [`error`] - The adapter error taxonomy
//! - [`secret`] - Redacted credential material
//! - [`policy`] - Policy documents and their normalized comparison
//! - [`state`] - Local reconciliation state
//! - [`lock`] - Per-principal run lock
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing rejects invalid names before any remote call
//! - Schemas are strict and self-describing
//! - Nothing in this module performs network I/O

pub mod config;
pub mod error;
pub mod lock;
pub mod policy;
pub mod secret;
pub mod state;
pub mod types;
