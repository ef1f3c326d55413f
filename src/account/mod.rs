//! account
//!
//! Abstraction over the cloud account that owns principals, access keys
//! and managed policies.
//!
//! # Architecture
//!
//! The [`AccountApi`] trait is the only way the engine touches the account.
//! Adapters classify provider failures into
//! [`ApiError`](crate::core::error::ApiError) at this boundary.
//!
//! # Modules
//!
//! - `traits`: Core `AccountApi` trait and response types
//! - [`aws`]: AWS IAM implementation
//! - [`mock`]: In-memory implementation for deterministic testing

pub mod aws;
pub mod mock;
mod traits;

pub use traits::*;
