//! ui
//!
//! User-facing output.
//!
//! # Design
//!
//! All human output goes through [`output`] so quiet mode and `--json` are
//! honored in one place. Diagnostics go through `tracing` instead.

pub mod output;
