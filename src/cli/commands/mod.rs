//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Resolves configuration from the config file and global flags
//! 2. Builds the adapters it needs and calls the engine
//! 3. Formats and displays output
//!
//! # Async Commands
//!
//! Commands that talk to the account or the secret store are async. Their
//! handlers create a `tokio::runtime::Runtime` and `block_on` the async
//! implementation.

mod completion;
mod plan;
mod policy;
mod reconcile;
mod state;

pub use completion::completion;
pub use plan::plan;
pub use policy::policy;
pub use reconcile::reconcile;
pub use state::state;

use anyhow::{Context as _, Result};

use crate::cli::args::Command;
use crate::core::config::{Config, Settings};
use crate::engine::Context;
use crate::ui::output;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Reconcile { json } => reconcile::reconcile(ctx, json),
        Command::Plan { json } => plan::plan(ctx, json),
        Command::Policy => policy::policy(ctx),
        Command::State { all } => state::state(ctx, all),
        Command::Completion { shell } => completion::completion(shell),
    }
}

/// Load the config file, reporting warnings.
fn load_config(ctx: &Context) -> Result<Config> {
    let loaded = Config::load(ctx.config.as_deref()).context("failed to load configuration")?;
    for warning in &loaded.warnings {
        output::warn(
            format!("{} ({})", warning.message, warning.path.display()),
            ctx.verbosity(),
        );
    }
    if let Some(path) = loaded.config.path() {
        tracing::debug!(path = %path.display(), "loaded config file");
    }
    Ok(loaded.config)
}

/// Fully resolved settings for commands that reach the account.
fn settings(ctx: &Context) -> Result<Settings> {
    let config = load_config(ctx)?;
    config
        .resolve(&ctx.overrides)
        .context("incomplete configuration")
}
