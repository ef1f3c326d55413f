//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>`: Use this config file
//! - `--principal`, `--bucket`, `--namespace`, `--state-dir`: Override
//!   config file values
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::config::Overrides;

/// keyrelay - Idempotent IAM credential provisioning and CI secret propagation
#[derive(Parser, Debug)]
#[command(name = "keyrelay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: search ./keyrelay.toml, then user config dirs)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// IAM user name to provision
    #[arg(long, global = true, value_name = "NAME")]
    pub principal: Option<String>,

    /// Bucket the principal's policy grants access to
    #[arg(long, global = true, value_name = "BUCKET")]
    pub bucket: Option<String>,

    /// Repository receiving the secrets, as owner/repo
    #[arg(long, global = true, value_name = "OWNER/REPO")]
    pub namespace: Option<String>,

    /// Directory holding state and lock files
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }

    /// Flag values that override the config file.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            principal: self.principal.clone(),
            bucket: self.bucket.clone(),
            namespace: self.namespace.clone(),
            state_dir: self.state_dir.clone(),
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision the principal and publish fresh credentials
    #[command(
        name = "reconcile",
        long_about = "Provision the principal and publish fresh credentials.\n\n\
            Runs every stage in order: ensure the IAM user exists (creating or \
            adopting it), mint a new access key, create or update and attach the \
            bucket policy, then write the key id and secret as repository \
            secrets. The first failing stage ends the run with its error kind. \
            Every stage converges, so the remedy for most failures is to fix \
            the cause and run again.",
        after_help = "\
WORKFLOW EXAMPLES:
    # Provision from ./keyrelay.toml
    keyrelay reconcile

    # Everything from flags
    keyrelay --principal svc-user --bucket data-bucket --namespace org/repo reconcile

    # Machine-readable report for CI logs
    keyrelay reconcile --json

EXIT STATUS:
    0  the run reached Done
    1  a stage failed, or the run could not start"
    )]
    Reconcile {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Preview what reconcile would do, without changing anything
    #[command(name = "plan")]
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the policy document that would be bound
    #[command(name = "policy")]
    Policy,

    /// Print the recorded state for the principal
    #[command(name = "state")]
    State {
        /// Show every tracked principal
        #[arg(long)]
        all: bool,
    },

    /// Generate shell completion scripts
    #[command(
        name = "completion",
        after_help = "\
INSTALLATION:
    # Bash
    keyrelay completion bash > ~/.local/share/bash-completion/completions/keyrelay

    # Zsh
    keyrelay completion zsh > ~/.zfunc/_keyrelay

    # Fish
    keyrelay completion fish > ~/.config/fish/completions/keyrelay.fish

    # PowerShell
    keyrelay completion powershell >> $PROFILE"
    )]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completion
#[derive(clap::ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
