//! ui::output
//!
//! Output formatting and display.
//!
//! # Design
//!
//! Output is formatted consistently and respects the quiet flag.
//! When `--json` is enabled, output is machine-readable JSON on stdout and
//! nothing else is printed there.

use std::fmt::Display;

use serde::Serialize;

use crate::engine::plan::{CredentialAction, PlanReport};
use crate::engine::reconciler::{ReconcileReport, StageStatus};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - minimal output
    Quiet,
    /// Normal mode - standard output
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Print a warning message (respects quiet mode).
pub fn warn(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        eprintln!("warning: {}", message);
    }
}

/// Print a hint below an error (always shown).
pub fn hint(message: impl Display) {
    eprintln!("hint: {}", message);
}

/// Print a value as pretty JSON on stdout.
pub fn json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format a list of items.
pub fn format_list<T: Display>(items: &[T], prefix: &str) -> String {
    items
        .iter()
        .map(|item| format!("{}{}", prefix, item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn status_mark(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Completed => "ok",
        StageStatus::Skipped => "skip",
        StageStatus::Failed => "FAIL",
        StageStatus::NotRun => "-",
    }
}

/// Human-readable run report.
pub fn format_report(report: &ReconcileReport) -> String {
    let mut lines = vec![format!(
        "{} -> {}: {}",
        report.principal, report.namespace, report.state
    )];
    for line in &report.stages {
        let detail = line.detail.as_deref().unwrap_or("");
        lines.push(
            format!("  [{:>4}] {:<17} {}", status_mark(line.status), line.stage, detail)
                .trim_end()
                .to_string(),
        );
    }
    if let Some(id) = &report.orphaned_key {
        lines.push(format!("  orphaned key: {}", id));
    }
    lines.join("\n")
}

/// Human-readable plan.
pub fn format_plan(plan: &PlanReport) -> String {
    let credential = match &plan.credential {
        CredentialAction::Mint { live, limit } => {
            format!("mint a new key ({} of {} in use)", live, limit)
        }
        CredentialAction::Keep { access_id } => format!("keep published key {}", access_id),
        CredentialAction::BlockedByQuota { live, limit } => {
            format!("BLOCKED: {} of {} keys in use", live, limit)
        }
    };

    let mut policy = plan.policy.change.to_string();
    if plan.policy.would_attach {
        policy.push_str(", attach");
    }

    let names: Vec<&str> = plan.secrets.names.iter().map(|n| n.as_str()).collect();
    let secrets = if plan.secrets.publish {
        format!("write {} to {}", names.join(", "), plan.secrets.namespace)
    } else {
        "leave as published".to_string()
    };

    [
        format!("principal  {}: {}", plan.principal, plan.principal_action),
        format!("credential {}", credential),
        format!("policy     {}", policy),
        format!("secrets    {}", secrets),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_debug() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }

    #[test]
    fn format_list_prefixes_each_item() {
        assert_eq!(format_list(&["a", "b"], "- "), "- a\n- b");
    }
}
