//! reconcile command - Provision the principal and publish credentials

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::account::aws::AwsAccount;
use crate::auth::{EnvTokenProvider, TokenProvider};
use crate::core::config::Settings;
use crate::core::state::StateStore;
use crate::engine::{Context, ReconcileReport, ReconcileRequest, Reconciler};
use crate::secrets::github::GitHubSecretSink;
use crate::ui::output::{self, Verbosity};

/// Run every stage against AWS IAM and GitHub.
///
/// Exits non-zero (via the returned error) when the run does not reach
/// `Done`; the report is printed either way.
pub fn reconcile(ctx: &Context, json: bool) -> Result<()> {
    let settings = super::settings(ctx)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(reconcile_async(ctx, &settings, json))
}

async fn reconcile_async(ctx: &Context, settings: &Settings, json: bool) -> Result<()> {
    let verbosity = ctx.verbosity();

    // A missing token would otherwise surface only after a key was minted.
    let token_provider: Arc<dyn TokenProvider> =
        Arc::new(EnvTokenProvider::new(settings.token_env.clone()));
    token_provider
        .bearer_token()
        .await
        .context("cannot publish secrets without a GitHub token")?;

    let account = AwsAccount::from_env(settings.region.as_deref()).await;
    let sink = GitHubSecretSink::with_api_base(token_provider, settings.github_api_base.clone());
    let reconciler = Reconciler::new(
        Arc::new(account),
        Arc::new(sink),
        StateStore::new(&settings.state_dir),
    )
    .with_retry(settings.retry.into());

    let request = ReconcileRequest::from_settings(settings);
    match reconciler.run(&request).await {
        Ok(report) => emit(&report, json, verbosity),
        Err(err) => {
            if let Some(report) = err.report() {
                emit(report, json, verbosity)?;
            }
            Err(err.into())
        }
    }
}

fn emit(report: &ReconcileReport, json: bool, verbosity: Verbosity) -> Result<()> {
    if json {
        output::json(report)?;
    } else {
        output::print(output::format_report(report), verbosity);
    }
    Ok(())
}
