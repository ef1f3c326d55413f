//! plan command - Preview a reconcile run

use anyhow::Result;

use crate::account::aws::AwsAccount;
use crate::core::state::StateStore;
use crate::engine::plan::plan as compute_plan;
use crate::engine::{Context, ReconcileRequest, RetryPolicy};
use crate::ui::output;

/// Show what `reconcile` would do. Issues read calls only.
pub fn plan(ctx: &Context, json: bool) -> Result<()> {
    let settings = super::settings(ctx)?;
    let state = StateStore::new(&settings.state_dir).load()?;
    let request = ReconcileRequest::from_settings(&settings);
    let retry = RetryPolicy::from(settings.retry);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let account = AwsAccount::from_env(settings.region.as_deref()).await;
        compute_plan(&account, &state, &request, &retry).await
    })?;

    if json {
        output::json(&report)?;
    } else {
        output::print(output::format_plan(&report), ctx.verbosity());
    }
    if report.is_blocked() {
        output::warn(
            "reconcile would fail: revoke an unused access key first",
            ctx.verbosity(),
        );
    }
    Ok(())
}
