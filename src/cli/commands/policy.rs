//! policy command - Print the rendered policy document

use anyhow::Result;

use crate::engine::Context;

/// Print the document `reconcile` would bind. Needs only the principal
/// and bucket.
pub fn policy(ctx: &Context) -> Result<()> {
    let config = super::load_config(ctx)?;
    let document = config.resolve_policy(&ctx.overrides)?;
    println!("{}", document.to_json()?);
    tracing::debug!(fingerprint = %document.fingerprint(), "rendered policy");
    Ok(())
}
