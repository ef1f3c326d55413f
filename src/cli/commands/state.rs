//! state command - Print recorded reconciliation state

use anyhow::Result;

use crate::core::state::StateStore;
use crate::engine::Context;
use crate::ui::output;

/// Print the principal's record, or every record with `all`.
pub fn state(ctx: &Context, all: bool) -> Result<()> {
    let config = super::load_config(ctx)?;
    let store = StateStore::new(config.resolve_state_dir(&ctx.overrides));
    let state = store.load()?;

    if all {
        output::json(&state)?;
        return Ok(());
    }

    let principal = config.resolve_principal(&ctx.overrides)?;
    match state.record(&principal) {
        Some(record) => output::json(record)?,
        None => output::print(
            format!(
                "'{}' is not tracked in {}",
                principal,
                store.path().display()
            ),
            ctx.verbosity(),
        ),
    }
    Ok(())
}
