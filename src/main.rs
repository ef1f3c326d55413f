//! keyrelay binary entry point.

use std::process::ExitCode;

use keyrelay::engine::ReconcileError;
use keyrelay::ui::output;

fn main() -> ExitCode {
    match keyrelay::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::error(format!("{:#}", err));
            if let Some(reconcile) = err.downcast_ref::<ReconcileError>() {
                output::hint(reconcile.hint());
            }
            ExitCode::FAILURE
        }
    }
}
