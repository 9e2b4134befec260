//! Verify command - check local sources without touching the network

use super::workspace;
use crate::config::Config;
use crate::error::{LookasideError, LookasideResult};
use crate::sync::LocalState;
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;

/// Execute the verify command
pub async fn execute(config: &Config, root: &Path) -> LookasideResult<()> {
    let ctx = UiContext::detect();
    let workspace = workspace(config, root);
    let manifest = workspace.load_manifest()?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Hashing {} source file(s)", manifest.len()));
    let statuses = match workspace.inspect_local(&manifest).await {
        Ok(statuses) => {
            spinner.stop("Hashed");
            statuses
        }
        Err(e) => {
            spinner.stop_error("Hashing failed");
            return Err(e);
        }
    };

    let mut bad = 0;
    for status in &statuses {
        match status.local {
            LocalState::Present => ui::step_ok(&ctx, &status.filename),
            LocalState::Missing => {
                bad += 1;
                ui::step_warn_hint(&ctx, &status.filename, "missing, run: lookaside sources");
            }
            LocalState::Mismatch => {
                bad += 1;
                ui::step_error_detail(&ctx, &status.filename, &format!("{} mismatch", status.algorithm));
            }
        }
    }

    if bad > 0 {
        return Err(LookasideError::User(format!(
            "{} of {} source file(s) missing or modified",
            bad,
            statuses.len()
        )));
    }

    ui::outro(&ctx, &format!("{} source file(s) verified", statuses.len()), true);
    Ok(())
}
