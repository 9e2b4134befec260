//! Sources command - download everything the manifest lists

use super::{orchestrator, workspace};
use crate::cli::args::SourcesArgs;
use crate::config::Config;
use crate::error::LookasideResult;
use crate::transport::TransferOutcome;
use crate::ui::{self, TransferProgress, UiContext};
use std::path::Path;
use std::sync::Arc;

/// Execute the sources command
pub async fn execute(args: SourcesArgs, config: &Config, root: &Path) -> LookasideResult<()> {
    let ctx = UiContext::detect();
    let workspace = workspace(config, root);
    let manifest = workspace.load_manifest()?;

    if manifest.is_empty() {
        ui::step_info(
            &ctx,
            &format!("No sources listed in {}", workspace.manifest_path().display()),
        );
        return Ok(());
    }

    ui::section(&ctx, &format!("Fetching {} source(s)", manifest.len()));
    let outdir = args.outdir.unwrap_or_else(|| root.to_path_buf());
    let progress = Arc::new(TransferProgress::new(&ctx));
    let sync = orchestrator(config, workspace, progress)?;
    let report = sync.ensure_sources_into(&manifest, &outdir).await?;

    for (filename, outcome) in &report.outcomes {
        match outcome {
            TransferOutcome::AlreadyPresent => ui::step_ok_detail(&ctx, filename, "already present"),
            _ => ui::step_ok_detail(&ctx, filename, "downloaded"),
        }
    }
    ui::outro(
        &ctx,
        &format!(
            "{} downloaded, {} already present",
            report.downloaded(),
            report.already_present()
        ),
        true,
    );

    Ok(())
}
