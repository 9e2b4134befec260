//! New-sources and upload commands - register files with the cache

use super::{orchestrator, workspace};
use crate::cli::args::UploadArgs;
use crate::config::Config;
use crate::error::LookasideResult;
use crate::ui::{self, TransferProgress, UiContext};
use std::path::Path;
use std::sync::Arc;

/// Replace the manifest with exactly the given files
pub async fn new_sources(args: UploadArgs, config: &Config, root: &Path) -> LookasideResult<()> {
    register(args, config, root, true).await
}

/// Add the given files to the manifest
pub async fn upload(args: UploadArgs, config: &Config, root: &Path) -> LookasideResult<()> {
    register(args, config, root, false).await
}

async fn register(args: UploadArgs, config: &Config, root: &Path, replace: bool) -> LookasideResult<()> {
    let ctx = UiContext::detect();
    let algorithm = args.hash.unwrap_or(config.cache.hash);
    let progress = Arc::new(TransferProgress::new(&ctx));
    let sync = orchestrator(config, workspace(config, root), progress)?;

    let entries = sync.register_sources(&args.files, algorithm, replace).await?;

    for entry in &entries {
        ui::step_ok_detail(&ctx, &entry.filename, &format!("{} {}", entry.algorithm(), short_digest(entry.hex())));
    }
    ui::outro(
        &ctx,
        &format!(
            "Updated {} and {}",
            sync.workspace().manifest_path().display(),
            sync.workspace().ignore_path().display()
        ),
        true,
    );

    Ok(())
}

fn short_digest(hex: &str) -> &str {
    hex.get(..12).unwrap_or(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_digest_truncates() {
        assert_eq!(short_digest("d41d8cd98f00b204e9800998ecf8427e"), "d41d8cd98f00");
        assert_eq!(short_digest("abc"), "abc");
    }
}
