//! CLI command implementations

pub mod config;
pub mod sources;
pub mod status;
pub mod upload;
pub mod verify;

pub use config::execute as config;
pub use sources::execute as sources;
pub use status::execute as status;
pub use upload::{new_sources, upload};
pub use verify::execute as verify;

use crate::config::Config;
use crate::error::LookasideResult;
use crate::sync::{SyncOrchestrator, Workspace};
use crate::transport::{HttpCacheTransport, TransferObserver};
use std::path::Path;
use std::sync::Arc;

/// Workspace rooted at `root` with the configured file names
fn workspace(config: &Config, root: &Path) -> Workspace {
    Workspace::from_config(root, &config.workspace)
}

/// Orchestrator talking HTTP to the configured cache
fn orchestrator(
    config: &Config,
    workspace: Workspace,
    observer: Arc<dyn TransferObserver>,
) -> LookasideResult<SyncOrchestrator> {
    let transport = HttpCacheTransport::from_config(&config.cache)?.with_observer(observer);
    SyncOrchestrator::from_config(config, workspace, Arc::new(transport))
}
