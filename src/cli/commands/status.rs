//! Status command - local and remote state of every source

use super::{orchestrator, workspace};
use crate::cli::args::{OutputFormat, StatusArgs};
use crate::config::Config;
use crate::error::LookasideResult;
use crate::sync::{EntryStatus, LocalState};
use crate::transport::{NoopObserver, RemoteState};
use crate::ui::{self, UiContext};
use console::style;
use std::path::Path;
use std::sync::Arc;

/// Execute the status command
pub async fn execute(args: StatusArgs, config: &Config, root: &Path) -> LookasideResult<()> {
    let workspace = workspace(config, root);
    let manifest = workspace.load_manifest()?;

    let statuses = if args.remote {
        orchestrator(config, workspace, Arc::new(NoopObserver))?
            .inspect(&manifest, true)
            .await?
    } else {
        workspace.inspect_local(&manifest).await?
    };

    match args.format {
        OutputFormat::Table => print_table(&statuses),
        OutputFormat::Json => print_json(&statuses)?,
        OutputFormat::Plain => print_plain(&statuses),
    }

    Ok(())
}

fn print_table(statuses: &[EntryStatus]) {
    if statuses.is_empty() {
        ui::step_info(&UiContext::detect(), "No sources listed");
        return;
    }

    println!(
        "{:<40} {:<8} {:<10} {:<10}",
        style("FILE").bold(),
        style("HASH").bold(),
        style("LOCAL").bold(),
        style("REMOTE").bold()
    );
    println!("{}", "-".repeat(70));

    for status in statuses {
        let local = match status.local {
            LocalState::Present => style("present").green(),
            LocalState::Missing => style("missing").yellow(),
            LocalState::Mismatch => style("mismatch").red(),
        };
        let remote = match status.remote {
            Some(RemoteState::Available) => style("available").green(),
            Some(RemoteState::Missing) => style("missing").red(),
            None => style("-").dim(),
        };

        println!(
            "{:<40} {:<8} {:<10} {:<10}",
            status.filename,
            status.algorithm.to_string(),
            local,
            remote
        );
    }

    println!();
    println!("{} source(s)", statuses.len());
}

fn print_json(statuses: &[EntryStatus]) -> LookasideResult<()> {
    let json = serde_json::to_string_pretty(statuses)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(statuses: &[EntryStatus]) {
    for status in statuses {
        let local = match status.local {
            LocalState::Present => "present",
            LocalState::Missing => "missing",
            LocalState::Mismatch => "mismatch",
        };
        match status.remote {
            Some(remote) => println!("{} {} {}", status.filename, local, remote),
            None => println!("{} {}", status.filename, local),
        }
    }
}
