//! CLI argument definitions using clap derive

use crate::hash::HashAlgorithm;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// lookaside - keep package sources in sync with a lookaside cache
///
/// Downloads the files listed in a `sources` manifest, verifying every
/// digest, and registers new tarballs by uploading them.
#[derive(Parser, Debug)]
#[command(name = "lookaside")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LOOKASIDE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Package checkout to operate on (defaults to current directory)
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Skip local .lookaside.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every source listed in the manifest
    Sources(SourcesArgs),

    /// Upload files and replace the manifest with exactly these
    NewSources(UploadArgs),

    /// Upload files and add them to the manifest
    Upload(UploadArgs),

    /// Show the state of each source
    Status(StatusArgs),

    /// Check local sources against the manifest without downloading
    Verify,

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the sources command
#[derive(Parser, Debug)]
pub struct SourcesArgs {
    /// Download into this directory instead of the checkout
    #[arg(long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,
}

/// Arguments for the new-sources and upload commands
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// Files to register
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Hash algorithm (defaults to cache.hash)
    #[arg(long, value_name = "ALGORITHM")]
    pub hash: Option<HashAlgorithm>,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Also ask the cache whether each object is stored
    #[arg(short, long)]
    pub remote: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,

        /// Do not ask before overwriting
        #[arg(short, long)]
        yes: bool,
    },
}

/// Output format for the status command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one file per line)
    Plain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_sources() {
        let cli = Cli::parse_from(["lookaside", "sources"]);
        match cli.command {
            Commands::Sources(args) => assert!(args.outdir.is_none()),
            _ => panic!("expected Sources command"),
        }
    }

    #[test]
    fn cli_parses_sources_outdir() {
        let cli = Cli::parse_from(["lookaside", "sources", "--outdir", "/tmp/out"]);
        match cli.command {
            Commands::Sources(args) => assert_eq!(args.outdir, Some(PathBuf::from("/tmp/out"))),
            _ => panic!("expected Sources command"),
        }
    }

    #[test]
    fn cli_parses_new_sources() {
        let cli = Cli::parse_from(["lookaside", "new-sources", "a.tar.gz", "b.patch", "--hash", "SHA256"]);
        match cli.command {
            Commands::NewSources(args) => {
                assert_eq!(args.files.len(), 2);
                assert_eq!(args.hash, Some(HashAlgorithm::Sha256));
            }
            _ => panic!("expected NewSources command"),
        }
    }

    #[test]
    fn cli_upload_requires_files() {
        assert!(Cli::try_parse_from(["lookaside", "upload"]).is_err());
    }

    #[test]
    fn cli_parses_status_json() {
        let cli = Cli::parse_from(["lookaside", "status", "--remote", "--format", "json"]);
        match cli.command {
            Commands::Status(args) => {
                assert!(args.remote);
                assert!(matches!(args.format, OutputFormat::Json));
            }
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn cli_workspace_flag() {
        let cli = Cli::parse_from(["lookaside", "-C", "/srv/pkgs/foo", "verify"]);
        assert_eq!(cli.workspace, Some(PathBuf::from("/srv/pkgs/foo")));
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["lookaside", "verify"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["lookaside", "-v", "verify"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["lookaside", "-vv", "verify"]);
        assert_eq!(cli.verbose, 2);
    }
}
