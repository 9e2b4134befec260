//! Error types for lookaside
//!
//! All modules use `LookasideResult<T>` as their return type.

use crate::transport::TransferOutcome;
use std::error::Error as _;
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for lookaside operations
pub type LookasideResult<T> = Result<T, LookasideError>;

/// All errors that can occur in lookaside
#[derive(Error, Debug)]
pub enum LookasideError {
    // Manifest errors
    #[error("Malformed line {line_no} in {path}: {reason}: {line:?}")]
    ManifestFormat {
        path: PathBuf,
        line_no: usize,
        line: String,
        reason: String,
    },

    #[error("Duplicate manifest entry for {filename}")]
    DuplicateEntry { filename: String },

    #[error("Cannot add a {requested} entry: the manifest already uses {existing}")]
    HashtypeMixing { existing: String, requested: String },

    #[error("Unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Invalid source filename {filename:?}: {reason}")]
    InvalidFilename { filename: String, reason: String },

    #[error("Invalid digest for {filename}: {reason}")]
    InvalidDigest { filename: String, reason: String },

    // Transfer errors
    #[error("{}", incomplete_sources_message(.failures, .errors))]
    IncompleteSources {
        failures: Vec<(String, TransferOutcome)>,
        /// Local errors (unwritable destination, unreadable file) per entry
        errors: Vec<(String, LookasideError)>,
    },

    #[error("Failed to register {filename}: {outcome}")]
    RegistrationFailed {
        filename: String,
        outcome: TransferOutcome,
    },

    #[error("Could not check {filename} in the lookaside cache: {outcome}")]
    RemoteCheckFailed {
        filename: String,
        outcome: TransferOutcome,
    },

    #[error("Invalid cache URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Kerberos negotiation failed: {0}")]
    Kerberos(String),

    #[error("cache.auth = \"negotiate\" needs Kerberos support, which this build lacks")]
    KerberosUnsupported,

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Missing configuration value: {key}")]
    ConfigMissing { key: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

fn incomplete_sources_message(
    failures: &[(String, TransferOutcome)],
    errors: &[(String, LookasideError)],
) -> String {
    let mut msg = format!(
        "{} source file(s) could not be retrieved:",
        failures.len() + errors.len()
    );
    for (filename, outcome) in failures {
        let _ = write!(msg, "\n  {}: {}", filename, outcome);
    }
    for (filename, error) in errors {
        let _ = write!(msg, "\n  {}: {}", filename, error);
        if let Some(source) = error.source() {
            let _ = write!(msg, ": {}", source);
        }
    }
    msg
}

impl LookasideError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a missing configuration error
    pub fn config_missing(key: impl Into<String>) -> Self {
        Self::ConfigMissing { key: key.into() }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::IncompleteSources { failures, errors } => {
                errors.is_empty() && failures.iter().all(|(_, outcome)| outcome.is_transient())
            }
            Self::RegistrationFailed { outcome, .. } | Self::RemoteCheckFailed { outcome, .. } => {
                outcome.is_transient()
            }
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RegistrationFailed { outcome, .. } | Self::RemoteCheckFailed { outcome, .. } => {
                outcome.hint()
            }
            Self::IncompleteSources { failures, .. } => {
                failures.iter().find_map(|(_, outcome)| outcome.hint())
            }
            Self::HashtypeMixing { .. } => {
                Some("Redo the whole sources file with: lookaside new-sources <file>...")
            }
            Self::ConfigMissing { .. } => {
                Some("Set it in ~/.config/lookaside/config.toml or a project .lookaside.toml")
            }
            Self::Kerberos(_) => Some("Run: kinit <user>@<REALM>"),
            Self::KerberosUnsupported => Some(
                "Rebuild with: cargo install lookaside --features kerberos, or set cache.auth = \"anonymous\"",
            ),
            _ => None,
        }
    }
}
