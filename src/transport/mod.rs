//! Lookaside cache transport
//!
//! Addresses objects by `(namespace, package, filename, digest)` and moves
//! bytes between the workspace and the cache over HTTP.
//!
//! | Outcome | Retried | Meaning |
//! |---------|---------|---------|
//! | `Success` | - | Transfer completed |
//! | `AlreadyPresent` | - | Nothing to do |
//! | `VerificationFailed` | no | Downloaded bytes do not match the digest |
//! | `Timeout` | yes | No progress within the stall window |
//! | `AuthFailure` | no | Credentials rejected (401/403) |
//! | `NotFound` | no | No object at that address |
//! | `Unavailable` | yes | Connection failure or 5xx, retries exhausted |

mod auth;
mod http;
mod multipart;
mod policy;

pub use auth::{AuthMode, Credentials, NegotiateProvider};
#[cfg(feature = "kerberos")]
pub use auth::Krb5Negotiate;
pub use http::{HttpCacheTransport, TransportSettings};
pub use multipart::MultipartForm;
pub use policy::{Attempt, BackoffKind, Clock, LowSpeedLimit, RetryPolicy, StallGuard, SystemClock};

use crate::error::LookasideResult;
use crate::hash::HashAlgorithm;
use crate::manifest::SourceEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use url::Url;

/// Result of one upload or download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransferOutcome {
    Success,
    AlreadyPresent,
    VerificationFailed,
    Timeout,
    AuthFailure { status: u16 },
    NotFound,
    Unavailable { reason: String },
}

impl TransferOutcome {
    /// Whether the source is now available where it was wanted
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyPresent)
    }

    /// Whether running the operation again could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable { .. })
    }

    /// Operator remediation for the outcome
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::AuthFailure { .. } => Some(
                "The cache rejected your credentials. Run: kinit <user>@<REALM> and make sure cache.auth = \"negotiate\"",
            ),
            Self::Timeout => Some("The cache stopped sending data; retry or raise cache.stall_timeout_secs"),
            Self::VerificationFailed => Some("The cached object does not match the sources file; ask the uploader to re-run new-sources"),
            _ => None,
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "transferred"),
            Self::AlreadyPresent => write!(f, "already present"),
            Self::VerificationFailed => write!(f, "checksum verification failed"),
            Self::Timeout => write!(f, "timed out"),
            Self::AuthFailure { status } => write!(f, "authentication failed (HTTP {})", status),
            Self::NotFound => write!(f, "not found in the lookaside cache"),
            Self::Unavailable { reason } => write!(f, "cache unavailable: {}", reason),
        }
    }
}

/// Whether the cache holds an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Available,
    Missing,
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

/// How the digest is placed in download URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlLayout {
    /// `<pkg>/<file>/<hash>/<file>`
    HashPath,
    /// `<pkg>/<file>/<hashtype>/<hash>/<file>`
    #[default]
    HashtypePath,
    /// `<pkg>/<file>?<hashtype>sum=<hash>`
    Query,
}

/// Address of one object in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    pub namespace: Option<String>,
    pub package: String,
    pub filename: String,
    pub algorithm: HashAlgorithm,
    pub digest: String,
}

impl CacheLocation {
    pub fn for_entry(namespace: Option<&str>, package: &str, entry: &SourceEntry) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            package: package.to_string(),
            filename: entry.filename.clone(),
            algorithm: entry.algorithm(),
            digest: entry.hex().to_string(),
        }
    }

    /// Non-empty namespace segments, outermost first
    pub fn namespace_segments(&self) -> impl Iterator<Item = &str> {
        self.namespace
            .as_deref()
            .unwrap_or("")
            .split('/')
            .filter(|s| !s.is_empty())
    }

    /// `namespace/package` as the upload endpoint expects it
    pub fn qualified_name(&self) -> String {
        let mut parts: Vec<&str> = self.namespace_segments().collect();
        parts.push(&self.package);
        parts.join("/")
    }

    /// Full download URL under `base`
    ///
    /// Each segment is percent-encoded on its own, so a `/` inside a
    /// filename can never introduce another path level.
    pub fn download_url(&self, base: &Url, layout: UrlLayout) -> Url {
        let mut segments: Vec<&str> = self.namespace_segments().collect();
        segments.push(&self.package);
        segments.push(&self.filename);
        match layout {
            UrlLayout::HashPath => segments.extend([self.digest.as_str(), self.filename.as_str()]),
            UrlLayout::HashtypePath => segments.extend([
                self.algorithm.name(),
                self.digest.as_str(),
                self.filename.as_str(),
            ]),
            UrlLayout::Query => {}
        }

        let mut url = base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if layout == UrlLayout::Query {
            url.query_pairs_mut()
                .append_pair(&format!("{}sum", self.algorithm), &self.digest);
        }
        url
    }
}

/// Receives progress events for individual transfers
pub trait TransferObserver: Send + Sync {
    fn started(&self, _filename: &str, _direction: Direction, _total: Option<u64>) {}
    fn progressed(&self, _filename: &str, _bytes: u64) {}
    fn finished(&self, _filename: &str, _outcome: &TransferOutcome) {}
}

/// Observer that ignores every event
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

/// Moves objects between the workspace and a lookaside cache
///
/// Implementations own their retry policy; callers see one outcome per call.
/// Errors are reserved for local failures (unreadable source, unwritable
/// destination, bad configuration).
pub trait CacheTransport: Send + Sync {
    /// Fetch an object to `destination`; on any non-success outcome the
    /// destination is left absent
    fn download(&self, location: &CacheLocation, destination: &Path) -> LookasideResult<TransferOutcome>;

    /// Store `source` under `location`; `AlreadyPresent` if the cache has it
    fn upload(&self, location: &CacheLocation, source: &Path) -> LookasideResult<TransferOutcome>;

    /// Ask whether the cache holds `location`
    fn exists(&self, location: &CacheLocation) -> LookasideResult<RemoteState>;
}
