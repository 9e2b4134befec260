//! Reconciling the manifest, the workspace and the lookaside cache
//!
//! Per entry, `ensure_sources` walks:
//!
//! ```text
//! local file verifies ─────────────────────────────► AlreadyPresent
//! missing / mismatch ─► download ─► verify ─► ok ──► Success
//!                                          └► bad ─► VerificationFailed (file removed)
//!                               └► Timeout | NotFound | AuthFailure | Unavailable
//! ```
//!
//! Downloads fan out over a bounded pool; the manifest is only read while
//! they run. Registration uploads everything first and only then writes the
//! manifest followed by the exclusion list.

use crate::config::schema::{Config, WorkspaceConfig};
use crate::error::{LookasideError, LookasideResult};
use crate::hash::{self, HashAlgorithm};
use crate::ignore::IgnoreList;
use crate::manifest::{validate_filename, Manifest, SourceEntry};
use crate::transport::{CacheLocation, CacheTransport, RemoteState, TransferOutcome};
use futures_util::future::join_all;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const DEFAULT_WORKERS: usize = 4;

/// Files of one package checkout
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    manifest_path: PathBuf,
    ignore_path: PathBuf,
}

impl Workspace {
    /// Workspace with the default `sources` and `.gitignore` names
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(root, &WorkspaceConfig::default())
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &WorkspaceConfig) -> Self {
        let root = root.into();
        Self {
            manifest_path: root.join(&config.manifest),
            ignore_path: root.join(&config.ignore_file),
            root,
        }
    }

    pub fn with_paths(root: impl Into<PathBuf>, manifest_path: PathBuf, ignore_path: PathBuf) -> Self {
        Self {
            root: root.into(),
            manifest_path,
            ignore_path,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn ignore_path(&self) -> &Path {
        &self.ignore_path
    }

    /// Package name implied by the checkout directory
    pub fn default_package(&self) -> Option<String> {
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        root.file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
    }

    pub fn load_manifest(&self) -> LookasideResult<Manifest> {
        Manifest::load(&self.manifest_path)
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> LookasideResult<()> {
        manifest.save(&self.manifest_path)
    }

    /// Hash every listed file that exists in the checkout
    pub async fn inspect_local(&self, manifest: &Manifest) -> LookasideResult<Vec<EntryStatus>> {
        let root = self.root.clone();
        let entries: Vec<SourceEntry> = manifest.iter().cloned().collect();

        run_blocking(move || {
            entries
                .into_iter()
                .map(|entry| -> LookasideResult<EntryStatus> {
                    let local = local_state(&root.join(&entry.filename), &entry)?;
                    Ok(EntryStatus::new(entry, local, None))
                })
                .collect()
        })
        .await
    }
}

/// State of a source file in the working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalState {
    Present,
    Missing,
    Mismatch,
}

/// Where one manifest entry currently stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub filename: String,
    pub algorithm: HashAlgorithm,
    pub digest: String,
    pub local: LocalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteState>,
}

impl EntryStatus {
    fn new(entry: SourceEntry, local: LocalState, remote: Option<RemoteState>) -> Self {
        Self {
            algorithm: entry.algorithm(),
            digest: entry.hex().to_string(),
            filename: entry.filename,
            local,
            remote,
        }
    }
}

/// Per-file outcome of a successful `ensure_sources`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub outcomes: Vec<(String, TransferOutcome)>,
}

impl SyncReport {
    pub fn get(&self, filename: &str) -> Option<&TransferOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == filename)
            .map(|(_, outcome)| outcome)
    }

    /// Number of files fetched from the cache
    pub fn downloaded(&self) -> usize {
        self.count(&TransferOutcome::Success)
    }

    /// Number of files that were already in place
    pub fn already_present(&self) -> usize {
        self.count(&TransferOutcome::AlreadyPresent)
    }

    fn count(&self, wanted: &TransferOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| o == wanted).count()
    }
}

/// Drives transfers between a workspace and one cache namespace
pub struct SyncOrchestrator {
    transport: Arc<dyn CacheTransport>,
    workspace: Workspace,
    namespace: Option<String>,
    package: String,
    workers: usize,
}

impl SyncOrchestrator {
    pub fn new(transport: Arc<dyn CacheTransport>, workspace: Workspace, package: impl Into<String>) -> Self {
        Self {
            transport,
            workspace,
            namespace: None,
            package: package.into(),
            workers: DEFAULT_WORKERS,
        }
    }

    /// Build from the `[cache]` section; the package falls back to the
    /// workspace directory name
    pub fn from_config(
        config: &Config,
        workspace: Workspace,
        transport: Arc<dyn CacheTransport>,
    ) -> LookasideResult<Self> {
        let package = match &config.cache.package {
            Some(package) => package.clone(),
            None => workspace
                .default_package()
                .ok_or_else(|| LookasideError::config_missing("cache.package"))?,
        };

        Ok(Self::new(transport, workspace, package)
            .with_namespace(config.cache.namespace.clone())
            .with_workers(config.cache.workers))
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.trim_matches('/').is_empty());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    /// Cache address of a manifest entry
    pub fn location(&self, entry: &SourceEntry) -> CacheLocation {
        CacheLocation::for_entry(self.namespace.as_deref(), &self.package, entry)
    }

    pub fn load_manifest(&self) -> LookasideResult<Manifest> {
        self.workspace.load_manifest()
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> LookasideResult<()> {
        self.workspace.save_manifest(manifest)
    }

    /// Report local (and optionally remote) state of every entry
    pub async fn inspect(&self, manifest: &Manifest, check_remote: bool) -> LookasideResult<Vec<EntryStatus>> {
        if !check_remote {
            return self.workspace.inspect_local(manifest).await;
        }

        let transport = Arc::clone(&self.transport);
        let jobs: Vec<(SourceEntry, CacheLocation, PathBuf)> = manifest
            .iter()
            .map(|entry| {
                (
                    entry.clone(),
                    self.location(entry),
                    self.workspace.root.join(&entry.filename),
                )
            })
            .collect();

        run_blocking(move || {
            jobs.into_iter()
                .map(|(entry, location, path)| -> LookasideResult<EntryStatus> {
                    let local = local_state(&path, &entry)?;
                    let remote = transport.exists(&location)?;
                    Ok(EntryStatus::new(entry, local, Some(remote)))
                })
                .collect()
        })
        .await
    }

    /// Make every manifest entry present and verified in the workspace
    pub async fn ensure_sources(&self, manifest: &Manifest) -> LookasideResult<SyncReport> {
        let root = self.workspace.root.clone();
        self.ensure_sources_into(manifest, &root).await
    }

    /// Like [`ensure_sources`](Self::ensure_sources), into another directory
    ///
    /// Every entry is attempted; failures are collected and reported together
    /// as `IncompleteSources` once all transfers have finished.
    pub async fn ensure_sources_into(&self, manifest: &Manifest, outdir: &Path) -> LookasideResult<SyncReport> {
        fs::create_dir_all(outdir)
            .map_err(|e| LookasideError::io(format!("creating {}", outdir.display()), e))?;

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let tasks = manifest.iter().map(|entry| {
            let transport = Arc::clone(&self.transport);
            let semaphore = Arc::clone(&semaphore);
            let entry = entry.clone();
            let location = self.location(&entry);
            let destination = outdir.join(&entry.filename);

            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| LookasideError::User("download pool closed".to_string()))?;
                run_blocking(move || fetch_entry(&*transport, &entry, &location, &destination)).await
            }
        });
        let results = join_all(tasks).await;

        let mut report = SyncReport::default();
        let mut failures = Vec::new();
        let mut errors = Vec::new();
        for (entry, result) in manifest.iter().zip(results) {
            match result {
                Ok(outcome) if outcome.is_success() => {
                    report.outcomes.push((entry.filename.clone(), outcome));
                }
                Ok(outcome) => {
                    warn!("Could not retrieve {}: {}", entry.filename, outcome);
                    failures.push((entry.filename.clone(), outcome));
                }
                Err(e) => {
                    warn!("Could not retrieve {}: {}", entry.filename, e);
                    errors.push((entry.filename.clone(), e));
                }
            }
        }

        if !failures.is_empty() || !errors.is_empty() {
            return Err(LookasideError::IncompleteSources { failures, errors });
        }

        info!(
            "{} source file(s) downloaded, {} already present",
            report.downloaded(),
            report.already_present()
        );
        Ok(report)
    }

    /// Register one file: upload it, then record it in the manifest and the
    /// exclusion list
    pub async fn register_source(&self, path: &Path, algorithm: HashAlgorithm) -> LookasideResult<SourceEntry> {
        let mut entries = self
            .register_sources(&[path.to_path_buf()], algorithm, false)
            .await?;
        entries
            .pop()
            .ok_or_else(|| LookasideError::User("no source registered".to_string()))
    }

    /// Register several files at once
    ///
    /// With `replace` the manifest is rebuilt from exactly these files;
    /// otherwise they are upserted into it. Nothing is written unless every
    /// upload succeeded, and the manifest is restored if the exclusion list
    /// cannot be written.
    pub async fn register_sources(
        &self,
        paths: &[PathBuf],
        algorithm: HashAlgorithm,
        replace: bool,
    ) -> LookasideResult<Vec<SourceEntry>> {
        let manifest_existed = self.workspace.manifest_path.exists();
        let previous = self.load_manifest()?;

        if !replace {
            if let Some(existing) = previous.algorithm()? {
                if existing != algorithm {
                    return Err(LookasideError::HashtypeMixing {
                        existing: existing.to_string(),
                        requested: algorithm.to_string(),
                    });
                }
            }
        }

        let jobs = paths
            .iter()
            .map(|path| prepare_upload(path))
            .collect::<LookasideResult<Vec<_>>>()?;

        let transport = Arc::clone(&self.transport);
        let namespace = self.namespace.clone();
        let package = self.package.clone();
        let entries = run_blocking(move || {
            jobs.into_iter()
                .map(|(path, filename)| {
                    upload_entry(&*transport, namespace.as_deref(), &package, &path, filename, algorithm)
                })
                .collect::<LookasideResult<Vec<_>>>()
        })
        .await?;

        let mut manifest = if replace { Manifest::new() } else { previous.clone() };
        for entry in &entries {
            manifest.upsert(entry.clone());
        }
        self.save_manifest(&manifest)?;

        let mut ignore = IgnoreList::load(&self.workspace.ignore_path)?;
        for entry in &entries {
            ignore.add(&entry.filename);
        }
        if let Err(e) = ignore.save() {
            warn!("Could not update {}, restoring manifest", self.workspace.ignore_path.display());
            self.restore_manifest(&previous, manifest_existed);
            return Err(e);
        }

        info!("Registered {} source file(s)", entries.len());
        Ok(entries)
    }

    fn restore_manifest(&self, previous: &Manifest, existed: bool) {
        let restored = if existed {
            self.save_manifest(previous)
        } else {
            fs::remove_file(&self.workspace.manifest_path).map_err(|e| {
                LookasideError::io(format!("removing {}", self.workspace.manifest_path.display()), e)
            })
        };
        if let Err(e) = restored {
            warn!("Could not restore manifest: {}", e);
        }
    }
}

async fn run_blocking<T, F>(f: F) -> LookasideResult<T>
where
    F: FnOnce() -> LookasideResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LookasideError::User(format!("worker task failed: {}", e)))?
}

fn local_state(path: &Path, entry: &SourceEntry) -> LookasideResult<LocalState> {
    if !path.is_file() {
        return Ok(LocalState::Missing);
    }
    if hash::verify_file(path, entry.algorithm(), entry.hex())? {
        Ok(LocalState::Present)
    } else {
        Ok(LocalState::Mismatch)
    }
}

fn fetch_entry(
    transport: &dyn CacheTransport,
    entry: &SourceEntry,
    location: &CacheLocation,
    destination: &Path,
) -> LookasideResult<TransferOutcome> {
    match local_state(destination, entry)? {
        LocalState::Present => {
            debug!("{} already present", entry.filename);
            return Ok(TransferOutcome::AlreadyPresent);
        }
        LocalState::Mismatch => info!("{} does not match the manifest, downloading again", entry.filename),
        LocalState::Missing => {}
    }

    let outcome = transport.download(location, destination)?;
    if !outcome.is_success() {
        return Ok(outcome);
    }

    if hash::verify_file(destination, entry.algorithm(), entry.hex())? {
        Ok(TransferOutcome::Success)
    } else {
        warn!("{} failed {} verification, removing it", entry.filename, entry.algorithm());
        fs::remove_file(destination)
            .map_err(|e| LookasideError::io(format!("removing corrupt {}", destination.display()), e))?;
        Ok(TransferOutcome::VerificationFailed)
    }
}

fn prepare_upload(path: &Path) -> LookasideResult<(PathBuf, String)> {
    if !path.is_file() {
        return Err(LookasideError::PathNotFound(path.to_path_buf()));
    }
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LookasideError::InvalidFilename {
            filename: path.display().to_string(),
            reason: "not valid UTF-8".to_string(),
        })?
        .to_string();
    validate_filename(&filename)?;
    Ok((path.to_path_buf(), filename))
}

fn upload_entry(
    transport: &dyn CacheTransport,
    namespace: Option<&str>,
    package: &str,
    path: &Path,
    filename: String,
    algorithm: HashAlgorithm,
) -> LookasideResult<SourceEntry> {
    let digest = hash::digest_file(path, algorithm)?;
    let entry = SourceEntry::new(filename, algorithm, digest)?;
    let location = CacheLocation::for_entry(namespace, package, &entry);

    match transport.upload(&location, path)? {
        outcome if outcome.is_success() => {
            debug!("{}: {}", entry.filename, outcome);
            Ok(entry)
        }
        outcome => Err(LookasideError::RegistrationFailed {
            filename: entry.filename,
            outcome,
        }),
    }
}
