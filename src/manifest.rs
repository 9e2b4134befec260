//! The `sources` manifest
//!
//! One line per source file, mapping a filename to the digest the lookaside
//! cache stores it under. Three on-disk spellings are understood:
//!
//! | Form | Example |
//! |------|---------|
//! | legacy | `d41d8cd98f00b204e9800998ecf8427e  empty.txt` |
//! | tagged | `sha512 cf83e1...  empty.txt` |
//! | BSD | `SHA512 (empty.txt) = cf83e1...` |
//!
//! Every save writes the tagged form, so legacy manifests are normalized the
//! first time they are rewritten.

use crate::atomic::write_atomic;
use crate::error::{LookasideError, LookasideResult};
use crate::hash::HashAlgorithm;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Digest recorded for one source file
#[derive(Debug, Clone, Eq)]
pub enum EntryDigest {
    /// Untagged line, algorithm implied
    Legacy(String),
    /// Line carrying its algorithm
    Tagged(HashAlgorithm, String),
}

impl EntryDigest {
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Legacy(_) => HashAlgorithm::LEGACY,
            Self::Tagged(alg, _) => *alg,
        }
    }

    pub fn hex(&self) -> &str {
        match self {
            Self::Legacy(hex) | Self::Tagged(_, hex) => hex,
        }
    }
}

// Legacy is only a spelling: `d41d...` and `md5 d41d...` name the same bytes.
impl PartialEq for EntryDigest {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm() == other.algorithm() && self.hex().eq_ignore_ascii_case(other.hex())
    }
}

/// A single declared source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub filename: String,
    pub digest: EntryDigest,
}

impl SourceEntry {
    /// Build a tagged entry, validating filename and digest
    pub fn new(
        filename: impl Into<String>,
        algorithm: HashAlgorithm,
        hex: impl Into<String>,
    ) -> LookasideResult<Self> {
        Self::validated(filename.into(), EntryDigest::Tagged(algorithm, hex.into()))
    }

    fn validated(filename: String, digest: EntryDigest) -> LookasideResult<Self> {
        validate_filename(&filename)?;
        let hex = digest.hex();
        let algorithm = digest.algorithm();
        if hex.len() != algorithm.hex_len() {
            return Err(LookasideError::InvalidDigest {
                filename,
                reason: format!(
                    "{} digest must be {} hex characters, got {}",
                    algorithm,
                    algorithm.hex_len(),
                    hex.len()
                ),
            });
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(LookasideError::InvalidDigest {
                filename,
                reason: "digest is not hexadecimal".to_string(),
            });
        }
        let digest = match digest {
            EntryDigest::Legacy(h) => EntryDigest::Legacy(h.to_ascii_lowercase()),
            EntryDigest::Tagged(alg, h) => EntryDigest::Tagged(alg, h.to_ascii_lowercase()),
        };
        Ok(Self { filename, digest })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.digest.algorithm()
    }

    pub fn hex(&self) -> &str {
        self.digest.hex()
    }

    /// Render in the tagged on-disk form (without newline)
    pub fn to_line(&self) -> String {
        format!("{} {}  {}", self.algorithm(), self.hex(), self.filename)
    }
}

/// Source filenames are single path components inside the workspace
pub fn validate_filename(filename: &str) -> LookasideResult<()> {
    let reason = if filename.is_empty() {
        Some("empty filename")
    } else if filename == "." || filename == ".." {
        Some("refers to a directory")
    } else if filename.contains('/') || filename.contains('\\') {
        Some("contains a path separator")
    } else if filename.contains('\0') {
        Some("contains a NUL byte")
    } else if filename != filename.trim() {
        Some("has leading or trailing whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(LookasideError::InvalidFilename {
            filename: filename.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Ordered list of source entries with unique filenames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<SourceEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, rejecting duplicate filenames
    pub fn from_entries(entries: Vec<SourceEntry>) -> LookasideResult<Self> {
        let mut manifest = Self::new();
        for entry in entries {
            if manifest.contains(&entry.filename) {
                return Err(LookasideError::DuplicateEntry {
                    filename: entry.filename,
                });
            }
            manifest.entries.push(entry);
        }
        Ok(manifest)
    }

    /// Parse manifest text; `origin` is only used in error messages
    pub fn parse(content: &str, origin: &Path) -> LookasideResult<Self> {
        let mut manifest = Self::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let format_err = |reason: String| LookasideError::ManifestFormat {
                path: origin.to_path_buf(),
                line_no: idx + 1,
                line: raw.to_string(),
                reason,
            };

            let (filename, digest) = parse_line(line).map_err(format_err)?;
            let entry = SourceEntry::validated(filename, digest).map_err(|e| format_err(e.to_string()))?;

            if manifest.contains(&entry.filename) {
                return Err(LookasideError::DuplicateEntry {
                    filename: entry.filename,
                });
            }
            manifest.entries.push(entry);
        }

        Ok(manifest)
    }

    /// Load a manifest from disk; a missing file is an empty manifest
    pub fn load(path: &Path) -> LookasideResult<Self> {
        if !path.exists() {
            debug!("No manifest at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| LookasideError::io(format!("reading manifest {}", path.display()), e))?;
        let manifest = Self::parse(&content, path)?;
        debug!("Loaded {} entries from {}", manifest.len(), path.display());
        Ok(manifest)
    }

    /// Serialize in the tagged form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_line());
            out.push('\n');
        }
        out
    }

    /// Atomically write the manifest to disk
    pub fn save(&self, path: &Path) -> LookasideResult<()> {
        write_atomic(path, self.render().as_bytes())?;
        debug!("Wrote {} entries to {}", self.len(), path.display());
        Ok(())
    }

    /// Replace the entry with the same filename in place, or append
    pub fn upsert(&mut self, entry: SourceEntry) {
        match self.entries.iter_mut().find(|e| e.filename == entry.filename) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Remove an entry, returning it if present
    pub fn remove(&mut self, filename: &str) -> Option<SourceEntry> {
        let idx = self.entries.iter().position(|e| e.filename == filename)?;
        Some(self.entries.remove(idx))
    }

    pub fn get(&self, filename: &str) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.get(filename).is_some()
    }

    /// Algorithm shared by the existing entries, if any
    ///
    /// Fails when the manifest already mixes algorithms.
    pub fn algorithm(&self) -> LookasideResult<Option<HashAlgorithm>> {
        let mut found: Option<HashAlgorithm> = None;
        for entry in &self.entries {
            match found {
                None => found = Some(entry.algorithm()),
                Some(alg) if alg != entry.algorithm() => {
                    return Err(LookasideError::HashtypeMixing {
                        existing: alg.to_string(),
                        requested: entry.algorithm().to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(found)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split a non-blank line into filename and digest
fn parse_line(line: &str) -> Result<(String, EntryDigest), String> {
    // BSD: `SHA512 (file) = hash`
    if let Some((head, hash)) = line.rsplit_once(") = ") {
        if let Some((alg, file)) = head.split_once(" (") {
            if let Ok(alg) = alg.parse::<HashAlgorithm>() {
                return Ok((file.to_string(), EntryDigest::Tagged(alg, hash.trim().to_string())));
            }
        }
    }

    let (first, rest) = split_token(line).ok_or_else(|| "expected a digest and a filename".to_string())?;

    // Tagged: `alg hash  file`
    if let Ok(alg) = first.parse::<HashAlgorithm>() {
        let (hash, file) =
            split_token(rest).ok_or_else(|| "expected a digest and a filename after the algorithm".to_string())?;
        return Ok((file.to_string(), EntryDigest::Tagged(alg, hash.to_string())));
    }

    // Legacy: `hash  file`
    if first.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Ok((rest.to_string(), EntryDigest::Legacy(first.to_string())));
    }

    Err("line matches neither the legacy nor the tagged format".to_string())
}

/// Split off the first whitespace-delimited token; the remainder may contain spaces
fn split_token(s: &str) -> Option<(&str, &str)> {
    let (token, rest) = s.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    if token.is_empty() || rest.is_empty() {
        None
    } else {
        Some((token, rest))
    }
}
