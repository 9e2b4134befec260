//! Version-control exclusion list
//!
//! Every registered source is listed here so the tarball itself never ends
//! up in a commit. Existing lines are treated as globs, so `*.tar.gz`
//! already covers `foo-1.0.tar.gz` and nothing is appended for it. New lines
//! escape glob metacharacters so `foo[1].tar.gz` is ignored literally.

use crate::atomic::write_atomic;
use crate::error::{LookasideError, LookasideResult};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// In-memory view of an ignore file such as `.gitignore`
#[derive(Debug, Clone)]
pub struct IgnoreList {
    path: PathBuf,
    lines: Vec<String>,
    modified: bool,
}

impl IgnoreList {
    /// Load the list; a missing file is an empty list created on first save
    pub fn load(path: &Path) -> LookasideResult<Self> {
        let lines = if path.exists() {
            fs::read_to_string(path)
                .map_err(|e| LookasideError::io(format!("reading {}", path.display()), e))?
                .lines()
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            lines,
            modified: false,
        })
    }

    /// Whether an existing line (literal or glob) already covers `filename`
    pub fn contains(&self, filename: &str) -> bool {
        let name = filename.trim_start_matches('/');
        self.lines.iter().any(|line| line_matches(line, name))
    }

    /// Add `filename` anchored to the workspace root; no-op if already covered
    pub fn add(&mut self, filename: &str) -> bool {
        if self.contains(filename) {
            return false;
        }
        self.lines
            .push(format!("/{}", Pattern::escape(filename.trim_start_matches('/'))));
        self.modified = true;
        true
    }

    /// Remove lines naming exactly `filename`; globs are left alone
    pub fn remove(&mut self, filename: &str) -> bool {
        let name = filename.trim_start_matches('/');
        let before = self.lines.len();
        let escaped = Pattern::escape(name);
        self.lines.retain(|line| {
            let entry = line.trim().trim_start_matches('/');
            entry != name && entry != escaped
        });
        let removed = self.lines.len() != before;
        self.modified |= removed;
        removed
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Write the file if anything changed since loading
    pub fn save(&mut self) -> LookasideResult<()> {
        if !self.modified {
            return Ok(());
        }

        let mut content = self.lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        write_atomic(&self.path, content.as_bytes())?;
        debug!("Updated {}", self.path.display());
        self.modified = false;
        Ok(())
    }
}

fn line_matches(line: &str, name: &str) -> bool {
    let entry = line.trim().trim_start_matches('/');
    if entry.is_empty() || entry.starts_with('#') {
        return false;
    }
    if entry == name {
        return true;
    }
    match Pattern::new(entry) {
        Ok(pattern) => pattern.matches(name),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitignore");
        let mut list = IgnoreList::load(&path).unwrap();

        assert!(list.add("foo-1.0.tar.gz"));
        assert!(!list.add("foo-1.0.tar.gz"));
        assert!(!list.add("/foo-1.0.tar.gz"));
        list.save().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "/foo-1.0.tar.gz\n");
    }

    #[test]
    fn metacharacters_are_escaped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitignore");
        let mut list = IgnoreList::load(&path).unwrap();

        assert!(list.add("foo[1].tar.gz"));
        assert!(!list.add("foo[1].tar.gz"));
        assert!(list.contains("foo[1].tar.gz"));
        assert!(!list.contains("foo1.tar.gz"));
        list.save().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "/foo[[]1[]].tar.gz\n");

        let mut reloaded = IgnoreList::load(&path).unwrap();
        assert!(!reloaded.add("foo[1].tar.gz"));
        assert!(reloaded.remove("foo[1].tar.gz"));
    }

    #[test]
    fn unescaped_literal_line_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitignore");
        fs::write(&path, "/bar[2].patch\n").unwrap();

        let mut list = IgnoreList::load(&path).unwrap();
        assert!(!list.add("bar[2].patch"));
        assert!(!list.is_modified());
    }

    #[test]
    fn glob_covers_new_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitignore");
        fs::write(&path, "/*.tar.gz\n").unwrap();

        let mut list = IgnoreList::load(&path).unwrap();
        assert!(list.contains("bar-2.1.tar.gz"));
        assert!(!list.add("bar-2.1.tar.gz"));
        assert!(!list.is_modified());
    }

    #[test]
    fn preserves_existing_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitignore");
        fs::write(&path, "# build output\n/results_foo\n").unwrap();

        let mut list = IgnoreList::load(&path).unwrap();
        list.add("foo.patch");
        list.save().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# build output\n/results_foo\n/foo.patch\n"
        );
    }

    #[test]
    fn remove_drops_literal_lines_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitignore");
        fs::write(&path, "/a.tar.gz\n*.rpm\n").unwrap();

        let mut list = IgnoreList::load(&path).unwrap();
        assert!(list.remove("a.tar.gz"));
        assert!(!list.remove("x.rpm"));
        list.save().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "*.rpm\n");
    }

    #[test]
    fn unmodified_list_is_not_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitignore");

        let mut list = IgnoreList::load(&path).unwrap();
        list.save().unwrap();

        assert!(!path.exists());
    }
}
