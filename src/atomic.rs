//! Crash-safe file replacement
//!
//! Contents go to a temporary file in the target's directory which is then
//! renamed over the target, so readers see either the old or the new file.

use crate::error::{LookasideError, LookasideResult};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `contents`
pub fn write_atomic(path: &Path, contents: &[u8]) -> LookasideResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| LookasideError::io(format!("creating temp file in {}", dir.display()), e))?;
    tmp.write_all(contents)
        .map_err(|e| LookasideError::io(format!("writing {}", path.display()), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| LookasideError::io(format!("syncing {}", path.display()), e))?;
    tmp.persist(path)
        .map_err(|e| LookasideError::io(format!("replacing {}", path.display()), e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sources");
        fs::write(&path, "old\n").unwrap();

        write_atomic(&path, b"new\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failure_leaves_no_target() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let err = write_atomic(&blocker.join("sources"), b"x").unwrap_err();
        assert!(matches!(err, LookasideError::Io { .. }));
    }
}
