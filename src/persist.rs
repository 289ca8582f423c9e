//! File persistence helpers shared by the report writer and the template
//! store: backup-before-overwrite, then tmp-write-and-rename.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

/// Copy an existing file to a timestamped sibling before it gets
/// overwritten. Returns the backup path, or `None` when there was nothing
/// to back up.
pub fn backup_existing(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("backup");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("bak");
    let backup = path.with_file_name(format!("{stem}_backup_{stamp}.{ext}"));
    fs::copy(path, &backup)
        .with_context(|| format!("back up {} to {}", path.display(), backup.display()))?;
    Ok(Some(backup))
}

/// Write through a temp file and rename, creating parent directories as
/// needed.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Back up any previous copy, then overwrite. Returns the backup path if
/// one was made.
pub fn write_with_backup(path: &Path, contents: &str) -> Result<Option<PathBuf>> {
    let backup = backup_existing(path)?;
    write_atomic(path, contents)?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join("sg_tuner_persist_tests")
            .join(name)
    }

    #[test]
    fn backup_of_missing_file_is_none() {
        let path = temp_path("never_written.json");
        assert!(backup_existing(&path).unwrap().is_none());
    }

    #[test]
    fn write_with_backup_preserves_previous_content() {
        let path = temp_path("report.json");
        let _ = fs::remove_file(&path);
        assert!(write_with_backup(&path, "first").unwrap().is_none());
        let backup = write_with_backup(&path, "second").unwrap().expect("backup");
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "first");
        let _ = fs::remove_file(backup);
        let _ = fs::remove_file(path);
    }
}
