//! Local tree enumeration.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::Result;

/// An observed local file or symlink under the destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Path relative to the destination root; never starts with `/`.
    pub compare_key: String,
    /// Full path on disk.
    pub path: PathBuf,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    /// Symlink target; `None` for regular files.
    pub link: Option<String>,
}

/// Enumerate every file under `dst`, sorted by `compare_key` bytes.
///
/// A missing `dst` yields an empty list. Directory entries themselves are
/// skipped. Symlinks are observed with lstat semantics: the target is read,
/// not followed, and size and mtime belong to the link itself.
pub fn walk(dst: &Path) -> Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    if !dst.exists() {
        return Ok(files);
    }
    collect(dst, dst, &mut files)?;
    files.sort_by(|a, b| a.compare_key.cmp(&b.compare_key));
    Ok(files)
}

fn collect(root: &Path, dir: &Path, files: &mut Vec<LocalFile>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = path.symlink_metadata()?;

        if meta.is_dir() {
            collect(root, &path, files)?;
            continue;
        }

        let link = if meta.file_type().is_symlink() {
            Some(fs::read_link(&path)?.to_string_lossy().into_owned())
        } else {
            None
        };
        let compare_key = path
            .strip_prefix(root)
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        files.push(LocalFile {
            compare_key,
            size: meta.len(),
            mod_time: meta.modified()?.into(),
            link,
            path,
        });
    }
    Ok(())
}
