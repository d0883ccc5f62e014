//! Deterministic tar assembly for image layers.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tar::EntryType;

use crate::error::Result;

/// Write a tar archive containing every input path and its parent chain.
///
/// Parent directories are emitted exactly once across all inputs, children
/// in sorted order. Directory headers get a trailing `/` and a zeroed
/// mtime so an unchanged tree produces a byte-identical archive; file and
/// symlink entries keep their mtimes. Entry names never carry a leading
/// separator.
pub fn create<W: Write>(paths: &[PathBuf], out: W) -> Result<W> {
    let mut builder = tar::Builder::new(out);
    builder.follow_symlinks(false);
    let mut added: HashSet<String> = HashSet::new();

    for path in paths {
        let mut ancestors: Vec<&Path> = path
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty() && *p != Path::new("/"))
            .collect();
        ancestors.reverse();
        for ancestor in ancestors {
            let name = archive_name(ancestor);
            if name.is_empty() || !added.insert(name.clone()) {
                continue;
            }
            append_entry(&mut builder, ancestor, &name)?;
        }
        descend(&mut builder, path, &mut added)?;
    }

    Ok(builder.into_inner()?)
}

fn archive_name(path: &Path) -> String {
    path.to_string_lossy().trim_start_matches('/').to_string()
}

fn descend<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    added: &mut HashSet<String>,
) -> Result<()> {
    if !dir.symlink_metadata()?.is_dir() {
        return Ok(());
    }
    let mut children: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    children.sort();

    for child in children {
        let name = archive_name(&child);
        if !added.insert(name.clone()) {
            continue;
        }
        append_entry(builder, &child, &name)?;
        if child.symlink_metadata()?.is_dir() {
            descend(builder, &child, added)?;
        }
    }
    Ok(())
}

fn append_entry<W: Write>(builder: &mut tar::Builder<W>, path: &Path, name: &str) -> Result<()> {
    let meta = path.symlink_metadata()?;
    let kind = meta.file_type();

    let mut header = tar::Header::new_gnu();
    header.set_metadata(&meta);

    if kind.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mtime(0);
        builder.append_data(&mut header, format!("{name}/"), std::io::empty())?;
    } else if kind.is_symlink() {
        let target = fs::read_link(path)?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, name, &target)?;
    } else if kind.is_file() {
        let mut file = fs::File::open(path)?;
        header.set_entry_type(EntryType::Regular);
        header.set_size(meta.len());
        builder.append_data(&mut header, name, &mut file)?;
    } else {
        // sockets, fifos, devices: header only
        header.set_size(0);
        builder.append_data(&mut header, name, std::io::empty())?;
    }
    Ok(())
}
