//! Merge diff between the local tree and the remote listing.

use std::cmp::Ordering;

use super::destination::LocalFile;
use super::source::RemoteObject;

/// The change sets produced by one diff pass. Disjoint: `added` members are
/// created or overwritten, `removed` members are unlinked.
#[derive(Debug, Default)]
pub struct Diff {
    pub added: Vec<RemoteObject>,
    pub removed: Vec<LocalFile>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Merge two `compare_key`-sorted sides into add and remove sets.
///
/// A key present on both sides is re-downloaded when the link targets
/// differ, or when both are regular and the sizes differ or the local
/// mtime is strictly older. Strictly-older keeps unchanged passes
/// idempotent; the size check forces an overwrite even when the mtime is
/// not newer.
pub fn diff(mut files: Vec<LocalFile>, mut objects: Vec<RemoteObject>) -> Diff {
    let mut added = Vec::new();
    let mut removed = Vec::new();

    let mut f = 0;
    let mut o = 0;
    while f < files.len() && o < objects.len() {
        match files[f].compare_key.cmp(&objects[o].compare_key) {
            Ordering::Equal => {
                if needs_update(&files[f], &objects[o]) {
                    added.push(objects[o].clone());
                }
                f += 1;
                o += 1;
            }
            Ordering::Less => {
                removed.push(files[f].clone());
                f += 1;
            }
            Ordering::Greater => {
                added.push(objects[o].clone());
                o += 1;
            }
        }
    }

    removed.extend(files.drain(f..));
    added.extend(objects.drain(o..));

    Diff { added, removed }
}

fn needs_update(file: &LocalFile, object: &RemoteObject) -> bool {
    if file.link != object.link {
        return true;
    }
    if object.link.is_some() {
        return false;
    }
    file.size != object.size || file.mod_time < object.mod_time
}
