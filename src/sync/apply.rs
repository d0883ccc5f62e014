//! Change application: atomic replacement, symlinks, removals.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::fs::OpenOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Result, SyncError};

use super::diff::Diff;
use super::source::{ObjectStore, RemoteObject};

/// Materialize the `added` set under `dst`, then unlink the `removed` set.
///
/// Each added object lands at a dot-prefixed sibling temp path first and is
/// renamed over the destination, so an observer only ever sees the old or
/// the new content. Modification times are restored from the remote; for
/// symlinks the link's own timestamp is set, never the target's.
///
/// The cancel token is checked between objects; an in-flight pass keeps
/// going through graceful shutdown and only this hard cut stops it.
pub async fn apply(
    store: &dyn ObjectStore,
    bucket: &str,
    dst: &Path,
    diff: &Diff,
    cancel: &CancellationToken,
) -> Result<()> {
    for object in &diff.added {
        if cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }
        install(store, bucket, dst, object).await?;
    }

    for file in &diff.removed {
        if cancel.is_cancelled() {
            return Err(SyncError::Interrupted);
        }
        info!("removing {}", file.path.display());
        tokio::fs::remove_file(&file.path).await?;
    }

    Ok(())
}

async fn install(
    store: &dyn ObjectStore,
    bucket: &str,
    dst: &Path,
    object: &RemoteObject,
) -> Result<()> {
    let target = dst.join(&object.compare_key);
    let dir = target.parent().ok_or_else(|| {
        SyncError::Config(format!("destination {} has no parent", target.display()))
    })?;
    tokio::fs::create_dir_all(dir).await?;

    let tmp = temp_path(&target)?;
    if let Err(e) = write_temp(store, bucket, object, &target, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, &target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn write_temp(
    store: &dyn ObjectStore,
    bucket: &str,
    object: &RemoteObject,
    target: &Path,
    tmp: &Path,
) -> Result<()> {
    let mtime = file_time(object.mod_time);
    match &object.link {
        Some(link) => {
            info!("linking {} -> {link}", target.display());
            tokio::fs::symlink(link, tmp).await?;
            filetime::set_symlink_file_times(tmp, mtime, mtime)?;
        }
        None => {
            info!(
                "downloading s3://{bucket}/{} to {}",
                object.key,
                target.display()
            );
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(tmp)
                .await?;
            store.download(bucket, &object.key, &mut file).await?;
            drop(file);
            filetime::set_file_times(tmp, mtime, mtime)?;
        }
    }
    Ok(())
}

fn temp_path(target: &Path) -> Result<PathBuf> {
    let dir = target.parent().ok_or_else(|| {
        SyncError::Config(format!("destination {} has no parent", target.display()))
    })?;
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            SyncError::Config(format!("invalid destination path {}", target.display()))
        })?;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    Ok(dir.join(format!(".{name}{suffix}")))
}

fn file_time(mod_time: DateTime<Utc>) -> FileTime {
    FileTime::from_unix_time(mod_time.timestamp(), mod_time.timestamp_subsec_nanos())
}
