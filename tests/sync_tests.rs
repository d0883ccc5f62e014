//! End-to-end mirror scenarios over an in-memory object store.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::MemoryStore;
use s3_sync::sync::{destination, LinkResolver, Syncer};

/// A second-resolution base time, so filesystem mtimes compare exactly.
fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
}

fn write_local(dir: &Path, path: &str, content: &str, mod_time: DateTime<Utc>) {
    let full = dir.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&full, content).unwrap();
    let mtime = filetime::FileTime::from_unix_time(mod_time.timestamp(), 0);
    filetime::set_file_times(&full, mtime, mtime).unwrap();
}

/// Observed post-state: (compare_key, content, mtime) for every local file.
fn observed(dir: &Path) -> Vec<(String, String, DateTime<Utc>)> {
    destination::walk(dir)
        .unwrap()
        .into_iter()
        .map(|f| {
            let content = fs::read_to_string(&f.path).unwrap();
            (f.compare_key, content, f.mod_time)
        })
        .collect()
}

/// Run a full pass over `local` and `remote`, assert the reported change
/// flag and the resulting tree, then assert a second pass is a no-op.
async fn run_scenario(
    local: &[(&str, &str, DateTime<Utc>)],
    remote: &[(&str, &str, DateTime<Utc>)],
    expect_changed: bool,
    expect: &[(&str, &str, DateTime<Utc>)],
) {
    let dir = TempDir::new().unwrap();
    for (path, content, mod_time) in local {
        write_local(dir.path(), path, content, *mod_time);
    }
    let mut store = MemoryStore::new();
    for (key, content, mod_time) in remote {
        store = store.with_object(key, content.as_bytes(), *mod_time);
    }

    let syncer = Syncer::new(
        Arc::new(store),
        "bucket",
        "prefix",
        dir.path(),
        LinkResolver::default(),
    );

    let changed = syncer.sync(&CancellationToken::new()).await.unwrap();
    assert_eq!(changed, expect_changed, "first pass change flag");

    let state = observed(dir.path());
    let want: Vec<(String, String, DateTime<Utc>)> = expect
        .iter()
        .map(|(path, content, mod_time)| (path.to_string(), content.to_string(), *mod_time))
        .collect();
    assert_eq!(state, want);

    // with an unchanged remote the next pass must be a no-op
    let changed = syncer.sync(&CancellationToken::new()).await.unwrap();
    assert!(!changed, "second pass must not change anything");
    assert_eq!(observed(dir.path()), want);
}

#[tokio::test]
async fn fresh_destination_mirrors_everything() {
    let t = base_time();
    run_scenario(
        &[],
        &[("prefix/key1", "a", t), ("prefix/key2", "aa", t)],
        true,
        &[("key1", "a", t), ("key2", "aa", t)],
    )
    .await;
}

#[tokio::test]
async fn missing_objects_are_added() {
    let t = base_time();
    run_scenario(
        &[("key1", "a", t)],
        &[("prefix/key1", "a", t), ("prefix/key2", "aa", t)],
        true,
        &[("key1", "a", t), ("key2", "aa", t)],
    )
    .await;
}

#[tokio::test]
async fn newer_local_file_is_kept() {
    let t = base_time();
    let newer = t + Duration::seconds(1);
    run_scenario(
        &[("key1", "a", newer)],
        &[("prefix/key1", "a", t), ("prefix/key2", "aa", t)],
        true,
        &[("key1", "a", newer), ("key2", "aa", t)],
    )
    .await;
}

#[tokio::test]
async fn older_local_file_is_replaced() {
    let t = base_time();
    let older = t - Duration::seconds(1);
    run_scenario(
        &[("key1", "a", older)],
        &[("prefix/key1", "a", t), ("prefix/key2", "aa", t)],
        true,
        &[("key1", "a", t), ("key2", "aa", t)],
    )
    .await;
}

#[tokio::test]
async fn size_mismatch_is_replaced() {
    let t = base_time();
    run_scenario(
        &[("key1", "aa", t)],
        &[("prefix/key1", "a", t), ("prefix/key2", "aa", t)],
        true,
        &[("key1", "a", t), ("key2", "aa", t)],
    )
    .await;
}

#[tokio::test]
async fn matching_sides_are_unchanged() {
    let t = base_time();
    run_scenario(
        &[("key1", "a", t), ("key2", "aa", t)],
        &[("prefix/key1", "a", t), ("prefix/key2", "aa", t)],
        false,
        &[("key1", "a", t), ("key2", "aa", t)],
    )
    .await;
}

#[tokio::test]
async fn stale_local_files_are_removed() {
    let t = base_time();
    run_scenario(
        &[("key1", "a", t), ("key2", "aa", t), ("key3", "aaa", t)],
        &[("prefix/key1", "a", t), ("prefix/key2", "aa", t)],
        true,
        &[("key1", "a", t), ("key2", "aa", t)],
    )
    .await;
}

#[tokio::test]
async fn adds_and_removals_combine() {
    let t = base_time();
    run_scenario(
        &[("key1", "a", t), ("key3", "aaa", t)],
        &[("prefix/key1", "a", t), ("prefix/key2", "aa", t)],
        true,
        &[("key1", "a", t), ("key2", "aa", t)],
    )
    .await;
}

#[tokio::test]
async fn nested_keys_create_parent_directories() {
    let t = base_time();
    run_scenario(
        &[],
        &[("prefix/a/b/c", "deep", t)],
        true,
        &[("a/b/c", "deep", t)],
    )
    .await;
}

#[tokio::test]
async fn remote_removal_propagates_on_next_pass() {
    let t = base_time();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        MemoryStore::new()
            .with_object("prefix/key1", b"a", t)
            .with_object("prefix/key2", b"aa", t),
    );
    let syncer = Syncer::new(
        Arc::clone(&store) as Arc<dyn s3_sync::sync::ObjectStore>,
        "bucket",
        "prefix",
        dir.path(),
        LinkResolver::default(),
    );

    assert!(syncer.sync(&CancellationToken::new()).await.unwrap());
    store.remove("prefix/key2");
    assert!(syncer.sync(&CancellationToken::new()).await.unwrap());

    let keys: Vec<String> = observed(dir.path()).into_iter().map(|(k, _, _)| k).collect();
    assert_eq!(keys, ["key1"]);
}

#[tokio::test]
async fn link_object_round_trip() {
    let t = base_time();
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new()
        .with_object("prefix/current", b"v2\n", t)
        .with_object("prefix/data", b"payload", t);
    let resolver = LinkResolver::new(Some(Regex::new(r"(^|/)current$").unwrap()));
    let syncer = Syncer::new(Arc::new(store), "bucket", "prefix", dir.path(), resolver);

    assert!(syncer.sync(&CancellationToken::new()).await.unwrap());

    let link = dir.path().join("current");
    let meta = fs::symlink_metadata(&link).unwrap();
    assert!(meta.file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap().to_string_lossy(), "v2");
    let mtime: DateTime<Utc> = meta.modified().unwrap().into();
    assert_eq!(mtime, t);
    assert_eq!(
        fs::read_to_string(dir.path().join("data")).unwrap(),
        "payload"
    );

    // equal link targets keep the symlink in place
    assert!(!syncer.sync(&CancellationToken::new()).await.unwrap());
}

#[tokio::test]
async fn link_target_change_replaces_symlink() {
    let t = base_time();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new().with_object("prefix/current", b"v1", t));
    let resolver = LinkResolver::new(Some(Regex::new(r"(^|/)current$").unwrap()));
    let syncer = Syncer::new(
        Arc::clone(&store) as Arc<dyn s3_sync::sync::ObjectStore>,
        "bucket",
        "prefix",
        dir.path(),
        resolver,
    );

    assert!(syncer.sync(&CancellationToken::new()).await.unwrap());
    assert_eq!(
        fs::read_link(dir.path().join("current"))
            .unwrap()
            .to_string_lossy(),
        "v1"
    );

    store.insert("prefix/current", b"v2", t);
    assert!(syncer.sync(&CancellationToken::new()).await.unwrap());
    assert_eq!(
        fs::read_link(dir.path().join("current"))
            .unwrap()
            .to_string_lossy(),
        "v2"
    );
}

#[tokio::test]
async fn link_component_redirects_the_prefix() {
    let t = base_time();
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new()
        .with_object("repo/current", b"v2\n", t)
        .with_object("repo/v2/model.bin", b"weights", t);
    let resolver = LinkResolver::new(Some(Regex::new(r"(^|/)current$").unwrap()));
    let syncer = Syncer::new(
        Arc::new(store),
        "bucket",
        "repo/current",
        dir.path(),
        resolver,
    );

    assert!(syncer.sync(&CancellationToken::new()).await.unwrap());
    assert_eq!(
        fs::read_to_string(dir.path().join("model.bin")).unwrap(),
        "weights"
    );
}
