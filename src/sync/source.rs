//! Remote object enumeration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::aws::to_utc;
use crate::error::{Result, SyncError};

use super::links::LinkResolver;

/// One entry from a paginated bucket listing.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// The slice of the object-store surface the sync engine needs.
///
/// Pagination stays behind `list`; `read` is for small link bodies only.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every key under `prefix`, lexicographically ordered.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteEntry>>;

    /// Read a whole (small) object body.
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Stream an object body into an open file.
    async fn download(&self, bucket: &str, key: &str, dst: &mut File) -> Result<()>;
}

/// An observed remote entry with its comparison key and resolved link
/// target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Key with the effective prefix stripped; never starts with `/`.
    pub compare_key: String,
    /// Full key in the bucket.
    pub key: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    /// Symlink target when the key matches the link pattern.
    pub link: Option<String>,
}

/// Enumerate the objects under `prefix`, stripping the prefix from each key
/// and reading the target of every key that names a link object.
pub async fn remote_objects(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    resolver: &LinkResolver,
) -> Result<Vec<RemoteObject>> {
    let mut objects = Vec::new();
    for entry in store.list(bucket, prefix).await? {
        let compare_key = entry
            .key
            .strip_prefix(prefix)
            .unwrap_or(entry.key.as_str())
            .to_string();
        if compare_key.is_empty() {
            // the prefix placeholder object itself
            continue;
        }
        let link = if resolver.matches(&entry.key) {
            Some(resolver.read_target(store, bucket, &entry.key).await?)
        } else {
            None
        };
        objects.push(RemoteObject {
            compare_key,
            key: entry.key,
            size: entry.size,
            mod_time: entry.last_modified,
            link,
        });
    }
    Ok(objects)
}

/// S3-backed object store.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|e| SyncError::Remote(format!("list s3://{bucket}/{prefix}: {e}")))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                entries.push(RemoteEntry {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().map(to_utc).unwrap_or_default(),
                });
            }
        }
        Ok(entries)
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("get s3://{bucket}/{key}: {e}")))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| SyncError::Remote(format!("read s3://{bucket}/{key}: {e}")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn download(&self, bucket: &str, key: &str, dst: &mut File) -> Result<()> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| SyncError::Remote(format!("get s3://{bucket}/{key}: {e}")))?;
        let mut body = output.body;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| SyncError::Remote(format!("read s3://{bucket}/{key}: {e}")))?
        {
            dst.write_all(&chunk).await?;
        }
        dst.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::MemoryStore;
    use regex::Regex;

    #[tokio::test]
    async fn strips_prefix_and_skips_placeholder() {
        let store = MemoryStore::new()
            .with_object("prefix/", b"", Utc::now())
            .with_object("prefix/a", b"a", Utc::now())
            .with_object("prefix/b/c", b"bc", Utc::now());
        let resolver = LinkResolver::default();

        let objects = remote_objects(&store, "bucket", "prefix/", &resolver)
            .await
            .unwrap();
        let keys: Vec<&str> = objects.iter().map(|o| o.compare_key.as_str()).collect();
        assert_eq!(keys, ["a", "b/c"]);
        assert_eq!(objects[0].key, "prefix/a");
        assert!(objects.iter().all(|o| o.link.is_none()));
    }

    #[tokio::test]
    async fn reads_link_targets_for_matching_keys() {
        let store = MemoryStore::new()
            .with_object("prefix/data", b"data", Utc::now())
            .with_object("prefix/latest.link", b"releases/v2\n", Utc::now());
        let resolver = LinkResolver::new(Some(Regex::new(r"\.link$").unwrap()));

        let objects = remote_objects(&store, "bucket", "prefix/", &resolver)
            .await
            .unwrap();
        assert_eq!(objects[0].link, None);
        assert_eq!(objects[1].link.as_deref(), Some("releases/v2"));
    }
}
