//! The mirror engine: one pass pulls a remote prefix into a local
//! directory tree.

pub mod apply;
pub mod destination;
pub mod diff;
pub mod links;
pub mod source;

pub use destination::LocalFile;
pub use diff::Diff;
pub use links::LinkResolver;
pub use source::{ObjectStore, RemoteEntry, RemoteObject, S3ObjectStore};

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

/// Mirrors one remote prefix into one local directory.
///
/// Not safe for concurrent self-invocation; the scheduler serializes
/// passes of the same task.
pub struct Syncer {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    dst: PathBuf,
    resolver: LinkResolver,
}

impl Syncer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        dst: impl Into<PathBuf>,
        resolver: LinkResolver,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
            dst: dst.into(),
            resolver,
        }
    }

    /// Run one mirror pass: resolve the prefix, list, walk, diff, apply.
    /// Returns whether anything changed.
    ///
    /// The cancel token is the hard cut for shutdown; a pass that has
    /// already started is otherwise allowed to finish.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<bool> {
        let mut prefix = self
            .resolver
            .resolve_prefix(self.store.as_ref(), &self.bucket, &self.prefix)
            .await?;
        if !prefix.ends_with('/') {
            prefix.push('/');
        }

        let objects =
            source::remote_objects(self.store.as_ref(), &self.bucket, &prefix, &self.resolver)
                .await?;
        let files = destination::walk(&self.dst)?;

        let changes = diff::diff(files, objects);
        if changes.is_empty() {
            debug!(
                "s3://{}/{prefix} already in sync with {}",
                self.bucket,
                self.dst.display()
            );
            return Ok(false);
        }

        apply::apply(self.store.as_ref(), &self.bucket, &self.dst, &changes, cancel).await?;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::fs::File;
    use tokio::io::AsyncWriteExt;

    use crate::error::{Result, SyncError};

    use super::source::{ObjectStore, RemoteEntry};

    /// In-memory object store for unit tests.
    #[derive(Default)]
    pub struct MemoryStore {
        objects: Vec<(String, Vec<u8>, DateTime<Utc>)>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_object(
            mut self,
            key: &str,
            body: &[u8],
            mod_time: DateTime<Utc>,
        ) -> Self {
            self.objects.push((key.to_string(), body.to_vec(), mod_time));
            self.objects.sort_by(|a, b| a.0.cmp(&b.0));
            self
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn list(&self, _bucket: &str, prefix: &str) -> Result<Vec<RemoteEntry>> {
            Ok(self
                .objects
                .iter()
                .filter(|(key, _, _)| key.starts_with(prefix))
                .map(|(key, body, mod_time)| RemoteEntry {
                    key: key.clone(),
                    size: body.len() as u64,
                    last_modified: *mod_time,
                })
                .collect())
        }

        async fn read(&self, _bucket: &str, key: &str) -> Result<Vec<u8>> {
            self.objects
                .iter()
                .find(|(k, _, _)| k == key)
                .map(|(_, body, _)| body.clone())
                .ok_or_else(|| SyncError::Remote(format!("object not found: {key}")))
        }

        async fn download(&self, bucket: &str, key: &str, dst: &mut File) -> Result<()> {
            let body = self.read(bucket, key).await?;
            dst.write_all(&body).await?;
            dst.flush().await?;
            Ok(())
        }
    }
}
