//! Shared test doubles.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use s3_sync::error::{Result, SyncError};
use s3_sync::sync::{ObjectStore, RemoteEntry};

#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub body: Vec<u8>,
    pub mod_time: DateTime<Utc>,
}

/// In-memory object store for driving syncs in tests.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<Vec<StoredObject>>,
    pub list_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, body: &[u8], mod_time: DateTime<Utc>) -> Self {
        self.insert(key, body, mod_time);
        self
    }

    pub fn insert(&self, key: &str, body: &[u8], mod_time: DateTime<Utc>) {
        let mut objects = self.objects.lock().unwrap();
        objects.retain(|o| o.key != key);
        objects.push(StoredObject {
            key: key.to_string(),
            body: body.to_vec(),
            mod_time,
        });
        objects.sort_by(|a, b| a.key.cmp(&b.key));
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().retain(|o| o.key != key);
    }

    fn find(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.key == key)
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, _bucket: &str, prefix: &str) -> Result<Vec<RemoteEntry>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.key.starts_with(prefix))
            .map(|o| RemoteEntry {
                key: o.key.clone(),
                size: o.body.len() as u64,
                last_modified: o.mod_time,
            })
            .collect())
    }

    async fn read(&self, _bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.find(key)
            .map(|o| o.body)
            .ok_or_else(|| SyncError::Remote(format!("object not found: {key}")))
    }

    async fn download(&self, bucket: &str, key: &str, dst: &mut File) -> Result<()> {
        let body = self.read(bucket, key).await?;
        dst.write_all(&body).await?;
        dst.flush().await?;
        Ok(())
    }
}
