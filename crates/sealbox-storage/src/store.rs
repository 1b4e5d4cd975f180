//! Object store abstraction.
//!
//! The crypto layers never talk to a backend directly; they go through
//! [`ObjectStore`], which models the handful of S3 semantics the engine
//! relies on: user metadata travels with the object, metadata keys are
//! case-insensitive (lowercased at the boundary, as S3 does), and byte
//! ranges are inclusive.

use std::collections::HashMap;

use async_trait::async_trait;
use sealbox_core::{SealboxError, SealboxResult};
use tokio::sync::RwLock;

/// An object fetched in full: content plus its user metadata.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

/// Metadata-only view of a stored object.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub content_length: u64,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object together with its user metadata.
    async fn put(
        &self,
        id: &str,
        bytes: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> SealboxResult<()>;

    /// Fetch an object and its metadata. Missing objects are an error.
    async fn get(&self, id: &str) -> SealboxResult<StoredObject>;

    /// Fetch bytes `[start, end]` inclusive; `end == None` reads to the end
    /// of the object. An over-long `end` is clamped.
    async fn get_range(&self, id: &str, start: u64, end: Option<u64>) -> SealboxResult<Vec<u8>>;

    async fn stat(&self, id: &str) -> SealboxResult<ObjectStat>;

    async fn exists(&self, id: &str) -> SealboxResult<bool>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, id: &str) -> SealboxResult<()>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    async fn put(
        &self,
        id: &str,
        bytes: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> SealboxResult<()> {
        (**self).put(id, bytes, metadata).await
    }

    async fn get(&self, id: &str) -> SealboxResult<StoredObject> {
        (**self).get(id).await
    }

    async fn get_range(&self, id: &str, start: u64, end: Option<u64>) -> SealboxResult<Vec<u8>> {
        (**self).get_range(id, start, end).await
    }

    async fn stat(&self, id: &str) -> SealboxResult<ObjectStat> {
        (**self).stat(id).await
    }

    async fn exists(&self, id: &str) -> SealboxResult<bool> {
        (**self).exists(id).await
    }

    async fn delete(&self, id: &str) -> SealboxResult<()> {
        (**self).delete(id).await
    }
}

fn lowercase_keys(metadata: HashMap<String, String>) -> HashMap<String, String> {
    metadata
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect()
}

/// In-memory [`ObjectStore`] used by the test suites and local tooling.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        id: &str,
        bytes: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> SealboxResult<()> {
        self.objects.write().await.insert(
            id.to_string(),
            StoredObject {
                bytes,
                metadata: lowercase_keys(metadata),
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> SealboxResult<StoredObject> {
        self.objects
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SealboxError::Storage(format!("object not found: {id}")))
    }

    async fn get_range(&self, id: &str, start: u64, end: Option<u64>) -> SealboxResult<Vec<u8>> {
        let objects = self.objects.read().await;
        let object = objects
            .get(id)
            .ok_or_else(|| SealboxError::Storage(format!("object not found: {id}")))?;
        let len = object.bytes.len() as u64;
        if start >= len {
            return Err(SealboxError::Storage(format!(
                "range start {start} is beyond the {len}-byte object {id}"
            )));
        }
        let last = end.map_or(len - 1, |e| e.min(len - 1));
        Ok(object.bytes[start as usize..=last as usize].to_vec())
    }

    async fn stat(&self, id: &str) -> SealboxResult<ObjectStat> {
        let objects = self.objects.read().await;
        let object = objects
            .get(id)
            .ok_or_else(|| SealboxError::Storage(format!("object not found: {id}")))?;
        Ok(ObjectStat {
            content_length: object.bytes.len() as u64,
            metadata: object.metadata.clone(),
        })
    }

    async fn exists(&self, id: &str) -> SealboxResult<bool> {
        Ok(self.objects.read().await.contains_key(id))
    }

    async fn delete(&self, id: &str) -> SealboxResult<()> {
        self.objects.write().await.remove(id);
        Ok(())
    }
}
