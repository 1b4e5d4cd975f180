//! OpenDAL Operator factory and the S3-backed [`ObjectStore`].

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use opendal::{ErrorKind, Operator};
use sealbox_core::{SealboxError, SealboxResult, StorageConfig};

use crate::store::{ObjectStat, ObjectStore, StoredObject};

/// Build an OpenDAL Operator for an S3-compatible endpoint.
///
/// Uses path-style addressing (default in opendal 0.55), which is what
/// MinIO and SeaweedFS expect.
///
/// If `enforce_tls` is set and the endpoint uses HTTP, this returns an
/// error. Otherwise a warning is logged for non-HTTPS endpoints.
pub fn build_operator(
    cfg: &StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> anyhow::Result<Operator> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                cfg.endpoint
            );
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
        );
    }

    // opendal 0.55: S3 builder uses a consuming pattern (methods take `self`)
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(access_key_id)
        .secret_access_key(secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(cfg.max_retries as usize)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

fn map_err(id: &str, err: opendal::Error) -> SealboxError {
    if err.kind() == ErrorKind::NotFound {
        SealboxError::Storage(format!("object not found: {id}"))
    } else {
        SealboxError::Storage(format!("{id}: {err}"))
    }
}

/// [`ObjectStore`] over any OpenDAL backend.
pub struct OpendalStore {
    op: Operator,
}

impl OpendalStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// The envelope lives in user metadata in `ObjectMetadata` mode, so a
    /// backend that silently drops it would strand every object it stores.
    fn require_user_metadata(&self) -> SealboxResult<()> {
        if self.op.info().full_capability().write_with_user_metadata {
            Ok(())
        } else {
            Err(SealboxError::Storage(format!(
                "backend {} cannot persist user metadata; use instruction-file envelope storage",
                self.op.info().scheme()
            )))
        }
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    async fn put(
        &self,
        id: &str,
        bytes: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> SealboxResult<()> {
        if metadata.is_empty() {
            self.op.write(id, bytes).await.map_err(|e| map_err(id, e))?;
        } else {
            self.require_user_metadata()?;
            self.op
                .write_with(id, bytes)
                .user_metadata(
                    metadata
                        .into_iter()
                        .map(|(k, v)| (k.to_ascii_lowercase(), v)),
                )
                .await
                .map_err(|e| map_err(id, e))?;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> SealboxResult<StoredObject> {
        let stat = self.stat(id).await?;
        let buffer = self.op.read(id).await.map_err(|e| map_err(id, e))?;
        Ok(StoredObject {
            bytes: buffer.to_vec(),
            metadata: stat.metadata,
        })
    }

    async fn get_range(&self, id: &str, start: u64, end: Option<u64>) -> SealboxResult<Vec<u8>> {
        let read = self.op.read_with(id);
        let buffer = match end {
            Some(last) => read.range(start..last + 1),
            None => read.range(start..),
        }
        .await
        .map_err(|e| map_err(id, e))?;
        Ok(buffer.to_vec())
    }

    async fn stat(&self, id: &str) -> SealboxResult<ObjectStat> {
        let meta = self.op.stat(id).await.map_err(|e| map_err(id, e))?;
        let metadata = meta
            .user_metadata()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ObjectStat {
            content_length: meta.content_length(),
            metadata,
        })
    }

    async fn exists(&self, id: &str) -> SealboxResult<bool> {
        self.op.exists(id).await.map_err(|e| map_err(id, e))
    }

    async fn delete(&self, id: &str) -> SealboxResult<()> {
        self.op.delete(id).await.map_err(|e| map_err(id, e))
    }
}
