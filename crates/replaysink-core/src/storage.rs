//! Blob storage for recording fragments.
//!
//! Each fragment is written as its own object under a key derived only from
//! its offset token. Uploading the same fragment twice writes the same key,
//! so redelivery after a failed batch overwrites instead of duplicating.

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::fragment::{Fragment, OffsetToken};
use crate::Result;
use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::prefix::PrefixStore;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info};

/// Single-fragment upload, the only storage operation the commit path needs.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Durably write one fragment. Must be safe to repeat.
    async fn upload(&self, fragment: &Fragment) -> Result<()>;
}

/// Object key for a fragment: `{prefix}/{topic}/{partition}/{offset:020}`.
///
/// The offset is zero-padded so keys sort in stream order.
pub fn storage_key(prefix: &str, token: &OffsetToken) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}/{:020}", token.topic, token.partition, token.offset)
    } else {
        format!(
            "{}/{}/{}/{:020}",
            prefix, token.topic, token.partition, token.offset
        )
    }
}

/// `BlobStorage` backed by any `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreBlobStorage {
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
}

impl ObjectStoreBlobStorage {
    /// Wrap an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Build the object store named by `config.location`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store = create_object_store(config)?;
        info!(
            location = %config.location,
            key_prefix = %config.key_prefix,
            "Blob storage initialized"
        );
        Ok(Self::new(store, config.key_prefix.clone()))
    }

    /// The underlying object store.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

#[async_trait]
impl BlobStorage for ObjectStoreBlobStorage {
    async fn upload(&self, fragment: &Fragment) -> Result<()> {
        let key = storage_key(&self.key_prefix, &fragment.offset);
        let path = ObjectPath::from(key.as_str());
        let payload = PutPayload::from_bytes(fragment.payload.clone());

        self.store.put(&path, payload).await.map_err(|e| {
            StorageError::Upload {
                key: key.clone(),
                message: e.to_string(),
            }
        })?;

        debug!(key = %key, size = fragment.size, "Uploaded fragment");
        Ok(())
    }
}

fn create_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let location = config.location.as_str();

    if location.starts_with("s3://") {
        create_s3_store(config)
    } else if location.starts_with("memory://") {
        Ok(Arc::new(InMemory::new()))
    } else if location.starts_with("gs://") {
        Err(StorageError::Unsupported("GCS storage is not supported".into()).into())
    } else if location.starts_with("az://") || location.starts_with("abfs://") {
        Err(StorageError::Unsupported("Azure storage is not supported".into()).into())
    } else if location.contains("://") {
        Err(StorageError::InvalidLocation(location.to_string()).into())
    } else {
        create_local_store(location)
    }
}

fn create_s3_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    use object_store::aws::AmazonS3Builder;

    let (bucket, prefix) = split_s3_location(&config.location)?;

    let mut builder = AmazonS3Builder::new().with_bucket_name(bucket);

    if let Some(ref region) = config.aws_region {
        builder = builder.with_region(region);
    }

    if let Some(ref access_key) = config.aws_access_key_id {
        builder = builder.with_access_key_id(access_key);
    }

    if let Some(ref secret_key) = config.aws_secret_access_key {
        builder = builder.with_secret_access_key(secret_key);
    }

    if let Some(ref endpoint) = config.s3_endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    let store = builder
        .build()
        .map_err(|e| StorageError::InvalidLocation(format!("{}: {}", config.location, e)))?;

    match prefix {
        Some(prefix) => Ok(Arc::new(PrefixStore::new(store, prefix))),
        None => Ok(Arc::new(store)),
    }
}

/// Split `s3://bucket/some/prefix` into bucket and optional prefix.
fn split_s3_location(location: &str) -> Result<(&str, Option<&str>)> {
    let rest = location
        .strip_prefix("s3://")
        .ok_or_else(|| StorageError::InvalidLocation(location.to_string()))?;

    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, Some(prefix.trim_matches('/'))),
        None => (rest, None),
    };

    if bucket.is_empty() {
        return Err(StorageError::InvalidLocation(format!("{}: missing bucket", location)).into());
    }

    Ok((bucket, prefix.filter(|p| !p.is_empty())))
}

fn create_local_store(location: &str) -> Result<Arc<dyn ObjectStore>> {
    use object_store::local::LocalFileSystem;

    let path = std::path::Path::new(location);

    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| {
            StorageError::InvalidLocation(format!(
                "Failed to create local storage directory {}: {}",
                location, e
            ))
        })?;
    }

    let store = LocalFileSystem::new_with_prefix(path).map_err(|e| {
        StorageError::InvalidLocation(format!(
            "Failed to create local file system store: {}",
            e
        ))
    })?;

    Ok(Arc::new(store))
}
