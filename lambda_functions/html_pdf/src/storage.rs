//! Object storage used by the conversion pipeline.
//!
//! The handler only sees [`ObjectStore`]; production wires in [`S3Store`] and
//! tests use [`MemoryStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tokio::sync::RwLock;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Key of the source document for `html_key`.
pub fn input_key(html_key: &str) -> String {
    format!("in/{html_key}.html")
}

/// Key the rendered PDF for `html_key` is written to.
pub fn output_key(html_key: &str) -> String {
    format!("out/{html_key}.pdf")
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },
    #[error("Failed to read s3://{bucket}/{key}: {reason}")]
    Read {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("Failed to write s3://{bucket}/{key}: {reason}")]
    Write {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("Failed to presign s3://{bucket}/{key}: {reason}")]
    Presign {
        bucket: String,
        key: String,
        reason: String,
    },
}

/// What the store reports back after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub size: usize,
    pub e_tag: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError>;

    /// Returns a GET URL for the object that stops working after `expires_in`.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;
}

#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Read {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        reason: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Read {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        Ok(data.to_vec())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let size = body.len();
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Write {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(StoredObject {
            size,
            e_tag: output.e_tag().map(str::to_string),
        })
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presign_err = |reason: String| StorageError::Presign {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason,
        };

        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| presign_err(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| presign_err(DisplayErrorContext(&e).to_string()))?;

        Ok(request.uri().to_string())
    }
}

const MEMORY_SCHEME: &str = "memory://";

/// In-process store keyed by `(bucket, key)`.
///
/// Presigned URLs look like `memory://<bucket>/<key>?X-Amz-Expires=<secs>&X-Amz-Signature=<n>`
/// and can be dereferenced with [`MemoryStore::resolve`]. Every call yields a
/// fresh signature, the way real SigV4 URLs differ between signing times.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
    signatures: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        let mut objects = self.objects.write().await;
        objects.insert((bucket.to_string(), key.to_string()), body.into());
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.read().await;
        objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    /// All keys in `bucket` starting with `prefix`, sorted.
    pub async fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let objects = self.objects.read().await;
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Fetches the object a URL from [`ObjectStore::presign_get`] points at.
    pub async fn resolve(&self, url: &str) -> Option<Vec<u8>> {
        let rest = url.strip_prefix(MEMORY_SCHEME)?;
        let path = rest.split('?').next()?;
        let (bucket, key) = path.split_once('/')?;
        self.get(bucket, key).await
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(bucket, key).await.ok_or_else(|| StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let size = body.len();
        self.insert(bucket, key, body).await;
        Ok(StoredObject { size, e_tag: None })
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let signature = self.signatures.fetch_add(1, Ordering::Relaxed);
        Ok(format!(
            "{MEMORY_SCHEME}{bucket}/{key}?X-Amz-Expires={}&X-Amz-Signature={signature:016x}",
            expires_in.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_keys() {
        assert_eq!(input_key("invoice-42"), "in/invoice-42.html");
        assert_eq!(output_key("invoice-42"), "out/invoice-42.pdf");
        assert_eq!(output_key("2024/q1/report"), "out/2024/q1/report.pdf");
    }

    #[tokio::test]
    async fn memory_store_reports_missing_objects() {
        let store = MemoryStore::new();
        let err = store.get_object("docs", "in/nope.html").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { ref key, .. } if key == "in/nope.html"));
    }

    #[tokio::test]
    async fn memory_store_presigned_urls_resolve() {
        let store = MemoryStore::new();
        let stored = store
            .put_object("docs", "out/a.pdf", b"%PDF-1.4".to_vec(), PDF_CONTENT_TYPE)
            .await
            .unwrap();
        assert_eq!(stored.size, 8);

        let ttl = Duration::from_secs(3600);
        let first = store.presign_get("docs", "out/a.pdf", ttl).await.unwrap();
        let second = store.presign_get("docs", "out/a.pdf", ttl).await.unwrap();

        assert!(first.starts_with("memory://docs/out/a.pdf?X-Amz-Expires=3600&"));
        assert_ne!(first, second);
        assert_eq!(store.resolve(&first).await.as_deref(), Some(&b"%PDF-1.4"[..]));
        assert_eq!(store.resolve("https://elsewhere/x").await, None);
    }

    #[tokio::test]
    async fn keys_filter_by_bucket_and_prefix() {
        let store = MemoryStore::new();
        store.insert("docs", "in/a.html", "a").await;
        store.insert("docs", "out/a.pdf", "a").await;
        store.insert("other", "out/b.pdf", "b").await;

        assert_eq!(store.keys("docs", "out/").await, vec!["out/a.pdf"]);
        assert!(store.keys("docs", "tmp/").await.is_empty());
    }
}
