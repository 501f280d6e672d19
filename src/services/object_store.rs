//! The object store seam.
//!
//! [`ObjectStoreClient`] is the narrow set of S3 calls the repository makes.
//! The production implementation is [`super::s3_client::S3ObjectStore`];
//! tests use the recording mock in [`testing`].

use crate::models::{
    listing::{ObjectEntry, PrefixEntry},
    storage_class::StorageClass,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{io, time::Duration};
use thiserror::Error;

/// Failure reported by the store. Kinds are deliberately not distinguished.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Body of a downloaded object.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

/// One delimited list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: String,
    pub continuation_token: Option<String>,
}

/// One page of a delimited list response.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub prefixes: Vec<PrefixEntry>,
    pub objects: Vec<ObjectEntry>,
    /// Set while more pages remain.
    pub next_continuation_token: Option<String>,
}

/// Upload of one in-memory object.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub storage_class: StorageClass,
}

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Fetch one page of a prefix listing.
    async fn list_objects(&self, request: ListRequest) -> StoreResult<ListPage>;

    /// Open an object body for streaming.
    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody>;

    /// Sign a time-limited GET URL, optionally overriding Content-Disposition.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        content_disposition: Option<String>,
    ) -> StoreResult<String>;

    /// Check the bucket exists and is reachable with the configured credentials.
    async fn head_bucket(&self, bucket: &str) -> StoreResult<()>;

    async fn put_object(&self, request: PutRequest) -> StoreResult<()>;
}

#[cfg(test)]
pub mod testing {
    //! An in-memory [`ObjectStoreClient`] that records every call.

    use super::*;
    use futures::stream;
    use std::{
        collections::{BTreeMap, HashSet},
        sync::Mutex,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        List(ListRequest),
        Get { bucket: String, key: String },
        Presign {
            bucket: String,
            key: String,
            ttl: Duration,
            content_disposition: Option<String>,
        },
        Head(String),
        Put { key: String, storage_class: StorageClass, len: usize },
    }

    /// Serves canned list pages and object bodies.
    ///
    /// Pages are keyed by the requested prefix; each page after the first is
    /// reached through continuation token `"<index>"`.
    #[derive(Default)]
    pub struct MockStore {
        pages: BTreeMap<String, Vec<ListPage>>,
        bodies: BTreeMap<String, Vec<u8>>,
        fail_with: Option<String>,
        fail_puts: HashSet<String>,
        calls: Mutex<Vec<Call>>,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store that fails every call with `message`.
        pub fn failing(message: &str) -> Self {
            Self {
                fail_with: Some(message.to_string()),
                ..Self::default()
            }
        }

        /// Register the pages returned for `prefix`, in order.
        pub fn with_pages(mut self, prefix: &str, mut pages: Vec<ListPage>) -> Self {
            let count = pages.len();
            for (index, page) in pages.iter_mut().enumerate() {
                page.next_continuation_token = (index + 1 < count).then(|| (index + 1).to_string());
            }
            self.pages.insert(prefix.to_string(), pages);
            self
        }

        /// Register a single page for `prefix`.
        pub fn with_listing(
            self,
            prefix: &str,
            prefixes: &[&str],
            objects: &[(&str, u64)],
        ) -> Self {
            self.with_pages(prefix, vec![page(prefixes, objects)])
        }

        pub fn with_body(mut self, key: &str, body: &[u8]) -> Self {
            self.bodies.insert(key.to_string(), body.to_vec());
            self
        }

        pub fn failing_put(mut self, key: &str) -> Self {
            self.fail_puts.insert(key.to_string());
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn record(&self, call: Call) -> StoreResult<()> {
            self.calls.lock().unwrap().push(call);
            match &self.fail_with {
                Some(message) => Err(StoreError::new(message.clone())),
                None => Ok(()),
            }
        }
    }

    /// Build one list page from prefixes and `(key, size)` pairs.
    pub fn page(prefixes: &[&str], objects: &[(&str, u64)]) -> ListPage {
        ListPage {
            prefixes: prefixes
                .iter()
                .map(|p| PrefixEntry {
                    prefix: p.to_string(),
                })
                .collect(),
            objects: objects
                .iter()
                .map(|(key, size)| ObjectEntry {
                    key: key.to_string(),
                    size: *size,
                    last_modified: None,
                })
                .collect(),
            next_continuation_token: None,
        }
    }

    #[async_trait]
    impl ObjectStoreClient for MockStore {
        async fn list_objects(&self, request: ListRequest) -> StoreResult<ListPage> {
            self.record(Call::List(request.clone()))?;
            let index = match &request.continuation_token {
                Some(token) => token
                    .parse::<usize>()
                    .map_err(|_| StoreError::new("bad continuation token"))?,
                None => 0,
            };
            Ok(self
                .pages
                .get(&request.prefix)
                .and_then(|pages| pages.get(index))
                .cloned()
                .unwrap_or_default())
        }

        async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
            self.record(Call::Get {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
            let body = self
                .bodies
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::new(format!("NoSuchKey: {}", key)))?;
            // Two chunks, so writers see more than one frame.
            let mid = body.len() / 2;
            let chunks = vec![
                Ok(Bytes::copy_from_slice(&body[..mid])),
                Ok(Bytes::copy_from_slice(&body[mid..])),
            ];
            Ok(Box::pin(stream::iter(chunks)))
        }

        async fn presign_get(
            &self,
            bucket: &str,
            key: &str,
            ttl: Duration,
            content_disposition: Option<String>,
        ) -> StoreResult<String> {
            self.record(Call::Presign {
                bucket: bucket.to_string(),
                key: key.to_string(),
                ttl,
                content_disposition,
            })?;
            Ok(format!(
                "https://{}.s3.amazonaws.com/{}?X-Amz-Expires={}",
                bucket,
                key,
                ttl.as_secs()
            ))
        }

        async fn head_bucket(&self, bucket: &str) -> StoreResult<()> {
            self.record(Call::Head(bucket.to_string()))
        }

        async fn put_object(&self, request: PutRequest) -> StoreResult<()> {
            self.record(Call::Put {
                key: request.key.clone(),
                storage_class: request.storage_class,
                len: request.body.len(),
            })?;
            if self.fail_puts.contains(&request.key) {
                return Err(StoreError::new(format!("AccessDenied: {}", request.key)));
            }
            Ok(())
        }
    }
}
