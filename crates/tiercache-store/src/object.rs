//! # Object Store Port
//!
//! The capability-scoped client the remote tier is built on. Anything that
//! speaks the S3 object model (bucket, keys, user metadata, storage class,
//! lifecycle rules) can implement [`ObjectStore`]. Credentials and request
//! signing stay inside the implementation.
//!
//! Implementations classify their own failures into
//! [`TransferClass`](crate::TransferClass); the cache decides what to retry.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiercache_core::StorageClass;
use url::Url;

use crate::error::TransferError;

/// A single-object write.
#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// User metadata. Keys are lowercase.
    pub metadata: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub storage_class: StorageClass,
    pub server_side_encryption: bool,
}

/// What a head or list call reports about an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub storage_class: StorageClass,
    pub content_type: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    /// Token for the following page; `None` on the last page.
    pub next_token: Option<String>,
}

/// Transition-and-expiration rule applied to every key under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRule {
    pub id: String,
    pub prefix: String,
    pub transition_days: u32,
    pub transition_class: StorageClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<u32>,
}

/// Bucket-wide protection flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSettings {
    pub versioning: bool,
    pub encryption: bool,
}

/// An S3-compatible object storage client.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for log output.
    fn name(&self) -> &str;

    /// Write an object, replacing any existing one under the key.
    async fn put_object(&self, request: PutObject) -> Result<ObjectSummary, TransferError>;

    /// Read an object's body. Absent objects fail with `NotFound`.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, TransferError>;

    /// Object attributes, or `None` if absent.
    async fn head_object(&self, key: &str) -> Result<Option<ObjectSummary>, TransferError>;

    /// Delete an object. Deleting an absent key succeeds.
    async fn delete_object(&self, key: &str) -> Result<(), TransferError>;

    /// One page of keys under `prefix` in lexicographic order.
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, TransferError>;

    /// A URL granting read access to `key` for `ttl`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<Url, TransferError>;

    async fn get_lifecycle(&self) -> Result<Vec<LifecycleRule>, TransferError>;

    /// Replace the bucket's lifecycle configuration.
    async fn put_lifecycle(&self, rules: Vec<LifecycleRule>) -> Result<(), TransferError>;

    async fn put_bucket_settings(&self, settings: BucketSettings) -> Result<(), TransferError>;
}

/// Page over a sorted key sequence with "last key returned" tokens.
///
/// Shared by the in-crate backends so their pagination behaves identically.
pub(crate) fn paginate(
    mut sorted: Vec<ObjectSummary>,
    continuation: Option<&str>,
    max_keys: usize,
) -> ListPage {
    if let Some(after) = continuation {
        sorted.retain(|o| o.key.as_str() > after);
    }
    let max_keys = max_keys.max(1);
    let has_more = sorted.len() > max_keys;
    sorted.truncate(max_keys);
    let next_token = if has_more {
        sorted.last().map(|o| o.key.clone())
    } else {
        None
    };
    ListPage {
        objects: sorted,
        next_token,
    }
}

/// `X-Amz-*` style query for presigned URLs issued by in-crate backends.
pub(crate) fn append_presign_query(url: &mut Url, ttl: Duration, issued: DateTime<Utc>) {
    url.query_pairs_mut()
        .append_pair("X-Amz-Date", &issued.format("%Y%m%dT%H%M%SZ").to_string())
        .append_pair("X-Amz-Expires", &ttl.as_secs().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(key: &str) -> ObjectSummary {
        ObjectSummary {
            key: key.to_string(),
            size: 1,
            last_modified: Utc::now(),
            storage_class: StorageClass::Standard,
            content_type: "application/octet-stream".to_string(),
            metadata: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn paginate_walks_all_keys_once() {
        let all: Vec<_> = ["a", "b", "c", "d", "e"].iter().map(|k| summary(k)).collect();
        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = paginate(all.clone(), token.as_deref(), 2);
            seen.extend(page.objects.iter().map(|o| o.key.clone()));
            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn paginate_exact_fit_has_no_token() {
        let all: Vec<_> = ["a", "b"].iter().map(|k| summary(k)).collect();
        let page = paginate(all, None, 2);
        assert_eq!(page.objects.len(), 2);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn presign_query_carries_expiry() {
        let mut url = Url::parse("memory://bucket/key").unwrap();
        append_presign_query(&mut url, Duration::from_secs(3600), Utc::now());
        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("X-Amz-Expires").map(String::as_str), Some("3600"));
        assert!(pairs.contains_key("X-Amz-Date"));
    }
}
