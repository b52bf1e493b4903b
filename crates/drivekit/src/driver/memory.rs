//! In-memory storage driver.
//!
//! A flat `key -> object` map with the same virtual-directory semantics
//! as the S3 driver: directories exist only as shared key prefixes.
//! Registered under the built-in driver type `"memory"`; useful for ad
//! hoc disks and as the backend for entity-layer tests. It advertises
//! no presigned/public URL capability, so it also exercises the
//! manager's capability-mismatch path.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use super::{
    ByteStream, DriverCapabilities, ObjectKind, ObjectMetadata, StorageDriver, StorageItem,
    StorageStat, one_chunk, slice_range,
};
use crate::error::{Error, Result, StorageOp};

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
    #[allow(dead_code)] // kept for parity with backend metadata
    content_type: Option<String>,
}

/// Flat in-memory keyspace.
///
/// BTreeMap keeps keys in lexicographic order, matching the listing
/// order an object store returns.
pub struct MemoryDriver {
    separator: char,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_separator('/')
    }

    pub fn with_separator(separator: char) -> Self {
        Self {
            separator,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert an object directly, bypassing any caching layers above.
    /// Lets tests model backend state this instance has not observed.
    pub fn seed(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            key.into(),
            StoredObject {
                data: data.into(),
                modified: Utc::now(),
                content_type: None,
            },
        );
    }

    /// Remove an object directly, bypassing any caching layers above.
    pub fn evict(&self, key: &str) {
        self.objects.write().unwrap().remove(key);
    }

    /// Whether an object is physically stored under exactly this key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.objects.read().unwrap().contains_key(key)
    }

    /// All stored keys, in listing order.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().unwrap().keys().cloned().collect()
    }

    fn items_under(&self, prefix: &str, recursive: bool) -> Vec<StorageItem> {
        let sep = self.separator;
        let objects = self.objects.read().unwrap();
        let mut items = Vec::new();
        let mut announced: BTreeSet<String> = BTreeSet::new();

        for (key, object) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let rel = &key[prefix.len()..];
            // Skip the prefix itself and any zero-byte directory markers.
            if rel.is_empty() || rel.ends_with(sep) {
                continue;
            }
            if recursive {
                // Announce each virtual directory once, before the first
                // file beneath it.
                if let Some((dirs, _file)) = rel.rsplit_once(sep) {
                    let mut acc = String::new();
                    for segment in dirs.split(sep) {
                        if acc.is_empty() {
                            acc.push_str(segment);
                        } else {
                            acc.push(sep);
                            acc.push_str(segment);
                        }
                        if announced.insert(acc.clone()) {
                            items.push(StorageItem::directory(acc.clone()));
                        }
                    }
                }
                items.push(StorageItem::file(
                    rel,
                    Some(object.data.len() as u64),
                    Some(object.modified),
                ));
            } else {
                match rel.split_once(sep) {
                    // Deeper entries collapse into one directory entry.
                    Some((first, _)) => {
                        if announced.insert(first.to_string()) {
                            items.push(StorageItem::directory(first));
                        }
                    }
                    None => items.push(StorageItem::file(
                        rel,
                        Some(object.data.len() as u64),
                        Some(object.modified),
                    )),
                }
            }
        }
        items
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            presigned_urls: false,
            public_urls: false,
            server_side_copy: true,
            batch_delete: false,
        }
    }

    async fn stat(&self, key: &str) -> Result<StorageStat> {
        let objects = self.objects.read().unwrap();
        if key.is_empty() {
            return Ok(if objects.is_empty() {
                StorageStat::missing()
            } else {
                StorageStat {
                    kind: ObjectKind::Directory,
                    size: 0,
                    modified: None,
                }
            });
        }
        if let Some(object) = objects.get(key) {
            return Ok(StorageStat {
                kind: ObjectKind::File,
                size: object.data.len() as u64,
                modified: Some(object.modified),
            });
        }
        let dir_prefix = format!("{key}{}", self.separator);
        let is_dir = objects
            .range(dir_prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&dir_prefix));
        Ok(if is_dir {
            StorageStat {
                kind: ObjectKind::Directory,
                size: 0,
                modified: None,
            }
        } else {
            StorageStat::missing()
        })
    }

    fn list(&self, prefix: &str, recursive: bool) -> BoxStream<'_, Result<StorageItem>> {
        let items = self.items_under(prefix, recursive);
        futures_util::stream::iter(items.into_iter().map(Ok)).boxed()
    }

    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                modified: Utc::now(),
                content_type: metadata.and_then(|m| m.content_type.clone()),
            },
        );
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<ByteStream> {
        let objects = self.objects.read().unwrap();
        match objects.get(key) {
            Some(object) => Ok(one_chunk(object.data.clone())),
            None => Err(Error::storage(StorageOp::Read, key, "object not found")),
        }
    }

    // Serve ranges from the stored buffer instead of replaying a full
    // download. `Bytes::slice` is a refcount bump, not a copy.
    async fn download_range(
        &self,
        key: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<ByteStream> {
        let objects = self.objects.read().unwrap();
        match objects.get(key) {
            Some(object) => Ok(one_chunk(slice_range(object.data.clone(), start, end))),
            None => Err(Error::storage(StorageOp::Read, key, "object not found")),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // Flat stores treat deleting a missing key as success.
        self.objects.write().unwrap().remove(key);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        match objects.get(from).cloned() {
            Some(object) => {
                objects.insert(to.to_string(), object);
                Ok(())
            }
            None => Err(Error::storage(StorageOp::Copy, from, "source not found")),
        }
    }
}
