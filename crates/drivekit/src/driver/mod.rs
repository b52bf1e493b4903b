//! Storage driver abstraction.
//!
//! [`StorageDriver`] is the contract any backend must satisfy to plug
//! into the entity layer: stat, list, upload, download, delete, copy,
//! and (optionally) presigned/public URLs. Two implementations ship
//! with the crate:
//! - [`S3Driver`]: an S3-compatible backend reached over HTTP
//! - [`MemoryDriver`]: a flat in-memory keyspace for ad hoc disks
//!
//! Drivers speak backend keys, never logical paths: prefix folding and
//! the consistency cache live a layer up. Drivers perform no internal
//! retry; retry policy, if any, belongs to the caller.

mod memory;
mod s3;
mod sigv4;

pub use memory::MemoryDriver;
pub use s3::S3Driver;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::config::Visibility;
use crate::error::Result;

/// Stream of body bytes, produced by downloads and consumed by uploads.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// What kind of thing a key resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    /// A virtual directory: at least one object's key starts with this
    /// path plus the separator.
    Directory,
    Missing,
}

/// Generic metadata a driver returns for a path probe.
#[derive(Debug, Clone)]
pub struct StorageStat {
    pub kind: ObjectKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl StorageStat {
    pub fn missing() -> Self {
        Self {
            kind: ObjectKind::Missing,
            size: 0,
            modified: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == ObjectKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == ObjectKind::Directory
    }

    pub fn is_missing(&self) -> bool {
        self.kind == ObjectKind::Missing
    }
}

/// One entry from a backend listing, already relativized to the query
/// prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageItem {
    pub relative_path: String,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl StorageItem {
    pub fn directory(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            is_directory: true,
            size: None,
            modified: None,
        }
    }

    pub fn file(
        relative_path: impl Into<String>,
        size: Option<u64>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            is_directory: false,
            size,
            modified,
        }
    }
}

/// Optional per-object metadata applied on upload.
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    /// Override the disk's default visibility for this object.
    pub visibility: Option<Visibility>,
    /// Custom key/value pairs, stored as `x-amz-meta-*` on S3.
    pub custom: HashMap<String, String>,
}

/// Everything an external HTTP client needs to perform a direct upload.
#[derive(Debug, Clone)]
pub struct PresignedUpload {
    pub url: String,
    /// Headers the client must send with the upload request.
    pub headers: HashMap<String, String>,
    /// Form fields for POST-policy style uploads; empty for plain
    /// presigned PUT.
    pub fields: HashMap<String, String>,
}

/// Capability advertisement used by the disk manager's negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverCapabilities {
    pub presigned_urls: bool,
    pub public_urls: bool,
    pub server_side_copy: bool,
    pub batch_delete: bool,
}

impl DriverCapabilities {
    /// The set a disk must satisfy to serve as a "cloud" disk.
    pub fn cloud() -> Self {
        Self {
            presigned_urls: true,
            public_urls: true,
            server_side_copy: false,
            batch_delete: false,
        }
    }

    /// Name of the first capability in `required` that `self` lacks.
    pub fn missing_from(&self, required: &DriverCapabilities) -> Option<&'static str> {
        if required.presigned_urls && !self.presigned_urls {
            Some("presigned_urls")
        } else if required.public_urls && !self.public_urls {
            Some("public_urls")
        } else if required.server_side_copy && !self.server_side_copy {
            Some("server_side_copy")
        } else if required.batch_delete && !self.batch_delete {
            Some("batch_delete")
        } else {
            None
        }
    }
}

/// Backend-facing storage contract.
///
/// All paths are backend keys without a leading separator. Every call
/// either succeeds or fails with a backend-originated error; drivers
/// never retry internally.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// What this driver can do, for the manager's capability negotiation.
    fn capabilities(&self) -> DriverCapabilities;

    /// Idempotent backend provisioning (e.g. create the bucket when
    /// absent and the config opts in). Defaults to a no-op.
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Best-known type for a key: exact match first (file semantics),
    /// then one bounded listing probe for a virtual directory. At most
    /// two backend round-trips, with early exit.
    async fn stat(&self, key: &str) -> Result<StorageStat>;

    /// Stream entries under `prefix`.
    ///
    /// When not recursive, only one path segment below the prefix is
    /// yielded: deeper entries collapse into a single directory entry.
    /// When recursive, each virtual directory is yielded exactly once,
    /// before the first file beneath it. The stream is restartable only
    /// by re-invoking, not resumable mid-stream.
    fn list(&self, prefix: &str, recursive: bool) -> BoxStream<'_, Result<StorageItem>>;

    /// Full-overwrite upload; no partial writes or appends at this layer.
    async fn upload(&self, key: &str, body: Bytes, metadata: Option<&ObjectMetadata>)
    -> Result<()>;

    /// Streaming upload. The default buffers the stream and delegates to
    /// [`upload`](Self::upload); drivers with native streaming override.
    async fn upload_stream(
        &self,
        key: &str,
        body: ByteStream,
        _length: Option<u64>,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        let bytes = collect(body).await?;
        self.upload(key, bytes, metadata).await
    }

    async fn download(&self, key: &str) -> Result<ByteStream>;

    /// Byte-range download, `start..=end` inclusive with either side
    /// open. The default falls back to a full download sliced in memory,
    /// for backends with no native range support.
    async fn download_range(
        &self,
        key: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<ByteStream> {
        let bytes = collect(self.download(key).await?).await?;
        let sliced = slice_range(bytes, start, end);
        Ok(one_chunk(sliced))
    }

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete many keys, batching when the backend supports it. The
    /// default loops single deletes and stops at the first failure.
    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Server-side copy when available.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Public URL for a key, or `None` when the backend/config does not
    /// expose public URLs.
    fn public_url(&self, _key: &str) -> Option<String> {
        None
    }

    /// Presigned download URL, or `Ok(None)` when unsupported.
    fn presign_download(&self, _key: &str, _expires_in: Duration) -> Result<Option<String>> {
        Ok(None)
    }

    /// Presigned upload, or `Ok(None)` when unsupported.
    fn presign_upload(
        &self,
        _key: &str,
        _expires_in: Duration,
        _metadata: Option<&ObjectMetadata>,
    ) -> Result<Option<PresignedUpload>> {
        Ok(None)
    }
}

/// Drain a byte stream into one contiguous buffer.
pub async fn collect(mut stream: ByteStream) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Wrap a single buffer as a one-chunk stream.
pub fn one_chunk(bytes: Bytes) -> ByteStream {
    futures_util::stream::once(async move { Ok(bytes) }).boxed()
}

fn slice_range(bytes: Bytes, start: Option<u64>, end: Option<u64>) -> Bytes {
    let len = bytes.len() as u64;
    let start = start.unwrap_or(0).min(len);
    // Inclusive end, clamped to the last byte.
    let end = end.map_or(len, |e| (e + 1).min(len));
    if start >= end {
        return Bytes::new();
    }
    bytes.slice(start as usize..end as usize)
}
