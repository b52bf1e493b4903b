//! Filesystem entities over a storage driver.
//!
//! A [`Disk`] binds a driver, its configuration, and a per-instance
//! consistency cache, and hands out path-bound entities: [`File`],
//! [`Directory`], and [`SymLink`]. Entities are cheap handles (an `Arc`
//! and a path); holding one implies nothing about backend state.
//!
//! Logical paths are absolute (`/docs/a.txt`) and resolved against the
//! disk's current directory; the disk folds its root prefix in front
//! before talking to the driver, so callers never see backend keys.
//!
//! When the disk is configured with `throw_on_error = false`,
//! recoverable storage failures on query-style operations degrade to
//! sentinel results (missing, empty, false, no-op). Copy, move, and
//! streaming reads always propagate: they have no honest sentinel.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::cache::{CacheAnswer, ConsistencyCache};
use crate::config::DiskConfig;
use crate::driver::{
    ByteStream, DriverCapabilities, ObjectMetadata, PresignedUpload, StorageDriver, StorageStat,
    collect,
};
use crate::error::{Error, Result, StorageOp};
use crate::path;

/// One configured filesystem instance: driver + config + cache.
///
/// Construct via [`DiskManager`](crate::manager::DiskManager) for named
/// disks, or directly from a driver for ad hoc use. The cache is owned
/// per instance: two disks over the same backend do not share recency
/// information.
pub struct Disk {
    driver: Arc<dyn StorageDriver>,
    config: DiskConfig,
    cache: ConsistencyCache,
    cwd: RwLock<String>,
}

impl Disk {
    pub fn new(driver: Arc<dyn StorageDriver>, config: DiskConfig) -> Self {
        Self::with_cache_ttl(driver, config, crate::cache::DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_ttl(
        driver: Arc<dyn StorageDriver>,
        config: DiskConfig,
        cache_ttl: Duration,
    ) -> Self {
        let root = config_root(&config);
        Self {
            driver,
            config,
            cache: ConsistencyCache::new(cache_ttl),
            cwd: RwLock::new(root),
        }
    }

    pub fn config(&self) -> &DiskConfig {
        &self.config
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        self.driver.capabilities()
    }

    /// Idempotent backend provisioning; see
    /// [`StorageDriver::ensure_ready`].
    pub async fn ensure_ready(&self) -> Result<()> {
        self.driver.ensure_ready().await
    }

    /// Current directory all relative paths resolve against.
    pub fn current_dir(&self) -> String {
        self.cwd.read().unwrap().clone()
    }

    /// Change the current directory. Purely logical: nothing is checked
    /// against the backend.
    pub fn set_current_dir(&self, path: &str) {
        let resolved = self.resolve(path);
        *self.cwd.write().unwrap() = resolved;
    }

    /// Resolve a caller path to a logical absolute path.
    pub fn resolve(&self, input: &str) -> String {
        let cwd = self.cwd.read().unwrap().clone();
        path::resolve(&cwd, input, self.config.separator)
    }

    /// Backend key for a logical absolute path: root prefix folded in,
    /// no surrounding separators.
    fn key_for(&self, logical: &str) -> String {
        path::join(&self.config.prefix, logical, self.config.separator)
    }

    pub fn file(self: &Arc<Self>, path: &str) -> File {
        File {
            disk: Arc::clone(self),
            path: self.resolve(path),
        }
    }

    pub fn dir(self: &Arc<Self>, path: &str) -> Directory {
        Directory {
            disk: Arc::clone(self),
            path: self.resolve(path),
        }
    }

    pub fn sym_link(self: &Arc<Self>, path: &str) -> SymLink {
        SymLink {
            disk: Arc::clone(self),
            path: self.resolve(path),
        }
    }

    /// Apply the disk's error policy: with `throw_on_error = false`, a
    /// recoverable failure becomes the sentinel `fallback`.
    fn soften<T>(&self, result: Result<T>, fallback: impl FnOnce() -> T) -> Result<T> {
        match result {
            Err(err) if !self.config.throw_on_error && err.is_recoverable() => {
                if self.config.report_errors {
                    tracing::warn!(error = %err, "storage error degraded to sentinel");
                }
                Ok(fallback())
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("driver", &self.config.driver)
            .field("prefix", &self.config.prefix)
            .finish()
    }
}

fn config_root(config: &DiskConfig) -> String {
    config.separator.to_string()
}

/// A file handle bound to one logical path on one disk.
#[derive(Clone)]
pub struct File {
    disk: Arc<Disk>,
    path: String,
}

impl File {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path segment.
    pub fn name(&self) -> &str {
        let sep = self.disk.config.separator;
        path::trim(&self.path, sep)
            .rsplit(sep)
            .next()
            .unwrap_or_default()
    }

    fn key(&self) -> String {
        self.disk.key_for(&self.path)
    }

    /// Whether a real object exists under this exact key. Recent local
    /// writes and deletes answer from the cache without a backend call.
    pub async fn exists(&self) -> Result<bool> {
        let key = self.key();
        match self.disk.cache.answer(&key) {
            CacheAnswer::Created => return Ok(true),
            CacheAnswer::Deleted => return Ok(false),
            CacheAnswer::Unknown => {}
        }
        let result = self.disk.driver.stat(&key).await.map(|s| s.is_file());
        self.disk.soften(result, || false)
    }

    /// Backend metadata for this path. A locally deleted file reports
    /// missing even if the backend still shows it.
    pub async fn stat(&self) -> Result<StorageStat> {
        let key = self.key();
        if self.disk.cache.answer(&key) == CacheAnswer::Deleted {
            return Ok(StorageStat::missing());
        }
        let result = self.disk.driver.stat(&key).await;
        self.disk.soften(result, StorageStat::missing)
    }

    /// Read the whole object into memory.
    pub async fn read(&self) -> Result<Bytes> {
        let key = self.key();
        let result = match self.disk.driver.download(&key).await {
            Ok(stream) => collect(stream).await,
            Err(err) => Err(err),
        };
        self.disk.soften(result, Bytes::new)
    }

    /// Stream the object without buffering. Never softened: a broken
    /// stream has no sentinel.
    pub async fn read_stream(&self) -> Result<ByteStream> {
        self.disk.driver.download(&self.key()).await
    }

    /// Read `start..=end` (either side open) into memory.
    pub async fn read_range(&self, start: Option<u64>, end: Option<u64>) -> Result<Bytes> {
        let key = self.key();
        let result = match self.disk.driver.download_range(&key, start, end).await {
            Ok(stream) => collect(stream).await,
            Err(err) => Err(err),
        };
        self.disk.soften(result, Bytes::new)
    }

    /// Full-overwrite write with the disk's default metadata.
    pub async fn write(&self, contents: impl Into<Bytes> + Send) -> Result<()> {
        self.write_with(contents, &ObjectMetadata::default()).await
    }

    /// Full-overwrite write with explicit per-object metadata.
    pub async fn write_with(
        &self,
        contents: impl Into<Bytes> + Send,
        metadata: &ObjectMetadata,
    ) -> Result<()> {
        let key = self.key();
        let result = self
            .disk
            .driver
            .upload(&key, contents.into(), Some(metadata))
            .await;
        if result.is_ok() {
            self.register_created(&key);
        }
        self.disk.soften(result, || ())
    }

    /// Streaming write. Never softened.
    pub async fn write_stream(&self, body: ByteStream, length: Option<u64>) -> Result<()> {
        let key = self.key();
        self.disk
            .driver
            .upload_stream(&key, body, length, None)
            .await?;
        self.register_created(&key);
        Ok(())
    }

    /// Delete the object. Deleting a missing file is a success, matching
    /// flat-store semantics.
    pub async fn delete(&self) -> Result<()> {
        let key = self.key();
        let result = self.disk.driver.delete(&key).await;
        if result.is_ok() {
            self.disk.cache.record_deleted(&key);
        }
        self.disk.soften(result, || ())
    }

    /// Server-side copy to another path on the same disk. Never
    /// softened: callers must know whether the destination exists.
    pub async fn copy_to(&self, dest: &str) -> Result<File> {
        let dest = self.disk.file(dest);
        let dest_key = dest.key();
        self.disk.driver.copy(&self.key(), &dest_key).await?;
        dest.register_created(&dest_key);
        Ok(dest)
    }

    /// Move by copy-then-delete. The two steps are not atomic, and the
    /// report says so: a failed copy is an error (nothing changed), a
    /// failed delete after a successful copy returns `Ok` with
    /// `source_removed = false` and the delete failure attached, because
    /// the destination now holds the data.
    pub async fn move_to(&self, dest: &str) -> Result<MoveReport> {
        let destination = self.copy_to(dest).await?;
        match self.delete_for_move().await {
            Ok(()) => Ok(MoveReport {
                destination,
                source_removed: true,
                failure: None,
            }),
            Err(err) => Ok(MoveReport {
                destination,
                source_removed: false,
                failure: Some(err),
            }),
        }
    }

    // Move's delete step bypasses soften: the report carries the raw
    // failure regardless of disk policy.
    async fn delete_for_move(&self) -> Result<()> {
        let key = self.key();
        self.disk.driver.delete(&key).await?;
        self.disk.cache.record_deleted(&key);
        Ok(())
    }

    /// Stable public URL, when the driver and config expose one.
    pub fn public_url(&self) -> Option<String> {
        self.disk.driver.public_url(&self.key())
    }

    /// Time-limited download URL for external clients.
    pub fn presign_download(&self, expires_in: Duration) -> Result<String> {
        self.disk
            .driver
            .presign_download(&self.key(), expires_in)?
            .ok_or_else(|| Error::NotSupported("presigned URLs on this disk".into()))
    }

    /// Time-limited direct-upload grant for external clients.
    pub fn presign_upload(
        &self,
        expires_in: Duration,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<PresignedUpload> {
        self.disk
            .driver
            .presign_upload(&self.key(), expires_in, metadata)?
            .ok_or_else(|| Error::NotSupported("presigned URLs on this disk".into()))
    }

    fn register_created(&self, key: &str) {
        self.disk.cache.record_created(key);
        // Every ancestor directory now observably exists. Stop at the
        // root or the first ancestor already registered.
        let sep = self.disk.config.separator;
        let mut current = path::parent(&self.path, sep);
        while let Some(dir) = current {
            let dir_key = self.disk.key_for(&dir);
            if dir_key.is_empty() || self.disk.cache.answer(&dir_key) == CacheAnswer::Created {
                break;
            }
            self.disk.cache.record_created(&dir_key);
            current = path::parent(&dir, sep);
        }
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").field("path", &self.path).finish()
    }
}

/// Outcome of a [`File::move_to`] call.
#[derive(Debug)]
pub struct MoveReport {
    /// Handle to the written destination.
    pub destination: File,
    /// Whether the source was removed. When false the object now exists
    /// at both paths.
    pub source_removed: bool,
    /// The delete-step failure, when `source_removed` is false.
    pub failure: Option<Error>,
}

impl MoveReport {
    pub fn is_complete(&self) -> bool {
        self.source_removed
    }
}

/// A directory handle. Directories are virtual: one exists when at
/// least one object's key lies under it, or when this instance recently
/// registered it in the cache.
#[derive(Clone)]
pub struct Directory {
    disk: Arc<Disk>,
    path: String,
}

impl Directory {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn key(&self) -> String {
        self.disk.key_for(&self.path)
    }

    fn is_root(&self) -> bool {
        self.key().is_empty()
    }

    pub async fn exists(&self) -> Result<bool> {
        if self.is_root() {
            return Ok(true);
        }
        let key = self.key();
        match self.disk.cache.answer(&key) {
            CacheAnswer::Created => return Ok(true),
            CacheAnswer::Deleted => return Ok(false),
            CacheAnswer::Unknown => {}
        }
        let result = self.disk.driver.stat(&key).await.map(|s| s.is_directory());
        self.disk.soften(result, || false)
    }

    /// Register this directory (and with `recursive`, its ancestors) in
    /// the consistency cache. No backend call is made: flat stores have
    /// no directory objects to create, so creation is purely a local
    /// fact that makes the directory observable immediately.
    pub fn create(&self, recursive: bool) {
        let key = self.key();
        if !key.is_empty() {
            self.disk.cache.record_created(&key);
        }
        if !recursive {
            return;
        }
        // Register ancestors, stopping at the root or the first one
        // already registered.
        let sep = self.disk.config.separator;
        let mut current = path::parent(&self.path, sep);
        while let Some(dir) = current {
            let dir_key = self.disk.key_for(&dir);
            if dir_key.is_empty() || self.disk.cache.answer(&dir_key) == CacheAnswer::Created {
                break;
            }
            self.disk.cache.record_created(&dir_key);
            current = path::parent(&dir, sep);
        }
    }

    /// Remove the directory. Non-recursive removal of a non-empty
    /// directory is an error; recursive removal deletes every object
    /// beneath it, batched when the driver supports it.
    pub async fn remove(&self, recursive: bool) -> Result<()> {
        let result = self.remove_inner(recursive).await;
        self.disk.soften(result, || ())
    }

    async fn remove_inner(&self, recursive: bool) -> Result<()> {
        let key = self.key();
        let sep = self.disk.config.separator;
        let dir_key = path::directory_key(&key, sep);

        if recursive {
            let mut file_keys = Vec::new();
            let mut dir_keys = Vec::new();
            let mut stream = self.disk.driver.list(&dir_key, true);
            while let Some(item) = stream.next().await {
                let item = item?;
                let item_key = format!("{dir_key}{}", item.relative_path);
                if item.is_directory {
                    dir_keys.push(item_key);
                } else {
                    file_keys.push(item_key);
                }
            }
            drop(stream);
            self.disk.driver.delete_many(&file_keys).await?;
            // Files and listed subdirectories are now gone; the tree
            // delete also flips any cache-only descendants the listing
            // could not see.
            for deleted in file_keys.iter().chain(dir_keys.iter()) {
                self.disk.cache.record_deleted(deleted);
            }
        } else {
            let mut stream = self.disk.driver.list(&dir_key, false);
            if let Some(first) = stream.next().await {
                first?;
                return Err(Error::storage(
                    StorageOp::Delete,
                    &self.path,
                    "directory not empty",
                ));
            }
        }

        self.disk.cache.record_deleted_tree(&key, sep);
        Ok(())
    }

    /// Stream the directory's entries. Shallow by default; recursive
    /// yields each nested directory once, before its contents.
    pub fn entries(&self, recursive: bool) -> BoxStream<'_, Result<Entry>> {
        let sep = self.disk.config.separator;
        let dir_key = path::directory_key(&self.key(), sep);
        let base = path::trim(&self.path, sep).to_string();
        let disk = Arc::clone(&self.disk);

        self.disk
            .driver
            .list(&dir_key, recursive)
            .map(move |item| {
                let item = item?;
                let logical = format!("{sep}{}", path::join(&base, &item.relative_path, sep));
                Ok(if item.is_directory {
                    Entry::Directory(Directory {
                        disk: Arc::clone(&disk),
                        path: logical,
                    })
                } else {
                    Entry::File(File {
                        disk: Arc::clone(&disk),
                        path: logical,
                    })
                })
            })
            .boxed()
    }

    /// Collect [`entries`](Self::entries) into a vector.
    pub async fn list(&self, recursive: bool) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        let mut stream = self.entries(recursive);
        while let Some(entry) = stream.next().await {
            out.push(entry?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("path", &self.path)
            .finish()
    }
}

/// One listing entry, already bound to the disk.
#[derive(Debug, Clone)]
pub enum Entry {
    File(File),
    Directory(Directory),
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::File(f) => f.path(),
            Entry::Directory(d) => d.path(),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Entry::Directory(_))
    }
}

/// Symbolic-link handle. Flat object stores have no link objects, so a
/// symlink never exists and cannot be created; the type exists so
/// generic filesystem callers get a structured refusal instead of a
/// silent miss.
#[derive(Debug, Clone)]
pub struct SymLink {
    disk: Arc<Disk>,
    path: String,
}

impl SymLink {
    pub fn path(&self) -> &str {
        &self.path
    }

    #[allow(clippy::unused_async)] // uniform entity surface
    pub async fn exists(&self) -> Result<bool> {
        let _ = &self.disk;
        Ok(false)
    }

    pub fn create(&self, _target: &str) -> Result<()> {
        Err(Error::NotSupported(
            "symbolic links on object storage".into(),
        ))
    }

    pub fn remove(&self) -> Result<()> {
        Err(Error::NotSupported(
            "symbolic links on object storage".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    fn memory_disk(config: DiskConfig) -> (Arc<Disk>, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new());
        let disk = Arc::new(Disk::new(driver.clone(), config));
        (disk, driver)
    }

    #[tokio::test]
    async fn write_read_roundtrip() {
        let (disk, _) = memory_disk(DiskConfig::new("memory"));
        let file = disk.file("/docs/a.txt");

        file.write("hello").await.unwrap();
        assert!(file.exists().await.unwrap());
        assert_eq!(&file.read().await.unwrap()[..], b"hello");
        assert_eq!(file.name(), "a.txt");
    }

    #[tokio::test]
    async fn prefix_folds_into_backend_keys() {
        let (disk, driver) = memory_disk(DiskConfig::new("memory").with_prefix("tenant-1"));
        disk.file("/docs/a.txt").write("x").await.unwrap();
        assert_eq!(driver.keys(), vec!["tenant-1/docs/a.txt".to_string()]);
    }

    #[tokio::test]
    async fn relative_paths_resolve_against_cwd() {
        let (disk, _) = memory_disk(DiskConfig::new("memory"));
        disk.file("/docs/a.txt").write("x").await.unwrap();

        disk.set_current_dir("/docs");
        assert_eq!(disk.current_dir(), "/docs");
        assert!(disk.file("a.txt").exists().await.unwrap());
        assert!(disk.file("../docs/a.txt").exists().await.unwrap());
        assert_eq!(disk.file("a.txt").path(), "/docs/a.txt");
    }

    #[tokio::test]
    async fn created_directory_is_observable_before_any_object() {
        let (disk, _) = memory_disk(DiskConfig::new("memory"));
        let dir = disk.dir("/staging/incoming");

        assert!(!dir.exists().await.unwrap());
        dir.create(true);
        assert!(dir.exists().await.unwrap());
        assert!(disk.dir("/staging").exists().await.unwrap());
    }

    #[tokio::test]
    async fn writing_a_file_makes_ancestors_exist() {
        let (disk, _) = memory_disk(DiskConfig::new("memory"));
        disk.file("/a/b/c.txt").write("x").await.unwrap();
        assert!(disk.dir("/a").exists().await.unwrap());
        assert!(disk.dir("/a/b").exists().await.unwrap());
    }

    #[tokio::test]
    async fn delete_wins_over_stale_backend_state() {
        let (disk, driver) = memory_disk(DiskConfig::new("memory"));
        let file = disk.file("/a.txt");
        file.write("x").await.unwrap();
        file.delete().await.unwrap();

        // Simulate delayed backend convergence: the object reappears
        // physically, but this instance remembers the delete.
        driver.seed("a.txt", "stale");
        assert!(!file.exists().await.unwrap());
        assert!(file.stat().await.unwrap().is_missing());
    }

    #[tokio::test]
    async fn root_directory_always_exists() {
        let (disk, _) = memory_disk(DiskConfig::new("memory"));
        assert!(disk.dir("/").exists().await.unwrap());
    }

    #[tokio::test]
    async fn remove_refuses_non_empty_without_recursive() {
        let (disk, driver) = memory_disk(DiskConfig::new("memory"));
        disk.file("/docs/a.txt").write("x").await.unwrap();
        disk.file("/docs/sub/b.txt").write("y").await.unwrap();

        let dir = disk.dir("/docs");
        assert!(dir.remove(false).await.is_err());

        dir.remove(true).await.unwrap();
        assert!(driver.keys().is_empty());
        assert!(!disk.file("/docs/a.txt").exists().await.unwrap());
        assert!(!dir.exists().await.unwrap());
    }

    #[tokio::test]
    async fn recursive_remove_erases_cached_subdirectories() {
        let (disk, driver) = memory_disk(DiskConfig::new("memory"));
        disk.dir("/docs/sub").create(false);
        disk.dir("/docs/empty").create(false);
        disk.file("/docs/sub/a.txt").write("x").await.unwrap();
        disk.file("/docs/b.txt").write("y").await.unwrap();

        disk.dir("/docs").remove(true).await.unwrap();

        assert!(driver.keys().is_empty());
        assert!(!disk.dir("/docs").exists().await.unwrap());
        assert!(!disk.dir("/docs/sub").exists().await.unwrap());
        // Cache-only directories never visible to the listing flip too.
        assert!(!disk.dir("/docs/empty").exists().await.unwrap());
        assert!(!disk.file("/docs/sub/a.txt").exists().await.unwrap());
    }

    #[test]
    fn debug_output_is_path_oriented() {
        let (disk, _) = memory_disk(DiskConfig::new("memory").with_prefix("tenant-1"));
        assert!(format!("{disk:?}").contains("tenant-1"));
        assert!(format!("{:?}", disk.file("/a.txt")).contains("/a.txt"));
        assert!(format!("{:?}", disk.sym_link("/ln")).contains("/ln"));
    }

    #[tokio::test]
    async fn symlinks_are_refused() {
        let (disk, _) = memory_disk(DiskConfig::new("memory"));
        let link = disk.sym_link("/ln");
        assert!(!link.exists().await.unwrap());
        assert!(matches!(
            link.create("/target"),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(link.remove(), Err(Error::NotSupported(_))));
    }

    #[tokio::test]
    async fn soften_degrades_reads_on_lenient_disks() {
        let (disk, _) = memory_disk(DiskConfig::new("memory").with_throw_on_error(false));
        let file = disk.file("/missing.txt");
        // Download of a missing object is a storage error; the lenient
        // policy turns it into empty bytes.
        assert_eq!(&file.read().await.unwrap()[..], b"");

        let (strict, _) = memory_disk(DiskConfig::new("memory"));
        assert!(strict.file("/missing.txt").read().await.is_err());
    }
}
