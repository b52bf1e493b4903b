//! DriveKit - Filesystem semantics over flat object storage
//!
//! Object stores know keys and bytes; applications want files,
//! directories, and paths. DriveKit bridges the two: a [`Disk`] wraps a
//! storage driver (S3-compatible or in-memory, with custom backends
//! pluggable through the [`DiskManager`]) and exposes path-bound
//! [`File`] and [`Directory`] entities with a short-TTL consistency
//! cache masking eventual-consistency lag for the local instance.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use drivekit::{Disk, DiskConfig};
//! use drivekit::driver::MemoryDriver;
//!
//! #[tokio::main]
//! async fn main() -> drivekit::Result<()> {
//!     let disk = Arc::new(Disk::new(
//!         Arc::new(MemoryDriver::new()),
//!         DiskConfig::new("memory").with_prefix("tenant-1"),
//!     ));
//!
//!     let file = disk.file("/docs/hello.txt");
//!     file.write("hello world").await?;
//!     assert!(file.exists().await?);
//!     assert!(disk.dir("/docs").exists().await?);
//!
//!     for entry in disk.dir("/docs").list(false).await? {
//!         println!("{}", entry.path());
//!     }
//!     Ok(())
//! }
//! ```

mod cache;
mod config;
pub mod driver;
mod error;
mod fs;
mod manager;
mod path;

// Re-exported so custom drivers don't need their own async-trait dep.
pub use async_trait::async_trait;

pub use cache::{CacheAnswer, ConsistencyCache, DEFAULT_CACHE_TTL};
pub use config::{BackendOptions, DiskConfig, ScopeConfig, Visibility};
pub use error::{Error, Result, StorageOp};
pub use fs::{Directory, Disk, Entry, File, MoveReport, SymLink};
pub use manager::{DiskManager, DiskProfile, DriverFactory};
