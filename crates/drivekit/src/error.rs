//! Error types for DriveKit
//!
//! Four categories cover the whole surface:
//! - [`Error::Configuration`]: a disk definition is missing or invalid
//! - [`Error::NotSupported`]: the operation has no meaning on this disk type
//! - [`Error::StorageOperation`]: a backend call failed
//! - [`Error::CapabilityMismatch`]: a disk was required to satisfy a
//!   capability set it does not implement
//!
//! Only `StorageOperation` is recoverable: a disk configured with
//! `throw_on_error = false` degrades it to a sentinel result instead of
//! propagating. The other three always propagate.

use thiserror::Error;

/// Result type alias using DriveKit's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The backend call a [`Error::StorageOperation`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Read,
    Write,
    Delete,
    Copy,
    Metadata,
    List,
    Provision,
}

impl std::fmt::Display for StorageOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageOp::Read => "read",
            StorageOp::Write => "write",
            StorageOp::Delete => "delete",
            StorageOp::Copy => "copy",
            StorageOp::Metadata => "metadata",
            StorageOp::List => "list",
            StorageOp::Provision => "provision",
        };
        f.write_str(name)
    }
}

/// DriveKit error types.
///
/// Messages never include credentials; backend errors are carried as
/// display strings, not as nested source chains, so a failed call can be
/// reported to callers without leaking signed URLs or secret material.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid disk configuration (unknown driver type,
    /// missing scope options, absent credentials).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The operation is structurally unsupported on this disk type
    /// (symbolic links, temporary URLs on a driver without them).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A backend call failed.
    #[error("storage {op} failed for '{path}': {message}")]
    StorageOperation {
        op: StorageOp,
        path: String,
        message: String,
    },

    /// A disk was required to expose a capability it does not implement.
    #[error("disk '{disk}' does not provide capability: {capability}")]
    CapabilityMismatch { disk: String, capability: String },
}

impl Error {
    /// Build a [`Error::StorageOperation`] from any displayable backend error.
    pub fn storage(op: StorageOp, path: impl Into<String>, message: impl ToString) -> Self {
        Self::StorageOperation {
            op,
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether the `throw_on_error = false` policy may degrade this error
    /// to a sentinel result.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::StorageOperation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_formats_op_and_path() {
        let err = Error::storage(StorageOp::Read, "docs/a.txt", "connection reset");
        let text = err.to_string();
        assert!(text.contains("read"));
        assert!(text.contains("docs/a.txt"));
        assert!(text.contains("connection reset"));
    }

    #[test]
    fn only_storage_errors_are_recoverable() {
        assert!(Error::storage(StorageOp::Delete, "x", "boom").is_recoverable());
        assert!(!Error::Configuration("missing bucket".into()).is_recoverable());
        assert!(!Error::NotSupported("symlinks".into()).is_recoverable());
        assert!(
            !Error::CapabilityMismatch {
                disk: "cloud".into(),
                capability: "presigned_urls".into(),
            }
            .is_recoverable()
        );
    }
}
