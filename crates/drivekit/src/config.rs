//! Disk configuration types.
//!
//! DriveKit consumes configuration, it never loads it: callers hand the
//! manager a map of named [`DiskConfig`] / [`ScopeConfig`] values that
//! they parsed from wherever configuration lives. All types deserialize
//! with serde so that map can come straight out of a JSON/TOML document.
//!
//! A [`DiskConfig`] is immutable once a filesystem instance has been
//! built from it; scoping produces a new merged copy, never a mutation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_separator() -> char {
    '/'
}

/// Default visibility for objects written through a disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

/// Backend connection options (endpoint, credentials, bucket).
///
/// Unknown keys are preserved in `extra` so custom drivers can carry
/// their own options through the same schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendOptions {
    /// Backend endpoint, either `host[:port]` or a full URL.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
    /// Use https when the endpoint carries no scheme of its own.
    #[serde(default = "default_true")]
    pub use_tls: bool,
    pub region: Option<String>,
    /// Path-style addressing (`host/bucket/key`) instead of
    /// virtual-hosted (`bucket.host/key`).
    #[serde(default)]
    pub use_path_style: bool,
    /// Create the bucket during `ensure_ready` when it does not exist.
    #[serde(default)]
    pub create_bucket: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Immutable definition of one storage endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Driver-type tag: `"s3"`, `"memory"`, or a custom registration.
    pub driver: String,
    /// Root prefix inside the backend keyspace. Stored without leading
    /// or trailing separators; empty means the bucket root.
    #[serde(default)]
    pub prefix: String,
    /// Base URL for public object URLs, overriding the endpoint-derived
    /// shape when set.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    /// When false, a recoverable storage failure degrades to a sentinel
    /// result instead of propagating.
    #[serde(default = "default_true")]
    pub throw_on_error: bool,
    /// Emit a `warn` event whenever a failure is degraded to a sentinel.
    #[serde(default)]
    pub report_errors: bool,
    #[serde(default = "default_separator")]
    pub separator: char,
    #[serde(default)]
    pub options: BackendOptions,
}

impl DiskConfig {
    /// Create a config for the given driver type with all defaults.
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            prefix: String::new(),
            public_url: None,
            visibility: Visibility::default(),
            throw_on_error: true,
            report_errors: false,
            separator: default_separator(),
            options: BackendOptions::default(),
        }
    }

    /// Set the root prefix. Stored normalized (no surrounding or
    /// doubled separators).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let sep = self.separator;
        self.prefix = crate::path::normalize(&prefix.into(), sep);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = throw;
        self
    }

    pub fn with_public_url(mut self, base: impl Into<String>) -> Self {
        self.public_url = Some(base.into());
        self
    }

    pub fn with_options(mut self, options: BackendOptions) -> Self {
        self.options = options;
        self
    }
}

/// A prefixed view onto another named disk.
///
/// Resolution fetches the parent's *configuration* (never its live
/// instance), folds the prefixes together, and builds a fresh instance
/// from the merged copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Name of the parent disk this scope narrows.
    pub disk: String,
    /// Prefix applied in front of every path, relative to the parent.
    pub prefix: String,
    /// Override the parent's default visibility when set.
    #[serde(default)]
    pub visibility: Option<Visibility>,
    /// OR-ed with the parent's policy: the scope can opt into throwing
    /// but cannot opt out of a parent that throws.
    #[serde(default)]
    pub throw_on_error: Option<bool>,
}

impl ScopeConfig {
    pub fn new(disk: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            disk: disk.into(),
            prefix: prefix.into(),
            visibility: None,
            throw_on_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = DiskConfig::new("memory");
        assert_eq!(config.driver, "memory");
        assert_eq!(config.prefix, "");
        assert!(config.throw_on_error);
        assert!(!config.report_errors);
        assert_eq!(config.separator, '/');
        assert_eq!(config.visibility, Visibility::Private);
    }

    #[test]
    fn prefix_is_normalized() {
        let config = DiskConfig::new("memory").with_prefix("/tenant-1/");
        assert_eq!(config.prefix, "tenant-1");

        let config = DiskConfig::new("memory").with_prefix("a//b");
        assert_eq!(config.prefix, "a/b");
    }

    #[test]
    fn deserializes_from_json_schema() {
        let json = r#"{
            "driver": "s3",
            "prefix": "uploads",
            "visibility": "public",
            "options": {
                "endpoint": "minio.local:9000",
                "access_key": "ak",
                "secret_key": "sk",
                "bucket": "media",
                "use_tls": false,
                "region": "us-east-1",
                "use_path_style": true
            }
        }"#;
        let config: DiskConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.driver, "s3");
        assert_eq!(config.prefix, "uploads");
        assert_eq!(config.visibility, Visibility::Public);
        assert!(config.throw_on_error, "throw_on_error defaults to true");
        assert_eq!(config.options.bucket.as_deref(), Some("media"));
        assert!(!config.options.use_tls);
        assert!(config.options.use_path_style);
    }

    #[test]
    fn unknown_backend_options_are_preserved() {
        let json = r#"{
            "driver": "custom-store",
            "options": { "endpoint": "store.local", "shard_count": 4 }
        }"#;
        let config: DiskConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.options.extra.get("shard_count"),
            Some(&serde_json::json!(4))
        );
    }
}
