//! Named-disk registry and factory.
//!
//! The [`DiskManager`] owns a map of named disk profiles (backend
//! definitions and scoped views), builds [`Disk`] instances from them
//! on demand, and memoizes instances by name so repeated lookups share
//! one cache and one HTTP client. Ad hoc builds and scoped views are
//! never memoized: each call returns a fresh instance.
//!
//! Custom backends register a factory closure under a driver-type tag;
//! `"s3"` and `"memory"` are built in. Custom registrations take
//! precedence, so a built-in can be shadowed.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::{DiskConfig, ScopeConfig};
use crate::driver::{DriverCapabilities, MemoryDriver, S3Driver, StorageDriver};
use crate::error::{Error, Result};
use crate::fs::Disk;
use crate::path;

/// Builds a driver from a disk definition.
pub type DriverFactory =
    Arc<dyn Fn(&DiskConfig) -> Result<Arc<dyn StorageDriver>> + Send + Sync>;

/// One named entry in the manager's registry.
#[derive(Debug, Clone)]
pub enum DiskProfile {
    /// A full backend definition.
    Backend(DiskConfig),
    /// A prefixed view onto another named profile.
    Scoped(ScopeConfig),
}

/// Registry of named disk profiles with memoized instances.
pub struct DiskManager {
    profiles: HashMap<String, DiskProfile>,
    instances: RwLock<HashMap<String, Arc<Disk>>>,
    factories: RwLock<HashMap<String, DriverFactory>>,
}

impl DiskManager {
    pub fn new(profiles: HashMap<String, DiskProfile>) -> Self {
        Self {
            profiles,
            instances: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a custom driver under a type tag. Later definitions with
    /// `driver = tag` build through this factory.
    pub fn register_driver<F>(&self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&DiskConfig) -> Result<Arc<dyn StorageDriver>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap()
            .insert(tag.into(), Arc::new(factory));
    }

    /// Get (or build and memoize) the named disk.
    pub fn disk(&self, name: &str) -> Result<Arc<Disk>> {
        if let Some(instance) = self.instances.read().unwrap().get(name) {
            return Ok(Arc::clone(instance));
        }
        let config = self.resolve_config(name, &mut Vec::new())?;
        let instance = self.build(&config)?;
        let mut instances = self.instances.write().unwrap();
        // A racing caller may have built it first; keep the winner so
        // every holder shares one cache.
        Ok(Arc::clone(
            instances
                .entry(name.to_string())
                .or_insert(instance),
        ))
    }

    /// Build a one-off disk from an inline definition. Never memoized.
    pub fn build(&self, config: &DiskConfig) -> Result<Arc<Disk>> {
        let driver = self.make_driver(config)?;
        Ok(Arc::new(Disk::new(driver, config.clone())))
    }

    /// Ad hoc scoped view: the named disk's definition narrowed by one
    /// more prefix. Never memoized.
    pub fn scope(&self, parent: &str, prefix: &str) -> Result<Arc<Disk>> {
        let scoped = ScopeConfig::new(parent, prefix);
        let config = self.merge_scope(&scoped, &mut Vec::new())?;
        self.build(&config)
    }

    /// The named disk, verified to provide every capability in
    /// `required`.
    pub fn disk_providing(
        &self,
        name: &str,
        required: DriverCapabilities,
    ) -> Result<Arc<Disk>> {
        let disk = self.disk(name)?;
        match disk.capabilities().missing_from(&required) {
            None => Ok(disk),
            Some(capability) => Err(Error::CapabilityMismatch {
                disk: name.to_string(),
                capability: capability.to_string(),
            }),
        }
    }

    /// The named disk, verified to support presigned and public URLs.
    pub fn cloud_disk(&self, name: &str) -> Result<Arc<Disk>> {
        self.disk_providing(name, DriverCapabilities::cloud())
    }

    fn make_driver(&self, config: &DiskConfig) -> Result<Arc<dyn StorageDriver>> {
        if let Some(factory) = self.factories.read().unwrap().get(&config.driver) {
            return factory(config);
        }
        match config.driver.as_str() {
            "s3" => Ok(Arc::new(S3Driver::new(config)?)),
            "memory" => Ok(Arc::new(MemoryDriver::with_separator(config.separator))),
            other => Err(Error::Configuration(format!(
                "unknown driver type '{other}'"
            ))),
        }
    }

    /// Resolve a profile name to a concrete backend definition, folding
    /// scope chains down to their base config.
    fn resolve_config(&self, name: &str, seen: &mut Vec<String>) -> Result<DiskConfig> {
        if seen.iter().any(|n| n == name) {
            return Err(Error::Configuration(format!(
                "scope cycle through disk '{name}'"
            )));
        }
        seen.push(name.to_string());

        match self.profiles.get(name) {
            None => Err(Error::Configuration(format!("unknown disk '{name}'"))),
            Some(DiskProfile::Backend(config)) => Ok(config.clone()),
            Some(DiskProfile::Scoped(scope)) => self.merge_scope(scope, seen),
        }
    }

    fn merge_scope(&self, scope: &ScopeConfig, seen: &mut Vec<String>) -> Result<DiskConfig> {
        let parent = self.resolve_config(&scope.disk, seen)?;
        let sep = parent.separator;
        if path::trim(&scope.prefix, sep).is_empty() {
            return Err(Error::Configuration(format!(
                "scope of disk '{}' is missing a prefix",
                scope.disk
            )));
        }

        let mut merged = parent;
        merged.prefix = path::join(&merged.prefix, &scope.prefix, sep);
        if let Some(visibility) = scope.visibility {
            merged.visibility = visibility;
        }
        // A scope can opt into throwing but never out of a parent that
        // throws.
        merged.throw_on_error =
            merged.throw_on_error || scope.throw_on_error.unwrap_or(false);
        Ok(merged)
    }
}
