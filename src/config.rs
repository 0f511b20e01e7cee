//! Global configuration options for the storage engine.

use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global configuration options for the storage engine.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with
/// [`global_config_mut`].
///
/// ## Validate Manifest
/// > default: `true`
///
/// If enabled, a manifest read from a data store is validated (segmentation
/// channel count, non-decreasing resolutions, jpeg/data-type compatibility)
/// before being handed to the engine. Disabling this is only useful for
/// reading manifests written by a tool that does not yet satisfy these
/// invariants.
///
/// ## Warn On Multiple Chunk Sizes
/// > default: `true`
///
/// A scale's `chunk_sizes` is a list, but the engine always uses the first
/// entry. If a manifest declares more than one and this is enabled, a
/// warning is logged the first time that scale's chunk shape is resolved.
#[derive(Debug)]
pub struct Config {
    validate_manifest: bool,
    warn_on_multiple_chunk_sizes: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for Config {
    fn default() -> Self {
        Self {
            validate_manifest: true,
            warn_on_multiple_chunk_sizes: true,
        }
    }
}

impl Config {
    /// Get the [validate manifest](#validate-manifest) configuration.
    #[must_use]
    pub fn validate_manifest(&self) -> bool {
        self.validate_manifest
    }

    /// Set the [validate manifest](#validate-manifest) configuration.
    pub fn set_validate_manifest(&mut self, validate_manifest: bool) {
        self.validate_manifest = validate_manifest;
    }

    /// Get the [warn on multiple chunk sizes](#warn-on-multiple-chunk-sizes) configuration.
    #[must_use]
    pub fn warn_on_multiple_chunk_sizes(&self) -> bool {
        self.warn_on_multiple_chunk_sizes
    }

    /// Set the [warn on multiple chunk sizes](#warn-on-multiple-chunk-sizes) configuration.
    pub fn set_warn_on_multiple_chunk_sizes(&mut self, warn: bool) {
        self.warn_on_multiple_chunk_sizes = warn;
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might
/// panic if the global config is already held by the current thread.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might
/// panic if the global config is already held by the current thread.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validate_manifest_round_trip() {
        let original = global_config().validate_manifest();
        global_config_mut().set_validate_manifest(!original);
        assert_eq!(global_config().validate_manifest(), !original);
        global_config_mut().set_validate_manifest(original);
    }
}
