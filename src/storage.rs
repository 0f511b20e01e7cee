//! Data stores: the pluggable persistence layer that manifests and block
//! bytes are read from and written to.
//!
//! [`DataStore`] is a single read/write trait rather than separate readable
//! and writable traits, since every backend here needs both.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::manifest::Manifest;

/// A value read from a store: [`None`] if the key does not exist.
pub type MaybeBytes = Option<Vec<u8>>;

/// A data-store error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// An error serializing or deserializing the manifest.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A manifest validation error.
    #[error(transparent)]
    Manifest(#[from] crate::manifest::ManifestError),
    /// The manifest key (`info`) does not exist in the store.
    #[error("no manifest found at {0:?}")]
    MissingManifest(String),
    /// A write operation was attempted on a read-only store.
    #[error("a write operation was attempted on a read only store")]
    ReadOnly,
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

/// A pluggable persistence backend for manifests and block bytes.
///
/// `get_block`/`create_block` return [`crate::block::Block`] handles bound
/// to a key; they do not themselves perform I/O beyond existence checks —
/// actual byte transfer happens lazily through `get_bytes`/`put_bytes` when
/// the block is first loaded or saved.
pub trait DataStore: Send + Sync {
    /// Retrieve the raw bytes stored under `key`, or `None` if absent.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on an underlying I/O failure.
    fn get_bytes(&self, key: &str) -> Result<MaybeBytes, StorageError>;

    /// Store `value` under `key`, creating or overwriting it.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on an underlying I/O failure.
    fn put_bytes(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Whether a key currently has a backing value.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on an underlying I/O failure.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Read and validate the store's manifest (conventionally at key `info`).
    ///
    /// # Errors
    /// Returns [`StorageError::MissingManifest`] if absent, or a JSON/manifest
    /// validation error otherwise.
    fn get_manifest(&self) -> Result<Manifest, StorageError> {
        let bytes = self
            .get_bytes("info")?
            .ok_or_else(|| StorageError::MissingManifest("info".to_string()))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)?;
        if crate::config::global_config().validate_manifest() {
            manifest.validate()?;
        }
        Ok(manifest)
    }

    /// Write `manifest` to the store's conventional `info` key.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on an underlying I/O failure.
    fn put_manifest(&self, manifest: &Manifest) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        self.put_bytes("info", &bytes)
    }

    /// The default block naming convention: `"{x0+ox}-{x1+ox}_{y0+oy}-{y1+oy}_{z0+oz}-{z1+oz}"`,
    /// i.e. the block's extent in the global (voxel-offset-translated) frame.
    fn block_name(
        &self,
        xstart: i64,
        xend: i64,
        ystart: i64,
        yend: i64,
        zstart: i64,
        zend: i64,
        voxel_offset: [i64; 3],
    ) -> String {
        format!(
            "{}-{}_{}-{}_{}-{}",
            xstart + voxel_offset[0],
            xend + voxel_offset[0],
            ystart + voxel_offset[1],
            yend + voxel_offset[1],
            zstart + voxel_offset[2],
            zend + voxel_offset[2],
        )
    }

    /// Return a Block bound to `{scale_key}/{name}` if a backing value
    /// exists, lazily (not yet loaded); otherwise `None`.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on an underlying I/O failure.
    fn get_block(
        &self,
        store: Arc<dyn DataStore>,
        name: &str,
        scale_key: &str,
        shape: [u64; 3],
        dtype: crate::manifest::DataType,
        encoding: crate::manifest::Encoding,
        settings: crate::block::BlockSettings,
    ) -> Result<Option<crate::block::Block>, StorageError> {
        let key = format!("{scale_key}/{name}");
        if self.exists(&key)? {
            Ok(Some(crate::block::Block::new(
                store, key, shape, dtype, encoding, settings,
            )))
        } else {
            Ok(None)
        }
    }

    /// Return an existing Block at `{scale_key}/{name}` if present, else a
    /// new zero-initialized Block bound to that key.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on an underlying I/O failure.
    fn create_block(
        &self,
        store: Arc<dyn DataStore>,
        name: &str,
        scale_key: &str,
        shape: [u64; 3],
        dtype: crate::manifest::DataType,
        encoding: crate::manifest::Encoding,
        settings: crate::block::BlockSettings,
    ) -> Result<crate::block::Block, StorageError> {
        let key = format!("{scale_key}/{name}");
        if self.exists(&key)? {
            Ok(crate::block::Block::new(
                store, key, shape, dtype, encoding, settings,
            ))
        } else {
            let mut block = crate::block::Block::new(store, key, shape, dtype, encoding, settings);
            block.zero_block();
            Ok(block)
        }
    }
}

/// The reference backend: one file per key under a root directory.
///
/// `get_manifest` reads `{root}/info`; a block bound to name `N` under
/// scale `S` lives at `{root}/S/N`.
#[derive(Debug, Clone)]
pub struct Filesystem {
    root: PathBuf,
}

impl Filesystem {
    /// Open (without creating) a filesystem store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl DataStore for Filesystem {
    fn get_bytes(&self, key: &str) -> Result<MaybeBytes, StorageError> {
        let path = self.path_for(key);
        if path.is_file() {
            Ok(Some(fs::read(path)?))
        } else {
            Ok(None)
        }
    }

    fn put_bytes(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, value)?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.path_for(key).is_file())
    }
}

/// An in-memory store, for tests and small scripted scenarios.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Construct an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for MemoryStore {
    fn get_bytes(&self, key: &str) -> Result<MaybeBytes, StorageError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn put_bytes(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.values.lock().unwrap().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DataType, Encoding, Manifest, Scale, VolumeType};

    fn sample_manifest() -> Manifest {
        Manifest {
            volume_type: VolumeType::Image,
            data_type: DataType::U32,
            num_channels: 1,
            scales: vec![Scale {
                key: "0".to_string(),
                size: [128, 128, 16],
                voxel_offset: [0, 0, 0],
                resolution: [4.0, 4.0, 40.0],
                chunk_sizes: vec![[128, 128, 16]],
                encoding: Encoding::Raw,
                compressed_segmentation_block_size: None,
            }],
            mesh: None,
        }
    }

    #[test]
    fn memory_store_manifest_round_trip() {
        let store = MemoryStore::new();
        let manifest = sample_manifest();
        store.put_manifest(&manifest).unwrap();
        let read_back = store.get_manifest().unwrap();
        assert_eq!(read_back, manifest);
    }

    #[test]
    fn memory_store_missing_manifest_errors() {
        let store = MemoryStore::new();
        let err = store.get_manifest().unwrap_err();
        assert!(matches!(err, StorageError::MissingManifest(_)));
    }

    #[test]
    fn filesystem_store_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Filesystem::new(dir.path());
        let manifest = sample_manifest();
        store.put_manifest(&manifest).unwrap();
        let read_back = store.get_manifest().unwrap();
        assert_eq!(read_back, manifest);
        assert!(dir.path().join("info").is_file());
    }

    #[test]
    fn block_name_applies_voxel_offset() {
        let store = MemoryStore::new();
        let name = store.block_name(0, 128, 0, 128, 0, 16, [0, 1, 0]);
        assert_eq!(name, "0-128_1-129_0-16");
    }

    #[test]
    fn filesystem_get_block_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn DataStore> = Arc::new(Filesystem::new(dir.path()));
        let settings = crate::block::BlockSettings { gzip: false };
        let block = store
            .get_block(
                Arc::clone(&store),
                "0-128_0-128_0-16",
                "0",
                [128, 128, 16],
                DataType::U32,
                Encoding::Raw,
                settings,
            )
            .unwrap();
        assert!(block.is_none());
    }

    #[test]
    fn filesystem_create_block_zero_initializes() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn DataStore> = Arc::new(Filesystem::new(dir.path()));
        let settings = crate::block::BlockSettings { gzip: false };
        let block = store
            .create_block(
                Arc::clone(&store),
                "0-4_0-4_0-4",
                "0",
                [4, 4, 4],
                DataType::U32,
                Encoding::Raw,
                settings,
            )
            .unwrap();
        assert!(block.is_loaded());
        assert!(block.is_dirty());
    }
}
