//! The block state machine: a lazily-loaded, write-through chunk of a
//! volume, bound to a key in a [`DataStore`].

use std::sync::Arc;

use log::error;
use thiserror::Error;

use crate::array3d::{Array, ArrayElement, ArrayView};
use crate::codec::{self, CodecError};
use crate::manifest::{DataType, Encoding};
use crate::storage::{DataStore, StorageError};

/// Per-block settings that are not part of the manifest, mirroring the
/// original format's notion of block-local (not dataset-wide) settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockSettings {
    /// Whether the serialized wire bytes are gzip-wrapped.
    pub gzip: bool,
}

/// Errors raised loading, saving, or accessing a [`Block`].
#[derive(Debug, Error)]
pub enum BlockError {
    /// `add`/`get` was called with a `T` that does not match the block's
    /// declared data type.
    #[error("type mismatch: block has dtype {block_dtype}, operation used {requested}")]
    TypeMismatch {
        /// The block's declared data type.
        block_dtype: DataType,
        /// The data type implied by the generic parameter used at the call site.
        requested: DataType,
    },
    /// A data-store I/O error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A codec encode/decode error.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The in-memory payload bytes did not have the expected length for its
    /// declared shape and data type — an internal consistency failure.
    #[error("corrupt in-memory payload: expected {expected} bytes, got {actual}")]
    CorruptPayload {
        /// The expected byte length.
        expected: usize,
        /// The byte length actually present.
        actual: usize,
    },
}

fn dispatch_decode<T: ArrayElement>(
    encoding: Encoding,
    bytes: &[u8],
    shape: [u64; 3],
) -> Result<Array<T>, CodecError> {
    let [x, y, z] = shape;
    match encoding {
        Encoding::Raw => codec::raw::decode::<T>(bytes, x, y, z),
        Encoding::CompressedSegmentation => {
            codec::compressed_segmentation::decode::<T>(bytes, x, y, z)
        }
        Encoding::Jpeg => codec::jpeg::decode::<T>(bytes, x, y, z),
    }
}

fn dispatch_encode<T: ArrayElement>(
    encoding: Encoding,
    array: &Array<T>,
) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::Raw => Ok(codec::raw::encode(array)),
        Encoding::CompressedSegmentation => codec::compressed_segmentation::encode(array),
        Encoding::Jpeg => {
            #[cfg(feature = "jpeg")]
            {
                codec::jpeg::encode(array)
            }
            #[cfg(not(feature = "jpeg"))]
            {
                Err(CodecError::Unsupported(
                    "jpeg encoding requires the `jpeg` feature".to_string(),
                ))
            }
        }
    }
}

/// A chunk of a volume: a fixed-shape, typed region bound to a key in a
/// [`DataStore`], lazily loaded and write-through on every mutation.
///
/// The payload is held as untyped bytes in the same row-major layout
/// [`Array::as_slice`] uses; typed accessors reinterpret it via `bytemuck`
/// after checking `T::DTYPE` against the block's declared [`DataType`].
pub struct Block {
    store: Arc<dyn DataStore>,
    key: String,
    shape: [u64; 3],
    dtype: DataType,
    encoding: Encoding,
    settings: BlockSettings,
    payload: Vec<u8>,
    loaded: bool,
    dirty: bool,
}

impl Block {
    /// Construct a block bound to `key`, not yet loaded.
    #[must_use]
    pub fn new(
        store: Arc<dyn DataStore>,
        key: String,
        shape: [u64; 3],
        dtype: DataType,
        encoding: Encoding,
        settings: BlockSettings,
    ) -> Self {
        Self {
            store,
            key,
            shape,
            dtype,
            encoding,
            settings,
            payload: Vec::new(),
            loaded: false,
            dirty: false,
        }
    }

    fn expected_payload_len(&self) -> usize {
        let [x, y, z] = self.shape;
        (x * y * z) as usize * self.dtype.size_bytes()
    }

    /// Zero-fill the payload in memory and mark the block loaded and dirty,
    /// without touching the data store.
    pub fn zero_block(&mut self) {
        self.payload = vec![0u8; self.expected_payload_len()];
        self.loaded = true;
        self.dirty = true;
    }

    /// Whether the payload is currently resident in memory.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Whether the in-memory payload has unsaved changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The block's voxel shape.
    #[must_use]
    pub const fn shape(&self) -> [u64; 3] {
        self.shape
    }

    /// Load the payload from the data store if not already resident.
    /// Blocks with no backing value are zero-initialized.
    ///
    /// # Errors
    /// Returns [`BlockError::Storage`] or [`BlockError::Codec`] on failure.
    pub fn load(&mut self) -> Result<(), BlockError> {
        if self.loaded {
            return Ok(());
        }
        let Some(wire) = self.store.get_bytes(&self.key)? else {
            self.zero_block();
            return Ok(());
        };
        let decoded = if self.settings.gzip {
            #[cfg(feature = "gzip")]
            {
                codec::gzip_decompress(&wire)?
            }
            #[cfg(not(feature = "gzip"))]
            {
                return Err(BlockError::Codec(CodecError::Unsupported(
                    "block settings request gzip but the `gzip` feature is disabled".to_string(),
                )));
            }
        } else {
            wire
        };
        self.payload = self.decode_payload(&decoded)?;
        self.loaded = true;
        self.dirty = false;
        Ok(())
    }

    fn decode_payload(&self, bytes: &[u8]) -> Result<Vec<u8>, BlockError> {
        macro_rules! decode_as {
            ($t:ty) => {
                Ok(bytemuck::cast_slice(
                    dispatch_decode::<$t>(self.encoding, bytes, self.shape)?.as_slice(),
                )
                .to_vec())
            };
        }
        match self.dtype {
            DataType::U8 => decode_as!(u8),
            DataType::U16 => decode_as!(u16),
            DataType::U32 => decode_as!(u32),
            DataType::U64 => decode_as!(u64),
            DataType::F32 => decode_as!(f32),
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, BlockError> {
        macro_rules! encode_as {
            ($t:ty) => {{
                let [x, y, z] = self.shape;
                let array = Array::<$t>::from_bytes(&self.payload, x, y, z).map_err(|_| {
                    BlockError::CorruptPayload {
                        expected: self.expected_payload_len(),
                        actual: self.payload.len(),
                    }
                })?;
                Ok(dispatch_encode::<$t>(self.encoding, &array)?)
            }};
        }
        match self.dtype {
            DataType::U8 => encode_as!(u8),
            DataType::U16 => encode_as!(u16),
            DataType::U32 => encode_as!(u32),
            DataType::U64 => encode_as!(u64),
            DataType::F32 => encode_as!(f32),
        }
    }

    /// Serialize and write the payload to the data store if dirty.
    ///
    /// # Errors
    /// Returns [`BlockError::Codec`] if encoding fails, or
    /// [`BlockError::Storage`] if the write fails.
    pub fn save(&mut self) -> Result<(), BlockError> {
        if !self.dirty {
            return Ok(());
        }
        let encoded = self.encode_payload()?;
        let wire = if self.settings.gzip {
            #[cfg(feature = "gzip")]
            {
                codec::gzip_compress(&encoded)?
            }
            #[cfg(not(feature = "gzip"))]
            {
                return Err(BlockError::Codec(CodecError::Unsupported(
                    "block settings request gzip but the `gzip` feature is disabled".to_string(),
                )));
            }
        } else {
            encoded
        };
        self.store.put_bytes(&self.key, &wire)?;
        self.dirty = false;
        Ok(())
    }

    fn check_dtype<T: ArrayElement>(&self) -> Result<(), BlockError> {
        if T::DTYPE == self.dtype {
            Ok(())
        } else {
            Err(BlockError::TypeMismatch {
                block_dtype: self.dtype,
                requested: T::DTYPE,
            })
        }
    }

    fn payload_as_array<T: ArrayElement>(&self) -> Result<Array<T>, BlockError> {
        let [x, y, z] = self.shape;
        Array::<T>::from_bytes(&self.payload, x, y, z).map_err(|_| BlockError::CorruptPayload {
            expected: self.expected_payload_len(),
            actual: self.payload.len(),
        })
    }

    /// Add `view`'s elements into the block at `offset`, write-through
    /// saving immediately afterward. Accumulative by default: existing
    /// values at the target voxels are incremented, not replaced. If
    /// `overwrite` is set, the entire block payload is zeroed before the
    /// accumulate loop, so the result is a plain assignment within `view`'s
    /// rectangle and zero elsewhere.
    ///
    /// # Errors
    /// Returns [`BlockError::TypeMismatch`] if `T` does not match the
    /// block's declared data type, or a load/save error.
    pub fn add<T: ArrayElement>(
        &mut self,
        view: &ArrayView<'_, T>,
        offset: [u64; 3],
        overwrite: bool,
    ) -> Result<(), BlockError> {
        self.check_dtype::<T>()?;
        if !self.loaded {
            self.load()?;
        }
        let mut local = self.payload_as_array::<T>()?;
        if overwrite {
            local.clear();
        }
        let [sx, sy, sz] = view.shape();
        for x in 0..sx {
            for y in 0..sy {
                for z in 0..sz {
                    let cur = local.at(offset[0] + x, offset[1] + y, offset[2] + z);
                    let mut cur = cur;
                    cur += view.get(x, y, z);
                    local.set(offset[0] + x, offset[1] + y, offset[2] + z, cur);
                }
            }
        }
        self.payload = bytemuck::cast_slice(local.as_slice()).to_vec();
        self.dirty = true;
        self.save()
    }

    /// Accumulate the block's elements at `offset` into `view`. Accumulative:
    /// callers who want pure replacement semantics must zero `view`'s
    /// backing array first.
    ///
    /// # Errors
    /// Returns [`BlockError::TypeMismatch`] if `T` does not match the
    /// block's declared data type, or a load error.
    pub fn get<T: ArrayElement>(
        &mut self,
        view: &mut ArrayView<'_, T>,
        offset: [u64; 3],
    ) -> Result<(), BlockError> {
        self.check_dtype::<T>()?;
        if !self.loaded {
            self.load()?;
        }
        let local = self.payload_as_array::<T>()?;
        let [sx, sy, sz] = view.shape();
        for x in 0..sx {
            for y in 0..sy {
                for z in 0..sz {
                    let v = local.at(offset[0] + x, offset[1] + y, offset[2] + z);
                    view.add_assign(x, y, z, v);
                }
            }
        }
        Ok(())
    }

    /// Explicitly flush a dirty block, propagating any failure to the
    /// caller. Prefer this over relying on [`Drop`] when the caller needs
    /// to observe a write failure.
    ///
    /// # Errors
    /// Returns [`BlockError`] on encode or store failure.
    pub fn flush(&mut self) -> Result<(), BlockError> {
        self.save()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(err) = self.save() {
                error!("failed to flush block {:?} on drop: {err}", self.key);
            }
        }
    }
}
