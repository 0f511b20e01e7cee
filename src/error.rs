//! Top-level error type for the storage engine.
//!
//! Every narrower error domain (geometry, codecs, storage) composes into
//! [`Error`] via `#[from]`.

use thiserror::Error;

use crate::array3d::ArrayError;
use crate::block::BlockError;
use crate::geometry::GeometryError;
use crate::manifest::ManifestError;
use crate::storage::StorageError;

/// The unified error type returned by public engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested scale key is not present in the manifest or block index.
    #[error("unknown scale key {0:?}")]
    UnknownScale(String),
    /// A block geometry computation failed (bad bounds, dimensionality mismatch, ...).
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// An array view construction failed (out-of-bounds sub-rectangle).
    #[error(transparent)]
    Array(#[from] ArrayError),
    /// A codec-level encode/decode error.
    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),
    /// A data-store I/O error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A block-level error (load/save bookkeeping).
    #[error(transparent)]
    Block(#[from] BlockError),
    /// A manifest validation or lookup error.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// An operation is not implemented, either fundamentally (JPEG decode) or
    /// by the particular backend in use.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Convenience alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
