//! A chunked storage engine for large 3D scientific image and segmentation
//! volumes.
//!
//! A volume is described by a [`manifest::Manifest`]: a data type, a channel
//! count, and one or more [`manifest::Scale`]s (resolution levels). Each
//! scale is subdivided into fixed-shape blocks on a grid; a block's grid
//! coordinates map to a [`geometry::BlockKey`] via Morton (Z-order)
//! encoding, and a [`block_index::BlockIndex`] keeps a scale's resident
//! blocks ordered by that key.
//!
//! [`engine::Engine`] is the entry point: construct one over a
//! [`manifest::Manifest`] and a [`storage::DataStore`], then `put`/`get`
//! typed cutouts. The engine resolves a cutout into the blocks it
//! intersects, loading or creating each [`block::Block`] as needed and
//! routing array data through it with accumulative (read-modify-write)
//! semantics.
//!
//! Block bytes are (de)serialized with one of three [`codec`]s: `raw`
//! (column-major, x-fastest), `compressed_segmentation` (label-table plus
//! packed indices over 8x8x8 sub-blocks, `uint32`/`uint64` only), or `jpeg`
//! (encode-only, single-channel `uint8`, gated behind the `jpeg` feature).

pub mod array3d;
pub mod block;
pub mod block_index;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod manifest;
pub mod morton;
pub mod storage;

pub use array3d::{Array, ArrayElement, ArrayView};
pub use engine::{Engine, EngineSettings};
pub use error::{Error, Result};
pub use manifest::Manifest;
