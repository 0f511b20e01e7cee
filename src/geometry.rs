//! Block geometry: pure functions mapping block keys, chunk shapes, image
//! sizes, and cutouts to block extents and overlap rectangles.
//!
//! Nothing in this module touches storage or holds state; every function is
//! a total or fallible computation over plain integer coordinates.

use itertools::iproduct;
use thiserror::Error;

use crate::morton;

/// An inclusive-exclusive 3D coordinate, `(x, y, z)`.
///
/// Signed so that intermediate cutout arithmetic (subtracting a voxel
/// offset) can be validated rather than silently wrapping.
pub type Coord3 = [i64; 3];

/// A block's grid coordinates and its cached Morton index.
///
/// Ordered by `morton`, which is also the type's `Ord` implementation, so a
/// `BTreeMap<BlockKey, _>` iterates in Morton order for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    morton: u64,
    x: u64,
    y: u64,
    z: u64,
}

impl BlockKey {
    /// Construct a key from block grid indices, deriving the Morton index.
    #[must_use]
    pub fn new(x: u64, y: u64, z: u64) -> Self {
        Self {
            morton: morton::encode(x, y, z),
            x,
            y,
            z,
        }
    }

    /// The block's Morton index.
    #[must_use]
    pub const fn morton(&self) -> u64 {
        self.morton
    }

    /// The block's grid indices `(x, y, z)`.
    #[must_use]
    pub const fn xyz(&self) -> (u64, u64, u64) {
        (self.x, self.y, self.z)
    }
}

/// Errors arising from geometry computations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    /// `start >= end` for some dimension, or a bound underflowed below zero.
    #[error("invalid range: start {start:?} must be < end {end:?} and non-negative")]
    InvalidRange {
        /// The offending start bound.
        start: Coord3,
        /// The offending end bound.
        end: Coord3,
    },
    /// A chunk shape had a zero dimension.
    #[error("chunk shape must be strictly positive, got {0:?}")]
    InvalidChunkShape([u64; 3]),
}

/// Enumerate the block keys whose block regions intersect `[start, end)`,
/// sorted by Morton order.
///
/// # Errors
/// Returns [`GeometryError::InvalidRange`] if `start[i] >= end[i]` or
/// `start[i] < 0` for any `i`, and [`GeometryError::InvalidChunkShape`] if any
/// chunk dimension is zero.
pub fn blocks_for_bbox(
    chunk_shape: [u64; 3],
    start: Coord3,
    end: Coord3,
) -> Result<Vec<BlockKey>, GeometryError> {
    if chunk_shape.iter().any(|&c| c == 0) {
        return Err(GeometryError::InvalidChunkShape(chunk_shape));
    }
    for i in 0..3 {
        if start[i] < 0 || start[i] >= end[i] {
            return Err(GeometryError::InvalidRange { start, end });
        }
    }

    let kmin: [u64; 3] = std::array::from_fn(|i| (start[i] as u64) / chunk_shape[i]);
    let kmax: [u64; 3] = std::array::from_fn(|i| {
        let e = end[i] as u64;
        (e + chunk_shape[i] - 1) / chunk_shape[i]
    });

    let mut keys: Vec<_> = iproduct!(kmin[0]..kmax[0], kmin[1]..kmax[1], kmin[2]..kmax[2])
        .map(|(kx, ky, kz)| BlockKey::new(kx, ky, kz))
        .collect();
    keys.sort_by_key(BlockKey::morton);
    Ok(keys)
}

/// The start of a block's region in image space.
#[must_use]
pub fn block_start(key: BlockKey, chunk_shape: [u64; 3]) -> Coord3 {
    let (x, y, z) = key.xyz();
    [
        (x * chunk_shape[0]) as i64,
        (y * chunk_shape[1]) as i64,
        (z * chunk_shape[2]) as i64,
    ]
}

/// The end of a block's region in image space, clipped to an optional image
/// size.
#[must_use]
pub fn block_end(key: BlockKey, chunk_shape: [u64; 3], image_size: Option<Coord3>) -> Coord3 {
    let (x, y, z) = key.xyz();
    let raw = [
        ((x + 1) * chunk_shape[0]) as i64,
        ((y + 1) * chunk_shape[1]) as i64,
        ((z + 1) * chunk_shape[2]) as i64,
    ];
    match image_size {
        Some(size) => std::array::from_fn(|i| raw[i].min(size[i])),
        None => raw,
    }
}

/// `block_end - block_start`, elementwise.
#[must_use]
pub fn block_size_from_extents(block_start: Coord3, block_end: Coord3) -> [u64; 3] {
    std::array::from_fn(|i| (block_end[i] - block_start[i]).max(0) as u64)
}

/// The overlap rectangle between a block's region and a cutout, clipped to
/// both: `(max(bs, cs), min(be, ce))`.
#[must_use]
pub fn data_view(
    block_start: Coord3,
    block_end: Coord3,
    cutout_start: Coord3,
    cutout_end: Coord3,
) -> (Coord3, Coord3) {
    let start: Coord3 = std::array::from_fn(|i| block_start[i].max(cutout_start[i]));
    let end: Coord3 = std::array::from_fn(|i| block_end[i].min(cutout_end[i]));
    (start, end)
}
