//! The manifest: an immutable description of a volume's scales, consumed
//! (never mutated) by the [`Engine`](crate::engine::Engine).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The element data type of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `uint8`
    #[serde(rename = "uint8")]
    U8,
    /// `uint16`
    #[serde(rename = "uint16")]
    U16,
    /// `uint32`
    #[serde(rename = "uint32")]
    U32,
    /// `uint64`
    #[serde(rename = "uint64")]
    U64,
    /// `float32`
    #[serde(rename = "float32")]
    F32,
}

impl DataType {
    /// The size in bytes of one element of this data type.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
            Self::U64 => 8,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::U64 => "uint64",
            Self::F32 => "float32",
        };
        f.write_str(s)
    }
}

/// The block wire encoding of a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Column-major transposed raw bytes.
    Raw,
    /// Compressed-segmentation codec, `u32`/`u64` only.
    CompressedSegmentation,
    /// JPEG, encode-only, single-channel.
    Jpeg,
}

/// The volume's kind, which constrains `num_channels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// A grayscale or multi-channel image volume.
    Image,
    /// A single-channel label volume.
    Segmentation,
}

/// One resolution level of a volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    /// Subdirectory name for this scale's blocks.
    pub key: String,
    /// Dataspace dimensions in voxels.
    pub size: [u64; 3],
    /// Translation from image-space origin to the global (dataspace) frame.
    pub voxel_offset: [i64; 3],
    /// Physical units per voxel, in nanometres.
    pub resolution: [f64; 3],
    /// Candidate chunk (block) shapes; the engine uses the first and warns
    /// if more than one is present.
    pub chunk_sizes: Vec<[u64; 3]>,
    /// The wire encoding used for this scale's blocks.
    pub encoding: Encoding,
    /// Sub-block size for the compressed-segmentation codec. Informational
    /// only: the encoder always uses a fixed 8x8x8 sub-block.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "compressed_segmentation_block_size"
    )]
    pub compressed_segmentation_block_size: Option<[u64; 3]>,
}

impl Scale {
    /// The chunk shape the engine will actually use: the first candidate in
    /// [`chunk_sizes`](Self::chunk_sizes).
    ///
    /// # Errors
    /// Returns [`ManifestError::NoChunkSizes`] if the list is empty.
    pub fn selected_chunk_shape(&self) -> Result<[u64; 3], ManifestError> {
        self.chunk_sizes
            .first()
            .copied()
            .ok_or_else(|| ManifestError::NoChunkSizes(self.key.clone()))
    }
}

/// Immutable description of a volume: its type, element datatype, channel
/// count, and ordered scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// "image" or "segmentation".
    #[serde(rename = "type")]
    pub volume_type: VolumeType,
    /// The element datatype shared by every scale.
    pub data_type: DataType,
    /// Number of channels; must be 1 for segmentation volumes.
    pub num_channels: u32,
    /// The ordered scales, from finest to coarsest resolution.
    pub scales: Vec<Scale>,
    /// Optional mesh subdirectory name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<String>,
}

/// Errors validating or looking up data in a [`Manifest`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    /// `num_channels != 1` on a segmentation volume.
    #[error("segmentation volumes must have num_channels = 1, got {0}")]
    SegmentationMustBeSingleChannel(u32),
    /// Resolutions decreased between consecutive scales.
    #[error("resolution decreased from scale {prev_key:?} to {key:?}")]
    ResolutionDecreased {
        /// The earlier scale's key.
        prev_key: String,
        /// The later scale's key, whose resolution was lower.
        key: String,
    },
    /// A scale has no candidate chunk sizes.
    #[error("scale {0:?} has no chunk_sizes")]
    NoChunkSizes(String),
    /// The requested scale key is absent from the manifest.
    #[error("unknown scale key {0:?}")]
    UnknownScale(String),
    /// A jpeg-encoded scale had a data type other than `uint8`.
    #[error("scale {key:?} uses jpeg encoding, which requires data_type uint8, got {data_type}")]
    JpegRequiresU8 {
        /// The offending scale's key.
        key: String,
        /// The manifest's declared data type.
        data_type: DataType,
    },
}

impl Manifest {
    /// Validate the manifest's cross-field invariants:
    /// `num_channels == 1` for segmentation volumes, and non-decreasing
    /// resolutions across scales.
    ///
    /// # Errors
    /// Returns the first violated [`ManifestError`].
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.volume_type == VolumeType::Segmentation && self.num_channels != 1 {
            return Err(ManifestError::SegmentationMustBeSingleChannel(
                self.num_channels,
            ));
        }
        for scale in &self.scales {
            if scale.encoding == Encoding::Jpeg && self.data_type != DataType::U8 {
                return Err(ManifestError::JpegRequiresU8 {
                    key: scale.key.clone(),
                    data_type: self.data_type,
                });
            }
        }
        for pair in self.scales.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            for i in 0..3 {
                if cur.resolution[i] < prev.resolution[i] {
                    return Err(ManifestError::ResolutionDecreased {
                        prev_key: prev.key.clone(),
                        key: cur.key.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Find a scale by key.
    ///
    /// # Errors
    /// Returns [`ManifestError::UnknownScale`] if no scale has this key.
    pub fn scale(&self, key: &str) -> Result<&Scale, ManifestError> {
        self.scales
            .iter()
            .find(|s| s.key == key)
            .ok_or_else(|| ManifestError::UnknownScale(key.to_string()))
    }
}
