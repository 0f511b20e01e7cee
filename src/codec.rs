//! Block wire codecs: raw, compressed-segmentation, and JPEG.
//!
//! Each codec is a pair of free functions rather than a trait object
//! registry: the set of encodings is small, fixed, and dispatched on by the
//! manifest's `data_type`/`encoding` pair in [`crate::block`], so a dynamic
//! plugin registry would only add indirection.

use thiserror::Error;

use crate::array3d::{Array, ArrayElement};
use crate::manifest::DataType;

/// Errors encoding or decoding a block payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Compressed-segmentation was used with a data type other than `u32`/`u64`.
    #[error("compressed-segmentation requires uint32 or uint64, got {0}")]
    UnsupportedDataType(DataType),
    /// A payload was too short to contain its declared header/table.
    #[error("truncated payload: expected at least {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Minimum required length.
        expected: usize,
        /// Length actually present.
        actual: usize,
    },
    /// A payload's self-described table/index was internally inconsistent.
    #[error("corrupt compressed-segmentation payload: {0}")]
    CorruptPayload(String),
    /// JPEG is encode-only; this was a decode attempt, or encoding hit an
    /// unsupported shape (more than one channel, non-`u8` element type).
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// gzip (de)compression failed.
    #[cfg(feature = "gzip")]
    #[error("gzip error: {0}")]
    Gzip(#[from] std::io::Error),
    /// JPEG encoding failed.
    #[cfg(feature = "jpeg")]
    #[error("jpeg encode error: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),
}

/// Gzip-compress `bytes`, if the `gzip` feature is enabled.
///
/// # Errors
/// Returns [`CodecError::Gzip`] if the underlying writer fails.
#[cfg(feature = "gzip")]
pub fn gzip_compress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Gzip-decompress `bytes`, if the `gzip` feature is enabled.
///
/// # Errors
/// Returns [`CodecError::Gzip`] if `bytes` is not valid gzip data.
#[cfg(feature = "gzip")]
pub fn gzip_decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// The raw codec: serializes an [`Array`] as column-major (Fortran-order)
/// bytes, the wire convention used by the reference cutout format.
pub mod raw {
    use super::{Array, ArrayElement, CodecError};

    /// Encode `array` to column-major bytes.
    #[must_use]
    pub fn encode<T: ArrayElement>(array: &Array<T>) -> Vec<u8> {
        let [xdim, ydim, zdim] = array.shape();
        let mut transposed = Vec::with_capacity(array.num_elements());
        for z in 0..zdim {
            for y in 0..ydim {
                for x in 0..xdim {
                    transposed.push(array.at(x, y, z));
                }
            }
        }
        bytemuck::cast_slice(&transposed).to_vec()
    }

    /// Decode column-major bytes into a row-major [`Array`] of shape
    /// `(xdim, ydim, zdim)`.
    ///
    /// # Errors
    /// Returns [`CodecError::TruncatedPayload`] if `bytes` is not exactly
    /// `xdim*ydim*zdim*size_of::<T>()` long.
    pub fn decode<T: ArrayElement>(
        bytes: &[u8],
        xdim: u64,
        ydim: u64,
        zdim: u64,
    ) -> Result<Array<T>, CodecError> {
        let expected = (xdim * ydim * zdim) as usize * std::mem::size_of::<T>();
        if bytes.len() != expected {
            return Err(CodecError::TruncatedPayload {
                expected,
                actual: bytes.len(),
            });
        }
        let transposed: &[T] = bytemuck::cast_slice(bytes);
        let mut array = Array::<T>::new(xdim, ydim, zdim);
        let mut i = 0usize;
        for z in 0..zdim {
            for y in 0..ydim {
                for x in 0..xdim {
                    array.set(x, y, z, transposed[i]);
                    i += 1;
                }
            }
        }
        Ok(array)
    }
}

/// The compressed-segmentation codec: per-8x8x8-sub-block unique-value
/// tables plus packed per-voxel indices, restricted to `u32`/`u64` labels.
pub mod compressed_segmentation {
    use super::{Array, ArrayElement, CodecError};

    /// Sub-blocks are always this size, regardless of what a manifest's
    /// `compressed_segmentation_block_size` field says.
    pub const SUB_BLOCK_SHAPE: [u64; 3] = [8, 8, 8];

    fn bits_for_table_len(len: usize) -> u32 {
        if len <= 1 {
            0
        } else {
            (usize::BITS - (len - 1).leading_zeros()).max(1)
        }
    }

    /// Encode `array` as a sequence of sub-blocks, each a little-endian
    /// `u32` value count, that many little-endian label values, then the
    /// per-voxel indices packed at the minimum bit width the table needs.
    ///
    /// # Errors
    /// Returns [`CodecError::UnsupportedDataType`] unless `T` is `u32` or
    /// `u64`.
    pub fn encode<T: ArrayElement>(array: &Array<T>) -> Result<Vec<u8>, CodecError> {
        if T::DTYPE != crate::manifest::DataType::U32 && T::DTYPE != crate::manifest::DataType::U64
        {
            return Err(CodecError::UnsupportedDataType(T::DTYPE));
        }
        let [xdim, ydim, zdim] = array.shape();
        let mut out = Vec::new();
        let [sx, sy, sz] = SUB_BLOCK_SHAPE;

        let mut x0 = 0;
        while x0 < xdim {
            let mut y0 = 0;
            while y0 < ydim {
                let mut z0 = 0;
                while z0 < zdim {
                    let x1 = (x0 + sx).min(xdim);
                    let y1 = (y0 + sy).min(ydim);
                    let z1 = (z0 + sz).min(zdim);

                    let mut values: Vec<u64> = Vec::new();
                    let mut indices: Vec<u32> = Vec::new();
                    for z in z0..z1 {
                        for y in y0..y1 {
                            for x in x0..x1 {
                                let v = label_to_u64(array.at(x, y, z));
                                let idx = values.iter().position(|&existing| existing == v);
                                let idx = match idx {
                                    Some(i) => i,
                                    None => {
                                        values.push(v);
                                        values.len() - 1
                                    }
                                };
                                indices.push(idx as u32);
                            }
                        }
                    }

                    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
                    for v in &values {
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                    let bits = bits_for_table_len(values.len());
                    pack_indices(&indices, bits, &mut out);

                    z0 += sz;
                }
                y0 += sy;
            }
            x0 += sx;
        }
        Ok(out)
    }

    /// Decode a compressed-segmentation payload produced by [`encode`] back
    /// into an [`Array`] of shape `(xdim, ydim, zdim)`.
    ///
    /// # Errors
    /// Returns [`CodecError::UnsupportedDataType`] unless `T` is `u32` or
    /// `u64`, or [`CodecError::TruncatedPayload`]/[`CodecError::CorruptPayload`]
    /// if `bytes` is malformed.
    pub fn decode<T: ArrayElement>(
        bytes: &[u8],
        xdim: u64,
        ydim: u64,
        zdim: u64,
    ) -> Result<Array<T>, CodecError> {
        if T::DTYPE != crate::manifest::DataType::U32 && T::DTYPE != crate::manifest::DataType::U64
        {
            return Err(CodecError::UnsupportedDataType(T::DTYPE));
        }
        let [sx, sy, sz] = SUB_BLOCK_SHAPE;
        let mut array = Array::<T>::new(xdim, ydim, zdim);
        let mut cursor = 0usize;

        let mut x0 = 0;
        while x0 < xdim {
            let mut y0 = 0;
            while y0 < ydim {
                let mut z0 = 0;
                while z0 < zdim {
                    let x1 = (x0 + sx).min(xdim);
                    let y1 = (y0 + sy).min(ydim);
                    let z1 = (z0 + sz).min(zdim);
                    let n_voxels = ((x1 - x0) * (y1 - y0) * (z1 - z0)) as usize;

                    let table_len = take_u32(bytes, &mut cursor)? as usize;
                    let mut values = Vec::with_capacity(table_len);
                    for _ in 0..table_len {
                        values.push(take_u64(bytes, &mut cursor)?);
                    }
                    let bits = bits_for_table_len(table_len);
                    let indices = unpack_indices(bytes, &mut cursor, n_voxels, bits)?;

                    let mut i = 0usize;
                    for z in z0..z1 {
                        for y in y0..y1 {
                            for x in x0..x1 {
                                let idx = indices[i] as usize;
                                let v = *values.get(idx).ok_or_else(|| {
                                    CodecError::CorruptPayload(format!(
                                        "index {idx} out of range for table of length {table_len}"
                                    ))
                                })?;
                                array.set(x, y, z, u64_to_label(v));
                                i += 1;
                            }
                        }
                    }

                    z0 += sz;
                }
                y0 += sy;
            }
            x0 += sx;
        }
        Ok(array)
    }

    fn pack_indices(indices: &[u32], bits: u32, out: &mut Vec<u8>) {
        if bits == 0 {
            return;
        }
        let mut acc: u64 = 0;
        let mut acc_bits = 0u32;
        for &idx in indices {
            acc |= u64::from(idx) << acc_bits;
            acc_bits += bits;
            while acc_bits >= 8 {
                out.push((acc & 0xff) as u8);
                acc >>= 8;
                acc_bits -= 8;
            }
        }
        if acc_bits > 0 {
            out.push((acc & 0xff) as u8);
        }
    }

    fn unpack_indices(
        bytes: &[u8],
        cursor: &mut usize,
        n: usize,
        bits: u32,
    ) -> Result<Vec<u32>, CodecError> {
        if bits == 0 {
            return Ok(vec![0; n]);
        }
        let total_bits = n as u64 * u64::from(bits);
        let total_bytes = usize::try_from(total_bits.div_ceil(8)).unwrap();
        if *cursor + total_bytes > bytes.len() {
            return Err(CodecError::TruncatedPayload {
                expected: *cursor + total_bytes,
                actual: bytes.len(),
            });
        }
        let slice = &bytes[*cursor..*cursor + total_bytes];
        *cursor += total_bytes;

        let mut out = Vec::with_capacity(n);
        let mut bit_pos = 0u64;
        for _ in 0..n {
            let mut value: u64 = 0;
            for b in 0..bits {
                let global_bit = bit_pos + u64::from(b);
                let byte = slice[(global_bit / 8) as usize];
                let bit = (byte >> (global_bit % 8)) & 1;
                value |= u64::from(bit) << b;
            }
            out.push(value as u32);
            bit_pos += u64::from(bits);
        }
        Ok(out)
    }

    fn take_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, CodecError> {
        if *cursor + 4 > bytes.len() {
            return Err(CodecError::TruncatedPayload {
                expected: *cursor + 4,
                actual: bytes.len(),
            });
        }
        let v = u32::from_le_bytes(bytes[*cursor..*cursor + 4].try_into().unwrap());
        *cursor += 4;
        Ok(v)
    }

    fn take_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64, CodecError> {
        if *cursor + 8 > bytes.len() {
            return Err(CodecError::TruncatedPayload {
                expected: *cursor + 8,
                actual: bytes.len(),
            });
        }
        let v = u64::from_le_bytes(bytes[*cursor..*cursor + 8].try_into().unwrap());
        *cursor += 8;
        Ok(v)
    }

    fn label_to_u64<T: ArrayElement>(value: T) -> u64 {
        let bytes_len = std::mem::size_of::<T>();
        let mut buf = [0u8; 8];
        bytemuck::bytes_of(&value)
            .iter()
            .take(bytes_len)
            .enumerate()
            .for_each(|(i, b)| buf[i] = *b);
        u64::from_le_bytes(buf)
    }

    fn u64_to_label<T: ArrayElement>(value: u64) -> T {
        let bytes_len = std::mem::size_of::<T>();
        let le = value.to_le_bytes();
        *bytemuck::from_bytes(&le[..bytes_len])
    }
}

/// The JPEG codec: encode-only, single-channel `u8` grayscale blocks,
/// gated behind the `jpeg` feature. Decoding is fundamentally unsupported:
/// JPEG is lossy, so a decoded block can never satisfy the engine's
/// accumulative `get` contract against data that was never written back.
pub mod jpeg {
    use super::{Array, ArrayElement, CodecError};
    use crate::manifest::DataType;

    /// Encode a single z-slice of an array as JPEG.
    ///
    /// Only `u8` element types are supported (`T::DTYPE == DataType::U8`),
    /// and only arrays with `zdim == 1`; JPEG has no native 3D
    /// representation, so multi-slice or non-`u8` blocks are rejected.
    ///
    /// # Errors
    /// Returns [`CodecError::UnsupportedDataType`] if `T` is not `u8`,
    /// [`CodecError::Unsupported`] if `zdim != 1`, or [`CodecError::Jpeg`] if
    /// the encoder fails.
    #[cfg(feature = "jpeg")]
    pub fn encode<T: ArrayElement>(array: &Array<T>) -> Result<Vec<u8>, CodecError> {
        if T::DTYPE != DataType::U8 {
            return Err(CodecError::UnsupportedDataType(T::DTYPE));
        }
        let [xdim, ydim, zdim] = array.shape();
        if zdim != 1 {
            return Err(CodecError::Unsupported(format!(
                "jpeg blocks must have zdim = 1, got {zdim}"
            )));
        }
        let plane: Vec<u8> = bytemuck::cast_slice(array.as_slice()).to_vec();
        let mut out = Vec::new();
        let encoder = jpeg_encoder::Encoder::new(&mut out, 90);
        encoder.encode(
            &plane,
            xdim as u16,
            ydim as u16,
            jpeg_encoder::ColorType::Luma,
        )?;
        Ok(out)
    }

    /// Always fails: JPEG decoding is out of scope.
    ///
    /// # Errors
    /// Always returns [`CodecError::Unsupported`].
    pub fn decode<T: ArrayElement>(
        _bytes: &[u8],
        _xdim: u64,
        _ydim: u64,
        _zdim: u64,
    ) -> Result<Array<T>, CodecError> {
        Err(CodecError::Unsupported(
            "jpeg decoding is not supported".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip() {
        let mut a = Array::<u32>::new(3, 4, 5);
        for x in 0..3 {
            for y in 0..4 {
                for z in 0..5 {
                    a.set(x, y, z, (x * 100 + y * 10 + z) as u32);
                }
            }
        }
        let bytes = raw::encode(&a);
        let decoded = raw::decode::<u32>(&bytes, 3, 4, 5).unwrap();
        assert_eq!(a, decoded);
    }

    #[test]
    fn raw_decode_rejects_wrong_length() {
        let err = raw::decode::<u32>(&[0u8; 3], 2, 2, 2).unwrap_err();
        assert!(matches!(err, CodecError::TruncatedPayload { .. }));
    }

    #[test]
    fn compressed_segmentation_round_trip_uniform_block() {
        let a = Array::<u64>::new(8, 8, 8);
        let bytes = compressed_segmentation::encode(&a).unwrap();
        let decoded = compressed_segmentation::decode::<u64>(&bytes, 8, 8, 8).unwrap();
        assert_eq!(a, decoded);
    }

    #[test]
    fn compressed_segmentation_round_trip_many_labels() {
        let mut a = Array::<u32>::new(16, 8, 8);
        for x in 0..16 {
            for y in 0..8 {
                for z in 0..8 {
                    a.set(x, y, z, (x + y + z) as u32 % 5);
                }
            }
        }
        let bytes = compressed_segmentation::encode(&a).unwrap();
        let decoded = compressed_segmentation::decode::<u32>(&bytes, 16, 8, 8).unwrap();
        assert_eq!(a, decoded);
    }

    #[test]
    fn compressed_segmentation_rejects_non_integer_labels() {
        let a = Array::<f32>::new(8, 8, 8);
        let err = compressed_segmentation::encode(&a).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedDataType(DataType::F32)));
    }

    #[test]
    fn compressed_segmentation_handles_partial_sub_block() {
        let mut a = Array::<u32>::new(10, 8, 8);
        for x in 0..10 {
            a.set(x, 0, 0, x as u32);
        }
        let bytes = compressed_segmentation::encode(&a).unwrap();
        let decoded = compressed_segmentation::decode::<u32>(&bytes, 10, 8, 8).unwrap();
        assert_eq!(a, decoded);
    }

    #[test]
    fn jpeg_decode_is_always_unsupported() {
        let err = jpeg::decode::<u8>(&[], 8, 8, 1).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzip_round_trip() {
        let data = b"some block bytes that repeat repeat repeat".to_vec();
        let compressed = gzip_compress(&data).unwrap();
        let decompressed = gzip_decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }
}
