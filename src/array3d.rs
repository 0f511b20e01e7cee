//! A fixed-shape, row-major, 3D typed buffer and the sub-rectangle views
//! over it used to move data in and out of [`Block`](crate::block::Block)s.

use crate::manifest::DataType;

/// An element type storable in an [`Array`].
///
/// A sealed-in-spirit trait: it is only implemented in this crate for the
/// five element types the manifest's `data_type` field can name.
pub trait ArrayElement: bytemuck::Pod + num::Zero + std::ops::AddAssign + Copy {
    /// The [`DataType`] tag corresponding to `Self`.
    const DTYPE: DataType;
}

impl ArrayElement for u8 {
    const DTYPE: DataType = DataType::U8;
}
impl ArrayElement for u16 {
    const DTYPE: DataType = DataType::U16;
}
impl ArrayElement for u32 {
    const DTYPE: DataType = DataType::U32;
}
impl ArrayElement for u64 {
    const DTYPE: DataType = DataType::U64;
}
impl ArrayElement for f32 {
    const DTYPE: DataType = DataType::F32;
}

/// Error constructing or indexing an [`Array`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ArrayError {
    /// A byte buffer was not exactly `xdim*ydim*zdim*sizeof(T)` bytes.
    #[error("expected {expected} bytes for shape, got {actual}")]
    ByteLengthMismatch {
        /// The required byte length.
        expected: usize,
        /// The byte length actually supplied.
        actual: usize,
    },
    /// A view's rectangle fell (even partially) outside the array's shape.
    #[error("view range {start:?}..{end:?} is out of bounds for shape {shape:?}")]
    ViewOutOfBounds {
        /// The view's start.
        start: [u64; 3],
        /// The view's end.
        end: [u64; 3],
        /// The array's shape.
        shape: [u64; 3],
    },
}

/// A fixed-shape, row-major (`x` slowest, `z` fastest) dense 3D buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Array<T: ArrayElement> {
    xdim: u64,
    ydim: u64,
    zdim: u64,
    data: Vec<T>,
}

impl<T: ArrayElement> Array<T> {
    /// Create a zero-initialized array of the given shape.
    #[must_use]
    pub fn new(xdim: u64, ydim: u64, zdim: u64) -> Self {
        let n = (xdim * ydim * zdim) as usize;
        Self {
            xdim,
            ydim,
            zdim,
            data: vec![T::zero(); n],
        }
    }

    /// Construct an array of the given shape from a raw little/native-endian
    /// byte buffer already in this array's row-major element order.
    ///
    /// # Errors
    /// Returns [`ArrayError::ByteLengthMismatch`] if `bytes.len()` is not
    /// exactly `xdim*ydim*zdim*size_of::<T>()`.
    pub fn from_bytes(bytes: &[u8], xdim: u64, ydim: u64, zdim: u64) -> Result<Self, ArrayError> {
        let expected = (xdim * ydim * zdim) as usize * std::mem::size_of::<T>();
        if bytes.len() != expected {
            return Err(ArrayError::ByteLengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let data = bytemuck::cast_slice::<u8, T>(bytes).to_vec();
        Ok(Self {
            xdim,
            ydim,
            zdim,
            data,
        })
    }

    /// The array's shape `(xdim, ydim, zdim)`.
    #[must_use]
    pub const fn shape(&self) -> [u64; 3] {
        [self.xdim, self.ydim, self.zdim]
    }

    /// `3`, the number of dimensions every [`Array`] has.
    #[must_use]
    pub const fn dimensionality(&self) -> usize {
        3
    }

    /// The total number of elements (`xdim*ydim*zdim`).
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    /// The total number of bytes the element data occupies.
    #[must_use]
    pub fn num_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }

    fn linear_index(&self, x: u64, y: u64, z: u64) -> usize {
        ((x * self.ydim + y) * self.zdim + z) as usize
    }

    /// Indexed read.
    #[must_use]
    pub fn at(&self, x: u64, y: u64, z: u64) -> T {
        self.data[self.linear_index(x, y, z)]
    }

    /// Indexed write.
    pub fn set(&mut self, x: u64, y: u64, z: u64, value: T) {
        let i = self.linear_index(x, y, z);
        self.data[i] = value;
    }

    /// Linear (flattened row-major) read.
    #[must_use]
    pub fn at_linear(&self, i: usize) -> T {
        self.data[i]
    }

    /// Zero-fill the entire buffer.
    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|v| *v = T::zero());
    }

    /// The underlying row-major element slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// The underlying row-major element slice, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Bulk-copy the buffer's elements into `dst`.
    ///
    /// # Panics
    /// Panics if `dst.len() != self.num_elements()`.
    pub fn copy_out(&self, dst: &mut [T]) {
        assert_eq!(dst.len(), self.data.len());
        dst.copy_from_slice(&self.data);
    }

    /// Borrow a mutable sub-rectangle view `[xr.0, xr.1) x [yr.0, yr.1) x [zr.0, zr.1)`.
    ///
    /// # Errors
    /// Returns [`ArrayError::ViewOutOfBounds`] if the rectangle exceeds the
    /// array's shape.
    pub fn view(
        &mut self,
        xr: (u64, u64),
        yr: (u64, u64),
        zr: (u64, u64),
    ) -> Result<ArrayView<'_, T>, ArrayError> {
        let shape = self.shape();
        let start = [xr.0, yr.0, zr.0];
        let end = [xr.1, yr.1, zr.1];
        for i in 0..3 {
            if start[i] > end[i] || end[i] > shape[i] {
                return Err(ArrayError::ViewOutOfBounds { start, end, shape });
            }
        }
        Ok(ArrayView {
            array: self,
            x_range: xr,
            y_range: yr,
            z_range: zr,
        })
    }
}

/// A borrowed, mutable sub-rectangle of an [`Array`].
///
/// Reads and writes through the view address the underlying array directly;
/// a view never copies.
pub struct ArrayView<'a, T: ArrayElement> {
    array: &'a mut Array<T>,
    x_range: (u64, u64),
    y_range: (u64, u64),
    z_range: (u64, u64),
}

impl<T: ArrayElement> ArrayView<'_, T> {
    /// The view's shape, i.e. the size of its rectangle.
    #[must_use]
    pub fn shape(&self) -> [u64; 3] {
        [
            self.x_range.1 - self.x_range.0,
            self.y_range.1 - self.y_range.0,
            self.z_range.1 - self.z_range.0,
        ]
    }

    /// `3`, matching [`Array::dimensionality`].
    #[must_use]
    pub const fn dimensionality(&self) -> usize {
        3
    }

    /// Read the element at view-local coordinates `(x, y, z)`.
    #[must_use]
    pub fn get(&self, x: u64, y: u64, z: u64) -> T {
        self.array
            .at(self.x_range.0 + x, self.y_range.0 + y, self.z_range.0 + z)
    }

    /// Write the element at view-local coordinates `(x, y, z)`.
    pub fn set(&mut self, x: u64, y: u64, z: u64, value: T) {
        self.array
            .set(self.x_range.0 + x, self.y_range.0 + y, self.z_range.0 + z, value);
    }

    /// Add `value` to the element at view-local coordinates `(x, y, z)`.
    pub fn add_assign(&mut self, x: u64, y: u64, z: u64, value: T) {
        let cur = self.get(x, y, z);
        let mut cur = cur;
        cur += value;
        self.set(x, y, z, cur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_array_is_zeroed() {
        let a = Array::<u32>::new(2, 2, 2);
        assert_eq!(a.num_elements(), 8);
        for i in 0..8 {
            assert_eq!(a.at_linear(i), 0);
        }
    }

    #[test]
    fn at_and_set_round_trip() {
        let mut a = Array::<u16>::new(3, 4, 5);
        a.set(1, 2, 3, 42);
        assert_eq!(a.at(1, 2, 3), 42);
        assert_eq!(a.at(0, 0, 0), 0);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        let err = Array::<u32>::from_bytes(&[0u8; 3], 2, 2, 2).unwrap_err();
        assert!(matches!(err, ArrayError::ByteLengthMismatch { .. }));
    }

    #[test]
    fn view_shape_and_dimensionality() {
        let mut a = Array::<u8>::new(8, 8, 8);
        let v = a.view((2, 5), (0, 8), (1, 4)).unwrap();
        assert_eq!(v.shape(), [3, 8, 3]);
        assert_eq!(v.dimensionality(), 3);
    }

    #[test]
    fn view_writes_mutate_underlying_array() {
        let mut a = Array::<u32>::new(4, 4, 4);
        {
            let mut v = a.view((1, 3), (1, 3), (1, 3)).unwrap();
            v.set(0, 0, 0, 7);
        }
        assert_eq!(a.at(1, 1, 1), 7);
    }

    #[test]
    fn view_out_of_bounds_is_rejected() {
        let mut a = Array::<u32>::new(4, 4, 4);
        assert!(a.view((0, 5), (0, 4), (0, 4)).is_err());
    }

    #[test]
    fn copy_out_matches_contents() {
        let mut a = Array::<u8>::new(2, 2, 2);
        for i in 0..8u8 {
            a.as_mut_slice()[i as usize] = i;
        }
        let mut dst = vec![0u8; 8];
        a.copy_out(&mut dst);
        assert_eq!(dst, (0u8..8).collect::<Vec<_>>());
    }
}
