//! Non-owning strided views over caller-owned buffers.
//!
//! A [`DenseView`] is a pointer plus extents and strides. It is `Copy`, so
//! the tiles of a [`BlockMatrix`](crate::blocks::BlockMatrix) can be handed to
//! many task records at once. Element access is `unsafe`: exclusive access
//! to a tile is guaranteed by the scheduler's tile handles, not by the type
//! system.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::ptr::{self, NonNull};

use blockwise_core::BlockwiseError;
use faer::traits::RealField;
use faer::{MatMut, MatRef};
use num_traits::Float;

/// Floating-point element type accepted by the engine.
pub trait Scalar: Float + RealField + Send + Sync + fmt::Debug + 'static {}

impl<T> Scalar for T where T: Float + RealField + Send + Sync + fmt::Debug + 'static {}

/// An `m x n` region of a buffer addressed as `ptr[i * row_stride + j * col_stride]`.
pub struct DenseView<'a, T> {
    ptr: *mut T,
    nrows: usize,
    ncols: usize,
    row_stride: usize,
    col_stride: usize,
    writable: bool,
    _buffer: PhantomData<&'a mut [T]>,
}

impl<T> Clone for DenseView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DenseView<'_, T> {}

// SAFETY: a view is a borrowed pointer into a buffer that outlives `'a`.
// Concurrent access to overlapping views is serialized by tile handles.
unsafe impl<T: Send + Sync> Send for DenseView<'_, T> {}
unsafe impl<T: Send + Sync> Sync for DenseView<'_, T> {}

impl<T> fmt::Debug for DenseView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseView")
            .field("nrows", &self.nrows)
            .field("ncols", &self.ncols)
            .field("row_stride", &self.row_stride)
            .field("col_stride", &self.col_stride)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<T> Default for DenseView<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> DenseView<'a, T> {
    /// An empty, unattached view.
    pub fn new() -> Self {
        Self {
            ptr: ptr::null_mut(),
            nrows: 0,
            ncols: 0,
            row_stride: 0,
            col_stride: 0,
            writable: false,
            _buffer: PhantomData,
        }
    }

    /// Column-major view of `buffer` with leading dimension `nrows`.
    pub fn col_major(buffer: &'a mut [T], nrows: usize, ncols: usize) -> Result<Self, BlockwiseError> {
        Self::from_slice(buffer, nrows, ncols, 1, nrows.max(1))
    }

    pub fn from_slice(
        buffer: &'a mut [T],
        nrows: usize,
        ncols: usize,
        row_stride: usize,
        col_stride: usize,
    ) -> Result<Self, BlockwiseError> {
        let mut view = Self::new();
        view.set_view(nrows, ncols);
        view.attach_buffer(row_stride, col_stride, buffer)?;
        Ok(view)
    }

    /// Read-only view. The kernels never write through an operand that is
    /// only read, and `BlockMatrix` refuses read-only destinations.
    pub fn read_only(
        buffer: &'a [T],
        nrows: usize,
        ncols: usize,
        row_stride: usize,
        col_stride: usize,
    ) -> Result<Self, BlockwiseError> {
        check_layout(buffer.len(), nrows, ncols, row_stride, col_stride)?;
        Ok(Self {
            ptr: buffer.as_ptr() as *mut T,
            nrows,
            ncols,
            row_stride,
            col_stride,
            writable: false,
            _buffer: PhantomData,
        })
    }

    /// Declare the logical extents. Detaches any previously attached buffer.
    pub fn set_view(&mut self, nrows: usize, ncols: usize) {
        self.nrows = nrows;
        self.ncols = ncols;
        self.ptr = ptr::null_mut();
        self.writable = false;
    }

    /// Bind storage and strides to the declared extents.
    pub fn attach_buffer(
        &mut self,
        row_stride: usize,
        col_stride: usize,
        buffer: &'a mut [T],
    ) -> Result<(), BlockwiseError> {
        check_layout(buffer.len(), self.nrows, self.ncols, row_stride, col_stride)?;
        self.ptr = buffer.as_mut_ptr();
        self.row_stride = row_stride;
        self.col_stride = col_stride;
        self.writable = true;
        Ok(())
    }

    /// A view of `rows x cols` inside this one, sharing the same buffer.
    pub fn subview(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self, BlockwiseError> {
        if rows.start > rows.end || rows.end > self.nrows || cols.start > cols.end || cols.end > self.ncols {
            return Err(BlockwiseError::InvalidLayout(format!(
                "subview [{:?}, {:?}] outside {}x{} view",
                rows, cols, self.nrows, self.ncols
            )));
        }
        let nrows = rows.end - rows.start;
        let ncols = cols.end - cols.start;
        let ptr = if self.ptr.is_null() || nrows == 0 || ncols == 0 {
            self.ptr
        } else {
            // In bounds: (rows.start, cols.start) is an element of this view.
            unsafe { self.ptr.add(rows.start * self.row_stride + cols.start * self.col_stride) }
        };
        Ok(Self {
            ptr,
            nrows,
            ncols,
            row_stride: self.row_stride,
            col_stride: self.col_stride,
            writable: self.writable,
            _buffer: PhantomData,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn col_stride(&self) -> usize {
        self.col_stride
    }

    pub fn is_attached(&self) -> bool {
        !self.ptr.is_null()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0 || self.ncols == 0
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    /// # Safety
    /// `(i, j)` must be inside the view, the view attached, and no other
    /// thread may be writing this element.
    #[inline]
    pub unsafe fn read(&self, i: usize, j: usize) -> T
    where
        T: Copy,
    {
        debug_assert!(i < self.nrows && j < self.ncols);
        *self.ptr.add(i * self.row_stride + j * self.col_stride)
    }

    /// # Safety
    /// As [`read`](Self::read), and the caller must hold exclusive access to
    /// the element through a writable view.
    #[inline]
    pub unsafe fn write(&self, i: usize, j: usize, value: T) {
        debug_assert!(i < self.nrows && j < self.ncols);
        debug_assert!(self.writable);
        *self.ptr.add(i * self.row_stride + j * self.col_stride) = value;
    }

    /// Pointer handed to faer. Unattached or empty views have no element
    /// faer may touch, so a dangling pointer stands in for null.
    fn faer_ptr(&self) -> *mut T {
        if self.is_empty() {
            NonNull::dangling().as_ptr()
        } else {
            self.ptr
        }
    }

    /// Borrow the view as a faer matrix.
    ///
    /// # Safety
    /// The view must be attached unless it is empty, and no other thread
    /// may write it while the returned matrix is alive.
    pub(crate) unsafe fn as_mat_ref(&self) -> MatRef<'_, T> {
        MatRef::from_raw_parts(
            self.faer_ptr(),
            self.nrows,
            self.ncols,
            self.row_stride as isize,
            self.col_stride as isize,
        )
    }

    /// Borrow the view as a mutable faer matrix.
    ///
    /// # Safety
    /// As [`as_mat_ref`](Self::as_mat_ref), the view must be writable, and
    /// the caller must hold exclusive access to every element.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn as_mat_mut(&self) -> MatMut<'_, T> {
        debug_assert!(self.writable || self.is_empty());
        MatMut::from_raw_parts_mut(
            self.faer_ptr(),
            self.nrows,
            self.ncols,
            self.row_stride as isize,
            self.col_stride as isize,
        )
    }
}

/// Every element of an `nrows x ncols` view must land inside `len`, and two
/// distinct indices must not address the same element.
fn check_layout(
    len: usize,
    nrows: usize,
    ncols: usize,
    row_stride: usize,
    col_stride: usize,
) -> Result<(), BlockwiseError> {
    if nrows == 0 || ncols == 0 {
        return Ok(());
    }
    if (nrows > 1 && row_stride == 0) || (ncols > 1 && col_stride == 0) {
        return Err(BlockwiseError::InvalidLayout(format!(
            "zero stride for {}x{} view (row_stride={}, col_stride={})",
            nrows, ncols, row_stride, col_stride
        )));
    }
    let col_major = nrows == 1 || ncols == 1 || col_stride >= row_stride.saturating_mul(nrows);
    let row_major = nrows == 1 || ncols == 1 || row_stride >= col_stride.saturating_mul(ncols);
    if !col_major && !row_major {
        return Err(BlockwiseError::InvalidLayout(format!(
            "strides ({}, {}) overlap for {}x{} view",
            row_stride, col_stride, nrows, ncols
        )));
    }
    let last = (nrows - 1)
        .checked_mul(row_stride)
        .and_then(|r| (ncols - 1).checked_mul(col_stride).and_then(|c| r.checked_add(c)));
    match last {
        Some(last) if last < len => Ok(()),
        _ => Err(BlockwiseError::InvalidLayout(format!(
            "{}x{} view with strides ({}, {}) exceeds buffer of {} elements",
            nrows, ncols, row_stride, col_stride, len
        ))),
    }
}
