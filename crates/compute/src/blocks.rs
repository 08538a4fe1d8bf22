//! Matrices whose elements are tiles over one shared base buffer.

use blockwise_core::BlockwiseError;

use crate::handle::TileHandle;
use crate::view::DenseView;

/// A `bm x bn` grid of [`DenseView`] tiles, stored column-major, with one
/// [`TileHandle`] per tile and one for the grid as a whole. The grid handle
/// orders root operations that share the matrix.
///
/// Every tile is `mb x mb` except on the last block row/column, which is
/// truncated to the remainder of `m` (resp. `n`).
#[derive(Debug)]
pub struct BlockMatrix<'a, T> {
    nrows: usize,
    ncols: usize,
    block_size: usize,
    bm: usize,
    bn: usize,
    tiles: Vec<DenseView<'a, T>>,
    handles: Vec<TileHandle>,
    grid: TileHandle,
}

impl<'a, T> BlockMatrix<'a, T> {
    /// Grid shape for an `m x n` matrix split into `mb`-sized tiles. The
    /// tiles are not attached to storage yet.
    pub fn new(m: usize, n: usize, mb: usize) -> Result<Self, BlockwiseError> {
        let mut matrix = Self {
            nrows: 0,
            ncols: 0,
            block_size: 0,
            bm: 0,
            bn: 0,
            tiles: Vec::new(),
            handles: Vec::new(),
            grid: TileHandle::new(),
        };
        matrix.set_matrix_of_blocks(m, n, mb)?;
        Ok(matrix)
    }

    /// Partition `buffer` (an `m x n` matrix with the given strides) into tiles.
    pub fn partition(
        buffer: &'a mut [T],
        m: usize,
        n: usize,
        row_stride: usize,
        col_stride: usize,
        mb: usize,
    ) -> Result<Self, BlockwiseError> {
        let mut matrix = Self::new(m, n, mb)?;
        matrix.attach_base_buffer(buffer, row_stride, col_stride)?;
        Ok(matrix)
    }

    /// Column-major partition with leading dimension `m`.
    pub fn col_major(buffer: &'a mut [T], m: usize, n: usize, mb: usize) -> Result<Self, BlockwiseError> {
        Self::partition(buffer, m, n, 1, m.max(1), mb)
    }

    /// Partition a buffer the operation only reads (e.g. the triangular
    /// factor of a solve). Such a matrix is refused as a destination.
    pub fn read_only(
        buffer: &'a [T],
        m: usize,
        n: usize,
        row_stride: usize,
        col_stride: usize,
        mb: usize,
    ) -> Result<Self, BlockwiseError> {
        let mut matrix = Self::new(m, n, mb)?;
        let base = DenseView::read_only(buffer, m, n, row_stride, col_stride)?;
        matrix.attach_view(base)?;
        Ok(matrix)
    }

    /// Refill the grid shape. Handles are kept when the grid dimensions do
    /// not change, and recreated empty otherwise.
    pub fn set_matrix_of_blocks(&mut self, m: usize, n: usize, mb: usize) -> Result<(), BlockwiseError> {
        if mb == 0 {
            return Err(BlockwiseError::InvalidLayout("block size must be positive".into()));
        }
        let bm = m.div_ceil(mb);
        let bn = n.div_ceil(mb);

        self.tiles.clear();
        self.tiles.reserve(bm * bn);
        for j in 0..bn {
            for i in 0..bm {
                let mut tile = DenseView::new();
                tile.set_view(extent(m, mb, i), extent(n, mb, j));
                self.tiles.push(tile);
            }
        }
        if (bm, bn) != (self.bm, self.bn) || self.handles.len() != bm * bn {
            // A tile is read by at most one task per block of its row and column.
            let readers = bm + bn;
            self.handles = (0..bm * bn).map(|_| TileHandle::with_reader_capacity(readers)).collect();
        }

        self.nrows = m;
        self.ncols = n;
        self.block_size = mb;
        self.bm = bm;
        self.bn = bn;
        Ok(())
    }

    /// Point every tile at its offset inside `buffer`. Tile shapes are
    /// unchanged; only pointers and strides are replaced.
    pub fn attach_base_buffer(
        &mut self,
        buffer: &'a mut [T],
        row_stride: usize,
        col_stride: usize,
    ) -> Result<(), BlockwiseError> {
        let base = DenseView::from_slice(buffer, self.nrows, self.ncols, row_stride, col_stride)?;
        self.attach_view(base)
    }

    fn attach_view(&mut self, base: DenseView<'a, T>) -> Result<(), BlockwiseError> {
        let mb = self.block_size;
        for j in 0..self.bn {
            for i in 0..self.bm {
                let rows = i * mb..(i * mb + extent(self.nrows, mb, i));
                let cols = j * mb..(j * mb + extent(self.ncols, mb, j));
                self.tiles[i + j * self.bm] = base.subview(rows, cols)?;
            }
        }
        Ok(())
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of block rows (`bm`).
    pub fn nrow_blocks(&self) -> usize {
        self.bm
    }

    /// Number of block columns (`bn`).
    pub fn ncol_blocks(&self) -> usize {
        self.bn
    }

    pub fn tile(&self, i: usize, j: usize) -> &DenseView<'a, T> {
        &self.tiles[i + j * self.bm]
    }

    pub fn handle(&self, i: usize, j: usize) -> &TileHandle {
        &self.handles[i + j * self.bm]
    }

    pub fn tiles(&self) -> &[DenseView<'a, T>] {
        &self.tiles
    }

    pub fn is_attached(&self) -> bool {
        self.tiles.iter().all(|t| t.is_attached() || t.is_empty())
    }

    /// Whether the tiles may be written. False for read-only partitions and
    /// for grids that were never attached.
    pub fn is_writable(&self) -> bool {
        self.tiles.iter().all(|t| t.is_writable() || t.is_empty())
    }

    /// Handle claimed by root operations on this matrix.
    pub fn grid_handle(&self) -> &TileHandle {
        &self.grid
    }

    /// Reset every handle once all task graphs touching the grid retired.
    pub fn clear_handles(&self) {
        for handle in &self.handles {
            handle.clear();
        }
        self.grid.clear();
    }

    pub fn handles_clear(&self) -> bool {
        self.grid.is_clear() && self.handles.iter().all(TileHandle::is_clear)
    }
}

impl<T: Copy> BlockMatrix<'_, T> {
    /// Copy the whole matrix out, column-major with leading dimension `m`.
    ///
    /// Taking `&mut self` guarantees no task record still holds the grid.
    pub fn to_col_major(&mut self) -> Result<Vec<T>, BlockwiseError> {
        if !self.is_attached() {
            return Err(BlockwiseError::InvalidLayout("block matrix is not attached".into()));
        }
        let mut out = Vec::with_capacity(self.nrows * self.ncols);
        for col in 0..self.ncols {
            let (j, c) = (col / self.block_size, col % self.block_size);
            for row in 0..self.nrows {
                let (i, r) = (row / self.block_size, row % self.block_size);
                // SAFETY: exclusive borrow of the grid and (r, c) lies in tile (i, j).
                out.push(unsafe { self.tile(i, j).read(r, c) });
            }
        }
        Ok(out)
    }

    /// Overwrite the matrix from a column-major source with leading
    /// dimension `m`. Handles are left untouched.
    pub fn fill_from_col_major(&mut self, source: &[T]) -> Result<(), BlockwiseError> {
        if !self.is_writable() || !self.is_attached() {
            return Err(BlockwiseError::InvalidLayout("block matrix is not writable".into()));
        }
        if source.len() < self.nrows * self.ncols {
            return Err(BlockwiseError::ShapeMismatch(format!(
                "source of {} elements for a {}x{} matrix",
                source.len(),
                self.nrows,
                self.ncols
            )));
        }
        for col in 0..self.ncols {
            let (j, c) = (col / self.block_size, col % self.block_size);
            for row in 0..self.nrows {
                let (i, r) = (row / self.block_size, row % self.block_size);
                // SAFETY: as in `to_col_major`, and the tile is writable.
                unsafe { self.tile(i, j).write(r, c, source[row + col * self.nrows]) };
            }
        }
        Ok(())
    }
}

/// Edge length of block `index` when `len` is split into `mb`-sized blocks.
fn extent(len: usize, mb: usize, index: usize) -> usize {
    mb.min(len - index * mb)
}
