// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Validated data movement between tensors.
//!
//! Every public function checks modes, ranks, dtypes, storage and bounds up
//! front and then hands the work to `copy_rows`, which moves a rectangle of
//! `rows × row_bytes` bytes between two strided buffers. Rows are independent,
//! so when the [`DeviceContext`] carries a worker pool they are distributed
//! across it.
//!
//! Validation failures are never retried: they mean the graph asked for
//! something impossible. The only tolerated anomaly is a whole copy of an
//! empty tensor, which logs a warning and succeeds.

use crate::{DType, DataMode, DeviceContext, DeviceType, Shape, Tensor, TensorElement, TensorError};
use rayon::prelude::*;
use std::collections::HashMap;

// ── Core primitive ──────────────────────────────────────────────────────────

/// Placement of a row block inside a strided byte buffer.
#[derive(Debug, Clone, Copy)]
struct RowSpan {
    /// Index of the first row touched.
    first_row: usize,
    /// Bytes between consecutive rows.
    stride: usize,
    /// Byte offset inside each row.
    col_offset: usize,
}

impl RowSpan {
    /// One past the last byte this span touches for `rows` rows of `row_bytes`.
    fn end(&self, rows: usize, row_bytes: usize) -> usize {
        (self.first_row + rows - 1) * self.stride + self.col_offset + row_bytes
    }
}

/// Copies `rows` rows of `row_bytes` bytes from `src` into `dst`.
#[allow(clippy::too_many_arguments)]
fn copy_rows(
    op: &'static str,
    dst: &mut [u8],
    d: RowSpan,
    src: &[u8],
    s: RowSpan,
    rows: usize,
    row_bytes: usize,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    if rows == 0 || row_bytes == 0 {
        return Ok(());
    }
    if d.col_offset + row_bytes > d.stride || s.col_offset + row_bytes > s.stride {
        return Err(fail(TensorError::OutOfBounds {
            op,
            detail: format!(
                "row of {row_bytes} bytes does not fit strides (dst {} @ {}, src {} @ {})",
                d.stride, d.col_offset, s.stride, s.col_offset
            ),
        }));
    }
    let (dst_end, src_end) = (d.end(rows, row_bytes), s.end(rows, row_bytes));
    if dst_end > dst.len() || src_end > src.len() {
        return Err(fail(TensorError::OutOfBounds {
            op,
            detail: format!(
                "needs dst {dst_end}/{} bytes, src {src_end}/{} bytes",
                dst.len(),
                src.len()
            ),
        }));
    }

    let dst = &mut dst[d.first_row * d.stride..dst_end];
    let src = &src[s.first_row * s.stride..src_end];
    let copy_one = |(dr, sr): (&mut [u8], &[u8])| {
        dr[d.col_offset..d.col_offset + row_bytes]
            .copy_from_slice(&sr[s.col_offset..s.col_offset + row_bytes]);
    };

    match ctx.worker_pool() {
        Some(pool) if rows > 1 => pool.install(|| {
            dst.par_chunks_mut(d.stride)
                .zip(src.par_chunks(s.stride))
                .take(rows)
                .for_each(copy_one);
        }),
        _ => dst
            .chunks_mut(d.stride)
            .zip(src.chunks(s.stride))
            .take(rows)
            .for_each(copy_one),
    }
    Ok(())
}

/// Logs a validation failure and hands it back for returning.
fn fail(err: TensorError) -> TensorError {
    tracing::error!("{err}");
    err
}

fn src_bytes<'a>(op: &'static str, t: &'a Tensor) -> Result<&'a [u8], TensorError> {
    match t.storage() {
        Some(buf) => Ok(buf.as_bytes()),
        None => Err(fail(TensorError::MissingStorage {
            op,
            name: t.name().to_string(),
        })),
    }
}

fn dst_bytes<'a>(op: &'static str, t: &'a mut Tensor) -> Result<&'a mut [u8], TensorError> {
    let name = t.name().to_string();
    match t.storage_mut() {
        Some(buf) => Ok(buf.as_bytes_mut()),
        None => Err(fail(TensorError::MissingStorage { op, name })),
    }
}

fn check_dtype(op: &'static str, dst: DType, src: DType) -> Result<(), TensorError> {
    if dst != src {
        return Err(fail(TensorError::TypeMismatch { op, dst, src }));
    }
    Ok(())
}

fn check_rank(op: &'static str, t: &Tensor, rank: usize, other: &Shape) -> Result<(), TensorError> {
    if t.shape().rank() != rank {
        return Err(fail(TensorError::ShapeMismatch {
            op,
            lhs: t.shape().clone(),
            rhs: other.clone(),
        }));
    }
    Ok(())
}

/// Fails unless `offset + len <= extent`, without overflowing.
fn check_extent(
    op: &'static str,
    what: &str,
    offset: usize,
    len: usize,
    extent: usize,
) -> Result<(), TensorError> {
    match offset.checked_add(len) {
        Some(end) if end <= extent => Ok(()),
        _ => Err(fail(TensorError::OutOfBounds {
            op,
            detail: format!("{what}: offset {offset} + length {len} exceeds {extent}"),
        })),
    }
}

// ── Whole-tensor copy ───────────────────────────────────────────────────────

/// Copies every element of `src` into `dst` and waits for completion.
///
/// Both tensors must agree on mode, shape and dtype and both must have
/// storage. Strides may differ; padding bytes of `dst` are left untouched in
/// that case. An empty payload logs a warning and succeeds.
///
/// # Examples
/// ```
/// use tensor_core::{copy, CpuContext, Shape, Tensor};
/// let ctx = CpuContext::single_threaded();
/// let src = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
/// let mut dst = Tensor::zeros(Shape::vector(3), tensor_core::DType::F32);
/// copy::deep_copy_whole(&mut dst, &src, &ctx).unwrap();
/// assert_eq!(dst.as_f32_slice(), &[1.0, 2.0, 3.0]);
/// ```
pub fn deep_copy_whole(
    dst: &mut Tensor,
    src: &Tensor,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    copy_whole("deep_copy_whole", dst, src, ctx)?;
    ctx.synchronize();
    Ok(())
}

/// Same contract as [`deep_copy_whole`] but returns as soon as the copy is
/// issued. Callers must [`synchronize`](DeviceContext::synchronize) before
/// reading `dst` on the host. On a host context the copy has already
/// completed on return.
pub fn deep_copy_whole_async(
    dst: &mut Tensor,
    src: &Tensor,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    copy_whole("deep_copy_whole_async", dst, src, ctx)
}

fn copy_whole(
    op: &'static str,
    dst: &mut Tensor,
    src: &Tensor,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    if dst.mode() != src.mode() {
        return Err(fail(TensorError::ModeMismatch {
            op,
            dst: dst.mode(),
            src: src.mode(),
        }));
    }
    if dst.shape() != src.shape() {
        return Err(fail(TensorError::ShapeMismatch {
            op,
            lhs: dst.shape().clone(),
            rhs: src.shape().clone(),
        }));
    }
    check_dtype(op, dst.dtype(), src.dtype())?;

    let payload = src.num_elements() * src.elem_size();
    let (src_stride, dst_stride) = (src.stride_bytes(), dst.stride_bytes());
    let size = src.size_bytes();
    let rows = src.shape().outer_count();
    let row_bytes = src.shape().innermost() * src.elem_size();
    let from = src_bytes(op, src)?;
    let to = dst_bytes(op, dst)?;
    if payload == 0 {
        tracing::warn!("{op}: '{}' has zero bytes, nothing to copy", src.name());
        return Ok(());
    }

    if src_stride == dst_stride && src.mode() == DataMode::Dense {
        if size > from.len() || size > to.len() {
            return Err(fail(TensorError::BufferSizeMismatch {
                expected: size,
                actual: from.len().min(to.len()),
            }));
        }
        to[..size].copy_from_slice(&from[..size]);
        return Ok(());
    }
    if src.mode() != DataMode::Dense {
        // Sparse layouts carry their own index arrays; copy the raw bytes.
        let len = from.len();
        if to.len() < len {
            return Err(fail(TensorError::BufferSizeMismatch {
                expected: len,
                actual: to.len(),
            }));
        }
        to[..len].copy_from_slice(from);
        return Ok(());
    }

    copy_rows(
        op,
        to,
        RowSpan { first_row: 0, stride: dst_stride, col_offset: 0 },
        from,
        RowSpan { first_row: 0, stride: src_stride, col_offset: 0 },
        rows,
        row_bytes,
        ctx,
    )
}

// ── Vector segments ─────────────────────────────────────────────────────────

/// Fills all of `dst` from `src[src_off..src_off + dst.len]`.
pub fn deep_copy_vector(
    dst: &mut Tensor,
    src: &Tensor,
    src_off: usize,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    let len = dst.shape().dim(0).unwrap_or(0);
    deep_copy_vector_part(dst, 0, src, src_off, len, ctx)
}

/// Copies `len` elements from `src[src_off..]` into `dst[dst_off..]`.
///
/// Both tensors must be rank-1 with the same dtype. If the segment does not
/// fit either tensor the call fails with `OutOfBounds` and writes nothing.
pub fn deep_copy_vector_part(
    dst: &mut Tensor,
    dst_off: usize,
    src: &Tensor,
    src_off: usize,
    len: usize,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    const OP: &str = "deep_copy_vector";
    check_rank(OP, dst, 1, src.shape())?;
    check_rank(OP, src, 1, dst.shape())?;
    check_dtype(OP, dst.dtype(), src.dtype())?;
    check_extent(OP, "src", src_off, len, src.shape()[0])?;
    check_extent(OP, "dst", dst_off, len, dst.shape()[0])?;

    let elem = src.elem_size();
    let from = src_bytes(OP, src)?;
    let to = dst_bytes(OP, dst)?;
    let (dst_len, src_len) = (to.len(), from.len());
    copy_rows(
        OP,
        to,
        RowSpan { first_row: 0, stride: dst_len, col_offset: dst_off * elem },
        from,
        RowSpan { first_row: 0, stride: src_len, col_offset: src_off * elem },
        1,
        len * elem,
        ctx,
    )
}

// ── 2-D regions ─────────────────────────────────────────────────────────────

/// A `rows × cols` rectangle read at one position and written at another.
///
/// ```
/// use tensor_core::copy::MatrixRegion;
/// let r = MatrixRegion::new(2, 3).from_src(1, 4).to_dst(0, 2);
/// assert_eq!((r.src_row, r.src_col, r.dst_row, r.dst_col), (1, 4, 0, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixRegion {
    pub src_row: usize,
    pub src_col: usize,
    pub dst_row: usize,
    pub dst_col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl MatrixRegion {
    /// A region anchored at the origin of both tensors.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            src_row: 0,
            src_col: 0,
            dst_row: 0,
            dst_col: 0,
            rows,
            cols,
        }
    }

    /// Sets the source origin.
    pub fn from_src(mut self, row: usize, col: usize) -> Self {
        self.src_row = row;
        self.src_col = col;
        self
    }

    /// Sets the destination origin.
    pub fn to_dst(mut self, row: usize, col: usize) -> Self {
        self.dst_row = row;
        self.dst_col = col;
        self
    }
}

/// Fills all of rank-2 `dst` from `src` starting at `(src_row, src_col)`.
pub fn deep_copy_matrix_2d(
    dst: &mut Tensor,
    src: &Tensor,
    src_row: usize,
    src_col: usize,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    let region = full_region(dst).from_src(src_row, src_col);
    deep_copy_matrix_2d_part(dst, src, &region, ctx)
}

/// Copies `region` between two rank-2 tensors of the same dtype, row by row
/// using each tensor's byte stride.
pub fn deep_copy_matrix_2d_part(
    dst: &mut Tensor,
    src: &Tensor,
    region: &MatrixRegion,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    const OP: &str = "deep_copy_matrix_2d";
    check_rank(OP, src, 2, dst.shape())?;
    copy_region(OP, dst, src, 0, region, ctx)
}

/// Fills all of rank-2 `dst` from slice `batch_idx` of rank-3 `src`.
pub fn deep_copy_matrix_2d_from_batch(
    dst: &mut Tensor,
    src: &Tensor,
    batch_idx: usize,
    src_row: usize,
    src_col: usize,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    let region = full_region(dst).from_src(src_row, src_col);
    deep_copy_matrix_2d_part_from_batch(dst, src, batch_idx, &region, ctx)
}

/// Copies `region` of slice `batch_idx` of a `(batch, row, col)` tensor into
/// a rank-2 tensor.
pub fn deep_copy_matrix_2d_part_from_batch(
    dst: &mut Tensor,
    src: &Tensor,
    batch_idx: usize,
    region: &MatrixRegion,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    const OP: &str = "deep_copy_matrix_2d_from_batch";
    check_rank(OP, src, 3, dst.shape())?;
    check_extent(OP, "batch", batch_idx, 1, src.shape()[0])?;
    let rows_per_batch = src.shape()[1];
    copy_region(OP, dst, src, batch_idx * rows_per_batch, region, ctx)
}

fn full_region(dst: &Tensor) -> MatrixRegion {
    let dims = dst.shape().dims();
    match dims {
        [rows, cols] => MatrixRegion::new(*rows, *cols),
        _ => MatrixRegion::new(0, 0),
    }
}

/// Shared body of the region copies. `src` rows are addressed from
/// `src_base_row`, which selects a batch slice for rank-3 sources; the last
/// two dimensions of `src` bound the region.
fn copy_region(
    op: &'static str,
    dst: &mut Tensor,
    src: &Tensor,
    src_base_row: usize,
    region: &MatrixRegion,
    ctx: &dyn DeviceContext,
) -> Result<(), TensorError> {
    check_rank(op, dst, 2, src.shape())?;
    check_dtype(op, dst.dtype(), src.dtype())?;

    let src_dims = src.shape().dims();
    let (src_rows, src_cols) = (src_dims[src_dims.len() - 2], src_dims[src_dims.len() - 1]);
    let (dst_rows, dst_cols) = (dst.shape()[0], dst.shape()[1]);
    check_extent(op, "src rows", region.src_row, region.rows, src_rows)?;
    check_extent(op, "src cols", region.src_col, region.cols, src_cols)?;
    check_extent(op, "dst rows", region.dst_row, region.rows, dst_rows)?;
    check_extent(op, "dst cols", region.dst_col, region.cols, dst_cols)?;

    let elem = src.elem_size();
    let src_stride = src.stride_bytes();
    let dst_stride = dst.stride_bytes();
    let from = src_bytes(op, src)?;
    let to = dst_bytes(op, dst)?;
    copy_rows(
        op,
        to,
        RowSpan {
            first_row: region.dst_row,
            stride: dst_stride,
            col_offset: region.dst_col * elem,
        },
        from,
        RowSpan {
            first_row: src_base_row + region.src_row,
            stride: src_stride,
            col_offset: region.src_col * elem,
        },
        region.rows,
        region.cols * elem,
        ctx,
    )
}

// ── Tensor maps ─────────────────────────────────────────────────────────────

/// Deep-copies every tensor of `src` into a new tensor on `device`.
///
/// Copies are named after their key, dense and unpadded, and share no
/// storage with their source. The first failing entry aborts the whole
/// import.
pub fn deep_copy_tensor_map(
    src: &HashMap<String, Tensor>,
    device: DeviceType,
    ctx: &dyn DeviceContext,
) -> Result<HashMap<String, Tensor>, TensorError> {
    let mut out = HashMap::with_capacity(src.len());
    for (name, t) in src {
        out.insert(name.clone(), copy_onto("deep_copy_tensor_map", name, t, device, ctx)?);
    }
    ctx.synchronize();
    Ok(out)
}

/// [`deep_copy_tensor_map`] for keys that name an ordered list of tensors.
/// List order is preserved.
pub fn deep_copy_tensor_list_map(
    src: &HashMap<String, Vec<Tensor>>,
    device: DeviceType,
    ctx: &dyn DeviceContext,
) -> Result<HashMap<String, Vec<Tensor>>, TensorError> {
    let mut out = HashMap::with_capacity(src.len());
    for (name, list) in src {
        let copies = list
            .iter()
            .map(|t| copy_onto("deep_copy_tensor_list_map", name, t, device, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        out.insert(name.clone(), copies);
    }
    ctx.synchronize();
    Ok(out)
}

fn copy_onto(
    op: &'static str,
    name: &str,
    src: &Tensor,
    device: DeviceType,
    ctx: &dyn DeviceContext,
) -> Result<Tensor, TensorError> {
    if src.mode() != DataMode::Dense {
        return Err(fail(TensorError::ModeMismatch {
            op,
            dst: DataMode::Dense,
            src: src.mode(),
        }));
    }
    let mut dst = Tensor::new(name, src.shape().clone(), src.dtype(), device);
    copy_whole(op, &mut dst, src, ctx)?;
    Ok(dst)
}

// ── Fill and host conversion ────────────────────────────────────────────────

/// Sets every byte of a rank-1 or rank-2 tensor to `value`.
///
/// Rank-2 tensors are filled row by row across each row's full stride,
/// padding included. Tensors without storage are left alone.
///
/// # Panics
/// Panics for any other rank; callers must never ask for it.
pub fn memset(t: &mut Tensor, value: u8, ctx: &dyn DeviceContext) {
    let rank = t.shape().rank();
    let rows = t.shape().outer_count();
    let stride = t.stride_bytes();
    let Some(buf) = t.storage_mut() else {
        tracing::debug!("memset: tensor has no storage, skipping");
        return;
    };
    match rank {
        1 => buf.as_bytes_mut().fill(value),
        2 => {
            if stride == 0 {
                return;
            }
            let bytes = &mut buf.as_bytes_mut()[..rows * stride];
            match ctx.worker_pool() {
                Some(pool) => pool.install(|| {
                    bytes.par_chunks_mut(stride).for_each(|row| row.fill(value));
                }),
                None => bytes.chunks_mut(stride).for_each(|row| row.fill(value)),
            }
        }
        other => panic!("memset: unsupported tensor rank {other} (expected 1 or 2)"),
    }
}

/// Writes `src` into the flat element buffer of `dst` starting at element
/// `dst_off`.
///
/// `T` must be exactly the dtype of `dst`; no numeric conversion is done.
/// Offsets count elements of the underlying buffer, padding included.
pub fn copy_from_slice<T: TensorElement>(
    dst: &mut Tensor,
    dst_off: usize,
    src: &[T],
) -> Result<(), TensorError> {
    const OP: &str = "copy_from_slice";
    check_dtype(OP, dst.dtype(), T::DTYPE)?;
    let bytes = dst_bytes(OP, dst)?;
    let elements: &mut [T] = bytemuck::cast_slice_mut(bytes);
    check_extent(OP, "dst", dst_off, src.len(), elements.len())?;
    elements[dst_off..dst_off + src.len()].copy_from_slice(src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CpuContext, DeviceType};
    use proptest::prelude::*;

    fn pool() -> CpuContext {
        CpuContext::new(4).unwrap()
    }

    fn iota(rows: usize, cols: usize) -> Tensor {
        let data: Vec<f32> = (0..rows * cols).map(|i| i as f32).collect();
        Tensor::from_f32(Shape::matrix(rows, cols), &data).unwrap()
    }

    #[test]
    fn test_whole_copy_overwrites_filled_tensor() {
        let ctx = pool();
        let mut a = Tensor::zeros(Shape::matrix(4, 4), DType::F32);
        memset(&mut a, 0xFF, &ctx);
        assert!(a.as_bytes().unwrap().iter().all(|&b| b == 0xFF));

        let a_prime = iota(4, 4);
        let mut b = Tensor::zeros(Shape::matrix(4, 4), DType::F32);
        deep_copy_whole(&mut b, &a_prime, &ctx).unwrap();
        assert_eq!(b.as_f32_slice(), a_prime.as_f32_slice());
    }

    #[test]
    fn test_whole_copy_rejects_mismatches() {
        let ctx = CpuContext::single_threaded();
        let src = iota(2, 2);

        let mut wrong_shape = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
        assert!(matches!(
            deep_copy_whole(&mut wrong_shape, &src, &ctx),
            Err(TensorError::ShapeMismatch { .. })
        ));

        let mut wrong_type = Tensor::zeros(Shape::matrix(2, 2), DType::I32);
        assert!(matches!(
            deep_copy_whole(&mut wrong_type, &src, &ctx),
            Err(TensorError::TypeMismatch { .. })
        ));

        let mut wrong_mode = Tensor::zeros(Shape::matrix(2, 2), DType::F32).with_mode(DataMode::Csc);
        assert!(matches!(
            deep_copy_whole(&mut wrong_mode, &src, &ctx),
            Err(TensorError::ModeMismatch { .. })
        ));

        let mut unallocated = Tensor::placeholder(
            "out",
            Shape::matrix(2, 2),
            DType::F32,
            DeviceType::Cpu,
            DataMode::Dense,
        );
        assert!(matches!(
            deep_copy_whole(&mut unallocated, &src, &ctx),
            Err(TensorError::MissingStorage { .. })
        ));
    }

    #[test]
    fn test_whole_copy_of_empty_tensor_is_noop() {
        let ctx = CpuContext::single_threaded();
        let src = Tensor::zeros(Shape::matrix(0, 8), DType::F16);
        let mut dst = Tensor::zeros(Shape::matrix(0, 8), DType::F16);
        assert!(deep_copy_whole(&mut dst, &src, &ctx).is_ok());
        assert!(deep_copy_whole_async(&mut dst, &src, &ctx).is_ok());
    }

    #[test]
    fn test_empty_copy_still_requires_storage() {
        let ctx = CpuContext::single_threaded();
        let src = Tensor::zeros(Shape::matrix(0, 8), DType::F16);
        let mut dst = Tensor::placeholder(
            "unbound",
            Shape::matrix(0, 8),
            DType::F16,
            DeviceType::Cpu,
            DataMode::Dense,
        );
        assert!(matches!(
            deep_copy_whole(&mut dst, &src, &ctx),
            Err(TensorError::MissingStorage { ref name, .. }) if name == "unbound"
        ));
    }

    #[test]
    fn test_whole_copy_between_strides() {
        let ctx = pool();
        let src = iota(3, 3);
        let mut dst = Tensor::with_row_stride(Shape::matrix(3, 3), DType::F32, 16).unwrap();
        memset(&mut dst, 0x7F, &ctx);
        deep_copy_whole(&mut dst, &src, &ctx).unwrap();

        let bytes = dst.as_bytes().unwrap();
        for row in 0..3 {
            let values: &[f32] = bytemuck::cast_slice(&bytes[row * 16..row * 16 + 12]);
            assert_eq!(values, &src.as_f32_slice()[row * 3..row * 3 + 3]);
            assert_eq!(bytes[row * 16 + 12..row * 16 + 16], [0x7F; 4]);
        }
    }

    #[test]
    fn test_vector_part() {
        let ctx = CpuContext::single_threaded();
        let src = Tensor::from_slice(Shape::vector(6), &[1i16, 2, 3, 4, 5, 6]).unwrap();
        let mut dst = Tensor::zeros(Shape::vector(4), DType::I16);
        deep_copy_vector_part(&mut dst, 1, &src, 2, 3, &ctx).unwrap();
        assert_eq!(dst.as_slice::<i16>().unwrap(), &[0, 3, 4, 5]);

        deep_copy_vector(&mut dst, &src, 2, &ctx).unwrap();
        assert_eq!(dst.as_slice::<i16>().unwrap(), &[3, 4, 5, 6]);
    }

    #[test]
    fn test_vector_out_of_bounds_writes_nothing() {
        let ctx = CpuContext::single_threaded();
        let src = Tensor::from_slice(Shape::vector(4), &[1u8, 2, 3, 4]).unwrap();
        let mut dst = Tensor::from_slice(Shape::vector(4), &[9u8; 4]).unwrap();

        let err = deep_copy_vector_part(&mut dst, 0, &src, 2, 3, &ctx).unwrap_err();
        assert!(matches!(err, TensorError::OutOfBounds { .. }));
        let err = deep_copy_vector_part(&mut dst, 2, &src, 0, 3, &ctx).unwrap_err();
        assert!(matches!(err, TensorError::OutOfBounds { .. }));
        let err = deep_copy_vector_part(&mut dst, 0, &src, usize::MAX, 2, &ctx).unwrap_err();
        assert!(matches!(err, TensorError::OutOfBounds { .. }));

        assert_eq!(dst.as_slice::<u8>().unwrap(), &[9, 9, 9, 9]);
    }

    #[test]
    fn test_vector_requires_rank_one() {
        let ctx = CpuContext::single_threaded();
        let src = iota(2, 2);
        let mut dst = Tensor::zeros(Shape::vector(4), DType::F32);
        assert!(matches!(
            deep_copy_vector(&mut dst, &src, 0, &ctx),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_matrix_region_respects_destination_padding() {
        let ctx = pool();
        let src = iota(4, 4);
        // 3 rows of 2 floats padded to 16 bytes.
        let mut dst = Tensor::with_row_stride(Shape::matrix(3, 2), DType::F32, 16).unwrap();
        memset(&mut dst, 0xAB, &ctx);

        let region = MatrixRegion::new(2, 2).from_src(1, 1).to_dst(1, 0);
        deep_copy_matrix_2d_part(&mut dst, &src, &region, &ctx).unwrap();

        let bytes = dst.as_bytes().unwrap();
        assert!(bytes[..16].iter().all(|&b| b == 0xAB), "row 0 untouched");
        for (row, expect) in [(1usize, [5.0f32, 6.0]), (2, [9.0, 10.0])] {
            let start = row * 16;
            let values: &[f32] = bytemuck::cast_slice(&bytes[start..start + 8]);
            assert_eq!(values, &expect);
            assert!(bytes[start + 8..start + 16].iter().all(|&b| b == 0xAB));
        }
    }

    #[test]
    fn test_matrix_full_from_offset() {
        let ctx = CpuContext::single_threaded();
        let src = iota(3, 4);
        let mut dst = Tensor::zeros(Shape::matrix(2, 2), DType::F32);
        deep_copy_matrix_2d(&mut dst, &src, 1, 2, &ctx).unwrap();
        assert_eq!(dst.as_f32_slice(), &[6.0, 7.0, 10.0, 11.0]);

        assert!(matches!(
            deep_copy_matrix_2d(&mut dst, &src, 2, 0, &ctx),
            Err(TensorError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_matrix_from_batch() {
        let ctx = pool();
        let data: Vec<f32> = (0..2 * 3 * 2).map(|i| i as f32).collect();
        let src = Tensor::from_f32(Shape::batched(2, 3, 2), &data).unwrap();
        let mut dst = Tensor::zeros(Shape::matrix(3, 2), DType::F32);

        deep_copy_matrix_2d_from_batch(&mut dst, &src, 1, 0, 0, &ctx).unwrap();
        assert_eq!(dst.as_f32_slice(), &[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);

        let mut small = Tensor::zeros(Shape::matrix(1, 1), DType::F32);
        let region = MatrixRegion::new(1, 1).from_src(2, 1);
        deep_copy_matrix_2d_part_from_batch(&mut small, &src, 0, &region, &ctx).unwrap();
        assert_eq!(small.as_f32_slice(), &[5.0]);

        assert!(matches!(
            deep_copy_matrix_2d_from_batch(&mut dst, &src, 2, 0, 0, &ctx),
            Err(TensorError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_memset_ignores_placeholder() {
        let ctx = CpuContext::single_threaded();
        let mut t = Tensor::placeholder(
            "p",
            Shape::vector(4),
            DType::U8,
            DeviceType::Cpu,
            DataMode::Dense,
        );
        memset(&mut t, 1, &ctx);
        assert!(!t.has_storage());
    }

    #[test]
    #[should_panic(expected = "unsupported tensor rank 3")]
    fn test_memset_rank_three_panics() {
        let ctx = CpuContext::single_threaded();
        let mut t = Tensor::zeros(Shape::batched(1, 2, 2), DType::U8);
        memset(&mut t, 0, &ctx);
    }

    #[test]
    fn test_copy_from_slice() {
        let mut t = Tensor::zeros(Shape::vector(4), DType::BF16);
        let vals = [half::bf16::from_f32(1.5), half::bf16::from_f32(-2.0)];
        copy_from_slice(&mut t, 1, &vals).unwrap();
        let got = t.as_slice::<half::bf16>().unwrap();
        assert_eq!(got[1].to_f32(), 1.5);
        assert_eq!(got[2].to_f32(), -2.0);

        assert!(matches!(
            copy_from_slice(&mut t, 0, &[1.0f32]),
            Err(TensorError::TypeMismatch { .. })
        ));
        assert!(matches!(
            copy_from_slice(&mut t, 3, &vals),
            Err(TensorError::OutOfBounds { .. })
        ));
    }

    fn any_dtype() -> impl Strategy<Value = DType> {
        prop_oneof![
            Just(DType::I8),
            Just(DType::U8),
            Just(DType::I16),
            Just(DType::I32),
            Just(DType::F16),
            Just(DType::BF16),
            Just(DType::F32),
        ]
    }

    proptest! {
        #[test]
        fn prop_whole_copy_is_byte_exact(
            rows in 1usize..8,
            cols in 1usize..8,
            dtype in any_dtype(),
            seed in any::<u64>(),
        ) {
            let shape = Shape::matrix(rows, cols);
            let len = shape.size_bytes(dtype);
            let data: Vec<u8> = (0..len)
                .map(|i| (seed.rotate_left(i as u32 % 64) as u8) ^ (i as u8))
                .collect();
            let src = Tensor::from_bytes(shape.clone(), dtype, data).unwrap();
            let mut dst = Tensor::zeros(shape, dtype);
            deep_copy_whole(&mut dst, &src, &pool()).unwrap();
            prop_assert_eq!(dst.as_bytes().unwrap(), src.as_bytes().unwrap());
        }

        #[test]
        fn prop_region_round_trip(
            rows in 1usize..10,
            cols in 1usize..10,
            frac in (0.0f64..1.0, 0.0f64..1.0, 0.0f64..1.0, 0.0f64..1.0),
        ) {
            let ctx = pool();
            let a = iota(rows, cols);
            let src_row = (frac.0 * rows as f64) as usize;
            let src_col = (frac.1 * cols as f64) as usize;
            let height = 1 + (frac.2 * (rows - src_row) as f64) as usize;
            let width = 1 + (frac.3 * (cols - src_col) as f64) as usize;
            let height = height.min(rows - src_row);
            let width = width.min(cols - src_col);

            let mut b = Tensor::zeros(Shape::matrix(height, width), DType::F32);
            deep_copy_matrix_2d(&mut b, &a, src_row, src_col, &ctx).unwrap();

            let mut c = Tensor::zeros(Shape::matrix(rows, cols), DType::F32);
            let back = MatrixRegion::new(height, width).to_dst(src_row, src_col);
            deep_copy_matrix_2d_part(&mut c, &b, &back, &ctx).unwrap();

            let (av, cv) = (a.as_f32_slice(), c.as_f32_slice());
            for r in src_row..src_row + height {
                for col in src_col..src_col + width {
                    prop_assert_eq!(av[r * cols + col].to_bits(), cv[r * cols + col].to_bits());
                }
            }
        }
    }

    #[test]
    fn test_tensor_map_copies_onto_device() {
        let ctx = pool();
        let mut padded = Tensor::with_row_stride(Shape::matrix(2, 3), DType::F32, 16).unwrap();
        copy_from_slice(&mut padded, 0, &[1.0f32, 2.0, 3.0]).unwrap();
        let mut src = HashMap::new();
        src.insert("ids".to_string(), Tensor::from_slice(Shape::vector(3), &[4i32, 5, 6]).unwrap());
        src.insert("hidden".to_string(), padded);

        let target = DeviceType::Accelerator { id: 1 };
        let out = deep_copy_tensor_map(&src, target, &ctx).unwrap();
        assert_eq!(out.len(), 2);
        let ids = &out["ids"];
        assert_eq!(ids.name(), "ids");
        assert_eq!(ids.device(), target);
        assert_eq!(ids.as_slice::<i32>().unwrap(), &[4, 5, 6]);
        assert!(!ids.is_shared());

        let hidden = &out["hidden"];
        assert!(hidden.is_contiguous());
        assert_eq!(&hidden.as_f32_slice()[..3], &[1.0, 2.0, 3.0]);
        assert_eq!(hidden.as_f32_slice().len(), 6);
    }

    #[test]
    fn test_tensor_list_map_keeps_order() {
        let ctx = CpuContext::single_threaded();
        let list: Vec<Tensor> = (0..3)
            .map(|i| Tensor::from_f32(Shape::vector(2), &[i as f32, 10.0 + i as f32]).unwrap())
            .collect();
        let mut src = HashMap::new();
        src.insert("embeddings".to_string(), list);

        let out = deep_copy_tensor_list_map(&src, DeviceType::Cpu, &ctx).unwrap();
        let copies = &out["embeddings"];
        assert_eq!(copies.len(), 3);
        for (i, t) in copies.iter().enumerate() {
            assert_eq!(t.name(), "embeddings");
            assert_eq!(t.as_f32_slice(), &[i as f32, 10.0 + i as f32]);
        }
    }

    #[test]
    fn test_tensor_map_rejects_unbound_and_sparse() {
        let ctx = CpuContext::single_threaded();
        let mut src = HashMap::new();
        src.insert(
            "x".to_string(),
            Tensor::placeholder("x", Shape::vector(2), DType::F32, DeviceType::Cpu, DataMode::Dense),
        );
        assert!(matches!(
            deep_copy_tensor_map(&src, DeviceType::Cpu, &ctx),
            Err(TensorError::MissingStorage { .. })
        ));

        let mut sparse = HashMap::new();
        sparse.insert(
            "s".to_string(),
            vec![Tensor::zeros(Shape::vector(2), DType::F32).with_mode(DataMode::Ell)],
        );
        assert!(matches!(
            deep_copy_tensor_list_map(&sparse, DeviceType::Cpu, &ctx),
            Err(TensorError::ModeMismatch { .. })
        ));
    }

}
