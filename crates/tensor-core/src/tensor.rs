// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Core tensor type and its backing buffer.

use crate::{DType, DeviceType, Shape, TensorElement, TensorError};
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// How a tensor's buffer is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    /// Contiguous rows, possibly padded to a larger byte stride.
    #[default]
    Dense,
    /// Compressed sparse column.
    Csc,
    /// ELLPACK sparse layout.
    Ell,
}

impl DataMode {
    /// Returns a human-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            DataMode::Dense => "dense",
            DataMode::Csc => "csc",
            DataMode::Ell => "ell",
        }
    }
}

/// Raw tensor memory.
///
/// The bytes live in a `u64`-backed allocation so that typed views of every
/// supported element type are always aligned. Buffers are reference counted:
/// cloning one shares the allocation, and the first mutable access through a
/// shared handle detaches it (copy-on-write), so a holder never observes a
/// write made through another handle and the memory is freed only by the
/// last holder.
#[derive(Clone)]
pub struct Buffer {
    words: Arc<Vec<u64>>,
    len: usize,
}

impl Buffer {
    /// Allocates `len` zeroed bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: Arc::new(vec![0u64; len.div_ceil(8)]),
            len,
        }
    }

    /// Copies `data` into a new buffer.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut buf = Self::zeroed(data.len());
        buf.as_bytes_mut().copy_from_slice(data);
        buf
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes the allocation can hold without growing.
    pub fn capacity(&self) -> usize {
        self.words.len() * 8
    }

    /// Sets the logical length within the current allocation. Bytes that
    /// become visible again are zeroed. Returns `false` if `len` exceeds
    /// the capacity.
    fn resize_within(&mut self, len: usize) -> bool {
        if len > self.capacity() {
            return false;
        }
        let old = self.len;
        self.len = len;
        if len > old {
            self.as_bytes_mut()[old..].fill(0);
        }
        true
    }

    /// Returns `true` if another handle references the same allocation.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.words) > 1
    }

    /// Read-only byte view.
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    /// Mutable byte view; detaches from other holders first.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u64, u8>(Arc::make_mut(&mut self.words).as_mut_slice())[..len]
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("shared", &self.is_shared())
            .finish()
    }
}

/// An n-dimensional, typed, strided tensor.
///
/// `Tensor` is the data carrier between operators. It records its element
/// type, shape, the byte stride between consecutive rows of the innermost
/// dimension, the device it belongs to, and its storage mode. The buffer is
/// optional: graph placeholders exist before their shapes are known and gain
/// storage on the first [`set_shape`](Tensor::set_shape).
///
/// # Memory Layout
/// Viewed as `[outer, innermost]`, row `r` starts at byte `r * stride_bytes`.
/// The stride is at least `innermost * elem_size` and may be larger for
/// padded tensors; the buffer holds `outer * stride_bytes` bytes.
#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    shape: Shape,
    dtype: DType,
    device: DeviceType,
    mode: DataMode,
    stride_bytes: usize,
    storage: Option<Buffer>,
}

impl Tensor {
    /// Creates a named, zero-filled dense tensor on `device`.
    pub fn new(name: impl Into<String>, shape: Shape, dtype: DType, device: DeviceType) -> Self {
        let stride_bytes = natural_stride(&shape, dtype);
        let size = shape.outer_count() * stride_bytes;
        Self {
            name: name.into(),
            shape,
            dtype,
            device,
            mode: DataMode::Dense,
            stride_bytes,
            storage: Some(Buffer::zeroed(size)),
        }
    }

    /// Creates an unnamed host tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::zeros(Shape::matrix(2, 3), DType::F32);
    /// assert_eq!(t.size_bytes(), 24); // 2 * 3 * 4 bytes
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        Self::new(String::new(), shape, dtype, DeviceType::Cpu)
    }

    /// Creates a tensor without storage. Used for graph names whose shapes
    /// are only known once the operator producing them is reshaped.
    pub fn placeholder(
        name: impl Into<String>,
        shape: Shape,
        dtype: DType,
        device: DeviceType,
        mode: DataMode,
    ) -> Self {
        let stride_bytes = natural_stride(&shape, dtype);
        Self {
            name: name.into(),
            shape,
            dtype,
            device,
            mode,
            stride_bytes,
            storage: None,
        }
    }

    /// Creates a zero-filled host tensor whose rows are `stride_bytes` apart.
    ///
    /// Returns an error if the stride cannot hold one innermost row or is not
    /// a whole number of elements.
    pub fn with_row_stride(
        shape: Shape,
        dtype: DType,
        stride_bytes: usize,
    ) -> Result<Self, TensorError> {
        let min_stride = natural_stride(&shape, dtype);
        if stride_bytes < min_stride || stride_bytes % dtype.size_bytes() != 0 {
            return Err(TensorError::BufferSizeMismatch {
                expected: min_stride,
                actual: stride_bytes,
            });
        }
        let size = shape.outer_count() * stride_bytes;
        Ok(Self {
            name: String::new(),
            shape,
            dtype,
            device: DeviceType::Cpu,
            mode: DataMode::Dense,
            stride_bytes,
            storage: Some(Buffer::zeroed(size)),
        })
    }

    /// Creates a dense host tensor from raw bytes.
    ///
    /// Returns an error if the buffer size does not match `shape.size_bytes(dtype)`.
    pub fn from_bytes(shape: Shape, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            name: String::new(),
            stride_bytes: natural_stride(&shape, dtype),
            shape,
            dtype,
            device: DeviceType::Cpu,
            mode: DataMode::Dense,
            storage: Some(Buffer::from_bytes(&data)),
        })
    }

    /// Creates a dense host tensor from typed values.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Tensor, Shape, DType};
    /// let t = Tensor::from_slice(Shape::vector(3), &[1u8, 2, 3]).unwrap();
    /// assert_eq!(t.dtype(), DType::U8);
    /// assert_eq!(t.as_slice::<u8>().unwrap(), &[1, 2, 3]);
    /// ```
    pub fn from_slice<T: TensorElement>(shape: Shape, values: &[T]) -> Result<Self, TensorError> {
        let expected = shape.num_elements();
        if values.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected: expected * T::DTYPE.size_bytes(),
                actual: values.len() * T::DTYPE.size_bytes(),
            });
        }
        Self::from_bytes(shape, T::DTYPE, bytemuck::cast_slice(values).to_vec())
    }

    /// Creates a tensor from a slice of `f32` values.
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        Self::from_slice(shape, values)
    }

    /// Renames the tensor.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the device affinity.
    pub fn with_device(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }

    /// Sets the storage mode at construction time.
    pub fn with_mode(mut self, mode: DataMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the tensor's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the device this tensor is bound to.
    pub fn device(&self) -> DeviceType {
        self.device
    }

    /// Returns the storage mode.
    pub fn mode(&self) -> DataMode {
        self.mode
    }

    /// Returns the number of bytes between consecutive innermost rows.
    pub fn stride_bytes(&self) -> usize {
        self.stride_bytes
    }

    /// Returns the size of one element in bytes.
    pub fn elem_size(&self) -> usize {
        self.dtype.size_bytes()
    }

    /// Returns the logical number of elements.
    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Returns the memory footprint of the tensor's rows in bytes,
    /// padding included.
    pub fn size_bytes(&self) -> usize {
        self.shape.outer_count() * self.stride_bytes
    }

    /// Returns `true` if rows are packed without padding.
    pub fn is_contiguous(&self) -> bool {
        self.stride_bytes == natural_stride(&self.shape, self.dtype)
    }

    /// Returns `true` if a buffer is attached.
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Returns `true` if the buffer is shared with another tensor.
    pub fn is_shared(&self) -> bool {
        self.storage.as_ref().is_some_and(Buffer::is_shared)
    }

    /// Returns the attached buffer.
    pub fn storage(&self) -> Option<&Buffer> {
        self.storage.as_ref()
    }

    /// Returns the attached buffer mutably.
    pub fn storage_mut(&mut self) -> Option<&mut Buffer> {
        self.storage.as_mut()
    }

    /// Returns the raw bytes, or `MissingStorage`.
    pub fn as_bytes(&self) -> Result<&[u8], TensorError> {
        match &self.storage {
            Some(buf) => Ok(buf.as_bytes()),
            None => Err(TensorError::MissingStorage {
                op: "as_bytes",
                name: self.name.clone(),
            }),
        }
    }

    /// Returns the raw bytes mutably, or `MissingStorage`.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8], TensorError> {
        match &mut self.storage {
            Some(buf) => Ok(buf.as_bytes_mut()),
            None => Err(TensorError::MissingStorage {
                op: "as_bytes_mut",
                name: self.name.clone(),
            }),
        }
    }

    /// Interprets the whole buffer (padding included) as a slice of `T`.
    ///
    /// Fails with `TypeMismatch` unless `T::DTYPE` equals the tensor dtype.
    pub fn as_slice<T: TensorElement>(&self) -> Result<&[T], TensorError> {
        self.check_element::<T>("as_slice")?;
        Ok(bytemuck::cast_slice(self.as_bytes()?))
    }

    /// Mutable counterpart of [`as_slice`](Tensor::as_slice).
    pub fn as_slice_mut<T: TensorElement>(&mut self) -> Result<&mut [T], TensorError> {
        self.check_element::<T>("as_slice_mut")?;
        Ok(bytemuck::cast_slice_mut(self.as_bytes_mut()?))
    }

    /// Interprets the buffer as a slice of `f32`.
    ///
    /// # Panics
    /// Panics if `self.dtype() != DType::F32` or the tensor has no storage.
    pub fn as_f32_slice(&self) -> &[f32] {
        assert_eq!(
            self.dtype,
            DType::F32,
            "as_f32_slice called on {:?} tensor",
            self.dtype
        );
        match self.as_slice::<f32>() {
            Ok(values) => values,
            Err(e) => panic!("as_f32_slice: {e}"),
        }
    }

    /// Interprets the buffer as a mutable slice of `f32`.
    ///
    /// # Panics
    /// Panics if `self.dtype() != DType::F32` or the tensor has no storage.
    pub fn as_f32_slice_mut(&mut self) -> &mut [f32] {
        assert_eq!(
            self.dtype,
            DType::F32,
            "as_f32_slice_mut called on {:?} tensor",
            self.dtype
        );
        match self.as_slice_mut::<f32>() {
            Ok(values) => values,
            Err(e) => panic!("as_f32_slice_mut: {e}"),
        }
    }

    /// Changes the logical shape, growing the buffer when the new shape
    /// needs more bytes than are attached. Rows become unpadded.
    ///
    /// Shrinking keeps the existing allocation so that per-step reshapes in
    /// autoregressive decoding do not reallocate; the visible buffer always
    /// covers exactly [`size_bytes`](Tensor::size_bytes).
    pub fn set_shape(&mut self, shape: Shape) {
        let stride_bytes = natural_stride(&shape, self.dtype);
        let needed = shape.outer_count() * stride_bytes;
        self.fit_storage(needed, false);
        self.shape = shape;
        self.stride_bytes = stride_bytes;
    }

    /// Explicitly re-allocates the tensor with a new dtype and mode.
    ///
    /// This is the only way to change either attribute after construction;
    /// previous contents are discarded.
    pub fn reallocate(&mut self, dtype: DType, mode: DataMode) {
        self.dtype = dtype;
        self.mode = mode;
        self.stride_bytes = natural_stride(&self.shape, dtype);
        self.fit_storage(self.shape.outer_count() * self.stride_bytes, true);
    }

    /// Makes the attached buffer exactly `needed` bytes long, reusing the
    /// allocation when it is large enough. `clear` zeroes kept bytes too.
    fn fit_storage(&mut self, needed: usize, clear: bool) {
        if let Some(buf) = self.storage.as_mut() {
            if clear {
                buf.resize_within(0);
            }
            if buf.resize_within(needed) {
                return;
            }
        }
        tracing::trace!("tensor '{}': allocating {} bytes", self.name, needed);
        self.storage = Some(Buffer::zeroed(needed));
    }

    /// Renders metadata plus every element, row by row. Debug dumps only.
    pub fn to_string_all(&self) -> String {
        let mut out = self.to_string();
        let Some(buf) = &self.storage else {
            out.push_str(" <no storage>");
            return out;
        };
        if self.mode != DataMode::Dense {
            let _ = write!(out, " <{} bytes, {} layout>", buf.len(), self.mode.as_str());
            return out;
        }
        let bytes = buf.as_bytes();
        let elem = self.elem_size();
        let cols = self.shape.innermost();
        for row in 0..self.shape.outer_count() {
            out.push_str("\n  ");
            let start = row * self.stride_bytes;
            for col in 0..cols {
                let at = start + col * elem;
                if col > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format_element(self.dtype, &bytes[at..at + elem]));
            }
        }
        out
    }

    fn check_element<T: TensorElement>(&self, op: &'static str) -> Result<(), TensorError> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::TypeMismatch {
                op,
                dst: self.dtype,
                src: T::DTYPE,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ name: {}, dtype: {}, shape: {}, stride: {}, device: {}, mode: {}, bytes: {} }}",
            self.name,
            self.dtype,
            self.shape,
            self.stride_bytes,
            self.device,
            self.mode.as_str(),
            self.storage.as_ref().map(Buffer::len).unwrap_or(0),
        )
    }
}

/// Unpadded byte stride of the innermost dimension.
fn natural_stride(shape: &Shape, dtype: DType) -> usize {
    shape.innermost() * dtype.size_bytes()
}

fn format_element(dtype: DType, b: &[u8]) -> String {
    match dtype {
        DType::I8 => (b[0] as i8).to_string(),
        DType::U8 => b[0].to_string(),
        DType::I16 => i16::from_le_bytes([b[0], b[1]]).to_string(),
        DType::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]).to_string(),
        DType::F16 => half::f16::from_le_bytes([b[0], b[1]]).to_string(),
        DType::BF16 => half::bf16::from_le_bytes([b[0], b[1]]).to_string(),
        DType::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]).to_string(),
    }
}
