// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor construction and data movement.

use crate::{DType, DataMode, Shape};

/// Errors that can occur while building tensors or moving data between them.
///
/// None of these are transient: each one points at a malformed graph or a
/// bad call site, so callers are expected to surface them rather than retry.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Two tensors have incompatible shapes or ranks for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// Two tensors (or a tensor and a host buffer) disagree on element type.
    #[error("data type mismatch for {op}: dst {dst} vs src {src}")]
    TypeMismatch {
        op: &'static str,
        dst: DType,
        src: DType,
    },

    /// Two tensors use different storage modes.
    #[error("storage mode mismatch for {op}: dst {dst:?} vs src {src:?}")]
    ModeMismatch {
        op: &'static str,
        dst: DataMode,
        src: DataMode,
    },

    /// A tensor taking part in the operation has no allocated buffer.
    #[error("{op}: tensor '{name}' has no storage")]
    MissingStorage { op: &'static str, name: String },

    /// The requested offsets and lengths fall outside a tensor's extent.
    #[error("{op}: region out of bounds ({detail})")]
    OutOfBounds { op: &'static str, detail: String },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype} for operation {op}")]
    UnsupportedDType { op: &'static str, dtype: DType },
}
