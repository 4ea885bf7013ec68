// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.

use std::fmt;

/// Enumerates the numeric types a [`crate::Tensor`] can hold.
///
/// The runtime uses `DType` to decide memory layout, row strides, and which
/// compute kernels to dispatch. The integer types carry quantised weights and
/// indices; the 16-bit floats carry packed activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer (asymmetric quantised weights).
    U8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer (token ids, offsets).
    I32,
    /// 16-bit IEEE 754 floating point.
    F16,
    /// 16-bit brain floating point.
    BF16,
    /// 32-bit IEEE 754 floating point.
    F32,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::F32 => 4,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
        }
    }

    /// Parses a dtype label, accepting a few common aliases.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "i8" | "int8" => Some(DType::I8),
            "u8" | "uint8" => Some(DType::U8),
            "i16" | "int16" => Some(DType::I16),
            "i32" | "int32" => Some(DType::I32),
            "f16" | "float16" | "half" => Some(DType::F16),
            "bf16" | "bfloat16" => Some(DType::BF16),
            "f32" | "float32" | "float" => Some(DType::F32),
            _ => None,
        }
    }

    /// Returns `true` for the half-width float types.
    pub fn is_half_float(self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Rust scalar type that can be stored in a [`crate::Tensor`].
///
/// Typed access and typed conversion from external buffers are only allowed
/// when `T::DTYPE` matches the tensor's dtype exactly; there is no implicit
/// numeric conversion.
pub trait TensorElement: bytemuck::Pod + Send + Sync + 'static {
    /// The tensor dtype this Rust type maps to.
    const DTYPE: DType;
}

impl TensorElement for i8 {
    const DTYPE: DType = DType::I8;
}

impl TensorElement for u8 {
    const DTYPE: DType = DType::U8;
}

impl TensorElement for i16 {
    const DTYPE: DType = DType::I16;
}

impl TensorElement for i32 {
    const DTYPE: DType = DType::I32;
}

impl TensorElement for half::f16 {
    const DTYPE: DType = DType::F16;
}

impl TensorElement for half::bf16 {
    const DTYPE: DType = DType::BF16;
}

impl TensorElement for f32 {
    const DTYPE: DType = DType::F32;
}
