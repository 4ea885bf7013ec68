// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Typed, strided tensors and the validated primitives that move data
//! between them.
//!
//! This crate provides:
//! - [`Tensor`] — a shaped buffer with an element type, a row stride, a
//!   device affinity and a storage mode.
//! - [`Shape`] and [`DType`] — dimension and element-type descriptors.
//! - [`DeviceContext`] — where work runs; [`CpuContext`] is the host version.
//! - [`copy`] — whole, vector, 2-D region and batch-slice copies, fills and
//!   typed conversion from host slices.
//!
//! # Design Goals
//! - Padded rows are honoured by every copy; no operation touches bytes
//!   outside the region it was asked to move.
//! - Buffers are shared by reference count and detached on write.
//! - Clean error types via `thiserror`.

pub mod copy;
mod device;
mod dtype;
mod error;
mod shape;
mod tensor;

pub use device::{CpuContext, DeviceContext, DeviceType, DEFAULT_COPY_THREADS};
pub use dtype::{DType, TensorElement};
pub use error::TensorError;
pub use shape::Shape;
pub use tensor::{Buffer, DataMode, Tensor};
