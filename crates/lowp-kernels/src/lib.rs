// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # lowp-kernels
//!
//! Low-precision GEMM for dense transformer layers: half-float activations
//! (f16 or bf16) times asymmetric u8 weights, accumulated in f32.
//!
//! This crate provides:
//! - [`GemmKernel`] — a 2 × [`LANES`] tile with a bias, accumulate and
//!   activation epilogue fixed when the kernel is built.
//! - [`PackedActivation`], [`PackedWeight`] and [`QuantParams`] — operand
//!   layouts the tile reads without bounds checks.
//! - [`gemm_a16w8`] and [`par_gemm_a16w8`] — drivers covering a full output.
//! - [`reference`] — an f64 implementation for testing.
//!
//! The tile performs no runtime validation. [`GemmOperands::new`] checks the
//! operands once; everything after that is a debug assertion.

mod activation;
mod error;
mod gemm;
mod microkernel;
mod pack;
pub mod prefetch;
pub mod reference;
mod vector;

pub use activation::{Activation, ActivationConstants, ActivationFn, ExpConstants};
pub use error::KernelError;
pub use gemm::{gemm_a16w8, par_gemm_a16w8};
pub use microkernel::{GemmKernel, GemmOperands, StoreMode, M_TILE};
pub use pack::{HalfFloat, PackedActivation, PackedWeight, QuantParams};
pub use prefetch::PrefetchSchedule;
pub use vector::{F32xL, Lanes, LANES};
