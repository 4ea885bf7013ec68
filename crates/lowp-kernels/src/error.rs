// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Errors raised while packing kernel operands.
//!
//! The tile routine itself never fails; everything it relies on is checked
//! here, once, when operands are packed and bundled.

/// Errors produced while preparing kernel operands.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// A buffer or dimension does not match what the other operands imply.
    #[error("{what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Quantization groups must cover K in whole pairs.
    #[error("group size {group_size} is invalid for K = {k} (must be even and non-zero, or >= K)")]
    InvalidGroupSize { group_size: usize, k: usize },
}
