// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Drivers that cover a full `[M, N]` output with tiles.

use crate::microkernel::{GemmKernel, GemmOperands, M_TILE};
use crate::pack::HalfFloat;
use rayon::prelude::*;

/// Runs every tile on the calling thread.
///
/// `c` holds `M` rows of `ldc` f32 values (the last row may be cut to `N`).
pub fn gemm_a16w8<H: HalfFloat>(
    kernel: &GemmKernel,
    ops: &GemmOperands<'_, H>,
    c: &mut [f32],
    ldc: usize,
) {
    let m = ops.m();
    if m == 0 || ops.n() == 0 {
        return;
    }
    debug_assert!(c.len() >= (m - 1) * ldc + ops.n());
    for (pair, c_pair) in c.chunks_mut(M_TILE * ldc).take(m.div_ceil(M_TILE)).enumerate() {
        for strip in 0..ops.w.strips() {
            kernel.compute_tile(ops, pair * M_TILE, strip, c_pair, ldc, m);
        }
    }
}

/// Runs row-pair strips in parallel on the current rayon pool. Each worker
/// owns a disjoint pair of output rows.
pub fn par_gemm_a16w8<H: HalfFloat>(
    kernel: &GemmKernel,
    ops: &GemmOperands<'_, H>,
    c: &mut [f32],
    ldc: usize,
) {
    let m = ops.m();
    if m == 0 || ops.n() == 0 {
        return;
    }
    debug_assert!(c.len() >= (m - 1) * ldc + ops.n());
    let strips = ops.w.strips();
    c.par_chunks_mut(M_TILE * ldc)
        .take(m.div_ceil(M_TILE))
        .enumerate()
        .for_each(|(pair, c_pair)| {
            for strip in 0..strips {
                kernel.compute_tile(ops, pair * M_TILE, strip, c_pair, ldc, m);
            }
        });
}
