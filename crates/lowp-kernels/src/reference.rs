// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Straightforward f64 implementation of the quantized GEMM, used to check
//! the tiled kernel.

use crate::activation::{Activation, ActivationConstants};
use crate::microkernel::StoreMode;

/// Unpacked operands, all row-major.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceProblem<'a> {
    /// `[m, k]` activations, already rounded to the half type the kernel sees.
    pub a: &'a [f32],
    /// `[k, n]` quantized weights.
    pub weight: &'a [u8],
    /// `[groups, n]`.
    pub scale: &'a [f32],
    /// `[groups, n]`.
    pub zero_point: &'a [f32],
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub group_size: usize,
    pub row_scale: Option<&'a [f32]>,
    pub bias: Option<&'a [f32]>,
}

/// Computes `act(prior + row_scale · Σ_k a·scale·(q − zp) + bias)` where
/// `prior` is only added in [`StoreMode::Accumulate`].
///
/// The activation itself is evaluated with the kernel's scalar formulas so
/// that this reference checks the reduction and the epilogue order.
pub fn gemm_a16w8_ref(
    p: &ReferenceProblem<'_>,
    activation: Activation,
    store: StoreMode,
    prior: &[f32],
) -> Vec<f32> {
    let consts = ActivationConstants::new();
    let group_size = p.group_size.min(p.k).max(1);
    let mut out = vec![0.0f32; p.m * p.n];
    for i in 0..p.m {
        for j in 0..p.n {
            let mut acc = 0.0f64;
            for kk in 0..p.k {
                let g = kk / group_size;
                let s = p.scale[g * p.n + j] as f64;
                let zp = p.zero_point[g * p.n + j] as f64;
                let q = p.weight[kk * p.n + j] as f64;
                acc += p.a[i * p.k + kk] as f64 * s * (q - zp);
            }
            if let Some(rs) = p.row_scale {
                acc *= rs[i] as f64;
            }
            if let Some(b) = p.bias {
                acc += b[j] as f64;
            }
            if store == StoreMode::Accumulate {
                acc += prior[i * p.n + j] as f64;
            }
            out[i * p.n + j] = activation.apply_scalar(&consts, acc as f32);
        }
    }
    out
}
