// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The 2 × LANES A16W8 tile.
//!
//! One call produces output rows `row` and `row + 1` for the columns of one
//! weight strip. K is walked in pairs, reading two weight rows per step. For
//! every quantization group the tile accumulates `Σ a·q` per lane and `Σ a`
//! per row, then folds `scale·Σaq − scale_zp·Σa` into the f32 accumulator,
//! which is the dequantized dot product without materializing dequantized
//! weights.
//!
//! The epilogue runs in a fixed order: activation row scale, bias (both
//! rows), accumulate (load and add existing output), activation, store.
//! Only the valid columns of the final strip are written, and the second row
//! is computed but not written when it lies past `total_rows`.

use crate::activation::{Activation, ActivationConstants, ActivationFn};
use crate::error::KernelError;
use crate::pack::{HalfFloat, PackedActivation, PackedWeight, QuantParams};
use crate::prefetch::PrefetchSchedule;
use crate::vector::{F32xL, Lanes, LANES};

/// Rows produced per tile.
pub const M_TILE: usize = 2;

/// What the epilogue does with the existing output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreMode {
    /// Overwrite the destination.
    #[default]
    Store,
    /// Add the tile to what the destination already holds.
    Accumulate,
}

/// Validated operands of one GEMM call.
#[derive(Debug, Clone, Copy)]
pub struct GemmOperands<'a, H> {
    pub a: &'a PackedActivation<H>,
    pub w: &'a PackedWeight,
    pub q: &'a QuantParams,
    pub bias: Option<&'a [f32]>,
}

impl<'a, H: HalfFloat> GemmOperands<'a, H> {
    /// Checks that the operands describe one `[M, K] × [K, N]` product.
    pub fn new(
        a: &'a PackedActivation<H>,
        w: &'a PackedWeight,
        q: &'a QuantParams,
        bias: Option<&'a [f32]>,
    ) -> Result<Self, KernelError> {
        if a.k() != w.k() {
            return Err(KernelError::DimensionMismatch {
                what: "activation K vs weight K",
                expected: w.k(),
                actual: a.k(),
            });
        }
        if q.n() != w.n() {
            return Err(KernelError::DimensionMismatch {
                what: "quantization channels",
                expected: w.n(),
                actual: q.n(),
            });
        }
        if q.groups() * q.group_size() < w.k() {
            return Err(KernelError::InvalidGroupSize {
                group_size: q.group_size(),
                k: w.k(),
            });
        }
        if let Some(b) = bias {
            if b.len() < w.n() {
                return Err(KernelError::DimensionMismatch {
                    what: "bias",
                    expected: w.n(),
                    actual: b.len(),
                });
            }
        }
        Ok(Self { a, w, q, bias })
    }

    /// Output rows.
    pub fn m(&self) -> usize {
        self.a.rows()
    }

    /// Output columns.
    pub fn n(&self) -> usize {
        self.w.n()
    }
}

/// A tile routine with its epilogue fixed at construction.
#[derive(Debug, Clone)]
pub struct GemmKernel {
    activation: Activation,
    store: StoreMode,
    consts: ActivationConstants,
    epilogue: ActivationFn<LANES>,
}

impl GemmKernel {
    pub fn new(activation: Activation, store: StoreMode) -> Self {
        tracing::trace!("building a16w8 kernel: activation={activation}, store={store:?}");
        Self {
            activation,
            store,
            consts: ActivationConstants::new(),
            epilogue: activation.select::<LANES>(),
        }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn store_mode(&self) -> StoreMode {
        self.store
    }

    /// Computes the tile at (`row`, `strip`).
    ///
    /// `c_pair` starts at output row `row`, column 0, with `ldc` elements
    /// between rows; it may be a single row long when `row + 1` is past
    /// `total_rows`. Preconditions are only checked in debug builds.
    #[inline]
    pub fn compute_tile<H: HalfFloat>(
        &self,
        ops: &GemmOperands<'_, H>,
        row: usize,
        strip: usize,
        c_pair: &mut [f32],
        ldc: usize,
        total_rows: usize,
    ) {
        let (a, w, q) = (ops.a, ops.w, ops.q);
        let col0 = strip * LANES;
        let valid = LANES.min(w.n() - col0);
        let second_row = row + 1 < total_rows;
        debug_assert!(row < total_rows);
        debug_assert!(ldc >= w.n());
        debug_assert!(c_pair.len() >= col0 + valid);
        debug_assert!(!second_row || c_pair.len() >= ldc + col0 + valid);

        let (a0, a1) = (a.row(row), a.row(row + 1));
        let mut acc = [F32xL::zero(); M_TILE];
        let mut sched = PrefetchSchedule::new();
        let padded_k = w.padded_k();

        for g in 0..q.groups() {
            let k_begin = g * q.group_size();
            let k_end = (k_begin + q.group_size()).min(padded_k);
            if k_begin >= k_end {
                continue;
            }
            let (scale, scale_zp) = (q.scale(g, strip), q.scale_zp(g, strip));
            sched.warm(
                scale.as_ptr(),
                scale_zp.as_ptr(),
                a0[k_begin..].as_ptr(),
                w.lane_row(strip, k_begin).as_ptr(),
                w.lane_row(strip, k_begin + 1).as_ptr(),
            );

            let mut sum_aq = [F32xL::zero(); M_TILE];
            let mut sum_a = [0.0f32; M_TILE];
            for kk in (k_begin..k_end).step_by(2) {
                let w_lo = w.lane_row(strip, kk);
                let w_hi = w.lane_row(strip, kk + 1);
                sched.tick(a0[kk..].as_ptr(), w_lo.as_ptr(), w_hi.as_ptr());

                let (q_lo, q_hi) = (F32xL::from_u8(w_lo), F32xL::from_u8(w_hi));
                for (r, a_row) in [a0, a1].into_iter().enumerate() {
                    let (x0, x1) = (a_row[kk].to_f32(), a_row[kk + 1].to_f32());
                    sum_aq[r] = Lanes::splat(x0).mul_add(q_lo, sum_aq[r]);
                    sum_aq[r] = Lanes::splat(x1).mul_add(q_hi, sum_aq[r]);
                    sum_a[r] += x0 + x1;
                }
            }

            let scale = F32xL::load(scale);
            let scale_zp = F32xL::load(scale_zp);
            for r in 0..M_TILE {
                acc[r] = acc[r] + scale * sum_aq[r] - scale_zp * Lanes::splat(sum_a[r]);
            }
        }

        // ── Epilogue ──
        if let Some(row_scale) = a.row_scale() {
            acc[0] = acc[0] * Lanes::splat(row_scale[row]);
            if second_row {
                acc[1] = acc[1] * Lanes::splat(row_scale[row + 1]);
            }
        }
        if let Some(bias) = ops.bias {
            let b = F32xL::load_masked(&bias[col0..], valid);
            acc[0] = acc[0] + b;
            acc[1] = acc[1] + b;
        }

        let (c0, c1) = c_pair.split_at_mut(ldc.min(c_pair.len()));
        if self.store == StoreMode::Accumulate {
            acc[0] = acc[0] + F32xL::load_masked(&c0[col0..], valid);
            if second_row {
                acc[1] = acc[1] + F32xL::load_masked(&c1[col0..], valid);
            }
        }
        let out0 = (self.epilogue)(&self.consts, acc[0]);
        let out1 = (self.epilogue)(&self.consts, acc[1]);

        out0.store_masked(&mut c0[col0..], valid);
        if second_row {
            out1.store_masked(&mut c1[col0..], valid);
        }
    }
}
