// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand packing for the A16W8 micro-kernel.
//!
//! Activations are half-width floats stored row-major with the row count and
//! K both rounded up to even, so the tile can always read a row pair and a
//! K pair without bounds checks. Weights are u8 values regrouped into
//! [`LANES`]-wide column strips laid out `[strip][k][lane]`; each K step of
//! a strip is one contiguous vector load. All padding is zero.

use crate::error::KernelError;
use crate::vector::LANES;

/// A 16-bit float type the kernel accepts for activations.
pub trait HalfFloat: Copy + Send + Sync + 'static {
    const ZERO: Self;
    fn from_f32(v: f32) -> Self;
    fn to_f32(self) -> f32;
}

impl HalfFloat for half::f16 {
    const ZERO: Self = half::f16::ZERO;

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        half::f16::from_f32(v)
    }

    #[inline(always)]
    fn to_f32(self) -> f32 {
        half::f16::to_f32(self)
    }
}

impl HalfFloat for half::bf16 {
    const ZERO: Self = half::bf16::ZERO;

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        half::bf16::from_f32(v)
    }

    #[inline(always)]
    fn to_f32(self) -> f32 {
        half::bf16::to_f32(self)
    }
}

fn round_even(v: usize) -> usize {
    v + (v & 1)
}

// ── Activations ─────────────────────────────────────────────────────────────

/// Packed `[M, K]` activation block.
#[derive(Debug, Clone)]
pub struct PackedActivation<H> {
    data: Vec<H>,
    rows: usize,
    k: usize,
    padded_k: usize,
    row_scale: Option<Vec<f32>>,
}

impl<H: HalfFloat> PackedActivation<H> {
    /// Packs `rows × k` half floats read from `src` with `ld` elements
    /// between row starts.
    pub fn from_half(src: &[H], rows: usize, k: usize, ld: usize) -> Result<Self, KernelError> {
        check_matrix_extent("activation", src.len(), rows, k, ld)?;
        Ok(Self::build(rows, k, |r, c| src[r * ld + c]))
    }

    /// Packs `rows × k` f32 values, rounding each to `H`.
    pub fn from_f32(src: &[f32], rows: usize, k: usize, ld: usize) -> Result<Self, KernelError> {
        check_matrix_extent("activation", src.len(), rows, k, ld)?;
        Ok(Self::build(rows, k, |r, c| H::from_f32(src[r * ld + c])))
    }

    fn build(rows: usize, k: usize, at: impl Fn(usize, usize) -> H) -> Self {
        let padded_k = round_even(k);
        let mut data = vec![H::ZERO; round_even(rows) * padded_k];
        for r in 0..rows {
            let dst = &mut data[r * padded_k..r * padded_k + k];
            for (c, d) in dst.iter_mut().enumerate() {
                *d = at(r, c);
            }
        }
        Self {
            data,
            rows,
            k,
            padded_k,
            row_scale: None,
        }
    }

    /// Attaches a per-row activation scale; the effective output scale of
    /// row `m` becomes `row_scale[m] × weight_scale`.
    pub fn with_row_scale(mut self, scale: Vec<f32>) -> Result<Self, KernelError> {
        if scale.len() != self.rows {
            return Err(KernelError::DimensionMismatch {
                what: "activation row scale",
                expected: self.rows,
                actual: scale.len(),
            });
        }
        self.row_scale = Some(scale);
        Ok(self)
    }

    /// Logical row count.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Logical K.
    pub fn k(&self) -> usize {
        self.k
    }

    /// K rounded up to even.
    pub fn padded_k(&self) -> usize {
        self.padded_k
    }

    /// Row `r` including its padding column. Rows up to the next even count exist.
    #[inline(always)]
    pub fn row(&self, r: usize) -> &[H] {
        &self.data[r * self.padded_k..(r + 1) * self.padded_k]
    }

    /// Per-row scale, if any.
    pub fn row_scale(&self) -> Option<&[f32]> {
        self.row_scale.as_deref()
    }

    /// Logical values widened to f32, row-major `[rows, k]`.
    pub fn to_f32(&self) -> Vec<f32> {
        (0..self.rows)
            .flat_map(|r| self.row(r)[..self.k].iter().map(|v| v.to_f32()))
            .collect()
    }
}

// ── Weights ─────────────────────────────────────────────────────────────────

/// Packed `[K, N]` u8 weight block.
#[derive(Debug, Clone)]
pub struct PackedWeight {
    data: Vec<u8>,
    k: usize,
    padded_k: usize,
    n: usize,
}

impl PackedWeight {
    /// Packs a row-major `[k, n]` u8 matrix.
    ///
    /// # Examples
    /// ```
    /// use lowp_kernels::{PackedWeight, LANES};
    /// let w = PackedWeight::pack(&[1, 2, 3, 4, 5, 6], 3, 2).unwrap();
    /// assert_eq!(w.strips(), 1);
    /// assert_eq!(w.padded_k(), 4);
    /// assert_eq!(&w.lane_row(0, 1)[..2], &[3, 4]);
    /// assert!(w.lane_row(0, 3).iter().all(|&q| q == 0));
    /// assert_eq!(w.lane_row(0, 0).len(), LANES);
    /// ```
    pub fn pack(weight: &[u8], k: usize, n: usize) -> Result<Self, KernelError> {
        if weight.len() != k * n {
            return Err(KernelError::DimensionMismatch {
                what: "weight elements",
                expected: k * n,
                actual: weight.len(),
            });
        }
        let padded_k = round_even(k);
        let strips = n.div_ceil(LANES);
        let mut data = vec![0u8; strips * padded_k * LANES];
        for s in 0..strips {
            let col0 = s * LANES;
            let width = LANES.min(n - col0);
            for kk in 0..k {
                let dst = (s * padded_k + kk) * LANES;
                data[dst..dst + width].copy_from_slice(&weight[kk * n + col0..kk * n + col0 + width]);
            }
        }
        Ok(Self {
            data,
            k,
            padded_k,
            n,
        })
    }

    /// Logical K.
    pub fn k(&self) -> usize {
        self.k
    }

    /// K rounded up to even.
    pub fn padded_k(&self) -> usize {
        self.padded_k
    }

    /// Output channels.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of `LANES`-wide column strips.
    pub fn strips(&self) -> usize {
        self.n.div_ceil(LANES)
    }

    /// The `LANES` weights of strip `strip` at reduction index `kk`.
    #[inline(always)]
    pub fn lane_row(&self, strip: usize, kk: usize) -> &[u8] {
        let at = (strip * self.padded_k + kk) * LANES;
        &self.data[at..at + LANES]
    }
}

// ── Quantization parameters ─────────────────────────────────────────────────

/// Per-group, per-channel dequantization parameters.
///
/// A weight `q` in group `g`, channel `n` dequantizes to
/// `scale[g][n] · (q − zero_point[g][n])`. The product
/// `scale · zero_point` is stored directly because the kernel folds it in
/// once per group against the activation sum.
#[derive(Debug, Clone)]
pub struct QuantParams {
    scale: Vec<f32>,
    scale_zp: Vec<f32>,
    groups: usize,
    group_size: usize,
    n: usize,
    stride: usize,
}

impl QuantParams {
    /// Builds parameters from row-major `[groups, n]` scale and zero-point
    /// tables. `group_size` counts K rows per group; a value `>= k` means
    /// one group per channel.
    pub fn new(
        scale: &[f32],
        zero_point: &[f32],
        k: usize,
        n: usize,
        group_size: usize,
    ) -> Result<Self, KernelError> {
        let per_channel = group_size >= k;
        if group_size == 0 || (!per_channel && group_size % 2 != 0) {
            return Err(KernelError::InvalidGroupSize { group_size, k });
        }
        let group_size = if per_channel { round_even(k).max(2) } else { group_size };
        let groups = k.div_ceil(group_size).max(1);
        for (what, table) in [("scale", scale), ("zero point", zero_point)] {
            if table.len() != groups * n {
                return Err(KernelError::DimensionMismatch {
                    what,
                    expected: groups * n,
                    actual: table.len(),
                });
            }
        }

        let stride = n.div_ceil(LANES) * LANES;
        let mut padded_scale = vec![0.0f32; groups * stride];
        let mut padded_szp = vec![0.0f32; groups * stride];
        for g in 0..groups {
            for c in 0..n {
                let s = scale[g * n + c];
                padded_scale[g * stride + c] = s;
                padded_szp[g * stride + c] = s * zero_point[g * n + c];
            }
        }
        Ok(Self {
            scale: padded_scale,
            scale_zp: padded_szp,
            groups,
            group_size,
            n,
            stride,
        })
    }

    /// Number of K groups.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// K rows per group (even).
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Output channels.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Scales of group `g` for the columns of `strip`.
    #[inline(always)]
    pub fn scale(&self, g: usize, strip: usize) -> &[f32] {
        let at = g * self.stride + strip * LANES;
        &self.scale[at..at + LANES]
    }

    /// `scale × zero_point` of group `g` for the columns of `strip`.
    #[inline(always)]
    pub fn scale_zp(&self, g: usize, strip: usize) -> &[f32] {
        let at = g * self.stride + strip * LANES;
        &self.scale_zp[at..at + LANES]
    }
}

fn check_matrix_extent(
    what: &'static str,
    len: usize,
    rows: usize,
    cols: usize,
    ld: usize,
) -> Result<(), KernelError> {
    if ld < cols {
        return Err(KernelError::DimensionMismatch {
            what,
            expected: cols,
            actual: ld,
        });
    }
    let needed = if rows == 0 { 0 } else { (rows - 1) * ld + cols };
    if len < needed {
        return Err(KernelError::DimensionMismatch {
            what,
            expected: needed,
            actual: len,
        });
    }
    Ok(())
}
