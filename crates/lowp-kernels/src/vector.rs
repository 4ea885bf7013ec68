// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-width f32 register abstraction.
//!
//! [`Lanes`] is a plain array wrapper whose element-wise loops are written
//! so that LLVM lowers them to one vector instruction per operation on the
//! target's native width. Masked loads and stores cover the column residue
//! of the last strip.

use std::ops::{Add, Mul, Sub};

/// Output columns per tile, the width of one f32 vector register on AVX2.
pub const LANES: usize = 8;

/// `N` f32 values processed together.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, align(32))]
pub struct Lanes<const N: usize>(pub [f32; N]);

/// The register type used by the micro-kernel.
pub type F32xL = Lanes<LANES>;

impl<const N: usize> Lanes<N> {
    /// All lanes zero.
    #[inline(always)]
    pub fn zero() -> Self {
        Self([0.0; N])
    }

    /// Broadcasts `v` to every lane.
    #[inline(always)]
    pub fn splat(v: f32) -> Self {
        Self([v; N])
    }

    /// Loads the first `N` values of `src`.
    #[inline(always)]
    pub fn load(src: &[f32]) -> Self {
        let mut out = [0.0; N];
        out.copy_from_slice(&src[..N]);
        Self(out)
    }

    /// Loads the first `valid` values of `src`; remaining lanes are zero.
    #[inline(always)]
    pub fn load_masked(src: &[f32], valid: usize) -> Self {
        let mut out = [0.0; N];
        out[..valid].copy_from_slice(&src[..valid]);
        Self(out)
    }

    /// Loads `N` u8 values widened to f32.
    #[inline(always)]
    pub fn from_u8(src: &[u8]) -> Self {
        let mut out = [0.0; N];
        for (o, &q) in out.iter_mut().zip(&src[..N]) {
            *o = f32::from(q);
        }
        Self(out)
    }

    /// Stores the first `valid` lanes into `dst`.
    #[inline(always)]
    pub fn store_masked(self, dst: &mut [f32], valid: usize) {
        dst[..valid].copy_from_slice(&self.0[..valid]);
    }

    /// `self * b + c`, lane-wise.
    #[inline(always)]
    pub fn mul_add(self, b: Self, c: Self) -> Self {
        let mut out = c.0;
        for i in 0..N {
            out[i] += self.0[i] * b.0[i];
        }
        Self(out)
    }

    /// Lane-wise maximum.
    #[inline(always)]
    pub fn max(self, other: Self) -> Self {
        self.zip_map(other, f32::max)
    }

    /// Applies `f` to every lane.
    #[inline(always)]
    pub fn map(self, f: impl Fn(f32) -> f32) -> Self {
        let mut out = self.0;
        for v in &mut out {
            *v = f(*v);
        }
        Self(out)
    }

    /// Combines two registers lane by lane.
    #[inline(always)]
    pub fn zip_map(self, other: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let mut out = self.0;
        for (v, &o) in out.iter_mut().zip(&other.0) {
            *v = f(*v, o);
        }
        Self(out)
    }
}

impl<const N: usize> Add for Lanes<N> {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a + b)
    }
}

impl<const N: usize> Sub for Lanes<N> {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a - b)
    }
}

impl<const N: usize> Mul for Lanes<N> {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        self.zip_map(rhs, |a, b| a * b)
    }
}
