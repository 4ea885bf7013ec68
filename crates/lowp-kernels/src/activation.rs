// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fused activation epilogues.
//!
//! Every non-trivial activation is built on one exponential block,
//! `e^x = 2^n · p(r)` with `x = n·ln2 + r` and `|r| <= ln2/2`, where `p` is a
//! degree-6 polynomial. Each epilogue takes its lanes by value and returns
//! new ones; the caller stores the result once.

use crate::vector::Lanes;
use std::fmt;

/// Activation applied by the kernel epilogue, fixed when the kernel is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// No activation.
    #[default]
    Identity,
    /// `max(x, 0)`.
    Relu,
    /// `x · sigmoid(x)`.
    Silu,
    /// Hyperbolic tangent.
    Tanh,
    /// GELU using the error function.
    GeluErf,
    /// GELU using the tanh approximation.
    GeluTanh,
}

impl Activation {
    /// Parses an activation name as written in graph attributes.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "" | "none" | "identity" => Some(Activation::Identity),
            "relu" => Some(Activation::Relu),
            "silu" | "swish" => Some(Activation::Silu),
            "tanh" => Some(Activation::Tanh),
            "gelu" | "gelu_erf" => Some(Activation::GeluErf),
            "gelu_tanh" => Some(Activation::GeluTanh),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Activation::Identity => "identity",
            Activation::Relu => "relu",
            Activation::Silu => "silu",
            Activation::Tanh => "tanh",
            Activation::GeluErf => "gelu_erf",
            Activation::GeluTanh => "gelu_tanh",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Constants ───────────────────────────────────────────────────────────────

/// Range reduction and polynomial for the exponential block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpConstants {
    /// Inputs are clamped to `[min_x, max_x]` so that `2^n` stays a normal float.
    pub min_x: f32,
    pub max_x: f32,
    pub log2e: f32,
    /// `ln 2` split into a high part exact in f32 and a low correction.
    pub ln2_hi: f32,
    pub ln2_lo: f32,
    /// `p(r) = Σ poly[i] · r^i`.
    pub poly: [f32; 7],
}

/// Coefficients shared by all epilogues of one kernel instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationConstants {
    pub exp: ExpConstants,
    /// Abramowitz–Stegun 7.1.26: `[p, a1, a2, a3, a4, a5]`.
    pub erf: [f32; 6],
    /// `[sqrt(2/pi), 0.044715]`.
    pub gelu_tanh: [f32; 2],
    /// `tanh` saturates to ±1 in f32 beyond this magnitude.
    pub tanh_clamp: f32,
}

impl ActivationConstants {
    /// Computes the constant table.
    pub fn new() -> Self {
        let mut poly = [1.0f32; 7];
        let mut fact = 1.0f64;
        for (i, c) in poly.iter_mut().enumerate().skip(1) {
            fact *= i as f64;
            *c = (1.0 / fact) as f32;
        }
        Self {
            exp: ExpConstants {
                min_x: -87.0,
                max_x: 88.0,
                log2e: std::f32::consts::LOG2_E,
                ln2_hi: 0.693_359_4,
                ln2_lo: -2.121_944_4e-4,
                poly,
            },
            erf: [
                0.327_591_1,
                0.254_829_6,
                -0.284_496_74,
                1.421_413_8,
                -1.453_152_1,
                1.061_405_4,
            ],
            gelu_tanh: [(2.0f64 / std::f64::consts::PI).sqrt() as f32, 0.044_715],
            tanh_clamp: 9.0,
        }
    }
}

impl Default for ActivationConstants {
    fn default() -> Self {
        Self::new()
    }
}

// ── Scalar building blocks ──────────────────────────────────────────────────

#[inline(always)]
fn exp_lane(c: &ExpConstants, x: f32) -> f32 {
    let x = x.clamp(c.min_x, c.max_x);
    let n = (x * c.log2e).round();
    let r = x - n * c.ln2_hi - n * c.ln2_lo;
    let mut p = c.poly[6];
    for &coef in c.poly[..6].iter().rev() {
        p = p * r + coef;
    }
    let pow2 = f32::from_bits(((n as i32 + 127) as u32) << 23);
    p * pow2
}

#[inline(always)]
fn tanh_lane(c: &ActivationConstants, x: f32) -> f32 {
    let t = x.clamp(-c.tanh_clamp, c.tanh_clamp);
    let e = exp_lane(&c.exp, 2.0 * t);
    (e - 1.0) / (e + 1.0)
}

#[inline(always)]
fn erf_lane(c: &ActivationConstants, z: f32) -> f32 {
    let [p, a1, a2, a3, a4, a5] = c.erf;
    let az = z.abs();
    let t = 1.0 / (1.0 + p * az);
    let poly = ((((a5 * t + a4) * t + a3) * t + a2) * t + a1) * t;
    let y = 1.0 - poly * exp_lane(&c.exp, -az * az);
    y.copysign(z)
}

// ── Lane epilogues ──────────────────────────────────────────────────────────

/// An epilogue over one register.
pub type ActivationFn<const N: usize> = fn(&ActivationConstants, Lanes<N>) -> Lanes<N>;

fn identity<const N: usize>(_: &ActivationConstants, v: Lanes<N>) -> Lanes<N> {
    v
}

fn relu<const N: usize>(_: &ActivationConstants, v: Lanes<N>) -> Lanes<N> {
    v.max(Lanes::zero())
}

fn silu<const N: usize>(c: &ActivationConstants, v: Lanes<N>) -> Lanes<N> {
    v.map(|x| x / (1.0 + exp_lane(&c.exp, -x)))
}

fn tanh<const N: usize>(c: &ActivationConstants, v: Lanes<N>) -> Lanes<N> {
    v.map(|x| tanh_lane(c, x))
}

fn gelu_erf<const N: usize>(c: &ActivationConstants, v: Lanes<N>) -> Lanes<N> {
    v.map(|x| 0.5 * x * (1.0 + erf_lane(c, x * std::f32::consts::FRAC_1_SQRT_2)))
}

fn gelu_tanh<const N: usize>(c: &ActivationConstants, v: Lanes<N>) -> Lanes<N> {
    let [k0, k1] = c.gelu_tanh;
    v.map(|x| 0.5 * x * (1.0 + tanh_lane(c, k0 * (x + k1 * x * x * x))))
}

impl Activation {
    /// Resolves the epilogue once, so the tile loop calls through a plain
    /// function pointer instead of matching per element.
    pub fn select<const N: usize>(self) -> ActivationFn<N> {
        match self {
            Activation::Identity => identity::<N>,
            Activation::Relu => relu::<N>,
            Activation::Silu => silu::<N>,
            Activation::Tanh => tanh::<N>,
            Activation::GeluErf => gelu_erf::<N>,
            Activation::GeluTanh => gelu_tanh::<N>,
        }
    }

    /// Applies the activation to a single value. Used by tests and tails.
    pub fn apply_scalar(self, c: &ActivationConstants, x: f32) -> f32 {
        (self.select::<1>())(c, Lanes([x])).0[0]
    }
}
