// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Software prefetch for the tile's K loop.
//!
//! At the start of every quantization group the tile touches its scale rows,
//! the activation and both weight rows. Inside the group a look-ahead hint
//! for the activation (+64 B) and both weight rows (+96 B) is issued every
//! second K-pair so the cost is shared across iterations.

/// Look-ahead distance for the activation stream, in bytes.
pub const ACTIVATION_AHEAD: usize = 64;
/// Look-ahead distance for each weight stream, in bytes.
pub const WEIGHT_AHEAD: usize = 96;
/// K-pairs between two look-ahead hints.
pub const PREFETCH_PERIOD: u32 = 2;

/// Hints that the cache line holding `p` will be read soon (keep in L2).
///
/// `p` may point anywhere; prefetch never faults and never dereferences.
#[inline(always)]
pub fn prefetch_l2<T>(p: *const T) {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T1};
        // SAFETY: prefetch is a hint with no memory safety requirements.
        unsafe { _mm_prefetch::<_MM_HINT_T1>(p.cast::<i8>()) }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = p;
    }
}

/// Two-iteration prefetch gate.
#[derive(Debug, Default)]
pub struct PrefetchSchedule {
    counter: u32,
    issued: u64,
}

impl PrefetchSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Touches every operand row at the start of a group.
    #[inline(always)]
    pub fn warm<A, W>(
        &self,
        scale: *const f32,
        scale_zp: *const f32,
        a: *const A,
        w_lo: *const W,
        w_hi: *const W,
    ) {
        prefetch_l2(scale);
        prefetch_l2(scale_zp);
        prefetch_l2(a);
        prefetch_l2(w_lo);
        prefetch_l2(w_hi);
    }

    /// Advances the gate by one K-pair. Every [`PREFETCH_PERIOD`]-th call
    /// issues the look-ahead hints and returns `true`.
    #[inline(always)]
    pub fn tick<A, W>(&mut self, a: *const A, w_lo: *const W, w_hi: *const W) -> bool {
        self.counter += 1;
        if self.counter < PREFETCH_PERIOD {
            return false;
        }
        prefetch_l2(a.cast::<u8>().wrapping_add(ACTIVATION_AHEAD));
        prefetch_l2(w_lo.cast::<u8>().wrapping_add(WEIGHT_AHEAD));
        prefetch_l2(w_hi.cast::<u8>().wrapping_add(WEIGHT_AHEAD));
        self.counter = 0;
        self.issued += 1;
        true
    }

    /// Number of look-ahead rounds issued so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}
