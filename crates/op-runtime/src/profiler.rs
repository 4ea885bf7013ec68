// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Phase timing for operators.
//!
//! [`ModelProfiler`] aggregates wall-clock time per `(phase, op_type)` pair,
//! e.g. `("forward", "GemmA16W8")`. A [`ProfileScope`] times one call: it
//! synchronizes the device context on drop so asynchronous work issued by
//! the phase is included in the measurement.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tensor_core::DeviceContext;

/// Aggregated timings of one `(phase, op_type)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct PhaseStats {
    /// Completed calls.
    pub calls: u64,
    /// Sum of all call durations.
    pub total: Duration,
    /// Longest single call.
    pub max: Duration,
}

impl PhaseStats {
    /// Mean call duration.
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        self.total / self.calls as u32
    }
}

/// One row of [`ModelProfiler::report`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProfileRecord {
    pub phase: String,
    pub op_type: String,
    pub stats: PhaseStats,
}

/// Collects phase timings across all operators of a model.
#[derive(Debug, Default)]
pub struct ModelProfiler {
    records: Mutex<BTreeMap<(String, String), PhaseStats>>,
}

impl ModelProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one measured call.
    pub fn record(&self, phase: &str, op_type: &str, elapsed: Duration) {
        let mut records = self.records.lock();
        let stats = records
            .entry((phase.to_string(), op_type.to_string()))
            .or_default();
        stats.calls += 1;
        stats.total += elapsed;
        stats.max = stats.max.max(elapsed);
    }

    /// Starts timing one call; the time is recorded when the scope drops.
    pub fn scope(
        self: &Arc<Self>,
        phase: &'static str,
        op_type: &str,
        ctx: Arc<dyn DeviceContext>,
    ) -> ProfileScope {
        ProfileScope {
            profiler: Arc::clone(self),
            ctx,
            phase,
            op_type: op_type.to_string(),
            start: Instant::now(),
        }
    }

    /// Timings of one pair, if any call was recorded.
    pub fn stats(&self, phase: &str, op_type: &str) -> Option<PhaseStats> {
        self.records
            .lock()
            .get(&(phase.to_string(), op_type.to_string()))
            .copied()
    }

    /// Total time spent in `phase` over all operator types.
    pub fn phase_total(&self, phase: &str) -> Duration {
        self.records
            .lock()
            .iter()
            .filter(|((p, _), _)| p == phase)
            .map(|(_, s)| s.total)
            .sum()
    }

    /// All pairs, sorted by phase then operator type.
    pub fn report(&self) -> Vec<ProfileRecord> {
        self.records
            .lock()
            .iter()
            .map(|((phase, op_type), stats)| ProfileRecord {
                phase: phase.clone(),
                op_type: op_type.clone(),
                stats: *stats,
            })
            .collect()
    }

    /// Discards every recorded timing.
    pub fn reset(&self) {
        self.records.lock().clear();
    }

    /// Returns a human-readable table suitable for CLI output.
    pub fn summary(&self) -> String {
        let mut out = String::from("phase     op_type              calls     total(ms)  mean(us)");
        for r in self.report() {
            let _ = write!(
                out,
                "\n{:<9} {:<20} {:>5} {:>13.3} {:>9.1}",
                r.phase,
                r.op_type,
                r.stats.calls,
                r.stats.total.as_secs_f64() * 1000.0,
                r.stats.mean().as_secs_f64() * 1e6,
            );
        }
        out
    }
}

/// Times one phase call; see [`ModelProfiler::scope`].
pub struct ProfileScope {
    profiler: Arc<ModelProfiler>,
    ctx: Arc<dyn DeviceContext>,
    phase: &'static str,
    op_type: String,
    start: Instant,
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        self.ctx.synchronize();
        self.profiler
            .record(self.phase, &self.op_type, self.start.elapsed());
    }
}
