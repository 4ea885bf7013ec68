// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device affinity and execution contexts.
//!
//! A [`DeviceContext`] tells the data-movement layer and the operators where
//! work runs and how to order it. The host implementation, [`CpuContext`],
//! owns a fixed-size `rayon` pool used for row-parallel copies and fills;
//! its operations complete before they return, so
//! [`synchronize`](DeviceContext::synchronize) is a no-op there.

use std::fmt;

/// Number of workers used for row-parallel copies when none is configured.
pub const DEFAULT_COPY_THREADS: usize = 8;

/// Where a tensor's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Host memory.
    Cpu,
    /// An accelerator identified by its ordinal.
    Accelerator { id: u32 },
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => f.write_str("cpu"),
            DeviceType::Accelerator { id } => write!(f, "accel:{id}"),
        }
    }
}

/// Execution context shared by operators and the data-movement layer.
pub trait DeviceContext: Send + Sync + fmt::Debug {
    /// The device this context dispatches to.
    fn device_type(&self) -> DeviceType;

    /// Blocks until every previously issued asynchronous operation on this
    /// context has completed.
    fn synchronize(&self);

    /// This process's position in a multi-process deployment.
    fn rank(&self) -> usize {
        0
    }

    /// Number of processes in the deployment.
    fn nranks(&self) -> usize {
        1
    }

    /// Worker pool for row-parallel host work, if any.
    fn worker_pool(&self) -> Option<&rayon::ThreadPool> {
        None
    }
}

/// Host execution context.
pub struct CpuContext {
    rank: usize,
    nranks: usize,
    pool: Option<rayon::ThreadPool>,
}

impl CpuContext {
    /// Creates a context with a dedicated pool of `num_threads` workers.
    pub fn new(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("tensor-copy-{i}"))
            .build()?;
        tracing::debug!("cpu context: {} copy workers", num_threads.max(1));
        Ok(Self {
            rank: 0,
            nranks: 1,
            pool: Some(pool),
        })
    }

    /// Creates a context that runs everything on the calling thread.
    pub fn single_threaded() -> Self {
        Self {
            rank: 0,
            nranks: 1,
            pool: None,
        }
    }

    /// Sets the process rank used to silence duplicate diagnostics.
    pub fn with_rank(mut self, rank: usize, nranks: usize) -> Self {
        self.rank = rank;
        self.nranks = nranks.max(rank + 1);
        self
    }

    /// Number of copy workers (1 when single-threaded).
    pub fn num_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map(|p| p.current_num_threads())
            .unwrap_or(1)
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::single_threaded()
    }
}

impl DeviceContext for CpuContext {
    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn synchronize(&self) {}

    fn rank(&self) -> usize {
        self.rank
    }

    fn nranks(&self) -> usize {
        self.nranks
    }

    fn worker_pool(&self) -> Option<&rayon::ThreadPool> {
        self.pool.as_ref()
    }
}

impl fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuContext")
            .field("rank", &self.rank)
            .field("nranks", &self.nranks)
            .field("threads", &self.num_threads())
            .finish()
    }
}
