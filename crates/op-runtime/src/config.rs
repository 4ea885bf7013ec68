// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! num_threads = 8
//! rank = 0
//! nranks = 1
//! enable_profiling = true
//! dump_dir = "./debug"
//! dump_tensors = false
//! ```

use crate::OpError;
use std::path::{Path, PathBuf};
use tensor_core::{CpuContext, DEFAULT_COPY_THREADS};

/// Configuration for the operator runtime.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads for copies and kernels (defaults to 8).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,
    /// This process's position in a sharded deployment.
    #[serde(default)]
    pub rank: usize,
    /// Number of shards.
    #[serde(default = "default_nranks")]
    pub nranks: usize,
    /// Whether to time every operator phase.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
    /// Directory for diagnostic dumps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_dir: Option<PathBuf>,
    /// Write every operator's tensors to `dump_dir` after each step.
    #[serde(default)]
    pub dump_tensors: bool,
}

fn default_nranks() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, OpError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OpError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, OpError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| OpError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, OpError> {
        toml::to_string_pretty(self)
            .map_err(|e| OpError::Config(format!("TOML serialise error: {e}")))
    }

    /// Checks the rank layout and thread count.
    pub fn validate(&self) -> Result<(), OpError> {
        if self.num_threads == Some(0) {
            return Err(OpError::Config("num_threads must be at least 1".into()));
        }
        if self.nranks == 0 || self.rank >= self.nranks {
            return Err(OpError::Config(format!(
                "rank {} is outside 0..{}",
                self.rank, self.nranks
            )));
        }
        if self.dump_tensors && self.dump_dir.is_none() {
            return Err(OpError::Config("dump_tensors requires dump_dir".into()));
        }
        Ok(())
    }

    /// Resolves the number of worker threads.
    pub fn resolve_threads(&self) -> usize {
        self.num_threads.unwrap_or(DEFAULT_COPY_THREADS)
    }

    /// Builds the host context described by this config.
    pub fn create_context(&self) -> Result<CpuContext, OpError> {
        self.validate()?;
        let threads = self.resolve_threads();
        let ctx = if threads == 1 {
            CpuContext::single_threaded()
        } else {
            CpuContext::new(threads)
                .map_err(|e| OpError::Config(format!("cannot build worker pool: {e}")))?
        };
        Ok(ctx.with_rank(self.rank, self.nranks))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            rank: 0,
            nranks: 1,
            enable_profiling: true,
            dump_dir: None,
            dump_tensors: false,
        }
    }
}
