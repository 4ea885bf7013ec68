// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Diagnostic dumps of an operator's bound tensors.
//!
//! All three dumps synchronize the context first. The text dumps only run on
//! rank 0 so sharded deployments do not repeat them.

use crate::operator::OperatorBase;
use crate::OpError;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tensor_core::Tensor;

/// Subdirectory that receives raw tensor files.
pub const BINARY_DUMP_DIR: &str = "tmp_data";

impl OperatorBase {
    fn is_primary_rank(&self) -> bool {
        self.context().map(|ctx| ctx.rank() == 0).unwrap_or(true)
    }

    /// Logs a metadata line for every input, weight and output.
    pub fn print_information(&self) {
        self.sync();
        if !self.is_primary_rank() {
            return;
        }
        tracing::info!("{{ op_name: {}, op_type: {} }}", self.op_name(), self.op_type());
        for (_, t) in self.bound_inputs() {
            tracing::info!("  input  {}", t.read());
        }
        for w in self.weight_list() {
            tracing::info!("  weight {w}");
        }
        for (_, t) in self.bound_outputs() {
            tracing::info!("  output {}", t.read());
        }
    }

    /// Writes every element of every bound tensor to `dir/<op_name>`,
    /// overwriting an earlier dump. Returns the path written, or `None` on
    /// ranks other than 0.
    pub fn save_information(&self, dir: &Path) -> Result<Option<PathBuf>, OpError> {
        self.sync();
        if !self.is_primary_rank() {
            return Ok(None);
        }
        let mut out = String::from("op_inputs:\n");
        for (_, t) in self.bound_inputs() {
            let _ = writeln!(out, "{}", t.read().to_string_all());
        }
        out.push_str("op_weights:\n");
        for w in self.weight_list() {
            let _ = writeln!(out, "{}", w.to_string_all());
        }
        out.push_str("op_outputs:\n");
        for (_, t) in self.bound_outputs() {
            let _ = writeln!(out, "{}", t.read().to_string_all());
        }

        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name(self.op_name()));
        std::fs::write(&path, out)?;
        tracing::debug!("saved information of '{}' to {}", self.op_name(), path.display());
        Ok(Some(path))
    }

    /// Writes the raw bytes of every bound tensor with storage to
    /// `dir/tmp_data/<tensor name>`, creating the directory on demand.
    /// Row padding is not written. Returns the number of files written.
    pub fn save_tensor_to_binary(&self, dir: &Path) -> Result<usize, OpError> {
        self.sync();
        let out_dir = dir.join(BINARY_DUMP_DIR);
        if !out_dir.exists() {
            std::fs::create_dir_all(&out_dir)?;
            tracing::info!("created dump directory {}", out_dir.display());
        }

        let mut written = 0;
        for (_, t) in self.bound_inputs() {
            written += save_one(&t.read(), &out_dir)?;
        }
        for w in self.weight_list() {
            written += save_one(w, &out_dir)?;
        }
        for (_, t) in self.bound_outputs() {
            written += save_one(&t.read(), &out_dir)?;
        }
        Ok(written)
    }
}

fn save_one(t: &Tensor, dir: &Path) -> Result<usize, OpError> {
    let Ok(bytes) = t.as_bytes() else {
        tracing::debug!("skipping '{}': no storage", t.name());
        return Ok(0);
    };
    let row = t.shape().innermost() * t.elem_size();
    let rows = t.shape().outer_count();
    let data = if t.is_contiguous() {
        bytes[..rows * row].to_vec()
    } else {
        bytes
            .chunks(t.stride_bytes())
            .take(rows)
            .flat_map(|r| &r[..row])
            .copied()
            .collect()
    };
    let path = dir.join(file_name(t.name()));
    tracing::info!(
        "saving: {}, elements: {}, elem size: {}",
        path.display(),
        t.num_elements(),
        t.elem_size()
    );
    std::fs::write(path, data)?;
    Ok(1)
}

/// Tensor and operator names may contain path separators.
fn file_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}
