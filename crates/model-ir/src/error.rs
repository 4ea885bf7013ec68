// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph loading and validation.

/// Errors that can occur when reading or checking a graph descriptor.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The graph file could not be read.
    #[error("failed to read graph: {0}")]
    ReadError(#[from] std::io::Error),

    /// The graph JSON is malformed.
    #[error("failed to parse graph: {0}")]
    ParseError(#[from] serde_json::Error),

    /// An operator record is inconsistent.
    #[error("invalid operator '{op}': {detail}")]
    InvalidOperator { op: String, detail: String },

    /// The graph as a whole is malformed.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
}
