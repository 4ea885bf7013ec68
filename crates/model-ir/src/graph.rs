// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph descriptor: an ordered list of operator nodes.
//!
//! # Type-State Pattern
//!
//! The graph transitions through states enforced at compile time:
//!
//! ```text
//! GraphProto<Loaded>     — nodes parsed, not yet checked.
//!       │  .validate()
//!       ▼
//! GraphProto<Validated>  — bindings verified, ready to build operators.
//! ```
//!
//! The runtime only accepts `GraphProto<Validated>`, so it never has to
//! re-check that every name an operator reads has a producer.

use crate::{ModelError, OperatorProto};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been loaded but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── GraphProto ─────────────────────────────────────────────────────

/// On-disk form of a graph.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct GraphFile {
    name: String,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
    operators: Vec<OperatorProto>,
}

/// The model as operators in execution order.
///
/// # Format
/// ```json
/// {
///   "name": "tiny-mlp",
///   "inputs": ["x"],
///   "outputs": ["y"],
///   "operators": [
///     {
///       "op_name": "fc1",
///       "op_type": "GemmA16W8",
///       "inputs": ["x"],
///       "outputs": ["y"],
///       "weights": [{ "name": "fc1.weight", "dtype": "u8", "shape": [64, 32] }],
///       "attr": { "activation": "gelu_tanh", "group_size": 32 }
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone)]
pub struct GraphProto<S: GraphState = Loaded> {
    /// Human-readable graph name.
    pub name: String,
    /// Tensors supplied by the caller.
    pub inputs: Vec<String>,
    /// Tensors the caller reads back.
    pub outputs: Vec<String>,
    /// Nodes in execution order.
    pub operators: Vec<OperatorProto>,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl GraphProto<Loaded> {
    /// Creates a new graph in the `Loaded` state.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        operators: Vec<OperatorProto>,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            operators,
            _state: std::marker::PhantomData,
        }
    }

    /// Parses a graph from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let file: GraphFile = serde_json::from_str(json)?;
        Ok(Self::new(file.name, file.inputs, file.outputs, file.operators))
    }

    /// Loads a graph from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        let graph = Self::from_json(&content)?;
        tracing::debug!(
            "read graph '{}' ({} operators) from {}",
            graph.name,
            graph.operators.len(),
            path.display()
        );
        Ok(graph)
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - The graph has at least one operator.
    /// - Every operator passes [`OperatorProto::validate`].
    /// - Operator names are unique.
    /// - Every tensor is produced once, by a graph input or one operator.
    /// - Every operator input is produced before the operator runs.
    /// - Every graph output is produced somewhere.
    pub fn validate(self) -> Result<GraphProto<Validated>, ModelError> {
        if self.operators.is_empty() {
            return Err(ModelError::InvalidGraph(format!(
                "graph '{}' contains no operators",
                self.name
            )));
        }

        let mut op_names = HashSet::new();
        let mut produced: HashSet<&str> = HashSet::new();
        for input in &self.inputs {
            if !produced.insert(input.as_str()) {
                return Err(ModelError::InvalidGraph(format!(
                    "graph input '{input}' listed twice"
                )));
            }
        }

        for op in &self.operators {
            op.validate()?;
            if !op_names.insert(op.op_name.as_str()) {
                return Err(ModelError::InvalidGraph(format!(
                    "operator name '{}' used twice",
                    op.op_name
                )));
            }
            for input in &op.inputs {
                if !produced.contains(input.as_str()) {
                    return Err(ModelError::InvalidOperator {
                        op: op.op_name.clone(),
                        detail: format!("input '{input}' has no earlier producer"),
                    });
                }
            }
            for output in &op.outputs {
                if !produced.insert(output.as_str()) {
                    return Err(ModelError::InvalidOperator {
                        op: op.op_name.clone(),
                        detail: format!("output '{output}' is already produced elsewhere"),
                    });
                }
            }
        }

        for output in &self.outputs {
            if !produced.contains(output.as_str()) {
                return Err(ModelError::InvalidGraph(format!(
                    "graph output '{output}' is never produced"
                )));
            }
        }

        Ok(GraphProto {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            operators: self.operators,
            _state: std::marker::PhantomData,
        })
    }
}

// ── Validated state ────────────────────────────────────────────────

impl GraphProto<Validated> {
    /// Returns the number of operators.
    pub fn num_operators(&self) -> usize {
        self.operators.len()
    }

    /// Returns an iterator over the operators in execution order.
    pub fn iter_operators(&self) -> impl Iterator<Item = &OperatorProto> {
        self.operators.iter()
    }

    /// Returns an operator by position.
    pub fn operator(&self, index: usize) -> Option<&OperatorProto> {
        self.operators.get(index)
    }

    /// Distinct operator types, in first-use order.
    pub fn op_types(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.operators
            .iter()
            .map(|op| op.op_type.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    /// Returns a summary string describing the graph.
    pub fn summary(&self) -> String {
        let weights: usize = self.operators.iter().map(|op| op.weights.len()).sum();
        format!(
            "Graph '{}': {} operators ({}), {} weights",
            self.name,
            self.num_operators(),
            self.op_types().join(", "),
            weights,
        )
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: GraphState> fmt::Display for GraphProto<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GraphProto '{}' ({} operators):", self.name, self.operators.len())?;
        for op in &self.operators {
            writeln!(f, "  {}", op.summary())?;
        }
        Ok(())
    }
}
