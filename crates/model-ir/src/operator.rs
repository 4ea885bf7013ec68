// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator descriptors.
//!
//! An [`OperatorProto`] is one node of the serialized graph: a name, a type
//! tag used for factory lookup, ordered input and output tensor names, the
//! weights it reads, and an opaque attribute map. Weight data is **not**
//! stored here; [`TensorProto`] only names a weight and describes its
//! expected dtype, shape and layout.

use crate::ModelError;
use std::collections::BTreeMap;
use std::fmt;
use tensor_core::{DType, DataMode, Shape};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Str(v) => write!(f, "\"{v}\""),
        }
    }
}

/// Describes a tensor the operator reads as a weight.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TensorProto {
    /// Name used to look the weight up.
    pub name: String,
    /// Element type.
    pub dtype: DType,
    /// Expected shape; empty when unknown.
    #[serde(default)]
    pub shape: Shape,
    /// Storage layout.
    #[serde(default)]
    pub mode: DataMode,
}

impl TensorProto {
    /// Creates a dense tensor descriptor.
    pub fn new(name: impl Into<String>, dtype: DType, shape: Shape) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            mode: DataMode::Dense,
        }
    }
}

/// One node of the graph.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OperatorProto {
    /// Unique node name.
    pub op_name: String,
    /// Type tag, the factory key (e.g. `"GemmA16W8"`).
    pub op_type: String,
    /// Ordered input tensor names.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Ordered output tensor names.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Ordered weight descriptors.
    #[serde(default)]
    pub weights: Vec<TensorProto>,
    /// Opaque attributes.
    #[serde(default)]
    pub attr: BTreeMap<String, AttrValue>,
}

impl OperatorProto {
    /// Creates a node with no bindings.
    ///
    /// # Examples
    /// ```
    /// use model_ir::{AttrValue, OperatorProto};
    /// let op = OperatorProto::new("fc1", "GemmA16W8")
    ///     .with_inputs(["x"])
    ///     .with_outputs(["y"])
    ///     .with_attr("group_size", AttrValue::Int(64));
    /// assert_eq!(op.attr_int("group_size"), Some(64));
    /// ```
    pub fn new(op_name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            op_name: op_name.into(),
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            weights: Vec::new(),
            attr: BTreeMap::new(),
        }
    }

    pub fn with_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_weight(mut self, weight: TensorProto) -> Self {
        self.weights.push(weight);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attr.insert(key.into(), value);
        self
    }

    /// Names of all weights, in order.
    pub fn weight_names(&self) -> impl Iterator<Item = &str> {
        self.weights.iter().map(|w| w.name.as_str())
    }

    /// Integer attribute, if present with that type.
    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attr.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Float attribute; integers are widened.
    pub fn attr_float(&self, key: &str) -> Option<f64> {
        match self.attr.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            Some(AttrValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean attribute, if present with that type.
    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        match self.attr.get(key) {
            Some(AttrValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// String attribute, if present with that type.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        match self.attr.get(key) {
            Some(AttrValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Checks the node in isolation.
    ///
    /// # Checks
    /// - Name and type are non-empty.
    /// - No output name is repeated, and no output is also an input.
    /// - Weight names are non-empty and unique.
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |detail: String| ModelError::InvalidOperator {
            op: self.op_name.clone(),
            detail,
        };
        if self.op_name.is_empty() {
            return Err(invalid("operator name is empty".into()));
        }
        if self.op_type.is_empty() {
            return Err(invalid("operator type is empty".into()));
        }
        let mut outputs = std::collections::HashSet::new();
        for out in &self.outputs {
            if !outputs.insert(out.as_str()) {
                return Err(invalid(format!("output '{out}' listed twice")));
            }
            if self.inputs.contains(out) {
                return Err(invalid(format!("'{out}' is both an input and an output")));
            }
        }
        let mut weights = std::collections::HashSet::new();
        for w in &self.weights {
            if w.name.is_empty() {
                return Err(invalid("weight with empty name".into()));
            }
            if !weights.insert(w.name.as_str()) {
                return Err(invalid(format!("weight '{}' listed twice", w.name)));
            }
        }
        Ok(())
    }

    /// One-line description.
    pub fn summary(&self) -> String {
        format!(
            "{} ({}): [{}] -> [{}], {} weights",
            self.op_name,
            self.op_type,
            self.inputs.join(", "),
            self.outputs.join(", "),
            self.weights.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemm() -> OperatorProto {
        OperatorProto::new("fc1", "GemmA16W8")
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_weight(TensorProto::new("fc1.weight", DType::U8, Shape::matrix(16, 8)))
            .with_attr("activation", AttrValue::Str("gelu_tanh".into()))
            .with_attr("accumulate", AttrValue::Bool(false))
    }

    #[test]
    fn test_attr_accessors() {
        let op = gemm().with_attr("alpha", AttrValue::Int(2));
        assert_eq!(op.attr_str("activation"), Some("gelu_tanh"));
        assert_eq!(op.attr_bool("accumulate"), Some(false));
        assert_eq!(op.attr_float("alpha"), Some(2.0));
        assert_eq!(op.attr_int("activation"), None);
        assert_eq!(op.attr_str("missing"), None);
    }

    #[test]
    fn test_validate_ok() {
        assert!(gemm().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_in_place_output() {
        let op = gemm().with_outputs(["x"]);
        assert!(matches!(op.validate(), Err(ModelError::InvalidOperator { .. })));
    }

    #[test]
    fn test_validate_rejects_duplicate_weight() {
        let op = gemm().with_weight(TensorProto::new("fc1.weight", DType::U8, Shape::scalar()));
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "op_name": "fc1",
            "op_type": "GemmA16W8",
            "inputs": ["x"],
            "outputs": ["y"],
            "weights": [{"name": "fc1.weight", "dtype": "u8", "shape": [16, 8]}],
            "attr": {"activation": "gelu_tanh", "group_size": 16, "accumulate": false, "eps": 0.5}
        }"#;
        let op: OperatorProto = serde_json::from_str(json).unwrap();
        assert_eq!(op.weights[0].shape, Shape::matrix(16, 8));
        assert_eq!(op.weights[0].mode, DataMode::Dense);
        assert_eq!(op.attr_int("group_size"), Some(16));
        assert_eq!(op.attr_float("eps"), Some(0.5));
        assert_eq!(op.attr_bool("accumulate"), Some(false));
    }

    #[test]
    fn test_summary() {
        let s = gemm().summary();
        assert!(s.contains("fc1 (GemmA16W8)"));
        assert!(s.contains("[x] -> [y]"));
    }
}
