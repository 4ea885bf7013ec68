// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the operator runtime.

use tensor_core::DeviceType;

/// Errors returned by operator phases, the factory and the engine.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// No constructor is registered for this type on this device.
    #[error("unsupported operator type '{op_type}' on {device}")]
    UnsupportedOperator { op_type: String, device: DeviceType },

    /// A phase ran before `init` bound the operator to a context.
    #[error("operator '{op_type}' used before init")]
    Uninitialized { op_type: String },

    /// A tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] tensor_core::TensorError),

    /// Kernel operands could not be prepared.
    #[error("kernel error: {0}")]
    Kernel(#[from] lowp_kernels::KernelError),

    /// A name the operator needs is not in the tensor map.
    #[error("operator '{op}': tensor '{name}' is not bound")]
    MissingTensor { op: String, name: String },

    /// The weight source has no tensor under this name.
    #[error("weight '{name}' not found for model '{model}' (rank {rank})")]
    MissingWeight {
        name: String,
        model: String,
        rank: usize,
    },

    /// An attribute is missing, has the wrong type or an unusable value.
    #[error("operator '{op}': attribute '{key}': {detail}")]
    InvalidAttribute {
        op: String,
        key: String,
        detail: String,
    },

    /// Bound tensors do not have the shapes or dtypes the operator needs.
    #[error("operator '{op}': {detail}")]
    InvalidShape { op: String, detail: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Dump files could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The graph descriptor is invalid.
    #[error("model error: {0}")]
    Model(#[from] model_ir::ModelError),
}
