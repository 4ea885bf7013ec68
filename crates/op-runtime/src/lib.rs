// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # op-runtime
//!
//! The operator execution framework around the low-precision kernels.
//!
//! - [`Operator`] — a named unit binding input, output and weight tensors,
//!   with an `init` / `alloc` / `reshape` / `forward` lifecycle and
//!   profiled `call_*` wrappers. [`OperatorBase`] carries the bindings.
//! - [`OpFactory`] — the process-wide map from `(op_type, device)` to an
//!   operator constructor.
//! - [`WeightManager`] — the read-only weight source keyed by model handler
//!   and rank; [`InMemoryWeightManager`] is the standalone implementation.
//! - [`ModelProfiler`] — phase timing keyed by `(phase, op_type)`.
//! - [`InferenceEngine`] — builds every operator of a validated
//!   `model_ir::GraphProto` and runs them step by step.
//!
//! # Type-State Pipeline
//! ```text
//! InferenceEngine<Idle> → InferenceEngine<Ready>
//! ```

mod config;
mod context;
mod dump;
mod engine;
mod error;
mod factory;
mod operator;
pub mod ops;
mod profiler;
mod weights;

pub use config::RuntimeConfig;
pub use context::{GenerateContext, RuntimeContext};
pub use dump::BINARY_DUMP_DIR;
pub use engine::{EngineState, Idle, InferenceEngine, Ready};
pub use error::OpError;
pub use factory::{register_builtin_operators, OpConstructor, OpFactory, OpRegistryKey};
pub use operator::{
    import_tensor_list_map, import_tensor_map, EmbeddingMap, Operator, OperatorBase, TensorListMap,
    TensorMap, TensorRef, WeightMap,
};
pub use profiler::{ModelProfiler, PhaseStats, ProfileRecord, ProfileScope};
pub use weights::{InMemoryWeightManager, ModelWeightHandler, RankInfo, WeightManager};
