// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The serialized graph format consumed by the operator runtime.
//!
//! This crate defines only what the runtime needs to bind operators:
//!
//! - [`OperatorProto`] — one node: name, type tag, ordered input, output
//!   and weight names, and an attribute map of [`AttrValue`]s.
//! - [`TensorProto`] — a weight descriptor (name, dtype, shape, layout).
//! - [`GraphProto`] — operators in execution order, with a **type-state
//!   pattern** (`Loaded` → `Validated`).
//!
//! # Example
//! ```no_run
//! use model_ir::GraphProto;
//! use std::path::Path;
//!
//! let graph = GraphProto::from_file(Path::new("./graph.json"))
//!     .unwrap()
//!     .validate()
//!     .unwrap();
//! println!("{}", graph.summary());
//! for op in graph.iter_operators() {
//!     println!("  {}", op.summary());
//! }
//! ```

mod error;
pub mod graph;
mod operator;

pub use error::ModelError;
pub use graph::GraphProto;
pub use operator::{AttrValue, OperatorProto, TensorProto};
