// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A step-driven engine with a type-state–enforced pipeline.
//!
//! ```text
//! InferenceEngine<Idle>
//!     │  .build(graph)   operators created by the factory, call_init on each
//!     ▼
//! InferenceEngine<Ready>
//!     │  .step(&gen)     Alloc → Reshape → Forward over every operator
//!     ▼
//!   outputs in the shared tensor map
//! ```
//!
//! Each state transition consumes the old value and returns a new one,
//! making invalid state sequences a compile error.

use crate::context::{GenerateContext, RuntimeContext};
use crate::factory::{OpFactory, OpRegistryKey};
use crate::operator::{EmbeddingMap, Operator, TensorMap, TensorRef};
use crate::profiler::ModelProfiler;
use crate::weights::{ModelWeightHandler, RankInfo, WeightManager};
use crate::{OpError, RuntimeConfig};
use model_ir::graph::Validated;
use model_ir::GraphProto;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tensor_core::{DType, DataMode, DeviceContext, Shape, Tensor};

// ── Type-state markers ─────────────────────────────────────────

/// Engine is created but no graph is bound.
#[derive(Debug)]
pub struct Idle;

/// Operators are built and initialised.
pub struct Ready {
    graph: GraphProto<Validated>,
    operators: Vec<Box<dyn Operator>>,
    tensor_map: TensorMap,
    steps: usize,
}

/// Sealed trait for engine states.
pub trait EngineState {}
impl EngineState for Idle {}
impl EngineState for Ready {}

// ── Engine ─────────────────────────────────────────────────────

/// Owns a model's operators and the tensor map they share.
///
/// # Example
/// ```no_run
/// use op_runtime::{GenerateContext, InMemoryWeightManager, InferenceEngine, RuntimeConfig};
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), op_runtime::OpError> {
/// let weights = Arc::new(InMemoryWeightManager::new());
/// let handler = weights.register_model("tiny");
/// // ... insert weights for `handler` ...
/// let mut engine = InferenceEngine::new(RuntimeConfig::default(), weights, handler)?
///     .load(std::path::Path::new("graph.json"))?;
/// engine.step(&GenerateContext::new(1, 8, 16))?;
/// # Ok(())
/// # }
/// ```
pub struct InferenceEngine<S: EngineState = Idle> {
    config: RuntimeConfig,
    ctx: Arc<dyn DeviceContext>,
    weight_manager: Arc<dyn WeightManager>,
    handler: Arc<ModelWeightHandler>,
    profiler: Option<Arc<ModelProfiler>>,
    state: S,
}

// ── Idle → Ready ───────────────────────────────────────────────

impl InferenceEngine<Idle> {
    /// Creates an engine whose host context is built from `config`.
    pub fn new(
        config: RuntimeConfig,
        weight_manager: Arc<dyn WeightManager>,
        handler: Arc<ModelWeightHandler>,
    ) -> Result<Self, OpError> {
        let ctx: Arc<dyn DeviceContext> = Arc::new(config.create_context()?);
        Ok(Self::with_context(config, ctx, weight_manager, handler))
    }

    /// Creates an engine on an existing context.
    pub fn with_context(
        config: RuntimeConfig,
        ctx: Arc<dyn DeviceContext>,
        weight_manager: Arc<dyn WeightManager>,
        handler: Arc<ModelWeightHandler>,
    ) -> Self {
        tracing::info!(
            "engine created for model '{}' on {} (profiling: {})",
            handler.model_name(),
            ctx.device_type(),
            config.enable_profiling
        );
        let profiler = config
            .enable_profiling
            .then(|| Arc::new(ModelProfiler::new()));
        Self {
            config,
            ctx,
            weight_manager,
            handler,
            profiler,
            state: Idle,
        }
    }

    /// Loads, validates and builds a graph from a JSON file.
    pub fn load(self, path: &Path) -> Result<InferenceEngine<Ready>, OpError> {
        let graph = GraphProto::from_file(path)?.validate()?;
        self.build(graph)
    }

    /// Builds the graph's operators with the global factory.
    pub fn build(self, graph: GraphProto<Validated>) -> Result<InferenceEngine<Ready>, OpError> {
        self.build_with(graph, OpFactory::global())
    }

    /// Builds the graph's operators with `factory`.
    ///
    /// Steps:
    /// 1. Insert placeholders for the graph inputs.
    /// 2. Look up each operator's constructor by type and device.
    /// 3. Run `call_init` with the weight manager, rank and profiler.
    pub fn build_with(
        self,
        graph: GraphProto<Validated>,
        factory: &OpFactory,
    ) -> Result<InferenceEngine<Ready>, OpError> {
        let start = Instant::now();
        let device = self.ctx.device_type();
        let rank = RankInfo::from_context(&*self.ctx);

        let mut tensor_map = TensorMap::new();
        for name in &graph.inputs {
            let slot = Tensor::placeholder(name, Shape::scalar(), DType::F32, device, DataMode::Dense);
            tensor_map.insert(name.clone(), Arc::new(RwLock::new(slot)));
        }

        let mut operators = Vec::with_capacity(graph.num_operators());
        for proto in graph.iter_operators() {
            let mut op = factory.create(&OpRegistryKey::new(&proto.op_type, device))?;
            op.call_init(
                proto,
                Arc::clone(&self.ctx),
                Some(Arc::clone(&self.weight_manager)),
                Some(Arc::clone(&self.handler)),
                rank,
                &mut tensor_map,
                self.profiler.clone(),
            )?;
            operators.push(op);
        }
        tracing::info!(
            "{} built in {:.2}ms, {} tensors bound",
            graph.summary(),
            start.elapsed().as_secs_f64() * 1000.0,
            tensor_map.len()
        );

        Ok(InferenceEngine {
            config: self.config,
            ctx: self.ctx,
            weight_manager: self.weight_manager,
            handler: self.handler,
            profiler: self.profiler,
            state: Ready {
                graph,
                operators,
                tensor_map,
                steps: 0,
            },
        })
    }
}

// ── Ready: run steps ───────────────────────────────────────────

impl InferenceEngine<Ready> {
    pub fn graph(&self) -> &GraphProto<Validated> {
        &self.state.graph
    }

    pub fn num_operators(&self) -> usize {
        self.state.operators.len()
    }

    pub fn operator(&self, index: usize) -> Option<&dyn Operator> {
        self.state.operators.get(index).map(|op| op.as_ref())
    }

    /// Steps completed since the engine was built.
    pub fn steps_run(&self) -> usize {
        self.state.steps
    }

    pub fn profiler(&self) -> Option<&ModelProfiler> {
        self.profiler.as_deref()
    }

    /// The shared slot for `name`.
    pub fn tensor(&self, name: &str) -> Option<TensorRef> {
        self.state.tensor_map.get(name).cloned()
    }

    /// Replaces the contents of graph input `name`.
    pub fn set_input(&self, name: &str, tensor: Tensor) -> Result<(), OpError> {
        if !self.state.graph.inputs.iter().any(|n| n == name) {
            return Err(self.missing(name));
        }
        let slot = self.tensor(name).ok_or_else(|| self.missing(name))?;
        *slot.write() = tensor.with_name(name);
        Ok(())
    }

    /// A copy of tensor `name`, taken after the context is synchronized.
    pub fn output(&self, name: &str) -> Result<Tensor, OpError> {
        let slot = self.tensor(name).ok_or_else(|| self.missing(name))?;
        self.ctx.synchronize();
        let tensor = slot.read().clone();
        Ok(tensor)
    }

    /// Runs one generation step over every operator in graph order.
    pub fn step(&mut self, gen: &GenerateContext) -> Result<(), OpError> {
        let start = Instant::now();
        let mut rt = RuntimeContext::new(gen.clone());
        for op in &mut self.state.operators {
            op.set_generate_context(gen.clone())?;
            op.call_alloc(&mut rt)?;
            op.call_reshape(&mut rt)?;
            op.call_forward(&mut rt)?;
        }
        self.ctx.synchronize();
        self.state.steps += 1;
        tracing::debug!(
            "step {} ({}) done in {:.3}ms",
            gen.step,
            if rt.is_context { "prefill" } else { "decode" },
            start.elapsed().as_secs_f64() * 1000.0
        );

        if self.config.dump_tensors {
            let dir = self.dump_dir()?;
            for op in &self.state.operators {
                op.base().save_tensor_to_binary(dir)?;
            }
        }
        Ok(())
    }

    /// Clears per-request state in every operator.
    pub fn reset_cache(&mut self) -> Result<(), OpError> {
        for op in &mut self.state.operators {
            op.reset_cache()?;
        }
        Ok(())
    }

    /// Shares `map` with every operator.
    pub fn set_embedding_map(&mut self, map: EmbeddingMap) {
        for op in &mut self.state.operators {
            op.base_mut().set_embedding_map(Arc::clone(&map));
        }
    }

    /// Logs every operator's bindings.
    pub fn print_information(&self) {
        for op in &self.state.operators {
            op.base().print_information();
        }
    }

    /// Writes one text dump per operator into the configured dump directory.
    pub fn save_information(&self) -> Result<Vec<PathBuf>, OpError> {
        let dir = self.dump_dir()?;
        let mut written = Vec::new();
        for op in &self.state.operators {
            written.extend(op.base().save_information(dir)?);
        }
        Ok(written)
    }

    fn dump_dir(&self) -> Result<&Path, OpError> {
        self.config
            .dump_dir
            .as_deref()
            .ok_or_else(|| OpError::Config("no dump_dir configured".into()))
    }

    fn missing(&self, name: &str) -> OpError {
        OpError::MissingTensor {
            op: self.state.graph.name.clone(),
            name: name.to_string(),
        }
    }
}

impl<S: EngineState> std::fmt::Debug for InferenceEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &std::any::type_name::<S>())
            .field("model", &self.handler.model_name())
            .field("ctx", &self.ctx)
            .field("profiling", &self.profiler.is_some())
            .finish()
    }
}
