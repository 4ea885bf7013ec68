// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The operator lifecycle.
//!
//! ```text
//! call_init ── once, binds names and weights
//!     │
//!     ▼
//! ┌─► call_alloc ─► call_reshape ─► call_forward ─┐
//! └──────────────── once per step ────────────────┘
//! ```
//!
//! Every phase has a default body that does nothing and succeeds, so an
//! operator only overrides what it needs. The `call_*` wrappers add a
//! profiling scope keyed by phase and operator type when a profiler is
//! attached and otherwise behave exactly like the phase they wrap.

use crate::context::{GenerateContext, RuntimeContext};
use crate::profiler::{ModelProfiler, ProfileScope};
use crate::weights::{ModelWeightHandler, RankInfo, WeightManager};
use crate::OpError;
use model_ir::OperatorProto;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tensor_core::{copy, DType, DataMode, DeviceContext, DeviceType, Shape, Tensor};

/// A tensor slot shared between the operators that read and write it.
pub type TensorRef = Arc<RwLock<Tensor>>;

/// Name → tensor slot, shared by every operator of a model.
pub type TensorMap = HashMap<String, TensorRef>;

/// Name → read-only weight.
pub type WeightMap = HashMap<String, Arc<Tensor>>;

/// Name → ordered tensor slots.
pub type TensorListMap = HashMap<String, Vec<TensorRef>>;

/// Per-request embedding inputs, one entry per request in the batch.
/// Shared by every operator of a model and filled by the caller.
pub type EmbeddingMap = Arc<RwLock<Vec<TensorListMap>>>;

/// Deep-copies externally owned tensors into fresh slots on `device`.
pub fn import_tensor_map(
    src: &HashMap<String, Tensor>,
    device: DeviceType,
    ctx: &dyn DeviceContext,
) -> Result<TensorMap, OpError> {
    Ok(copy::deep_copy_tensor_map(src, device, ctx)?
        .into_iter()
        .map(|(name, t)| (name, Arc::new(RwLock::new(t))))
        .collect())
}

/// List counterpart of [`import_tensor_map`].
pub fn import_tensor_list_map(
    src: &HashMap<String, Vec<Tensor>>,
    device: DeviceType,
    ctx: &dyn DeviceContext,
) -> Result<TensorListMap, OpError> {
    Ok(copy::deep_copy_tensor_list_map(src, device, ctx)?
        .into_iter()
        .map(|(name, list)| (name, list.into_iter().map(|t| Arc::new(RwLock::new(t))).collect()))
        .collect())
}

// ── OperatorBase ───────────────────────────────────────────────

/// State every operator carries: its bindings, its context and the
/// collaborators attached by [`Operator::call_init`].
pub struct OperatorBase {
    op_type: String,
    op_name: String,
    in_names: Vec<String>,
    out_names: Vec<String>,
    inputs: Vec<TensorRef>,
    outputs: Vec<TensorRef>,
    weights: Vec<Arc<Tensor>>,
    ctx: Option<Arc<dyn DeviceContext>>,
    weight_manager: Option<Arc<dyn WeightManager>>,
    weight_handler: Option<Arc<ModelWeightHandler>>,
    rank_info: RankInfo,
    profiler: Option<Arc<ModelProfiler>>,
    gen_ctx: Option<GenerateContext>,
    embedding_map: Option<EmbeddingMap>,
}

impl OperatorBase {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            op_name: String::new(),
            in_names: Vec::new(),
            out_names: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            weights: Vec::new(),
            ctx: None,
            weight_manager: None,
            weight_handler: None,
            rank_info: RankInfo::default(),
            profiler: None,
            gen_ctx: None,
            embedding_map: None,
        }
    }

    /// Binds the node's names into `tensor_map` and resolves its weights.
    ///
    /// Names absent from the map get a placeholder tensor (no storage) on
    /// the context's device; existing entries are never replaced. Weights
    /// come from the attached [`WeightManager`] when there is one, else from
    /// `weights_map`, where missing names are skipped with a warning.
    ///
    /// Weights are resolved before anything is bound: if the manager fails,
    /// the error is returned, `tensor_map` is untouched and the operator
    /// keeps its previous bindings.
    pub fn bind(
        &mut self,
        proto: &OperatorProto,
        ctx: Arc<dyn DeviceContext>,
        weights_map: &WeightMap,
        tensor_map: &mut TensorMap,
    ) -> Result<(), OpError> {
        let weights = self.resolve_weights(proto, weights_map)?;

        let device = ctx.device_type();
        let mut slot = |name: &str| -> TensorRef {
            Arc::clone(tensor_map.entry(name.to_string()).or_insert_with(|| {
                tracing::trace!("{}: placeholder for '{}' on {}", proto.op_name, name, device);
                Arc::new(RwLock::new(Tensor::placeholder(
                    name,
                    Shape::scalar(),
                    DType::F32,
                    device,
                    DataMode::Dense,
                )))
            }))
        };
        let inputs: Vec<TensorRef> = proto.inputs.iter().map(|n| slot(n)).collect();
        let outputs: Vec<TensorRef> = proto.outputs.iter().map(|n| slot(n)).collect();

        self.op_name = proto.op_name.clone();
        self.in_names = proto.inputs.clone();
        self.out_names = proto.outputs.clone();
        self.inputs = inputs;
        self.outputs = outputs;
        self.weights = weights;
        self.ctx = Some(ctx);
        tracing::debug!(
            "bound {} ({}): {} inputs, {} outputs, {} weights",
            self.op_name,
            self.op_type,
            self.inputs.len(),
            self.outputs.len(),
            self.weights.len()
        );
        Ok(())
    }

    fn resolve_weights(
        &self,
        proto: &OperatorProto,
        weights_map: &WeightMap,
    ) -> Result<Vec<Arc<Tensor>>, OpError> {
        let mut weights = Vec::with_capacity(proto.weights.len());
        match (&self.weight_manager, &self.weight_handler) {
            (Some(manager), Some(handler)) => {
                for w in &proto.weights {
                    weights.push(manager.get_weight_tensor(handler, &self.rank_info, &w.name)?);
                }
            }
            (Some(_), None) => {
                return Err(OpError::Config(format!(
                    "operator '{}': weight manager attached without a model handler",
                    proto.op_name
                )));
            }
            (None, _) => {
                for w in &proto.weights {
                    match weights_map.get(&w.name) {
                        Some(t) => weights.push(Arc::clone(t)),
                        None => tracing::warn!(
                            "operator '{}': weight '{}' not in fallback map, skipped",
                            proto.op_name,
                            w.name
                        ),
                    }
                }
            }
        }
        Ok(weights)
    }

    pub fn op_name(&self) -> &str {
        &self.op_name
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn in_names(&self) -> &[String] {
        &self.in_names
    }

    pub fn out_names(&self) -> &[String] {
        &self.out_names
    }

    /// The context bound by init.
    pub fn context(&self) -> Result<&Arc<dyn DeviceContext>, OpError> {
        self.ctx.as_ref().ok_or_else(|| OpError::Uninitialized {
            op_type: self.op_type.clone(),
        })
    }

    pub fn rank_info(&self) -> RankInfo {
        self.rank_info
    }

    pub fn profiler(&self) -> Option<&Arc<ModelProfiler>> {
        self.profiler.as_ref()
    }

    pub fn generate_context(&self) -> Option<&GenerateContext> {
        self.gen_ctx.as_ref()
    }

    /// Attaches the model's shared embedding inputs.
    pub fn set_embedding_map(&mut self, map: EmbeddingMap) {
        self.embedding_map = Some(map);
    }

    pub fn embedding_map(&self) -> Option<&EmbeddingMap> {
        self.embedding_map.as_ref()
    }

    /// The `i`-th input slot.
    pub fn input(&self, i: usize) -> Result<&TensorRef, OpError> {
        self.inputs.get(i).ok_or_else(|| self.missing("input", i))
    }

    /// The `i`-th output slot.
    pub fn output(&self, i: usize) -> Result<&TensorRef, OpError> {
        self.outputs.get(i).ok_or_else(|| self.missing("output", i))
    }

    /// Resolved weights, in descriptor order.
    pub fn weight_list(&self) -> &[Arc<Tensor>] {
        &self.weights
    }

    /// Inputs by name. Debug use; synchronizes the context first.
    pub fn in_tensors(&self) -> TensorMap {
        self.sync();
        self.in_names.iter().cloned().zip(self.inputs.iter().cloned()).collect()
    }

    /// Outputs by name. Debug use; synchronizes the context first.
    pub fn out_tensors(&self) -> TensorMap {
        self.sync();
        self.out_names.iter().cloned().zip(self.outputs.iter().cloned()).collect()
    }

    /// Weights by name. Debug use; synchronizes the context first.
    pub fn weights(&self) -> WeightMap {
        self.sync();
        self.weights
            .iter()
            .map(|w| (w.name().to_string(), Arc::clone(w)))
            .collect()
    }

    pub(crate) fn sync(&self) {
        if let Some(ctx) = &self.ctx {
            ctx.synchronize();
        }
    }

    pub(crate) fn bound_inputs(&self) -> impl Iterator<Item = (&String, &TensorRef)> {
        self.in_names.iter().zip(&self.inputs)
    }

    pub(crate) fn bound_outputs(&self) -> impl Iterator<Item = (&String, &TensorRef)> {
        self.out_names.iter().zip(&self.outputs)
    }

    fn profile_scope(&self, phase: &'static str) -> Option<ProfileScope> {
        match (&self.profiler, &self.ctx) {
            (Some(p), Some(ctx)) => Some(p.scope(phase, &self.op_type, Arc::clone(ctx))),
            _ => None,
        }
    }

    fn missing(&self, what: &str, i: usize) -> OpError {
        OpError::MissingTensor {
            op: self.op_name.clone(),
            name: format!("{what} #{i}"),
        }
    }
}

impl fmt::Debug for OperatorBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorBase")
            .field("op_type", &self.op_type)
            .field("op_name", &self.op_name)
            .field("inputs", &self.in_names)
            .field("outputs", &self.out_names)
            .field("weights", &self.weights.len())
            .field("rank", &self.rank_info)
            .field("profiled", &self.profiler.is_some())
            .field("embeddings", &self.embedding_map.is_some())
            .finish()
    }
}

// ── Operator trait ─────────────────────────────────────────────

/// A named unit of computation with a four-phase lifecycle.
pub trait Operator: Send {
    fn base(&self) -> &OperatorBase;

    fn base_mut(&mut self) -> &mut OperatorBase;

    fn op_name(&self) -> &str {
        self.base().op_name()
    }

    fn op_type(&self) -> &str {
        self.base().op_type()
    }

    /// Binds the operator. Overrides should call the default first
    /// (through [`OperatorBase::bind`]) and then read attributes.
    fn init(
        &mut self,
        proto: &OperatorProto,
        ctx: Arc<dyn DeviceContext>,
        weights_map: &WeightMap,
        tensor_map: &mut TensorMap,
    ) -> Result<(), OpError> {
        self.base_mut().bind(proto, ctx, weights_map, tensor_map)
    }

    /// Attaches the weight source, rank and profiler, then runs
    /// [`init`](Operator::init) with an empty fallback map.
    #[allow(clippy::too_many_arguments)]
    fn call_init(
        &mut self,
        proto: &OperatorProto,
        ctx: Arc<dyn DeviceContext>,
        weight_manager: Option<Arc<dyn WeightManager>>,
        handler: Option<Arc<ModelWeightHandler>>,
        rank_info: RankInfo,
        tensor_map: &mut TensorMap,
        profiler: Option<Arc<ModelProfiler>>,
    ) -> Result<(), OpError> {
        let base = self.base_mut();
        base.weight_manager = weight_manager;
        base.weight_handler = handler;
        base.rank_info = rank_info;
        base.profiler = profiler;
        self.init(proto, ctx, &WeightMap::new(), tensor_map)
    }

    fn alloc(&mut self, _rt: &mut RuntimeContext) -> Result<(), OpError> {
        Ok(())
    }

    fn reshape(&mut self, _rt: &mut RuntimeContext) -> Result<(), OpError> {
        Ok(())
    }

    fn forward(&mut self, _rt: &mut RuntimeContext) -> Result<(), OpError> {
        Ok(())
    }

    /// Clears any state carried between steps.
    fn reset_cache(&mut self) -> Result<(), OpError> {
        Ok(())
    }

    fn set_generate_context(&mut self, gen_ctx: GenerateContext) -> Result<(), OpError> {
        self.base_mut().gen_ctx = Some(gen_ctx);
        Ok(())
    }

    fn call_alloc(&mut self, rt: &mut RuntimeContext) -> Result<(), OpError> {
        let _scope = self.base().profile_scope("alloc");
        self.alloc(rt)
    }

    fn call_reshape(&mut self, rt: &mut RuntimeContext) -> Result<(), OpError> {
        let _scope = self.base().profile_scope("reshape");
        self.reshape(rt)
    }

    fn call_forward(&mut self, rt: &mut RuntimeContext) -> Result<(), OpError> {
        let _scope = self.base().profile_scope("forward");
        self.forward(rt)
    }
}
