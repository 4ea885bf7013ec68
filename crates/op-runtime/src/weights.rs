// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight sources.
//!
//! Operators never own weights. They ask a [`WeightManager`] for a shared,
//! read-only [`Arc<Tensor>`] keyed by the loaded model ([`ModelWeightHandler`])
//! and the caller's shard ([`RankInfo`]). How weights reach the manager (file
//! format, sharding policy) is outside this crate; [`InMemoryWeightManager`]
//! holds tensors handed to it directly.

use crate::OpError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tensor_core::{DeviceContext, Tensor};

/// Position of this process in a sharded deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RankInfo {
    pub rank: usize,
    pub nranks: usize,
}

impl RankInfo {
    pub fn new(rank: usize, nranks: usize) -> Self {
        Self {
            rank,
            nranks: nranks.max(rank + 1),
        }
    }

    /// Reads the rank layout of a device context.
    pub fn from_context(ctx: &dyn DeviceContext) -> Self {
        Self::new(ctx.rank(), ctx.nranks())
    }
}

impl Default for RankInfo {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl fmt::Display for RankInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rank, self.nranks)
    }
}

/// Identifies one loaded set of weights.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelWeightHandler {
    id: usize,
    model_name: String,
}

impl ModelWeightHandler {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Read-only weight store queried during operator init.
pub trait WeightManager: Send + Sync {
    /// Returns the weight `name` of `handler`'s model for shard `rank`.
    fn get_weight_tensor(
        &self,
        handler: &ModelWeightHandler,
        rank: &RankInfo,
        name: &str,
    ) -> Result<Arc<Tensor>, OpError>;
}

type ShardKey = (usize, usize);

/// A [`WeightManager`] holding tensors in memory, one table per
/// `(handler, rank)` shard.
#[derive(Default)]
pub struct InMemoryWeightManager {
    next_id: AtomicUsize,
    shards: RwLock<HashMap<ShardKey, HashMap<String, Arc<Tensor>>>>,
}

impl InMemoryWeightManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler for a newly loaded model.
    pub fn register_model(&self, model_name: impl Into<String>) -> Arc<ModelWeightHandler> {
        let handler = ModelWeightHandler {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            model_name: model_name.into(),
        };
        tracing::info!(
            "weight manager: registered model '{}' as handler {}",
            handler.model_name,
            handler.id
        );
        Arc::new(handler)
    }

    /// Stores `tensor` under its own name for one shard, replacing any
    /// previous tensor with that name.
    pub fn insert(&self, handler: &ModelWeightHandler, rank: &RankInfo, tensor: Tensor) -> Arc<Tensor> {
        let tensor = Arc::new(tensor);
        tracing::debug!(
            "weight manager: {} -> '{}' rank {}",
            tensor.name(),
            handler.model_name,
            rank
        );
        self.shards
            .write()
            .entry((handler.id, rank.rank))
            .or_default()
            .insert(tensor.name().to_string(), Arc::clone(&tensor));
        tensor
    }

    /// Number of weights stored for one shard.
    pub fn num_weights(&self, handler: &ModelWeightHandler, rank: &RankInfo) -> usize {
        self.shards
            .read()
            .get(&(handler.id, rank.rank))
            .map_or(0, HashMap::len)
    }

    /// Drops every weight of `handler`'s model.
    pub fn release_model(&self, handler: &ModelWeightHandler) {
        self.shards.write().retain(|(id, _), _| *id != handler.id);
    }
}

impl WeightManager for InMemoryWeightManager {
    fn get_weight_tensor(
        &self,
        handler: &ModelWeightHandler,
        rank: &RankInfo,
        name: &str,
    ) -> Result<Arc<Tensor>, OpError> {
        self.shards
            .read()
            .get(&(handler.id, rank.rank))
            .and_then(|shard| shard.get(name))
            .cloned()
            .ok_or_else(|| OpError::MissingWeight {
                name: name.to_string(),
                model: handler.model_name.clone(),
                rank: rank.rank,
            })
    }
}

impl fmt::Debug for InMemoryWeightManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shards = self.shards.read();
        f.debug_struct("InMemoryWeightManager")
            .field("shards", &shards.len())
            .field("weights", &shards.values().map(HashMap::len).sum::<usize>())
            .finish()
    }
}
