// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Process-wide registry of operator constructors.
//!
//! Constructors are keyed by operator type and device. The global instance
//! is created on first use with the built-in operators already registered;
//! later registrations under an existing key silently replace it.

use crate::operator::Operator;
use crate::ops::GemmA16W8;
use crate::OpError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tensor_core::DeviceType;

/// Builds a fresh, un-initialised operator.
pub type OpConstructor = Arc<dyn Fn() -> Box<dyn Operator> + Send + Sync>;

/// Factory key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpRegistryKey {
    pub op_type: String,
    pub device: DeviceType,
}

impl OpRegistryKey {
    pub fn new(op_type: impl Into<String>, device: DeviceType) -> Self {
        Self {
            op_type: op_type.into(),
            device,
        }
    }
}

impl fmt::Display for OpRegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.op_type, self.device)
    }
}

/// Operator type → constructor map.
#[derive(Default)]
pub struct OpFactory {
    ops: RwLock<HashMap<OpRegistryKey, OpConstructor>>,
}

static GLOBAL: OnceLock<OpFactory> = OnceLock::new();

impl OpFactory {
    /// An empty factory. Most callers want [`OpFactory::global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide factory.
    pub fn global() -> &'static OpFactory {
        GLOBAL.get_or_init(|| {
            let factory = OpFactory::new();
            register_builtin_operators(&factory);
            factory
        })
    }

    /// Registers `ctor` under `key`, replacing any earlier constructor.
    pub fn register(&self, key: OpRegistryKey, ctor: OpConstructor) {
        tracing::debug!("registering operator {key}");
        if self.ops.write().insert(key.clone(), ctor).is_some() {
            tracing::debug!("operator {key} re-registered, previous constructor replaced");
        }
    }

    /// Registers a plain function or closure.
    pub fn register_fn<F>(&self, key: OpRegistryKey, ctor: F)
    where
        F: Fn() -> Box<dyn Operator> + Send + Sync + 'static,
    {
        self.register(key, Arc::new(ctor));
    }

    /// Returns the constructor for `key`.
    pub fn get_operator(&self, key: &OpRegistryKey) -> Result<OpConstructor, OpError> {
        match self.ops.read().get(key) {
            Some(ctor) => Ok(Arc::clone(ctor)),
            None => {
                tracing::error!("unsupported operator type: {key}");
                Err(OpError::UnsupportedOperator {
                    op_type: key.op_type.clone(),
                    device: key.device,
                })
            }
        }
    }

    /// Builds a new operator for `key`.
    pub fn create(&self, key: &OpRegistryKey) -> Result<Box<dyn Operator>, OpError> {
        Ok((self.get_operator(key)?)())
    }

    pub fn contains(&self, key: &OpRegistryKey) -> bool {
        self.ops.read().contains_key(key)
    }

    /// Registered keys, sorted for display.
    pub fn registered(&self) -> Vec<OpRegistryKey> {
        let mut keys: Vec<_> = self.ops.read().keys().cloned().collect();
        keys.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        keys
    }
}

impl fmt::Debug for OpFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpFactory")
            .field("registered", &self.ops.read().len())
            .finish()
    }
}

/// Registers every operator this crate implements for the host.
pub fn register_builtin_operators(factory: &OpFactory) {
    factory.register_fn(
        OpRegistryKey::new(GemmA16W8::OP_TYPE, DeviceType::Cpu),
        || -> Box<dyn Operator> { Box::new(GemmA16W8::new()) },
    );
    tracing::info!("registered {} built-in operators", factory.ops.read().len());
}
