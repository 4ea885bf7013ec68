// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `GemmA16W8`: a dense layer over u8 weights.
//!
//! # Bindings
//! - input 0: `x`, F16 / BF16 / F32, shape `[M, K]` or `[B, S, K]`
//! - weight 0: `weight`, U8 `[K, N]`
//! - weight 1: `scale`, F32 `[G, N]`
//! - weight 2: `zero_point`, F32 `[G, N]`
//! - weight 3 (optional): `bias`, F32 `[N]`
//! - output 0: F32, `x`'s shape with the last dimension replaced by `N`
//!
//! # Attributes
//! - `activation` (string, default `"none"`)
//! - `group_size` (int, default `K`, i.e. one group per channel)
//! - `accumulate` (bool, default `false`): add to the existing output
//!
//! Weights are packed once at init. F32 inputs are rounded to bf16 when the
//! activation block is packed.

use crate::context::RuntimeContext;
use crate::operator::{Operator, OperatorBase, TensorMap, WeightMap};
use crate::OpError;
use half::{bf16, f16};
use lowp_kernels::{
    gemm_a16w8, par_gemm_a16w8, Activation, GemmKernel, GemmOperands, HalfFloat,
    PackedActivation, PackedWeight, QuantParams, StoreMode,
};
use model_ir::{AttrValue, OperatorProto};
use std::sync::Arc;
use tensor_core::{DType, DataMode, DeviceContext, Shape, Tensor};

/// Operands that stay fixed across steps.
#[derive(Debug)]
struct Prepared {
    kernel: GemmKernel,
    weight: PackedWeight,
    quant: QuantParams,
    bias: Option<Vec<f32>>,
    k: usize,
    n: usize,
}

#[derive(Debug)]
pub struct GemmA16W8 {
    base: OperatorBase,
    prepared: Option<Prepared>,
}

impl GemmA16W8 {
    pub const OP_TYPE: &'static str = "GemmA16W8";

    pub fn new() -> Self {
        Self {
            base: OperatorBase::new(Self::OP_TYPE),
            prepared: None,
        }
    }

    /// `(K, N)` once initialised.
    pub fn dims(&self) -> Option<(usize, usize)> {
        self.prepared.as_ref().map(|p| (p.k, p.n))
    }

    pub fn activation(&self) -> Option<Activation> {
        self.prepared.as_ref().map(|p| p.kernel.activation())
    }

    pub fn store_mode(&self) -> Option<StoreMode> {
        self.prepared.as_ref().map(|p| p.kernel.store_mode())
    }

    fn prepared(&self) -> Result<&Prepared, OpError> {
        self.prepared.as_ref().ok_or_else(|| OpError::Uninitialized {
            op_type: Self::OP_TYPE.to_string(),
        })
    }

    fn invalid_shape(&self, detail: String) -> OpError {
        OpError::InvalidShape {
            op: self.base.op_name().to_string(),
            detail,
        }
    }

    fn invalid_attr(&self, key: &str, detail: impl Into<String>) -> OpError {
        OpError::InvalidAttribute {
            op: self.base.op_name().to_string(),
            key: key.to_string(),
            detail: detail.into(),
        }
    }

    fn read_attributes(&self, proto: &OperatorProto, k: usize) -> Result<(Activation, bool, usize), OpError> {
        let activation = match proto.attr.get("activation") {
            None => Activation::Identity,
            Some(AttrValue::Str(name)) => Activation::from_name(name)
                .ok_or_else(|| self.invalid_attr("activation", format!("unknown activation '{name}'")))?,
            Some(other) => return Err(self.invalid_attr("activation", format!("expected a string, got {other}"))),
        };
        let accumulate = match proto.attr.get("accumulate") {
            None => false,
            Some(AttrValue::Bool(b)) => *b,
            Some(other) => return Err(self.invalid_attr("accumulate", format!("expected a bool, got {other}"))),
        };
        let group_size = match proto.attr.get("group_size") {
            None => k,
            Some(AttrValue::Int(g)) if *g > 0 => *g as usize,
            Some(other) => {
                return Err(self.invalid_attr("group_size", format!("expected a positive int, got {other}")))
            }
        };
        Ok((activation, accumulate, group_size))
    }

    /// Checks the bound weights and packs them for the kernel.
    fn prepare(&self, proto: &OperatorProto) -> Result<Prepared, OpError> {
        if proto.inputs.len() != 1 || proto.outputs.len() != 1 {
            return Err(self.invalid_shape(format!(
                "expected 1 input and 1 output, got {} and {}",
                proto.inputs.len(),
                proto.outputs.len()
            )));
        }
        if !(3..=4).contains(&proto.weights.len()) {
            return Err(self.invalid_shape(format!(
                "expected 3 or 4 weights (weight, scale, zero_point[, bias]), got {}",
                proto.weights.len()
            )));
        }
        let weights = self.base.weight_list();
        if weights.len() != proto.weights.len() {
            let missing = proto
                .weight_names()
                .find(|n| weights.iter().all(|w| w.name() != *n))
                .unwrap_or_default();
            return Err(OpError::MissingWeight {
                name: missing.to_string(),
                model: "<fallback map>".to_string(),
                rank: self.base.rank_info().rank,
            });
        }

        let w = &weights[0];
        if w.dtype() != DType::U8 || w.shape().rank() != 2 {
            return Err(self.invalid_shape(format!(
                "weight '{}' must be u8 [K, N], got {} {}",
                w.name(),
                w.dtype(),
                w.shape()
            )));
        }
        let (k, n) = (w.shape()[0], w.shape()[1]);
        let (activation, accumulate, group_size) = self.read_attributes(proto, k)?;

        let weight = PackedWeight::pack(dense_values::<u8>(w, &self.base)?, k, n)?;
        let scale = self.f32_side_table(&weights[1], "scale")?;
        let zero_point = self.f32_side_table(&weights[2], "zero_point")?;
        let quant = QuantParams::new(scale, zero_point, k, n, group_size)?;
        let bias = match weights.get(3) {
            Some(b) => {
                let values = self.f32_side_table(b, "bias")?;
                if values.len() != n {
                    return Err(self.invalid_shape(format!(
                        "bias '{}' has {} values, expected {n}",
                        b.name(),
                        values.len()
                    )));
                }
                Some(values.to_vec())
            }
            None => None,
        };

        let store = if accumulate { StoreMode::Accumulate } else { StoreMode::Store };
        Ok(Prepared {
            kernel: GemmKernel::new(activation, store),
            weight,
            quant,
            bias,
            k,
            n,
        })
    }

    fn f32_side_table<'t>(&self, t: &'t Tensor, what: &str) -> Result<&'t [f32], OpError> {
        if t.dtype() != DType::F32 {
            return Err(self.invalid_shape(format!(
                "{what} '{}' must be f32, got {}",
                t.name(),
                t.dtype()
            )));
        }
        dense_values::<f32>(t, &self.base)
    }

    fn output_shape(&self, x: &Tensor, k: usize, n: usize) -> Result<Shape, OpError> {
        if !matches!(x.dtype(), DType::F16 | DType::BF16 | DType::F32) {
            return Err(self.invalid_shape(format!("input dtype {} is not f16, bf16 or f32", x.dtype())));
        }
        let rank = x.shape().rank();
        if !(2..=3).contains(&rank) || x.shape().innermost() != k {
            return Err(self.invalid_shape(format!(
                "input shape {} is not [M, {k}] or [B, S, {k}]",
                x.shape()
            )));
        }
        let mut dims = x.shape().dims().to_vec();
        dims[rank - 1] = n;
        Ok(Shape::new(dims))
    }
}

impl Default for GemmA16W8 {
    fn default() -> Self {
        Self::new()
    }
}

/// The unpadded values of a contiguous dense tensor.
fn dense_values<'t, T: tensor_core::TensorElement>(
    t: &'t Tensor,
    base: &OperatorBase,
) -> Result<&'t [T], OpError> {
    if t.mode() != DataMode::Dense || !t.is_contiguous() {
        return Err(OpError::InvalidShape {
            op: base.op_name().to_string(),
            detail: format!("weight '{}' must be dense and unpadded", t.name()),
        });
    }
    Ok(&t.as_slice::<T>()?[..t.num_elements()])
}

fn run<H: HalfFloat>(
    prepared: &Prepared,
    a: &PackedActivation<H>,
    c: &mut [f32],
    ctx: &dyn DeviceContext,
) -> Result<(), OpError> {
    let ops = GemmOperands::new(a, &prepared.weight, &prepared.quant, prepared.bias.as_deref())?;
    match ctx.worker_pool() {
        Some(pool) => pool.install(|| par_gemm_a16w8(&prepared.kernel, &ops, c, prepared.n)),
        None => gemm_a16w8(&prepared.kernel, &ops, c, prepared.n),
    }
    Ok(())
}

impl Operator for GemmA16W8 {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn init(
        &mut self,
        proto: &OperatorProto,
        ctx: Arc<dyn DeviceContext>,
        weights_map: &WeightMap,
        tensor_map: &mut TensorMap,
    ) -> Result<(), OpError> {
        self.base.bind(proto, ctx, weights_map, tensor_map)?;
        let prepared = self.prepare(proto)?;
        tracing::debug!(
            "{}: K={} N={} groups={} activation={} store={:?} bias={}",
            proto.op_name,
            prepared.k,
            prepared.n,
            prepared.quant.groups(),
            prepared.kernel.activation(),
            prepared.kernel.store_mode(),
            prepared.bias.is_some()
        );
        self.prepared = Some(prepared);
        Ok(())
    }

    fn reshape(&mut self, rt: &mut RuntimeContext) -> Result<(), OpError> {
        let (k, n) = {
            let p = self.prepared()?;
            (p.k, p.n)
        };
        let (x_ref, y_ref) = (self.base.input(0)?, self.base.output(0)?);
        if Arc::ptr_eq(x_ref, y_ref) {
            return Err(self.invalid_shape("input and output are the same tensor".into()));
        }
        let out_shape = self.output_shape(&x_ref.read(), k, n)?;

        let mut y = y_ref.write();
        if y.dtype() != DType::F32 || y.mode() != DataMode::Dense || !y.has_storage() {
            y.reallocate(DType::F32, DataMode::Dense);
        }
        if y.shape() != &out_shape || !y.is_contiguous() {
            y.set_shape(out_shape);
        }
        tracing::trace!(
            "{}: step {} (context={}) output {}",
            self.base.op_name(),
            rt.generate.step,
            rt.is_context,
            y.shape()
        );
        Ok(())
    }

    fn forward(&mut self, _rt: &mut RuntimeContext) -> Result<(), OpError> {
        let prepared = self.prepared()?;
        let ctx = self.base.context()?;
        let (x_ref, y_ref) = (self.base.input(0)?, self.base.output(0)?);
        if Arc::ptr_eq(x_ref, y_ref) {
            return Err(self.invalid_shape("input and output are the same tensor".into()));
        }
        let x = x_ref.read();
        let mut y = y_ref.write();
        let expected = self.output_shape(&x, prepared.k, prepared.n)?;
        if y.shape() != &expected || y.dtype() != DType::F32 {
            return Err(self.invalid_shape(format!(
                "output is {} {}, expected f32 {expected}; was reshape run?",
                y.dtype(),
                y.shape()
            )));
        }

        let m = x.shape().outer_count();
        let ld = x.stride_bytes() / x.elem_size();
        let c = y.as_slice_mut::<f32>()?;
        match x.dtype() {
            DType::F16 => {
                let a = PackedActivation::<f16>::from_half(x.as_slice::<f16>()?, m, prepared.k, ld)?;
                run(prepared, &a, c, &**ctx)
            }
            DType::BF16 => {
                let a = PackedActivation::<bf16>::from_half(x.as_slice::<bf16>()?, m, prepared.k, ld)?;
                run(prepared, &a, c, &**ctx)
            }
            _ => {
                let a = PackedActivation::<bf16>::from_f32(x.as_slice::<f32>()?, m, prepared.k, ld)?;
                run(prepared, &a, c, &**ctx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lowp_kernels::reference::{gemm_a16w8_ref, ReferenceProblem};
    use model_ir::TensorProto;
    use parking_lot::RwLock;
    use tensor_core::CpuContext;

    const K: usize = 6;
    const N: usize = 3;

    fn weights(with_bias: bool) -> WeightMap {
        let mut map = WeightMap::new();
        let w: Vec<u8> = (0..K * N).map(|i| (i * 41 % 256) as u8).collect();
        map.insert(
            "w".into(),
            Arc::new(Tensor::from_slice(Shape::matrix(K, N), &w).unwrap().with_name("w")),
        );
        map.insert(
            "s".into(),
            Arc::new(Tensor::from_f32(Shape::matrix(1, N), &[0.01, 0.02, 0.03]).unwrap().with_name("s")),
        );
        map.insert(
            "z".into(),
            Arc::new(Tensor::from_f32(Shape::matrix(1, N), &[128.0, 100.0, 90.0]).unwrap().with_name("z")),
        );
        if with_bias {
            map.insert(
                "b".into(),
                Arc::new(Tensor::from_f32(Shape::vector(N), &[0.5, -0.5, 1.0]).unwrap().with_name("b")),
            );
        }
        map
    }

    fn proto(with_bias: bool) -> OperatorProto {
        let mut p = OperatorProto::new("fc", GemmA16W8::OP_TYPE)
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_weight(TensorProto::new("w", DType::U8, Shape::matrix(K, N)))
            .with_weight(TensorProto::new("s", DType::F32, Shape::matrix(1, N)))
            .with_weight(TensorProto::new("z", DType::F32, Shape::matrix(1, N)));
        if with_bias {
            p = p.with_weight(TensorProto::new("b", DType::F32, Shape::vector(N)));
        }
        p
    }

    fn ctx() -> Arc<dyn DeviceContext> {
        Arc::new(CpuContext::single_threaded())
    }

    fn input(values: &[f32], shape: Shape) -> Arc<RwLock<Tensor>> {
        Arc::new(RwLock::new(Tensor::from_f32(shape, values).unwrap().with_name("x")))
    }

    #[test]
    fn test_forward_matches_reference() {
        let x: Vec<f32> = (0..3 * K).map(|i| i as f32 * 0.125 - 1.0).collect();
        let mut map = TensorMap::new();
        map.insert("x".into(), input(&x, Shape::matrix(3, K)));

        let mut op = GemmA16W8::new();
        op.init(&proto(true), ctx(), &weights(true), &mut map).unwrap();
        assert_eq!(op.dims(), Some((K, N)));
        let mut rt = RuntimeContext::default();
        op.reshape(&mut rt).unwrap();
        op.forward(&mut rt).unwrap();

        let y = map["y"].read();
        assert_eq!(y.shape(), &Shape::matrix(3, N));
        let rounded = PackedActivation::<bf16>::from_f32(&x, 3, K, K).unwrap().to_f32();
        let w = weights(true);
        let problem = ReferenceProblem {
            a: &rounded,
            weight: w["w"].as_slice::<u8>().unwrap(),
            scale: w["s"].as_f32_slice(),
            zero_point: w["z"].as_f32_slice(),
            m: 3,
            k: K,
            n: N,
            group_size: K,
            row_scale: None,
            bias: Some(w["b"].as_f32_slice()),
        };
        let want = gemm_a16w8_ref(&problem, Activation::Identity, StoreMode::Store, &[]);
        for (g, e) in y.as_f32_slice().iter().zip(&want) {
            assert!((g - e).abs() <= 1e-3 * (1.0 + e.abs()), "{g} vs {e}");
        }
    }

    #[test]
    fn test_batched_input_keeps_leading_dims() {
        let mut map = TensorMap::new();
        map.insert("x".into(), input(&[0.5; 2 * 2 * K], Shape::batched(2, 2, K)));
        let mut op = GemmA16W8::new();
        op.init(&proto(false), ctx(), &weights(false), &mut map).unwrap();
        let mut rt = RuntimeContext::default();
        op.call_reshape(&mut rt).unwrap();
        op.call_forward(&mut rt).unwrap();
        assert_eq!(map["y"].read().shape(), &Shape::batched(2, 2, N));
    }

    #[test]
    fn test_attributes() {
        let mut map = TensorMap::new();
        let mut op = GemmA16W8::new();
        let p = proto(false)
            .with_attr("activation", AttrValue::Str("silu".into()))
            .with_attr("accumulate", AttrValue::Bool(true));
        op.init(&p, ctx(), &weights(false), &mut map).unwrap();
        assert_eq!(op.activation(), Some(Activation::Silu));
        assert_eq!(op.store_mode(), Some(StoreMode::Accumulate));

        let bad = proto(false).with_attr("activation", AttrValue::Str("softplus".into()));
        assert!(matches!(
            GemmA16W8::new().init(&bad, ctx(), &weights(false), &mut map),
            Err(OpError::InvalidAttribute { .. })
        ));
        let bad = proto(false).with_attr("group_size", AttrValue::Int(3));
        assert!(matches!(
            GemmA16W8::new().init(&bad, ctx(), &weights(false), &mut map),
            Err(OpError::Kernel(_))
        ));
    }

    #[test]
    fn test_missing_fallback_weight() {
        let mut map = TensorMap::new();
        let mut w = weights(false);
        w.remove("z");
        let err = GemmA16W8::new()
            .init(&proto(false), ctx(), &w, &mut map)
            .unwrap_err();
        assert!(matches!(err, OpError::MissingWeight { ref name, .. } if name == "z"));
    }

    #[test]
    fn test_wrong_input_width() {
        let mut map = TensorMap::new();
        map.insert("x".into(), input(&[0.0; 2 * (K + 1)], Shape::matrix(2, K + 1)));
        let mut op = GemmA16W8::new();
        op.init(&proto(false), ctx(), &weights(false), &mut map).unwrap();
        assert!(matches!(
            op.reshape(&mut RuntimeContext::default()),
            Err(OpError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_forward_before_reshape_fails() {
        let mut map = TensorMap::new();
        map.insert("x".into(), input(&[0.0; K], Shape::matrix(1, K)));
        let mut op = GemmA16W8::new();
        op.init(&proto(false), ctx(), &weights(false), &mut map).unwrap();
        assert!(op.forward(&mut RuntimeContext::default()).is_err());
        assert!(GemmA16W8::new().forward(&mut RuntimeContext::default()).is_err());
    }
}
