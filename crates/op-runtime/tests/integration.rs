// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: graph → factory → operator lifecycle → kernel.
//!
//! These tests exercise the complete flow from a graph descriptor through
//! the global factory and the weight manager to the quantized kernel,
//! proving that the four crates compose correctly.

use half::f16;
use lowp_kernels::reference::{gemm_a16w8_ref, ReferenceProblem};
use lowp_kernels::{Activation, PackedActivation, StoreMode};
use model_ir::{AttrValue, GraphProto, OperatorProto, TensorProto};
use op_runtime::{
    GenerateContext, InMemoryWeightManager, InferenceEngine, OpError, OpFactory, OpRegistryKey,
    Operator, OperatorBase, RankInfo, Ready, RuntimeConfig, RuntimeContext, TensorMap, WeightMap,
    BINARY_DUMP_DIR,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tensor_core::{CpuContext, DType, DeviceContext, DeviceType, Shape, Tensor};

// ── Helpers ────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const K: usize = 24;
const N: usize = 10;
const GROUP: usize = 8;
const GROUPS: usize = K / GROUP;

/// Weights of one quantized layer.
struct Layer {
    weight: Vec<u8>,
    scale: Vec<f32>,
    zero_point: Vec<f32>,
    bias: Vec<f32>,
}

impl Layer {
    fn new() -> Self {
        Self {
            weight: (0..K * N).map(|i| (i * 59 % 256) as u8).collect(),
            scale: (0..GROUPS * N).map(|i| 0.004 + (i % 3) as f32 * 0.002).collect(),
            zero_point: (0..GROUPS * N).map(|i| 124.0 + (i % 7) as f32).collect(),
            bias: (0..N).map(|i| i as f32 * 0.05 - 0.2).collect(),
        }
    }

    fn reference(&self, a: &[f32], m: usize, activation: Activation, store: StoreMode, prior: &[f32]) -> Vec<f32> {
        let problem = ReferenceProblem {
            a,
            weight: &self.weight,
            scale: &self.scale,
            zero_point: &self.zero_point,
            m,
            k: K,
            n: N,
            group_size: GROUP,
            row_scale: None,
            bias: Some(&self.bias),
        };
        gemm_a16w8_ref(&problem, activation, store, prior)
    }

    fn tensors(&self) -> [Tensor; 4] {
        [
            Tensor::from_slice(Shape::matrix(K, N), &self.weight).unwrap().with_name("fc.weight"),
            Tensor::from_f32(Shape::matrix(GROUPS, N), &self.scale).unwrap().with_name("fc.scale"),
            Tensor::from_f32(Shape::matrix(GROUPS, N), &self.zero_point).unwrap().with_name("fc.zp"),
            Tensor::from_f32(Shape::vector(N), &self.bias).unwrap().with_name("fc.bias"),
        ]
    }
}

fn gemm_proto(activation: &str, accumulate: bool) -> OperatorProto {
    OperatorProto::new("fc", "GemmA16W8")
        .with_inputs(["x"])
        .with_outputs(["y"])
        .with_weight(TensorProto::new("fc.weight", DType::U8, Shape::matrix(K, N)))
        .with_weight(TensorProto::new("fc.scale", DType::F32, Shape::matrix(GROUPS, N)))
        .with_weight(TensorProto::new("fc.zp", DType::F32, Shape::matrix(GROUPS, N)))
        .with_weight(TensorProto::new("fc.bias", DType::F32, Shape::vector(N)))
        .with_attr("activation", AttrValue::Str(activation.into()))
        .with_attr("group_size", AttrValue::Int(GROUP as i64))
        .with_attr("accumulate", AttrValue::Bool(accumulate))
}

fn engine(layer: &Layer, proto: OperatorProto, config: RuntimeConfig) -> InferenceEngine<Ready> {
    let wm = Arc::new(InMemoryWeightManager::new());
    let model = wm.register_model("single-layer");
    let rank = RankInfo::new(config.rank, config.nranks);
    for t in layer.tensors() {
        wm.insert(&model, &rank, t);
    }
    let graph = GraphProto::new("single-layer", vec!["x".into()], vec!["y".into()], vec![proto])
        .validate()
        .unwrap();
    InferenceEngine::new(config, wm, model).unwrap().build(graph).unwrap()
}

fn input(m: usize) -> Vec<f32> {
    (0..m * K).map(|i| ((i * 7 % 19) as f32 - 9.0) * 0.1).collect()
}

fn assert_close(got: &[f32], want: &[f32]) {
    assert_eq!(got.len(), want.len());
    for (i, (g, w)) in got.iter().zip(want).enumerate() {
        assert!((g - w).abs() <= 1e-3 * (1.0 + w.abs()), "element {i}: {g} vs {w}");
    }
}

// ── Lifecycle ──────────────────────────────────────────────────

#[test]
fn test_gemm_lifecycle_matches_reference() {
    init_tracing();
    let layer = Layer::new();
    let mut engine = engine(&layer, gemm_proto("gelu_tanh", false), RuntimeConfig::default());

    let m = 5;
    let x = input(m);
    engine
        .set_input("x", Tensor::from_f32(Shape::matrix(m, K), &x).unwrap())
        .unwrap();
    engine.step(&GenerateContext::new(1, m, m + 4)).unwrap();

    let rounded = PackedActivation::<half::bf16>::from_f32(&x, m, K, K).unwrap().to_f32();
    let y = engine.output("y").unwrap();
    assert_eq!(y.shape(), &Shape::matrix(m, N));
    assert_close(y.as_f32_slice(), &layer.reference(&rounded, m, Activation::GeluTanh, StoreMode::Store, &[]));

    let profiler = engine.profiler().unwrap();
    for phase in ["alloc", "reshape", "forward"] {
        assert_eq!(profiler.stats(phase, "GemmA16W8").unwrap().calls, 1, "{phase}");
    }
}

#[test]
fn test_f16_batched_input_on_worker_pool() {
    init_tracing();
    let layer = Layer::new();
    let (batch, seq) = (2, 3);
    let x: Vec<f16> = input(batch * seq).into_iter().map(f16::from_f32).collect();
    let x_f32: Vec<f32> = x.iter().map(|v| v.to_f32()).collect();

    let mut outputs = Vec::new();
    for threads in [1, 4] {
        let config = RuntimeConfig {
            num_threads: Some(threads),
            ..Default::default()
        };
        let mut engine = engine(&layer, gemm_proto("silu", false), config);
        engine
            .set_input("x", Tensor::from_slice(Shape::batched(batch, seq, K), &x).unwrap())
            .unwrap();
        engine.step(&GenerateContext::new(batch, seq, 8)).unwrap();
        let y = engine.output("y").unwrap();
        assert_eq!(y.shape(), &Shape::batched(batch, seq, N));
        outputs.push(y.as_f32_slice().to_vec());
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_close(
        &outputs[0],
        &layer.reference(&x_f32, batch * seq, Activation::Silu, StoreMode::Store, &[]),
    );
}

#[test]
fn test_accumulate_across_steps() {
    init_tracing();
    let layer = Layer::new();
    let mut engine = engine(&layer, gemm_proto("none", true), RuntimeConfig::default());
    let x = input(1);
    engine
        .set_input("x", Tensor::from_f32(Shape::matrix(1, K), &x).unwrap())
        .unwrap();

    let mut gen = GenerateContext::new(1, 1, 4);
    engine.step(&gen).unwrap();
    let first = engine.output("y").unwrap().as_f32_slice().to_vec();
    gen.advance();
    engine.step(&gen).unwrap();
    let second = engine.output("y").unwrap().as_f32_slice().to_vec();

    let doubled: Vec<f32> = first.iter().map(|v| v * 2.0).collect();
    assert_close(&second, &doubled);
    assert_eq!(engine.steps_run(), 2);
}

#[test]
fn test_init_twice_keeps_map_entry() {
    init_tracing();
    let layer = Layer::new();
    let mut fallback = WeightMap::new();
    for t in layer.tensors() {
        fallback.insert(t.name().to_string(), Arc::new(t));
    }
    let ctx: Arc<dyn DeviceContext> = Arc::new(CpuContext::single_threaded());
    let mut map = TensorMap::new();

    let mut op = OpFactory::global()
        .create(&OpRegistryKey::new("GemmA16W8", DeviceType::Cpu))
        .unwrap();
    op.init(&gemm_proto("relu", false), Arc::clone(&ctx), &fallback, &mut map)
        .unwrap();
    let y = Arc::clone(&map["y"]);
    op.init(&gemm_proto("relu", false), ctx, &fallback, &mut map)
        .unwrap();
    assert!(Arc::ptr_eq(&y, &map["y"]));
    assert_eq!(map.len(), 2);
    assert_eq!(op.base().weights().len(), 4);
}

#[test]
fn test_missing_weight_in_manager_fails_build() {
    init_tracing();
    let wm = Arc::new(InMemoryWeightManager::new());
    let model = wm.register_model("empty");
    let graph = GraphProto::new("g", vec!["x".into()], vec!["y".into()], vec![gemm_proto("relu", false)])
        .validate()
        .unwrap();
    let err = InferenceEngine::new(RuntimeConfig::default(), wm, model)
        .unwrap()
        .build(graph)
        .unwrap_err();
    assert!(matches!(err, OpError::MissingWeight { ref name, .. } if name == "fc.weight"));
}

// ── Factory ────────────────────────────────────────────────────

/// Records the phases it runs in a shared log.
struct Recorder {
    base: OperatorBase,
    log: Arc<Mutex<Vec<String>>>,
}

impl Operator for Recorder {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn alloc(&mut self, rt: &mut RuntimeContext) -> Result<(), OpError> {
        self.log.lock().push(format!("alloc@{}", rt.generate.step));
        Ok(())
    }

    fn forward(&mut self, _rt: &mut RuntimeContext) -> Result<(), OpError> {
        let step = self.base.generate_context().map_or(usize::MAX, |g| g.step);
        self.log.lock().push(format!("{}:forward@{step}", self.base.op_name()));
        Ok(())
    }
}

#[test]
fn test_global_factory_unsupported_then_registered() {
    init_tracing();
    let key = OpRegistryKey::new("IntegrationRecorder", DeviceType::Cpu);
    assert!(matches!(
        OpFactory::global().get_operator(&key),
        Err(OpError::UnsupportedOperator { .. })
    ));

    let log = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&log);
    OpFactory::global().register_fn(key.clone(), move || -> Box<dyn Operator> {
        Box::new(Recorder {
            base: OperatorBase::new("IntegrationRecorder"),
            log: Arc::clone(&shared),
        })
    });

    let ops = vec![
        OperatorProto::new("r0", "IntegrationRecorder").with_inputs(["a"]).with_outputs(["b"]),
        OperatorProto::new("r1", "IntegrationRecorder").with_inputs(["b"]).with_outputs(["c"]),
    ];
    let graph = GraphProto::new("rec", vec!["a".into()], vec!["c".into()], ops)
        .validate()
        .unwrap();
    let wm = Arc::new(InMemoryWeightManager::new());
    let model = wm.register_model("rec");
    let mut engine = InferenceEngine::new(RuntimeConfig::default(), wm, model)
        .unwrap()
        .build(graph)
        .unwrap();

    let mut gen = GenerateContext::new(1, 2, 4);
    gen.advance();
    engine.step(&gen).unwrap();
    assert_eq!(
        *log.lock(),
        ["alloc@1", "r0:forward@1", "alloc@1", "r1:forward@1"]
    );
}

#[test]
fn test_global_factory_last_registration_wins() {
    init_tracing();
    let key = OpRegistryKey::new("IntegrationTwice", DeviceType::Cpu);
    for tag in ["first", "second"] {
        OpFactory::global().register_fn(key.clone(), move || -> Box<dyn Operator> {
            Box::new(Recorder {
                base: OperatorBase::new(tag),
                log: Arc::new(Mutex::new(Vec::new())),
            })
        });
    }
    assert_eq!(OpFactory::global().create(&key).unwrap().op_type(), "second");
}

// ── Configuration and dumps ────────────────────────────────────

#[test]
fn test_engine_from_files_with_dumps() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let graph_path = dir.path().join("graph.json");
    std::fs::write(
        &graph_path,
        r#"{
            "name": "from-file",
            "inputs": ["x"],
            "outputs": ["y"],
            "operators": [{
                "op_name": "fc",
                "op_type": "GemmA16W8",
                "inputs": ["x"],
                "outputs": ["y"],
                "weights": [
                    {"name": "fc.weight", "dtype": "u8", "shape": [24, 10]},
                    {"name": "fc.scale", "dtype": "f32", "shape": [3, 10]},
                    {"name": "fc.zp", "dtype": "f32", "shape": [3, 10]},
                    {"name": "fc.bias", "dtype": "f32", "shape": [10]}
                ],
                "attr": {"activation": "relu", "group_size": 8}
            }]
        }"#,
    )
    .unwrap();
    let config_path = dir.path().join("runtime.toml");
    let dump_dir = dir.path().join("dump");
    std::fs::write(
        &config_path,
        format!(
            "num_threads = 2\ndump_tensors = true\ndump_dir = {:?}\n",
            dump_dir.to_string_lossy()
        ),
    )
    .unwrap();

    let layer = Layer::new();
    let config = RuntimeConfig::from_file(&config_path).unwrap();
    let wm = Arc::new(InMemoryWeightManager::new());
    let model = wm.register_model("from-file");
    for t in layer.tensors() {
        wm.insert(&model, &RankInfo::default(), t);
    }
    let mut engine = InferenceEngine::new(config, wm, model)
        .unwrap()
        .load(&graph_path)
        .unwrap();
    engine
        .set_input("x", Tensor::from_f32(Shape::matrix(2, K), &input(2)).unwrap())
        .unwrap();
    engine.step(&GenerateContext::new(1, 2, 4)).unwrap();

    let raw = dump_dir.join(BINARY_DUMP_DIR);
    assert_eq!(std::fs::read(raw.join("x")).unwrap().len(), 2 * K * 4);
    assert_eq!(std::fs::read(raw.join("fc.weight")).unwrap().len(), K * N);
    assert_eq!(std::fs::read(raw.join("y")).unwrap().len(), 2 * N * 4);

    let written = engine.save_information().unwrap();
    assert_eq!(written, [dump_dir.join("fc")]);
    let text = std::fs::read_to_string(&written[0]).unwrap();
    assert!(text.contains("op_weights:"));
    engine.print_information();
}

// ── Properties ─────────────────────────────────────────────────

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

    #[test]
    fn prop_engine_step_matches_reference(m in 1usize..7, act in 0usize..6, seed in 0u32..1000) {
        let names = ["none", "relu", "silu", "tanh", "gelu", "gelu_tanh"];
        let activation = Activation::from_name(names[act]).unwrap();
        let layer = Layer::new();
        let config = RuntimeConfig {
            num_threads: Some(1),
            enable_profiling: false,
            ..Default::default()
        };
        let mut engine = engine(&layer, gemm_proto(names[act], false), config);

        let x: Vec<f32> = (0..m * K)
            .map(|i| (((i as u32).wrapping_mul(2654435761).wrapping_add(seed) % 41) as f32 - 20.0) * 0.05)
            .collect();
        engine
            .set_input("x", Tensor::from_f32(Shape::matrix(m, K), &x).unwrap())
            .unwrap();
        engine.step(&GenerateContext::new(1, m, m + 1)).unwrap();

        let rounded = PackedActivation::<half::bf16>::from_f32(&x, m, K, K).unwrap().to_f32();
        let want = layer.reference(&rounded, m, activation, StoreMode::Store, &[]);
        let got = engine.output("y").unwrap();
        for (g, w) in got.as_f32_slice().iter().zip(&want) {
            proptest::prop_assert!((g - w).abs() <= 1e-3 * (1.0 + w.abs()), "{} vs {}", g, w);
        }
    }
}
