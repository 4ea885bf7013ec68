// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the A16W8 tile and drivers.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use half::bf16;
use lowp_kernels::{
    gemm_a16w8, par_gemm_a16w8, Activation, GemmKernel, GemmOperands, PackedActivation,
    PackedWeight, QuantParams, StoreMode,
};

struct Problem {
    a: PackedActivation<bf16>,
    w: PackedWeight,
    q: QuantParams,
    bias: Vec<f32>,
}

fn problem(m: usize, k: usize, n: usize) -> Problem {
    let a: Vec<f32> = (0..m * k).map(|i| (i % 31) as f32 * 0.01).collect();
    let w: Vec<u8> = (0..k * n).map(|i| (i % 251) as u8).collect();
    let groups = k / 128;
    Problem {
        a: PackedActivation::from_f32(&a, m, k, k).unwrap(),
        w: PackedWeight::pack(&w, k, n).unwrap(),
        q: QuantParams::new(&vec![0.01; groups * n], &vec![128.0; groups * n], k, n, 128).unwrap(),
        bias: vec![0.1; n],
    }
}

fn bench_activations(c: &mut Criterion) {
    let (m, k, n) = (2, 1024, 256);
    let p = problem(m, k, n);
    let ops = GemmOperands::new(&p.a, &p.w, &p.q, Some(&p.bias)).unwrap();
    let mut out = vec![0.0f32; m * n];

    let mut group = c.benchmark_group("a16w8_decode_row_pair");
    group.throughput(Throughput::Elements((m * k * n) as u64));
    for activation in [Activation::Identity, Activation::Silu, Activation::GeluErf] {
        let kernel = GemmKernel::new(activation, StoreMode::Store);
        group.bench_with_input(BenchmarkId::from_parameter(activation), &kernel, |b, kernel| {
            b.iter(|| gemm_a16w8(kernel, black_box(&ops), &mut out, n))
        });
    }
    group.finish();
}

fn bench_drivers(c: &mut Criterion) {
    let (m, k, n) = (64, 2048, 512);
    let p = problem(m, k, n);
    let ops = GemmOperands::new(&p.a, &p.w, &p.q, None).unwrap();
    let kernel = GemmKernel::new(Activation::Identity, StoreMode::Store);
    let mut out = vec![0.0f32; m * n];

    let mut group = c.benchmark_group("a16w8_prefill");
    group.throughput(Throughput::Elements((m * k * n) as u64));
    group.sample_size(20);
    group.bench_function("serial", |b| b.iter(|| gemm_a16w8(&kernel, black_box(&ops), &mut out, n)));
    group.bench_function("rayon", |b| {
        b.iter(|| par_gemm_a16w8(&kernel, black_box(&ops), &mut out, n))
    });
    group.finish();
}

criterion_group!(benches, bench_activations, bench_drivers);
criterion_main!(benches);
