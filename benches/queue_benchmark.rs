// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Benchmarks for the disk queue.
//!
//! Measures:
//! - Put latency at different message sizes
//! - Drain (receive) throughput
//! - Put throughput across segment rotations

use std::hint::black_box;

use bytes::Bytes;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use diskqueue::{DiskQueue, QueueBuilder};
use tempfile::TempDir;

/// Message sizes to benchmark (bytes)
const MESSAGE_SIZES: &[usize] = &[16, 256, 1024, 4096, 16384];

/// Number of messages for throughput tests
const BATCH_SIZE: usize = 10_000;

fn create_queue(temp_dir: &TempDir, name: &str) -> DiskQueue {
    QueueBuilder::new(name, temp_dir.path())
        .max_bytes_per_file(100 * 1024 * 768)
        .min_msg_size(0)
        .max_msg_size(1 << 20)
        .build()
        .expect("Failed to create queue")
}

fn generate_message(size: usize) -> Bytes { Bytes::from(vec![0xABu8; size]) }

/// Benchmark single message put latency
fn bench_put_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_latency");

    for &size in MESSAGE_SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let queue = create_queue(&temp_dir, "bench_put");
            let msg = generate_message(size);

            b.iter(|| {
                queue.put(black_box(msg.clone())).unwrap();
            });

            queue.close().unwrap();
        });
    }

    group.finish();
}

/// Benchmark put throughput across segment rotations
fn bench_put_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_throughput");
    group.sample_size(20);

    for &size in &[256, 1024, 4096] {
        let total_bytes = (size * BATCH_SIZE) as u64;
        group.throughput(Throughput::Bytes(total_bytes));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let temp_dir = TempDir::new().unwrap();
                    let queue = create_queue(&temp_dir, "bench_tp");
                    let msg = generate_message(size);
                    (temp_dir, queue, msg)
                },
                |(temp_dir, queue, msg)| {
                    for _ in 0..BATCH_SIZE {
                        queue.put(black_box(msg.clone())).unwrap();
                    }
                    queue.close().unwrap();
                    drop(temp_dir);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark drain throughput: pre-fill the queue, then receive everything
fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain");
    group.sample_size(20);

    for &size in &[256, 1024, 4096] {
        let total_bytes = (size * BATCH_SIZE) as u64;
        group.throughput(Throughput::Bytes(total_bytes));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let temp_dir = TempDir::new().unwrap();
                    let queue = create_queue(&temp_dir, "bench_drain");
                    let msg = generate_message(size);
                    for _ in 0..BATCH_SIZE {
                        queue.put(msg.clone()).unwrap();
                    }
                    (temp_dir, queue)
                },
                |(temp_dir, queue)| {
                    let rx = queue.read_chan();
                    for _ in 0..BATCH_SIZE {
                        black_box(rx.recv().unwrap());
                    }
                    queue.close().unwrap();
                    drop(temp_dir);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_put_latency, bench_put_throughput, bench_drain);

criterion_main!(benches);
