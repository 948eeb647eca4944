//! Benchmarks for convolutional forward and training passes.
//!
//! Run with: cargo bench

use convnet::backend::{ComputeBackend, HostBackend, SimulatedDevice};
use convnet::layers::{Convolutional, FullyConnected, ReLU, SoftMax};
use convnet::loss::cross_entropy_gradient;
use convnet::network::Network;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const BATCH: usize = 8;

/// 28x28x1 input through two convolutions to ten classes
fn digit_network(backend: Box<dyn ComputeBackend>) -> Network {
    let mut network = Network::new(backend, Some(7)).with_mini_batch_size(BATCH);
    network
        .add_layer(Convolutional::new(5, 8, 1, 2))
        .and_then(|n| n.add_layer(ReLU::new()))
        .and_then(|n| n.add_layer(Convolutional::new(3, 16, 3, 1)))
        .and_then(|n| n.add_layer(ReLU::new()))
        .and_then(|n| n.add_layer(FullyConnected::new(10)))
        .and_then(|n| n.add_layer(SoftMax::new()))
        .expect("layers");
    network.setup(28, 28, 1, 10).expect("setup");
    network
}

fn host() -> Box<dyn ComputeBackend> {
    Box::new(HostBackend::new())
}

fn simulated() -> Box<dyn ComputeBackend> {
    Box::new(SimulatedDevice::new())
}

fn inputs() -> Vec<f32> {
    (0..BATCH * 28 * 28).map(|i| ((i % 97) as f32) / 97.0).collect()
}

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_pass");
    group.throughput(Throughput::Elements(BATCH as u64));

    let backends: [(&str, fn() -> Box<dyn ComputeBackend>); 2] = [("host", host), ("simulated", simulated)];
    for (name, make) in backends {
        let mut network = digit_network(make());
        network.feed_input(&inputs()).expect("feed");
        group.bench_with_input(BenchmarkId::from_parameter(name), &name, |b, _| {
            b.iter(|| {
                network.forward_pass().expect("forward");
                black_box(network.output().expect("output"))
            })
        });
    }
    group.finish();
}

fn bench_training_step(c: &mut Criterion) {
    let labels: Vec<usize> = (0..BATCH).map(|i| i % 10).collect();
    let mut network = digit_network(host());
    network.feed_input(&inputs()).expect("feed");

    c.bench_function("training_step/host", |b| {
        b.iter(|| {
            network.forward_pass().expect("forward");
            let probabilities = network.output().expect("output");
            let gradient = cross_entropy_gradient(probabilities.view(), &labels).expect("gradient");
            network.set_output_gradient(gradient.view()).expect("inject");
            network.backward_pass(black_box(0.01), 0.9).expect("backward");
        })
    });
}

criterion_group!(benches, bench_forward, bench_training_step);
criterion_main!(benches);
