use ndarray::{array, Array2};

use super::{backends, positive_inputs};
use crate::backend::HostBackend;
use crate::dataset::InMemoryDataSet;
use crate::layers::{Convolutional, FullyConnected, LayerKind, ReLU, SoftMax};
use crate::network::Network;
use crate::parameters::ParameterSnapshot;
use crate::training::{Trainer, TrainingConfig};

fn host() -> Box<HostBackend> {
    Box::new(HostBackend::new())
}

/// FullyConnected(2) → ReLU over two inputs; the ReLU is terminal, so the
/// injected gradient lands in the dense layer's output deltas
fn dense_probe(batch: usize) -> Network {
    let mut network = Network::new(host(), None).with_mini_batch_size(batch);
    network.add_layer(FullyConnected::new(2)).unwrap().add_layer(ReLU::new()).unwrap();
    network.setup(2, 1, 1, 2).unwrap();
    network
        .set_parameters(0, &ParameterSnapshot { weights: array![[0.1, 0.2], [0.3, 0.4]], biases: array![0.0, 0.0] })
        .unwrap();
    network
}

#[test_log::test]
fn test_setup_derives_every_geometry() {
    let mut network = Network::new(host(), Some(1));
    network
        .add_layer(Convolutional::new(5, 6, 1, 2))
        .unwrap()
        .add_layer(ReLU::new())
        .unwrap()
        .add_layer(Convolutional::new(3, 4, 2, 0))
        .unwrap()
        .add_layer(FullyConnected::new(10))
        .unwrap()
        .add_layer(SoftMax::new())
        .unwrap();
    network.setup(13, 13, 3, 10).unwrap();

    let outputs: Vec<String> = (0..network.layer_count())
        .map(|i| network.layer(i).unwrap().geometry().unwrap().output.to_string())
        .collect();
    assert_eq!(outputs, vec!["13x13x6", "13x13x6", "6x6x4", "1x1x10", "1x1x10"]);
    assert_eq!(network.layer(3).unwrap().kind(), LayerKind::FullyConnected);
    assert_eq!(network.output().unwrap().dim(), (1, 10));
}

#[test]
fn test_setup_rejects_misuse() {
    let mut empty = Network::new(host(), None);
    assert!(empty.setup(2, 2, 1, 2).unwrap_err().is_usage());

    let mut misplaced = Network::new(host(), None);
    misplaced.add_layer(SoftMax::new()).unwrap().add_layer(FullyConnected::new(2)).unwrap();
    assert!(misplaced.setup(2, 2, 1, 2).unwrap_err().is_usage());

    let mut wrong_classes = Network::new(host(), None);
    wrong_classes.add_layer(FullyConnected::new(3)).unwrap();
    assert!(wrong_classes.setup(2, 2, 1, 2).unwrap_err().is_geometry());

    let mut twice = Network::new(host(), None);
    twice.add_layer(FullyConnected::new(2)).unwrap();
    twice.setup(2, 2, 1, 2).unwrap();
    assert!(twice.setup(2, 2, 1, 2).unwrap_err().is_usage());
    assert!(matches!(twice.add_layer(ReLU::new()), Err(ref e) if e.is_usage()));
}

#[test]
fn test_passes_require_setup() {
    let mut network = Network::new(host(), None);
    network.add_layer(FullyConnected::new(2)).unwrap();
    assert!(network.forward_pass().unwrap_err().is_usage());
    assert!(network.backward_pass(0.1, 0.9).unwrap_err().is_usage());
    assert!(network.feed_input(&[1.0, 2.0]).unwrap_err().is_usage());
}

#[test]
fn test_feed_validates_lengths() {
    let mut network = dense_probe(2);
    assert!(matches!(network.feed_input(&[1.0; 3]), Err(crate::NetError::DimensionMismatch { .. })));

    let data = InMemoryDataSet::new(Array2::zeros((3, 2)), vec![0, 1, 0]).unwrap();
    assert!(network.feed_batch(&data, &[0]).is_err());
    network.feed_batch(&data, &[0, 2]).unwrap();
    assert!(network.feed_batch(&data, &[0, 7]).unwrap_err().is_usage());

    let wide = InMemoryDataSet::new(Array2::zeros((2, 5)), vec![0, 1]).unwrap();
    assert!(network.feed_batch(&wide, &[0, 1]).is_err());
}

#[test]
fn test_momentum_update() {
    let mut network = dense_probe(1);
    let (lr, momentum) = (0.1, 0.9);

    for _ in 0..2 {
        network.feed_input(&[1.0, 2.0]).unwrap();
        network.forward_pass().unwrap();
        network.set_output_gradient(array![[0.5, -1.0]].view()).unwrap();
        network.backward_pass(lr, momentum).unwrap();
    }

    // two identical steps move by (1 + m) * lr + lr = 0.29 gradients
    let grad_w: Array2<f32> = array![[0.5, 1.0], [-1.0, -2.0]];
    let expected: Array2<f32> = array![[0.1, 0.2], [0.3, 0.4]] - &(grad_w * 0.29);
    let params = network.parameters(0).unwrap().unwrap();
    for (got, want) in params.weights.iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-6, "{} vs {}", got, want);
    }
    assert!((params.biases[0] - (-0.145)).abs() < 1e-6);
    assert!((params.biases[1] - 0.29).abs() < 1e-6);
}

#[test]
fn test_batch_update_sums_sample_gradients() {
    let samples: [[f32; 2]; 2] = [[1.0, 2.0], [-0.5, 3.0]];
    let gradients: [[f32; 2]; 2] = [[0.5, -1.0], [0.25, 0.75]];

    let mut batched = dense_probe(2);
    batched.feed_input(&[1.0, 2.0, -0.5, 3.0]).unwrap();
    batched.forward_pass().unwrap();
    batched.set_output_gradient(array![[0.5, -1.0], [0.25, 0.75]].view()).unwrap();
    batched.backward_pass(1.0, 0.0).unwrap();
    let batched = batched.parameters(0).unwrap().unwrap();

    let mut summed = array![[0.1f32, 0.2], [0.3, 0.4]];
    for (x, g) in samples.iter().zip(&gradients) {
        let mut single = dense_probe(1);
        single.feed_input(x).unwrap();
        single.forward_pass().unwrap();
        single.set_output_gradient(array![[g[0], g[1]]].view()).unwrap();
        single.backward_pass(1.0, 0.0).unwrap();
        let initial: Array2<f32> = array![[0.1, 0.2], [0.3, 0.4]];
        summed += &(single.parameters(0).unwrap().unwrap().weights - initial);
    }

    for (got, want) in batched.weights.iter().zip(summed.iter()) {
        assert!((got - want).abs() < 1e-6);
    }
}

#[test]
fn test_save_and_load_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.bin");

    let build = |seed| {
        let mut network = Network::new(host(), Some(seed));
        network
            .add_layer(Convolutional::new(3, 2, 1, 1))
            .unwrap()
            .add_layer(ReLU::new())
            .unwrap()
            .add_layer(FullyConnected::new(3))
            .unwrap()
            .add_layer(SoftMax::new())
            .unwrap();
        network.setup(4, 4, 1, 3).unwrap();
        network
    };

    let trained = build(1);
    trained.save_parameters(&path).unwrap();

    let mut restored = build(2);
    assert_ne!(restored.parameters(0).unwrap(), trained.parameters(0).unwrap());
    restored.load_parameters(&path).unwrap();
    for layer in 0..4 {
        assert_eq!(restored.parameters(layer).unwrap(), trained.parameters(layer).unwrap());
    }

    let inputs = positive_inputs(16);
    let mut outputs = Vec::new();
    for mut network in [trained, restored] {
        network.feed_input(&inputs).unwrap();
        network.forward_pass().unwrap();
        outputs.push(network.output().unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_load_rejects_different_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.bin");

    let mut small = Network::new(host(), Some(1));
    small.add_layer(FullyConnected::new(2)).unwrap();
    small.setup(3, 1, 1, 2).unwrap();
    small.save_parameters(&path).unwrap();

    let mut other = Network::new(host(), Some(1));
    other.add_layer(FullyConnected::new(2)).unwrap();
    other.setup(4, 1, 1, 2).unwrap();
    assert!(matches!(other.load_parameters(&path), Err(crate::NetError::DimensionMismatch { .. })));
}

#[test_log::test]
fn test_training_reduces_loss() {
    for (name, backend) in backends() {
        let mut network = Network::new(backend, Some(3)).with_mini_batch_size(4);
        network
            .add_layer(FullyConnected::new(8))
            .unwrap()
            .add_layer(ReLU::new())
            .unwrap()
            .add_layer(FullyConnected::new(2))
            .unwrap()
            .add_layer(SoftMax::new())
            .unwrap();
        network.setup(2, 1, 1, 2).unwrap();

        // two separable blobs
        let mut inputs = Array2::zeros((16, 2));
        let mut labels = Vec::new();
        for i in 0..16 {
            let class = i % 2;
            let offset = (i / 2) as f32 * 0.05;
            let sign = if class == 0 { 1.0 } else { -1.0 };
            inputs[[i, 0]] = sign * (1.0 + offset);
            inputs[[i, 1]] = sign * (0.5 - offset);
            labels.push(class);
        }
        let data = InMemoryDataSet::new(inputs, labels).unwrap();

        let mut trainer = Trainer::new(TrainingConfig { learning_rate: 0.1, momentum: 0.9, epochs: 30, shuffle_seed: Some(9) });
        let before = trainer.evaluate(&mut network, &data).unwrap();
        let history = trainer.fit(&mut network, &data).unwrap();
        let after = trainer.evaluate(&mut network, &data).unwrap();

        assert_eq!(history.len(), 30);
        assert_eq!(history[29].samples, 16);
        assert!(after.loss < before.loss, "{}: {} -> {}", name, before.loss, after.loss);
        assert!(after.accuracy >= 0.9, "{}: accuracy {}", name, after.accuracy);
    }
}

#[test]
fn test_trainer_requires_a_set_up_network() {
    let data = InMemoryDataSet::new(Array2::zeros((4, 2)), vec![0, 1, 0, 1]).unwrap();
    let mut trainer = Trainer::new(TrainingConfig::default());

    let mut network = Network::new(host(), None).with_mini_batch_size(0);
    network.add_layer(FullyConnected::new(2)).unwrap().add_layer(SoftMax::new()).unwrap();
    assert!(trainer.train_epoch(&mut network, &data).unwrap_err().is_usage());
    assert!(trainer.evaluate(&mut network, &data).unwrap_err().is_usage());
    assert!(network.setup(2, 1, 1, 2).unwrap_err().is_usage());
    assert!(!network.is_set_up());
}
