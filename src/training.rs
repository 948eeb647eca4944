//! Mini-batch training loop
//!
//! Each step feeds a batch, runs the forward pass, writes the fused
//! softmax/cross-entropy gradient into the terminal layer's input deltas, and
//! runs the backward pass.

use log::{debug, info};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::dataset::DataSet;
use crate::error::{NetError, Result};
use crate::init::{param_rng, ParamRng};
use crate::loss::{cross_entropy, cross_entropy_gradient, predictions};
use crate::network::Network;

/// Optimization hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f32,
    pub momentum: f32,
    pub epochs: usize,
    /// Seed for the per-epoch sample order; `None` draws from entropy
    pub shuffle_seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            learning_rate: 0.01,
            momentum: 0.9,
            epochs: 10,
            shuffle_seed: None,
        }
    }
}

/// Loss and accuracy over one pass through a dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub samples: usize,
}

/// Drives a set-up network through epochs of momentum SGD
pub struct Trainer {
    config: TrainingConfig,
    rng: ParamRng,
    epoch: usize,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        let rng = param_rng(config.shuffle_seed);
        Trainer { config, rng, epoch: 0 }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// One shuffled pass over `data`; a trailing partial mini-batch is skipped
    pub fn train_epoch(&mut self, network: &mut Network, data: &dyn DataSet) -> Result<EpochStats> {
        let batch = ready_batch(network, "train_epoch")?;
        if data.len() < batch {
            return Err(NetError::usage(
                "train_epoch",
                format!("{} samples cannot fill a mini-batch of {}", data.len(), batch),
            ));
        }

        let mut order: Vec<usize> = (0..data.len()).collect();
        order.shuffle(&mut self.rng);

        let mut total_loss = 0.0;
        let mut correct = 0;
        let mut seen = 0;
        for indices in order.chunks_exact(batch) {
            let labels = labels_of(data, indices)?;

            network.feed_batch(data, indices)?;
            network.forward_pass()?;
            let probabilities = network.output()?;

            total_loss += cross_entropy(probabilities.view(), &labels)? * batch as f32;
            correct += count_correct(&predictions(probabilities.view()), &labels);
            seen += batch;

            let gradient = cross_entropy_gradient(probabilities.view(), &labels)?;
            network.set_output_gradient(gradient.view())?;
            network.backward_pass(self.config.learning_rate, self.config.momentum)?;
        }
        if seen < data.len() {
            debug!("Skipped {} samples that did not fill a mini-batch", data.len() - seen);
        }

        self.epoch += 1;
        let stats = EpochStats {
            epoch: self.epoch,
            loss: total_loss / seen as f32,
            accuracy: correct as f32 / seen as f32,
            samples: seen,
        };
        info!(
            "Epoch {}: loss {:.4}, accuracy {:.2}%",
            stats.epoch,
            stats.loss,
            stats.accuracy * 100.0
        );
        Ok(stats)
    }

    /// Run `config.epochs` epochs, returning per-epoch statistics
    pub fn fit(&mut self, network: &mut Network, data: &dyn DataSet) -> Result<Vec<EpochStats>> {
        (0..self.config.epochs).map(|_| self.train_epoch(network, data)).collect()
    }

    /// Loss and accuracy over every sample of `data`, without updating parameters
    pub fn evaluate(&self, network: &mut Network, data: &dyn DataSet) -> Result<EpochStats> {
        let batch = ready_batch(network, "evaluate")?;
        let mut total_loss = 0.0;
        let mut correct = 0;

        let all: Vec<usize> = (0..data.len()).collect();
        for chunk in all.chunks(batch) {
            // pad a short final chunk by repeating its first sample
            let mut indices = chunk.to_vec();
            indices.resize(batch, chunk[0]);

            network.feed_batch(data, &indices)?;
            network.forward_pass()?;
            let probabilities = network.output()?;
            let real = probabilities.slice(ndarray::s![..chunk.len(), ..]);

            let labels = labels_of(data, chunk)?;
            total_loss += cross_entropy(real, &labels)? * chunk.len() as f32;
            correct += count_correct(&predictions(real), &labels);
        }

        let samples = data.len().max(1);
        Ok(EpochStats {
            epoch: self.epoch,
            loss: total_loss / samples as f32,
            accuracy: correct as f32 / samples as f32,
            samples: data.len(),
        })
    }
}

/// Mini-batch size of a network that has been set up
fn ready_batch(network: &Network, operation: &str) -> Result<usize> {
    if !network.is_set_up() {
        return Err(NetError::usage(operation, "network is not set up"));
    }
    Ok(network.mini_batch_size())
}

fn labels_of(data: &dyn DataSet, indices: &[usize]) -> Result<Vec<usize>> {
    indices.iter().map(|&i| data.label(i)).collect()
}

fn count_correct(predicted: &[usize], labels: &[usize]) -> usize {
    predicted.iter().zip(labels).filter(|(p, l)| p == l).count()
}
