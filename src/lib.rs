//! # convnet - Feed-forward network training on host and accelerator backends
//!
//! convnet trains chains of convolutional, fully connected, rectifier and
//! SoftMax layers with momentum SGD. Every numeric step is a kernel launch on a
//! [`backend::ComputeBackend`], so the same network runs on the host or on an
//! accelerator without changing layer code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use convnet::backend::BackendKind;
//! use convnet::dataset::InMemoryDataSet;
//! use convnet::layers::{Convolutional, FullyConnected, ReLU, SoftMax};
//! use convnet::network::Network;
//! use convnet::training::{Trainer, TrainingConfig};
//! use ndarray::Array2;
//!
//! # fn main() -> convnet::error::Result<()> {
//! let mut network = Network::new(BackendKind::Host.create()?, Some(1)).with_mini_batch_size(4);
//! network
//!     .add_layer(Convolutional::new(5, 8, 1, 2))?
//!     .add_layer(ReLU::new())?
//!     .add_layer(FullyConnected::new(10))?
//!     .add_layer(SoftMax::new())?;
//! network.setup(28, 28, 1, 10)?;
//!
//! let data = InMemoryDataSet::new(Array2::zeros((8, 28 * 28)), vec![0; 8])?;
//! let mut trainer = Trainer::new(TrainingConfig::default());
//! trainer.fit(&mut network, &data)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`backend`] - Compute backends, kernel launches and work-group sizing
//! - [`config`] - JSON network descriptions
//! - [`dataset`] - Sample and label access for training
//! - [`debug`] - Gradient checking and numerical health checks
//! - [`error`] - Error types and result handling
//! - [`geometry`] - Neuron volumes and convolution output sizes
//! - [`init`] - Parameter initialization
//! - [`layers`] - The layer protocol and its four variants
//! - [`loss`] - Cross-entropy on SoftMax outputs
//! - [`network`] - The network orchestrator
//! - [`training`] - Mini-batch training loop

#[macro_use]
pub mod macros;

pub mod backend;
pub mod config;
pub mod dataset;
pub mod debug;
pub mod error;
pub mod geometry;
pub mod init;
pub mod layers;
pub mod loss;
pub mod network;
pub mod neurons;
pub mod parameters;
pub mod training;

pub use error::{NetError, Result};
pub use network::Network;

#[cfg(test)]
mod tests;
