//! JSON network descriptions
//!
//! ```json
//! {
//!   "input": { "width": 28, "height": 28, "depth": 1 },
//!   "classes": 10,
//!   "mini_batch_size": 32,
//!   "backend": "simulated",
//!   "layers": [
//!     { "type": "convolutional", "filter_size": 5, "filters": 8, "stride": 1, "padding": 2 },
//!     { "type": "relu" },
//!     { "type": "fully_connected", "units": 10 },
//!     { "type": "softmax" }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{NetError, Result};
use crate::init::WeightInit;
use crate::layers::{Convolutional, FullyConnected, Layer, ReLU, SoftMax};
use crate::network::Network;
use crate::training::TrainingConfig;

/// Shape of one input sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    pub width: usize,
    pub height: usize,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

/// One entry of the layer chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    FullyConnected {
        units: usize,
        #[serde(default)]
        init: WeightInit,
    },
    Convolutional {
        filter_size: usize,
        filters: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        padding: usize,
        #[serde(default)]
        init: WeightInit,
    },
    Relu,
    Softmax,
}

impl LayerConfig {
    /// Construct the unconnected layer this entry describes
    pub fn build(&self) -> Result<Box<dyn Layer>> {
        let layer: Box<dyn Layer> = match *self {
            LayerConfig::FullyConnected { units, init } => Box::new(FullyConnected::with_init(units, init)),
            LayerConfig::Convolutional { filter_size, filters, stride, padding, init } => Box::new(
                Convolutional::builder()
                    .filter_size(filter_size)
                    .filters(filters)
                    .stride(stride)
                    .padding(padding)
                    .init(init)
                    .build()?,
            ),
            LayerConfig::Relu => Box::new(ReLU::new()),
            LayerConfig::Softmax => Box::new(SoftMax::new()),
        };
        Ok(layer)
    }
}

/// A complete network description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub input: InputConfig,
    pub classes: usize,
    #[serde(default = "default_mini_batch_size")]
    pub mini_batch_size: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub backend: BackendKind,
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl NetworkConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NetworkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural checks that do not need a backend; geometry is checked by `setup`
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(NetError::Config("at least one layer is required".to_string()));
        }
        if self.classes == 0 {
            return Err(NetError::Config("classes must be at least 1".to_string()));
        }
        if self.mini_batch_size == 0 {
            return Err(NetError::Config("mini_batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Create the backend, add every layer and run `setup`
    pub fn build(&self) -> Result<Network> {
        self.validate()?;
        let backend = self.backend.create()?;
        let mut network = Network::new(backend, self.seed).with_mini_batch_size(self.mini_batch_size);
        for layer in &self.layers {
            network.add_boxed_layer(layer.build()?)?;
        }
        network.setup(self.input.width, self.input.height, self.input.depth, self.classes)?;
        Ok(network)
    }
}

fn default_depth() -> usize {
    1
}

fn default_stride() -> usize {
    1
}

fn default_mini_batch_size() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"{
        "input": { "width": 5, "height": 5 },
        "classes": 3,
        "seed": 7,
        "layers": [
            { "type": "convolutional", "filter_size": 3, "filters": 2, "padding": 1 },
            { "type": "relu" },
            { "type": "fully_connected", "units": 3, "init": { "kind": "uniform", "min": -0.1, "max": 0.1 } },
            { "type": "softmax" }
        ]
    }"#;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = NetworkConfig::from_json(SMALL).unwrap();
        assert_eq!(config.input.depth, 1);
        assert_eq!(config.mini_batch_size, 1);
        assert_eq!(config.backend, BackendKind::Host);
        assert_eq!(config.training, TrainingConfig::default());
        assert_eq!(
            config.layers[0],
            LayerConfig::Convolutional { filter_size: 3, filters: 2, stride: 1, padding: 1, init: WeightInit::He }
        );
    }

    #[test]
    fn test_build_sets_up_network() {
        let network = NetworkConfig::from_json(SMALL).unwrap().build().unwrap();
        assert!(network.is_set_up());
        assert_eq!(network.layer_count(), 4);
    }

    #[test]
    fn test_json_round_trip() {
        let config = NetworkConfig::from_json(SMALL).unwrap();
        let again = NetworkConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(matches!(
            NetworkConfig::from_json(r#"{"input":{"width":1,"height":1},"classes":1,"layers":[]}"#),
            Err(NetError::Config(_))
        ));
        assert!(matches!(
            NetworkConfig::from_json(r#"{"input":{"width":1,"height":1},"classes":1,"layers":[{"type":"pooling"}]}"#),
            Err(NetError::Config(_))
        ));
    }

    #[test]
    fn test_even_filter_is_geometry_error() {
        let layer = LayerConfig::Convolutional { filter_size: 2, filters: 1, stride: 1, padding: 0, init: WeightInit::He };
        assert!(matches!(layer.build(), Err(ref e) if e.is_geometry()));
    }
}
