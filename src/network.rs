//! Network orchestrator
//!
//! A network owns an ordered chain of layers and the compute backend their
//! buffers live on. Neighbours are addressed by index; each layer reads its
//! predecessor's output neurons through the handles it received at connect time.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use bincode::{deserialize, serialize};
use log::{debug, info};
use ndarray::{Array2, ArrayView2};

use crate::backend::{BufferId, ComputeBackend};
use crate::dataset::DataSet;
use crate::error::{NetError, Result};
use crate::geometry::Volume;
use crate::init::{param_rng, ParamRng};
use crate::layers::{Layer, LayerKind};
use crate::neurons::{Connection, NeuronBuffer};
use crate::parameters::ParameterSnapshot;

/// A feed-forward chain of layers on one compute backend
pub struct Network {
    backend: Box<dyn ComputeBackend>,
    layers: Vec<Box<dyn Layer>>,
    rng: ParamRng,
    mini_batch_size: usize,
    input: Option<Connection>,
}

impl Network {
    /// Create an empty network. A seed makes parameter initialization reproducible.
    pub fn new(backend: Box<dyn ComputeBackend>, seed: Option<u64>) -> Self {
        Network {
            backend,
            layers: Vec::new(),
            rng: param_rng(seed),
            mini_batch_size: 1,
            input: None,
        }
    }

    /// Samples processed per forward/backward pass, fixed at setup
    pub fn with_mini_batch_size(mut self, size: usize) -> Self {
        self.mini_batch_size = size;
        self
    }

    /// Append a layer to the end of the chain
    pub fn add_layer<L: Layer + 'static>(&mut self, layer: L) -> Result<&mut Self> {
        self.add_boxed_layer(Box::new(layer))
    }

    pub fn add_boxed_layer(&mut self, layer: Box<dyn Layer>) -> Result<&mut Self> {
        if self.input.is_some() {
            return Err(NetError::usage("add_layer", "network is already set up"));
        }
        self.layers.push(layer);
        Ok(self)
    }

    /// Connect and initialize every layer in order, starting from an input of
    /// `width × height × depth` units and ending in `n_classes` outputs
    pub fn setup(&mut self, width: usize, height: usize, depth: usize, n_classes: usize) -> Result<()> {
        if self.input.is_some() {
            return Err(NetError::usage("setup", "network is already set up"));
        }
        if self.layers.is_empty() {
            return Err(NetError::usage("setup", "network has no layers"));
        }
        if self.mini_batch_size == 0 {
            return Err(NetError::usage("setup", "mini-batch size must be at least 1"));
        }
        let last = self.layers.len() - 1;
        if let Some(i) = self.layers[..last].iter().position(|l| l.kind() == LayerKind::SoftMax) {
            return Err(NetError::usage(
                "setup",
                format!("SoftMax must be the last layer, found at position {} of {}", i, last + 1),
            ));
        }

        let volume = Volume::new(width, height, depth);
        if volume.units() == 0 {
            return Err(NetError::geometry("Network", format!("empty input volume {}", volume)));
        }

        let backend = self.backend.as_mut();
        let neurons = NeuronBuffer::allocate(backend, volume.units(), self.mini_batch_size)?;
        let input = Connection::new(volume, neurons);
        let mut connection = input;

        for (i, layer) in self.layers.iter_mut().enumerate() {
            info!("Setting up layer {}: {}", i, layer.kind());
            connection = layer.connect(connection, backend)?;
            layer.initialize_parameters(backend, &mut self.rng)?;
            debug!("Layer {} output volume {}", i, connection.volume);
        }

        if connection.volume.units() != n_classes {
            return Err(NetError::geometry(
                "Network",
                format!(
                    "last layer produces {} units but {} output classes were requested",
                    connection.volume.units(),
                    n_classes
                ),
            ));
        }

        self.input = Some(input);
        info!(
            "Network set up: {} layers, input {}, {} classes, mini-batch {}",
            self.layers.len(),
            volume,
            n_classes,
            self.mini_batch_size
        );
        Ok(())
    }

    pub fn is_set_up(&self) -> bool {
        self.input.is_some()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        self.layers.get(index).map(|l| l.as_ref())
    }

    pub fn mini_batch_size(&self) -> usize {
        self.mini_batch_size
    }

    /// Input volume, once set up
    pub fn input_volume(&self) -> Option<Volume> {
        self.input.map(|c| c.volume)
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    pub fn device_info(&self) -> String {
        self.backend.device_info()
    }

    /// Copy one sample into the input buffer; requires a mini-batch size of 1
    pub fn feed_data(&mut self, data: &dyn DataSet, index: usize) -> Result<()> {
        self.feed_batch(data, &[index])
    }

    /// Copy one mini-batch of samples into the input buffer
    pub fn feed_batch(&mut self, data: &dyn DataSet, indices: &[usize]) -> Result<()> {
        let input = self.input_connection("feed_data")?;
        let units = input.volume.units();
        if indices.len() != input.neurons.batch {
            return Err(NetError::dimension_mismatch(
                format!("{} samples", input.neurons.batch),
                format!("{} samples", indices.len()),
            ));
        }
        if data.input_units() != units {
            return Err(NetError::dimension_mismatch(
                format!("{} input units", units),
                format!("{} input units", data.input_units()),
            ));
        }

        let mut host = Vec::with_capacity(input.neurons.len());
        for &index in indices {
            host.extend(data.sample(index)?.iter().copied());
        }
        self.feed_input(&host)
    }

    /// Write raw input activations, `mini_batch_size × input units` values sample-major
    pub fn feed_input(&mut self, values: &[f32]) -> Result<()> {
        let input = self.input_connection("feed_input")?;
        if values.len() != input.neurons.len() {
            return Err(NetError::dimension_mismatch(
                format!("{} input values", input.neurons.len()),
                format!("{} input values", values.len()),
            ));
        }
        self.backend.write(input.neurons.activations, values)
    }

    /// Run every layer's feed-forward step in order
    pub fn forward_pass(&mut self) -> Result<()> {
        self.input_connection("forward_pass")?;
        for layer in self.layers.iter_mut() {
            layer.feed_forward(self.backend.as_mut())?;
        }
        Ok(())
    }

    /// Backpropagate and update layers `L-2` down to `0`
    ///
    /// The loss gradient must already be in the terminal layer's input deltas
    /// (see [`Network::set_output_gradient`]). Layer 0 updates its parameters but
    /// has no predecessor to propagate into.
    pub fn backward_pass(&mut self, learning_rate: f32, momentum: f32) -> Result<()> {
        self.input_connection("backward_pass")?;
        let backend = self.backend.as_mut();
        let last = self.layers.len() - 1;

        for (l, layer) in self.layers[..last].iter_mut().enumerate().rev() {
            if l > 0 {
                layer.back_propagate(backend)?;
            }
            layer.update_parameters(backend, learning_rate, momentum)?;
        }
        Ok(())
    }

    /// Network output, one row per sample
    pub fn output(&self) -> Result<Array2<f32>> {
        self.activations(self.layers.len().saturating_sub(1))
    }

    /// Output activations of one layer, one row per sample
    pub fn activations(&self, layer: usize) -> Result<Array2<f32>> {
        let neurons = self.layer_output("activations", layer)?;
        self.read_matrix(neurons.activations, neurons)
    }

    /// Output deltas of one layer, one row per sample
    pub fn deltas(&self, layer: usize) -> Result<Array2<f32>> {
        let neurons = self.layer_output("deltas", layer)?;
        self.read_matrix(neurons.deltas, neurons)
    }

    /// Write the loss gradient with respect to the terminal layer's input
    ///
    /// For a SoftMax output trained on cross-entropy this is `p − y` (see
    /// [`crate::loss::cross_entropy_gradient`]).
    pub fn set_output_gradient(&mut self, gradient: ArrayView2<f32>) -> Result<()> {
        self.input_connection("set_output_gradient")?;
        let target = self
            .layers
            .last()
            .and_then(|l| l.input())
            .ok_or_else(|| NetError::usage("set_output_gradient", "terminal layer is not connected"))?;

        if gradient.dim() != (target.batch, target.units) {
            return Err(NetError::dimension_mismatch(
                format!("{}x{} gradient", target.batch, target.units),
                format!("{}x{} gradient", gradient.nrows(), gradient.ncols()),
            ));
        }
        let values: Vec<f32> = gradient.iter().copied().collect();
        self.backend.write(target.deltas, &values)
    }

    /// Host copy of one layer's parameters; `None` for layers without any
    pub fn parameters(&self, layer: usize) -> Result<Option<ParameterSnapshot>> {
        let layer = self.layer_checked("parameters", layer)?;
        layer.parameters().map(|p| p.snapshot(self.backend.as_ref())).transpose()
    }

    /// Overwrite one layer's parameters and clear its momentum
    pub fn set_parameters(&mut self, layer: usize, snapshot: &ParameterSnapshot) -> Result<()> {
        let params = self
            .layer_checked("set_parameters", layer)?
            .parameters()
            .ok_or_else(|| NetError::usage("set_parameters", format!("layer {} has no parameters", layer)))?;
        params.load(self.backend.as_mut(), snapshot)
    }

    /// Save every layer's parameters to a file
    pub fn save_parameters<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshots = (0..self.layers.len())
            .map(|i| self.parameters(i))
            .collect::<Result<Vec<_>>>()?;
        let serialized = serialize(&snapshots)?;
        let mut file = fs::File::create(path)?;
        file.write_all(&serialized)?;
        Ok(())
    }

    /// Load parameters saved from a network with the same layer chain
    pub fn load_parameters<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut file = fs::File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        let snapshots: Vec<Option<ParameterSnapshot>> = deserialize(&buffer)?;

        if snapshots.len() != self.layers.len() {
            return Err(NetError::dimension_mismatch(
                format!("{} layers", self.layers.len()),
                format!("{} layers", snapshots.len()),
            ));
        }
        for (i, snapshot) in snapshots.iter().enumerate() {
            let has_params = self.layer_checked("load_parameters", i)?.parameters().is_some();
            match (snapshot, has_params) {
                (Some(snapshot), true) => self.set_parameters(i, snapshot)?,
                (None, false) => {}
                _ => {
                    return Err(NetError::dimension_mismatch(
                        format!("layer {} parameters: {}", i, has_params),
                        format!("layer {} parameters: {}", i, snapshot.is_some()),
                    ))
                }
            }
        }
        Ok(())
    }

    fn input_connection(&self, operation: &str) -> Result<Connection> {
        self.input
            .ok_or_else(|| NetError::usage(operation, "network is not set up"))
    }

    fn layer_checked(&self, operation: &str, index: usize) -> Result<&dyn Layer> {
        self.input_connection(operation)?;
        self.layer(index).ok_or_else(|| {
            NetError::usage(
                operation,
                format!("layer index {} out of range for {} layers", index, self.layers.len()),
            )
        })
    }

    fn layer_output(&self, operation: &str, index: usize) -> Result<NeuronBuffer> {
        self.layer_checked(operation, index)?
            .output()
            .ok_or_else(|| NetError::usage(operation, format!("layer {} is not connected", index)))
    }

    fn read_matrix(&self, buffer: BufferId, neurons: NeuronBuffer) -> Result<Array2<f32>> {
        let data = self.backend.read(buffer)?;
        Array2::from_shape_vec((neurons.batch, neurons.units), data)
            .map_err(|e| NetError::backend("read", e.to_string()))
    }
}
