//! Layer abstraction
//!
//! A layer is built holding only hyperparameters. [`Layer::connect`] fixes its
//! geometry from the predecessor's output and allocates the layer's own output
//! neurons; [`Layer::initialize_parameters`] then draws its parameters once.
//! After that the network drives it through forward, backward and update steps,
//! each expressed as kernel launches on the backend.

pub mod convolutional;
pub mod fully_connected;
pub mod relu;
pub mod softmax;

pub use convolutional::Convolutional;
pub use fully_connected::FullyConnected;
pub use relu::ReLU;
pub use softmax::SoftMax;

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::{ComputeBackend, Kernel};
use crate::error::{NetError, Result};
use crate::geometry::Geometry;
use crate::init::ParamRng;
use crate::neurons::{Connection, NeuronBuffer};
use crate::parameters::Parameters;

/// The closed set of layer variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Convolutional,
    FullyConnected,
    ReLU,
    SoftMax,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerKind::Convolutional => "Convolutional",
            LayerKind::FullyConnected => "FullyConnected",
            LayerKind::ReLU => "ReLU",
            LayerKind::SoftMax => "SoftMax",
        };
        f.write_str(name)
    }
}

/// Forward/backward/update protocol shared by every layer
pub trait Layer {
    fn kind(&self) -> LayerKind;

    /// Derive geometry from the predecessor's output and allocate this layer's
    /// output neurons. Returns what the successor connects to.
    fn connect(&mut self, input: Connection, backend: &mut dyn ComputeBackend) -> Result<Connection>;

    /// Allocate and randomize parameters. Must follow `connect` and runs at most once.
    fn initialize_parameters(&mut self, backend: &mut dyn ComputeBackend, rng: &mut ParamRng) -> Result<()>;

    /// Input activations (and parameters) to output activations
    fn feed_forward(&mut self, backend: &mut dyn ComputeBackend) -> Result<()>;

    /// Output deltas to input deltas
    fn back_propagate(&mut self, backend: &mut dyn ComputeBackend) -> Result<()>;

    /// Momentum-SGD step; no-op for layers without parameters
    fn update_parameters(&mut self, backend: &mut dyn ComputeBackend, learning_rate: f32, momentum: f32)
        -> Result<()>;

    /// Geometry, once connected
    fn geometry(&self) -> Option<Geometry>;

    /// Predecessor's neurons this layer reads from, once connected
    fn input(&self) -> Option<NeuronBuffer>;

    /// Neurons this layer owns and writes, once connected
    fn output(&self) -> Option<NeuronBuffer>;

    /// Trainable parameters, once initialized
    fn parameters(&self) -> Option<Parameters> {
        None
    }
}

/// Geometry and neuron handles fixed at connect time
#[derive(Debug, Clone, Copy)]
pub(crate) struct Wiring {
    pub geometry: Geometry,
    pub input: NeuronBuffer,
    pub output: NeuronBuffer,
    pub initialized: bool,
}

impl Wiring {
    pub fn new(geometry: Geometry, input: NeuronBuffer, output: NeuronBuffer) -> Self {
        Wiring { geometry, input, output, initialized: false }
    }

    pub fn output_connection(&self) -> Connection {
        Connection::new(self.geometry.output, self.output)
    }
}

/// The connected wiring of a layer, or a usage error naming the operation
pub(crate) fn wired(wiring: &Option<Wiring>, kind: LayerKind, operation: &str) -> Result<Wiring> {
    wiring
        .ok_or_else(|| NetError::usage(format!("{}.{}", kind, operation), "layer is not connected"))
}

/// Reject reconnection of an already connected layer
pub(crate) fn ensure_unconnected(wiring: &Option<Wiring>, kind: LayerKind) -> Result<()> {
    if wiring.is_some() {
        return Err(NetError::usage(format!("{}.connect", kind), "layer is already connected"));
    }
    Ok(())
}

/// Flag the layer initialized, failing when not connected or already initialized
pub(crate) fn mark_initialized(wiring: &mut Option<Wiring>, kind: LayerKind) -> Result<Wiring> {
    let operation = format!("{}.initialize_parameters", kind);
    let state = wiring
        .as_mut()
        .ok_or_else(|| NetError::usage(operation.clone(), "must follow connect"))?;
    if state.initialized {
        return Err(NetError::usage(operation, "parameters are already initialized"));
    }
    state.initialized = true;
    Ok(*state)
}

/// Size a launch for the backend's limits and run it to completion
pub(crate) fn dispatch(backend: &mut dyn ComputeBackend, kernel: Kernel) -> Result<()> {
    let work = kernel.work_size(&backend.limits())?;
    debug!("{}: global {:?}, local {:?}", kernel.name(), work.global(), work.local());
    backend.launch(&kernel, &work)
}
