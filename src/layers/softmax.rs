use super::{dispatch, ensure_unconnected, mark_initialized, wired, Layer, LayerKind, Wiring};
use crate::backend::{ComputeBackend, Kernel};
use crate::error::{NetError, Result};
use crate::geometry::Geometry;
use crate::init::ParamRng;
use crate::neurons::{Connection, NeuronBuffer};

/// Normalized exponential over each sample's units; terminal layer only
///
/// The loss writes its gradient straight into this layer's input deltas
/// (softmax and cross-entropy fused), so backpropagating through it is a usage error.
#[derive(Debug, Default)]
pub struct SoftMax {
    wiring: Option<Wiring>,
}

impl SoftMax {
    pub fn new() -> Self {
        SoftMax { wiring: None }
    }
}

impl Layer for SoftMax {
    fn kind(&self) -> LayerKind {
        LayerKind::SoftMax
    }

    fn connect(&mut self, input: Connection, backend: &mut dyn ComputeBackend) -> Result<Connection> {
        ensure_unconnected(&self.wiring, self.kind())?;
        let output = NeuronBuffer::allocate(backend, input.volume.units(), input.neurons.batch)?;
        let wiring = Wiring::new(Geometry::new(input.volume, input.volume), input.neurons, output);
        self.wiring = Some(wiring);
        Ok(wiring.output_connection())
    }

    fn initialize_parameters(&mut self, _backend: &mut dyn ComputeBackend, _rng: &mut ParamRng) -> Result<()> {
        mark_initialized(&mut self.wiring, LayerKind::SoftMax).map(|_| ())
    }

    fn feed_forward(&mut self, backend: &mut dyn ComputeBackend) -> Result<()> {
        let w = wired(&self.wiring, self.kind(), "feed_forward")?;
        dispatch(
            backend,
            Kernel::SoftmaxForward {
                output: w.output.activations,
                input: w.input.activations,
                units: w.output.units,
                batch: w.output.batch,
            },
        )
    }

    fn back_propagate(&mut self, _backend: &mut dyn ComputeBackend) -> Result<()> {
        Err(NetError::usage(
            "SoftMax.back_propagate",
            "the loss gradient must be written into the SoftMax input deltas directly",
        ))
    }

    fn update_parameters(&mut self, _backend: &mut dyn ComputeBackend, _learning_rate: f32, _momentum: f32) -> Result<()> {
        Ok(())
    }

    fn geometry(&self) -> Option<Geometry> {
        self.wiring.map(|w| w.geometry)
    }

    fn input(&self) -> Option<NeuronBuffer> {
        self.wiring.map(|w| w.input)
    }

    fn output(&self) -> Option<NeuronBuffer> {
        self.wiring.map(|w| w.output)
    }
}
