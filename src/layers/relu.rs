use super::{dispatch, ensure_unconnected, mark_initialized, wired, Layer, LayerKind, Wiring};
use crate::backend::{ComputeBackend, Kernel};
use crate::error::Result;
use crate::geometry::Geometry;
use crate::init::ParamRng;
use crate::neurons::{Connection, NeuronBuffer};

/// Rectified linear units: `max(0, x)` elementwise, same geometry in and out
#[derive(Debug, Default)]
pub struct ReLU {
    wiring: Option<Wiring>,
}

impl ReLU {
    pub fn new() -> Self {
        ReLU { wiring: None }
    }
}

impl Layer for ReLU {
    fn kind(&self) -> LayerKind {
        LayerKind::ReLU
    }

    fn connect(&mut self, input: Connection, backend: &mut dyn ComputeBackend) -> Result<Connection> {
        ensure_unconnected(&self.wiring, self.kind())?;
        let output = NeuronBuffer::allocate(backend, input.volume.units(), input.neurons.batch)?;
        let wiring = Wiring::new(Geometry::new(input.volume, input.volume), input.neurons, output);
        self.wiring = Some(wiring);
        Ok(wiring.output_connection())
    }

    fn initialize_parameters(&mut self, _backend: &mut dyn ComputeBackend, _rng: &mut ParamRng) -> Result<()> {
        mark_initialized(&mut self.wiring, LayerKind::ReLU).map(|_| ())
    }

    fn feed_forward(&mut self, backend: &mut dyn ComputeBackend) -> Result<()> {
        let w = wired(&self.wiring, self.kind(), "feed_forward")?;
        dispatch(
            backend,
            Kernel::ReluForward {
                output: w.output.activations,
                input: w.input.activations,
                len: w.output.len(),
            },
        )
    }

    fn back_propagate(&mut self, backend: &mut dyn ComputeBackend) -> Result<()> {
        let w = wired(&self.wiring, self.kind(), "back_propagate")?;
        dispatch(
            backend,
            Kernel::ReluBackward {
                input_delta: w.input.deltas,
                output_delta: w.output.deltas,
                input: w.input.activations,
                len: w.input.len(),
            },
        )
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
