use log::debug;

use super::{dispatch, ensure_unconnected, mark_initialized, wired, Layer, LayerKind, Wiring};
use crate::backend::{ComputeBackend, Kernel};
use crate::error::{NetError, Result};
use crate::geometry::{Geometry, Volume};
use crate::init::{ParamRng, WeightInit};
use crate::neurons::{Connection, NeuronBuffer};
use crate::parameters::Parameters;

/// Dense layer: `out = W·in + b` with `W` of shape `[units][input units]`
///
/// Any input volume is flattened; the output is a flat vector of `units` values.
#[derive(Debug)]
pub struct FullyConnected {
    units: usize,
    init: WeightInit,
    wiring: Option<Wiring>,
    params: Option<Parameters>,
}

impl FullyConnected {
    pub fn new(units: usize) -> Self {
        Self::with_init(units, WeightInit::He)
    }

    pub fn with_init(units: usize, init: WeightInit) -> Self {
        FullyConnected { units, init, wiring: None, params: None }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    fn trained(&self, operation: &str) -> Result<(Wiring, Parameters)> {
        let wiring = wired(&self.wiring, self.kind(), operation)?;
        let params = self.params.ok_or_else(|| {
            NetError::usage(format!("{}.{}", self.kind(), operation), "parameters are not initialized")
        })?;
        Ok((wiring, params))
    }
}

impl Layer for FullyConnected {
    fn kind(&self) -> LayerKind {
        LayerKind::FullyConnected
    }

    fn connect(&mut self, input: Connection, backend: &mut dyn ComputeBackend) -> Result<Connection> {
        ensure_unconnected(&self.wiring, self.kind())?;
        if self.units == 0 {
            return Err(NetError::geometry("FullyConnected", "unit count must be at least 1"));
        }

        let volume = Volume::flat(self.units);
        let output = NeuronBuffer::allocate(backend, self.units, input.neurons.batch)?;
        debug!("FullyConnected: {} -> {}", input.volume, volume);

        let wiring = Wiring::new(Geometry::new(input.volume, volume), input.neurons, output);
        self.wiring = Some(wiring);
        Ok(wiring.output_connection())
    }

    fn initialize_parameters(&mut self, backend: &mut dyn ComputeBackend, rng: &mut ParamRng) -> Result<()> {
        let wiring = mark_initialized(&mut self.wiring, LayerKind::FullyConnected)?;
        let params = Parameters::allocate(backend, self.units, wiring.geometry.input.units())?;
        params.initialize(backend, &self.init, rng)?;
        self.params = Some(params);
        Ok(())
    }

    fn feed_forward(&mut self, backend: &mut dyn ComputeBackend) -> Result<()> {
        let (w, p) = self.trained("feed_forward")?;
        dispatch(
            backend,
            Kernel::FcForward {
                output: w.output.activations,
                input: w.input.activations,
                weights: p.weights,
                biases: p.biases,
                n_in: p.cols,
                n_out: p.rows,
                batch: w.output.batch,
            },
        )
    }

    fn back_propagate(&mut self, backend: &mut dyn ComputeBackend) -> Result<()> {
        let (w, p) = self.trained("back_propagate")?;
        dispatch(
            backend,
            Kernel::FcBackward {
                input_delta: w.input.deltas,
                output_delta: w.output.deltas,
                weights: p.weights,
                n_in: p.cols,
                n_out: p.rows,
                batch: w.output.batch,
            },
        )
    }

    fn update_parameters(&mut self, backend: &mut dyn ComputeBackend, learning_rate: f32, momentum: f32) -> Result<()> {
        let (w, p) = self.trained("update_parameters")?;
        dispatch(
            backend,
            Kernel::FcUpdate {
                weights: p.weights,
                biases: p.biases,
                weight_velocity: p.weight_velocity,
                bias_velocity: p.bias_velocity,
                input: w.input.activations,
                output_delta: w.output.deltas,
                n_in: p.cols,
                n_out: p.rows,
                batch: w.output.batch,
                learning_rate,
                momentum,
            },
        )
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

    fn parameters(&self) -> Option<Parameters> {
        self.params
    }
}
