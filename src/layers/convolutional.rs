//! Convolution as a gathered-patch matrix multiply
//!
//! The input is zero-padded, then gathered through a receptive-field lookup
//! table into a `[field_size][n_positions]` patch matrix per sample, so the
//! filter bank applies as one dense product. The lookup table depends only on
//! geometry and is built once when the layer is connected.
//!
//! Backward runs the same table in reverse: `Wᵗ·δ` gives per-patch deltas,
//! which are scatter-accumulated into the padded input delta and cropped.

use log::debug;

use super::{dispatch, ensure_unconnected, mark_initialized, wired, Layer, LayerKind, Wiring};
use crate::backend::{BufferId, ComputeBackend, Kernel};
use crate::error::{NetError, Result};
use crate::geometry::{convolution_output_size, Geometry, Volume};
use crate::init::{ParamRng, WeightInit};
use crate::neurons::{Connection, NeuronBuffer};
use crate::parameters::Parameters;

/// Buffers private to the convolution, allocated at connect time
#[derive(Debug, Clone, Copy)]
struct PatchBuffers {
    lookup: BufferId,
    padded_input: BufferId,
    padded_delta: BufferId,
    patch_delta: BufferId,
    field_size: usize,
    n_positions: usize,
    padded_size: usize,
}

/// 2D convolution over a square input with square, odd-sized filters
#[derive(Debug)]
pub struct Convolutional {
    filter_size: usize,
    filters: usize,
    stride: usize,
    padding: usize,
    init: WeightInit,
    wiring: Option<Wiring>,
    patches: Option<PatchBuffers>,
    params: Option<Parameters>,
}

impl Convolutional {
    pub fn new(filter_size: usize, filters: usize, stride: usize, padding: usize) -> Self {
        Convolutional {
            filter_size,
            filters,
            stride,
            padding,
            init: WeightInit::He,
            wiring: None,
            patches: None,
            params: None,
        }
    }

    pub fn builder() -> ConvolutionalBuilder {
        ConvolutionalBuilder::new()
    }

    pub fn filter_size(&self) -> usize {
        self.filter_size
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    fn trained(&self, operation: &str) -> Result<(Wiring, PatchBuffers, Parameters)> {
        let wiring = wired(&self.wiring, self.kind(), operation)?;
        let not_ready = || NetError::usage(format!("{}.{}", self.kind(), operation), "parameters are not initialized");
        let patches = self.patches.ok_or_else(not_ready)?;
        let params = self.params.ok_or_else(not_ready)?;
        Ok((wiring, patches, params))
    }
}

/// Receptive-field lookup table for one sample, laid out `[field_size][n_positions]`
///
/// Entry `(r, p)` is the offset in the padded input volume of filter element `r`
/// (channel-major, then row, then column) when the filter sits at output
/// position `p` (row-major).
pub fn receptive_field_lookup(input: Volume, filter_size: usize, stride: usize, padding: usize, output_size: usize) -> Vec<u32> {
    let padded = input.padded(padding);
    let n_positions = output_size * output_size;
    let field_size = input.depth * filter_size * filter_size;

    let mut table = vec![0u32; field_size * n_positions];
    for channel in 0..input.depth {
        for ky in 0..filter_size {
            for kx in 0..filter_size {
                let r = (channel * filter_size + ky) * filter_size + kx;
                for oy in 0..output_size {
                    for ox in 0..output_size {
                        let p = oy * output_size + ox;
                        let row = oy * stride + ky;
                        let col = ox * stride + kx;
                        table[r * n_positions + p] = (channel * padded.area() + row * padded.width + col) as u32;
                    }
                }
            }
        }
    }
    table
}

impl Layer for Convolutional {
    fn kind(&self) -> LayerKind {
        LayerKind::Convolutional
    }

    fn connect(&mut self, input: Connection, backend: &mut dyn ComputeBackend) -> Result<Connection> {
        ensure_unconnected(&self.wiring, self.kind())?;
        let volume = input.volume;
        if !volume.is_square() {
            return Err(NetError::geometry(
                "Convolutional",
                format!("input must be spatially square, got {}", volume),
            ));
        }
        if self.filters == 0 {
            return Err(NetError::geometry("Convolutional", "filter count must be at least 1"));
        }

        let output_size = convolution_output_size(volume.width, self.filter_size, self.stride, self.padding)?;
        let output_volume = Volume::new(output_size, output_size, self.filters);
        let batch = input.neurons.batch;

        let field_size = volume.depth * self.filter_size * self.filter_size;
        let n_positions = output_size * output_size;
        let padded_size = volume.padded(self.padding).units();
        if padded_size > u32::MAX as usize {
            return Err(NetError::geometry(
                "Convolutional",
                format!("padded input {} exceeds the lookup table's offset range", volume.padded(self.padding)),
            ));
        }

        let table = receptive_field_lookup(volume, self.filter_size, self.stride, self.padding, output_size);
        let lookup = backend.allocate_indices(table.len())?;
        backend.write_indices(lookup, &table)?;

        let patches = PatchBuffers {
            lookup,
            padded_input: backend.allocate(batch * padded_size)?,
            padded_delta: backend.allocate(batch * padded_size)?,
            patch_delta: backend.allocate(batch * field_size * n_positions)?,
            field_size,
            n_positions,
            padded_size,
        };
        let output = NeuronBuffer::allocate(backend, output_volume.units(), batch)?;

        debug!(
            "Convolutional: {} -> {} (filter {}, stride {}, padding {}, receptive field {}, positions {})",
            volume, output_volume, self.filter_size, self.stride, self.padding, field_size, n_positions
        );

        let wiring = Wiring::new(Geometry::new(volume, output_volume), input.neurons, output);
        self.wiring = Some(wiring);
        self.patches = Some(patches);
        Ok(wiring.output_connection())
    }

    fn initialize_parameters(&mut self, backend: &mut dyn ComputeBackend, rng: &mut ParamRng) -> Result<()> {
        mark_initialized(&mut self.wiring, LayerKind::Convolutional)?;
        let patches = self
            .patches
            .ok_or_else(|| NetError::usage("Convolutional.initialize_parameters", "must follow connect"))?;
        let params = Parameters::allocate(backend, self.filters, patches.field_size)?;
        params.initialize(backend, &self.init, rng)?;
        self.params = Some(params);
        Ok(())
    }

    fn feed_forward(&mut self, backend: &mut dyn ComputeBackend) -> Result<()> {
        let (w, patches, p) = self.trained("feed_forward")?;
        let input = w.geometry.input;

        dispatch(
            backend,
            Kernel::ZeroPad {
                padded: patches.padded_input,
                input: w.input.activations,
                width: input.width,
                height: input.height,
                depth: input.depth,
                padding: self.padding,
                batch: w.input.batch,
            },
        )?;
        dispatch(
            backend,
            Kernel::ConvForward {
                output: w.output.activations,
                padded_input: patches.padded_input,
                lookup: patches.lookup,
                weights: p.weights,
                biases: p.biases,
                n_filters: self.filters,
                field_size: patches.field_size,
                n_positions: patches.n_positions,
                padded_size: patches.padded_size,
                batch: w.output.batch,
            },
        )
    }

    fn back_propagate(&mut self, backend: &mut dyn ComputeBackend) -> Result<()> {
        let (w, patches, p) = self.trained("back_propagate")?;
        let input = w.geometry.input;
        let batch = w.output.batch;

        dispatch(
            backend,
            Kernel::ConvBackward {
                patch_delta: patches.patch_delta,
                output_delta: w.output.deltas,
                weights: p.weights,
                n_filters: self.filters,
                field_size: patches.field_size,
                n_positions: patches.n_positions,
                batch,
            },
        )?;
        dispatch(
            backend,
            Kernel::Col2Im {
                padded_delta: patches.padded_delta,
                patch_delta: patches.patch_delta,
                lookup: patches.lookup,
                field_size: patches.field_size,
                n_positions: patches.n_positions,
                padded_size: patches.padded_size,
                batch,
            },
        )?;
        dispatch(
            backend,
            Kernel::Unpad {
                input_delta: w.input.deltas,
                padded_delta: patches.padded_delta,
                width: input.width,
                height: input.height,
                depth: input.depth,
                padding: self.padding,
                batch,
            },
        )
    }

    fn update_parameters(&mut self, backend: &mut dyn ComputeBackend, learning_rate: f32, momentum: f32) -> Result<()> {
        let (w, patches, p) = self.trained("update_parameters")?;
        dispatch(
            backend,
            Kernel::ConvUpdate {
                weights: p.weights,
                biases: p.biases,
                weight_velocity: p.weight_velocity,
                bias_velocity: p.bias_velocity,
                padded_input: patches.padded_input,
                lookup: patches.lookup,
                output_delta: w.output.deltas,
                n_filters: self.filters,
                field_size: patches.field_size,
                n_positions: patches.n_positions,
                padded_size: patches.padded_size,
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

/// Builder for convolutional layers
#[derive(Debug, Clone)]
pub struct ConvolutionalBuilder {
    filter_size: Option<usize>,
    filters: Option<usize>,
    stride: usize,
    padding: usize,
    init: WeightInit,
}

impl ConvolutionalBuilder {
    pub fn new() -> Self {
        ConvolutionalBuilder { filter_size: None, filters: None, stride: 1, padding: 0, init: WeightInit::He }
    }

    pub fn filter_size(mut self, size: usize) -> Self {
        self.filter_size = Some(size);
        self
    }

    pub fn filters(mut self, filters: usize) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    pub fn build(self) -> Result<Convolutional> {
        let filter_size = self
            .filter_size
            .ok_or_else(|| NetError::Config("filter_size is required for Convolutional".to_string()))?;
        let filters = self
            .filters
            .ok_or_else(|| NetError::Config("filters is required for Convolutional".to_string()))?;
        if filter_size % 2 == 0 {
            return Err(NetError::geometry(
                "Convolutional",
                format!("filter size must be odd, got {}", filter_size),
            ));
        }

        let mut layer = Convolutional::new(filter_size, filters, self.stride, self.padding);
        layer.init = self.init;
        Ok(layer)
    }
}

impl Default for ConvolutionalBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    fn input_connection(backend: &mut HostBackend, volume: Volume) -> Connection {
        let neurons = NeuronBuffer::allocate(backend, volume.units(), 1).unwrap();
        Connection::new(volume, neurons)
    }

    #[test]
    fn test_lookup_table_for_small_input() {
        // 3x3 single channel, 3x3 filter, padding 1, stride 2 -> 2x2 positions on a 5x5 padded input
        let table = receptive_field_lookup(Volume::new(3, 3, 1), 3, 2, 1, 2);
        assert_eq!(table.len(), 9 * 4);
        // filter element (0, 0) at each output position
        assert_eq!(&table[0..4], &[0, 2, 10, 12]);
        // filter element (2, 2), the last row of the table
        assert_eq!(&table[32..36], &[12, 14, 22, 24]);
    }

    #[test]
    fn test_connect_derives_output_volume() {
        let mut backend = HostBackend::new();
        let input = input_connection(&mut backend, Volume::new(6, 6, 2));
        let mut layer = Convolutional::new(3, 4, 1, 1);
        let output = layer.connect(input, &mut backend).unwrap();
        assert_eq!(output.volume, Volume::new(6, 6, 4));
        assert_eq!(layer.geometry().unwrap().input, Volume::new(6, 6, 2));
    }

    #[test]
    fn test_connect_rejects_non_square_input() {
        let mut backend = HostBackend::new();
        let input = input_connection(&mut backend, Volume::new(4, 5, 1));
        let err = Convolutional::new(3, 1, 1, 0).connect(input, &mut backend).unwrap_err();
        assert!(err.is_geometry());
    }

    #[test]
    fn test_connect_rejects_non_integral_output() {
        let mut backend = HostBackend::new();
        let input = input_connection(&mut backend, Volume::new(6, 6, 1));
        let err = Convolutional::new(3, 1, 2, 0).connect(input, &mut backend).unwrap_err();
        assert!(err.is_geometry());
    }

    #[test]
    fn test_connect_rejects_input_beyond_lookup_range() {
        let mut backend = HostBackend::new();
        let neurons = NeuronBuffer::allocate(&mut backend, 1, 1).unwrap();
        let input = Connection::new(Volume::new(65_537, 65_537, 1), neurons);
        let mut layer = Convolutional::new(1, 1, 1, 0);
        let err = layer.connect(input, &mut backend).unwrap_err();
        assert!(err.is_geometry());
        assert!(layer.geometry().is_none());
    }

    #[test]
    fn test_initialize_before_connect_is_usage_error() {
        let mut backend = HostBackend::new();
        let mut rng = crate::init::param_rng(Some(0));
        let err = Convolutional::new(3, 1, 1, 0)
            .initialize_parameters(&mut backend, &mut rng)
            .unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_builder_validates_filter() {
        assert!(Convolutional::builder().filters(2).build().is_err());
        assert!(Convolutional::builder().filter_size(4).filters(2).build().unwrap_err().is_geometry());
        let layer = Convolutional::builder().filter_size(5).filters(8).padding(2).build().unwrap();
        assert_eq!(layer.filter_size(), 5);
        assert_eq!(layer.padding(), 2);
    }
}
