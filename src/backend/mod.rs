//! Compute backends
//!
//! Layers never touch activation or parameter memory directly. They allocate
//! buffers through a [`ComputeBackend`], upload host data once at setup, and
//! express every forward/backward/update step as a [`Kernel`] launch. Two
//! families of backend execute those launches:
//!
//! - [`HostBackend`]: synchronous host loops and ndarray matrix products.
//! - Accelerator dispatch: [`SimulatedDevice`] runs each kernel work-item by
//!   work-item under device limits, and `OpenClBackend` (feature `gpu`) enqueues
//!   the kernels in `kernels.cl` on a real device.
//!
//! Every launch blocks until the kernel has completed.
//!
//! Memory layout conventions shared by all backends:
//!
//! - neuron buffers: `[batch][units]`, a unit volume stored `[depth][height][width]`
//! - fully connected weights: `[n_out][n_in]`
//! - convolution weights: `[n_filters][field_size]` with field index
//!   `channel * F * F + ky * F + kx`
//! - receptive-field lookup table: `[field_size][n_positions]`, each entry an
//!   offset into one sample's padded input volume
//! - patch deltas: `[batch][field_size][n_positions]`

pub mod constants;
pub mod host;
pub mod memory;
pub mod simulated;
pub mod work_size;

#[cfg(feature = "gpu")]
pub mod opencl;

pub use host::HostBackend;
pub use memory::DeviceMemory;
pub use simulated::SimulatedDevice;
pub use work_size::{DeviceLimits, WorkSize};

#[cfg(feature = "gpu")]
pub use opencl::OpenClBackend;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NetError, Result};

/// Opaque handle to a buffer living in a backend's memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(usize);

impl BufferId {
    pub(crate) fn new(index: usize) -> Self {
        BufferId(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Supported device types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Host,
    SimulatedGpu,
    IntelGpu,
    NvidiaGpu,
    AmdGpu,
    OtherGpu,
    OpenClCpu,
}

impl DeviceType {
    /// True for every variant that dispatches kernels instead of running host loops
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, DeviceType::Host)
    }
}

/// Backend selection, fixed once when a network is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Host,
    Simulated,
    #[serde(rename = "opencl")]
    OpenCl,
}

impl BackendKind {
    /// Instantiate the selected backend
    pub fn create(self) -> Result<Box<dyn ComputeBackend>> {
        match self {
            BackendKind::Host => Ok(Box::new(HostBackend::new())),
            BackendKind::Simulated => Ok(Box::new(SimulatedDevice::new())),
            #[cfg(feature = "gpu")]
            BackendKind::OpenCl => Ok(Box::new(OpenClBackend::new()?)),
            #[cfg(not(feature = "gpu"))]
            BackendKind::OpenCl => Err(NetError::backend(
                "create backend",
                "OpenCL support not compiled. Enable with --features gpu",
            )),
        }
    }
}

/// One positional kernel argument, in the order the kernel source declares it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Floats(BufferId),
    Indices(BufferId),
    Int(i32),
    Float(f32),
}

/// A kernel launch: which kernel to run and the buffers and scalars it reads and writes
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    /// `output[i] = max(0, input[i])`, one work-item per element
    ReluForward {
        output: BufferId,
        input: BufferId,
        len: usize,
    },
    /// `input_delta[i] = input[i] > 0 ? output_delta[i] : 0`, one work-item per element
    ReluBackward {
        input_delta: BufferId,
        output_delta: BufferId,
        input: BufferId,
        len: usize,
    },
    /// `output = W·input + b`, one work-item per (sample, output unit)
    FcForward {
        output: BufferId,
        input: BufferId,
        weights: BufferId,
        biases: BufferId,
        n_in: usize,
        n_out: usize,
        batch: usize,
    },
    /// `input_delta = Wᵗ·output_delta`, one work-item per (sample, input unit)
    FcBackward {
        input_delta: BufferId,
        output_delta: BufferId,
        weights: BufferId,
        n_in: usize,
        n_out: usize,
        batch: usize,
    },
    /// Fused momentum step, one work-item per weight `(i, j)`
    FcUpdate {
        weights: BufferId,
        biases: BufferId,
        weight_velocity: BufferId,
        bias_velocity: BufferId,
        input: BufferId,
        output_delta: BufferId,
        n_in: usize,
        n_out: usize,
        batch: usize,
        learning_rate: f32,
        momentum: f32,
    },
    /// Copy the input into the interior of the zero-bordered padded buffer
    ZeroPad {
        padded: BufferId,
        input: BufferId,
        width: usize,
        height: usize,
        depth: usize,
        padding: usize,
        batch: usize,
    },
    /// Gather through the lookup table and multiply by the filter bank,
    /// one work-item per (filter, sample × position)
    ConvForward {
        output: BufferId,
        padded_input: BufferId,
        lookup: BufferId,
        weights: BufferId,
        biases: BufferId,
        n_filters: usize,
        field_size: usize,
        n_positions: usize,
        padded_size: usize,
        batch: usize,
    },
    /// `patch_delta = Wᵗ·output_delta`, one work-item per (field element, sample × position)
    ConvBackward {
        patch_delta: BufferId,
        output_delta: BufferId,
        weights: BufferId,
        n_filters: usize,
        field_size: usize,
        n_positions: usize,
        batch: usize,
    },
    /// Scatter-accumulate patch deltas into the padded delta through the lookup
    /// table, one work-item per sample since scatter targets overlap
    Col2Im {
        padded_delta: BufferId,
        patch_delta: BufferId,
        lookup: BufferId,
        field_size: usize,
        n_positions: usize,
        padded_size: usize,
        batch: usize,
    },
    /// Crop the padding border away, one work-item per input element
    Unpad {
        input_delta: BufferId,
        padded_delta: BufferId,
        width: usize,
        height: usize,
        depth: usize,
        padding: usize,
        batch: usize,
    },
    /// Fused momentum step for the filter bank, one work-item per `(filter, field element)`
    ConvUpdate {
        weights: BufferId,
        biases: BufferId,
        weight_velocity: BufferId,
        bias_velocity: BufferId,
        padded_input: BufferId,
        lookup: BufferId,
        output_delta: BufferId,
        n_filters: usize,
        field_size: usize,
        n_positions: usize,
        padded_size: usize,
        batch: usize,
        learning_rate: f32,
        momentum: f32,
    },
    /// Max-shifted normalized exponential, one work-item per sample
    SoftmaxForward {
        output: BufferId,
        input: BufferId,
        units: usize,
        batch: usize,
    },
}

impl Kernel {
    /// Kernel identity, identical to the function name in `kernels.cl`
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::ReluForward { .. } => "relu_forward",
            Kernel::ReluBackward { .. } => "relu_backward",
            Kernel::FcForward { .. } => "fc_forward",
            Kernel::FcBackward { .. } => "fc_backward",
            Kernel::FcUpdate { .. } => "fc_update",
            Kernel::ZeroPad { .. } => "zero_pad",
            Kernel::ConvForward { .. } => "conv_forward",
            Kernel::ConvBackward { .. } => "conv_backward",
            Kernel::Col2Im { .. } => "col2im",
            Kernel::Unpad { .. } => "unpad",
            Kernel::ConvUpdate { .. } => "conv_update",
            Kernel::SoftmaxForward { .. } => "softmax_forward",
        }
    }

    /// Positional arguments in kernel-source order
    pub fn args(&self) -> Vec<KernelArg> {
        use KernelArg::{Float, Floats, Indices};
        let int = |v: usize| KernelArg::Int(v as i32);

        match *self {
            Kernel::ReluForward { output, input, len } => {
                vec![Floats(output), Floats(input), int(len)]
            }
            Kernel::ReluBackward { input_delta, output_delta, input, len } => {
                vec![Floats(input_delta), Floats(output_delta), Floats(input), int(len)]
            }
            Kernel::FcForward { output, input, weights, biases, n_in, n_out, batch } => vec![
                Floats(output),
                Floats(input),
                Floats(weights),
                Floats(biases),
                int(n_in),
                int(n_out),
                int(batch),
            ],
            Kernel::FcBackward { input_delta, output_delta, weights, n_in, n_out, batch } => vec![
                Floats(input_delta),
                Floats(output_delta),
                Floats(weights),
                int(n_in),
                int(n_out),
                int(batch),
            ],
            Kernel::FcUpdate {
                weights,
                biases,
                weight_velocity,
                bias_velocity,
                input,
                output_delta,
                n_in,
                n_out,
                batch,
                learning_rate,
                momentum,
            } => vec![
                Floats(weights),
                Floats(biases),
                Floats(weight_velocity),
                Floats(bias_velocity),
                Floats(input),
                Floats(output_delta),
                int(n_in),
                int(n_out),
                int(batch),
                Float(learning_rate),
                Float(momentum),
            ],
            Kernel::ZeroPad { padded, input, width, height, depth, padding, batch } => vec![
                Floats(padded),
                Floats(input),
                int(width),
                int(height),
                int(depth),
                int(padding),
                int(batch),
            ],
            Kernel::ConvForward {
                output,
                padded_input,
                lookup,
                weights,
                biases,
                n_filters,
                field_size,
                n_positions,
                padded_size,
                batch,
            } => vec![
                Floats(output),
                Floats(padded_input),
                Indices(lookup),
                Floats(weights),
                Floats(biases),
                int(n_filters),
                int(field_size),
                int(n_positions),
                int(padded_size),
                int(batch),
            ],
            Kernel::ConvBackward {
                patch_delta,
                output_delta,
                weights,
                n_filters,
                field_size,
                n_positions,
                batch,
            } => vec![
                Floats(patch_delta),
                Floats(output_delta),
                Floats(weights),
                int(n_filters),
                int(field_size),
                int(n_positions),
                int(batch),
            ],
            Kernel::Col2Im {
                padded_delta,
                patch_delta,
                lookup,
                field_size,
                n_positions,
                padded_size,
                batch,
            } => vec![
                Floats(padded_delta),
                Floats(patch_delta),
                Indices(lookup),
                int(field_size),
                int(n_positions),
                int(padded_size),
                int(batch),
            ],
            Kernel::Unpad { input_delta, padded_delta, width, height, depth, padding, batch } => {
                vec![
                    Floats(input_delta),
                    Floats(padded_delta),
                    int(width),
                    int(height),
                    int(depth),
                    int(padding),
                    int(batch),
                ]
            }
            Kernel::ConvUpdate {
                weights,
                biases,
                weight_velocity,
                bias_velocity,
                padded_input,
                lookup,
                output_delta,
                n_filters,
                field_size,
                n_positions,
                padded_size,
                batch,
                learning_rate,
                momentum,
            } => vec![
                Floats(weights),
                Floats(biases),
                Floats(weight_velocity),
                Floats(bias_velocity),
                Floats(padded_input),
                Indices(lookup),
                Floats(output_delta),
                int(n_filters),
                int(field_size),
                int(n_positions),
                int(padded_size),
                int(batch),
                Float(learning_rate),
                Float(momentum),
            ],
            Kernel::SoftmaxForward { output, input, units, batch } => {
                vec![Floats(output), Floats(input), int(units), int(batch)]
            }
        }
    }
}

/// Work-items a kernel needs, before rounding to the device's group size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Linear(usize),
    Planar(usize, usize),
}

impl Kernel {
    pub fn range(&self) -> Range {
        match *self {
            Kernel::ReluForward { len, .. } | Kernel::ReluBackward { len, .. } => Range::Linear(len),
            Kernel::FcForward { n_out, batch, .. } => Range::Linear(batch * n_out),
            Kernel::FcBackward { n_in, batch, .. } => Range::Linear(batch * n_in),
            Kernel::FcUpdate { n_in, n_out, .. } => Range::Planar(n_out, n_in),
            Kernel::ZeroPad { width, height, depth, batch, .. }
            | Kernel::Unpad { width, height, depth, batch, .. } => Range::Linear(batch * depth * height * width),
            Kernel::ConvForward { n_filters, n_positions, batch, .. } => {
                Range::Planar(n_filters, batch * n_positions)
            }
            Kernel::ConvBackward { field_size, n_positions, batch, .. } => {
                Range::Planar(field_size, batch * n_positions)
            }
            Kernel::Col2Im { batch, .. } | Kernel::SoftmaxForward { batch, .. } => Range::Linear(batch),
            Kernel::ConvUpdate { n_filters, field_size, .. } => Range::Planar(n_filters, field_size),
        }
    }

    /// Size a launch of this kernel for a device with `limits`
    pub fn work_size(&self, limits: &DeviceLimits) -> Result<WorkSize> {
        match self.range() {
            Range::Linear(count) => WorkSize::linear(count, limits),
            Range::Planar(rows, cols) => WorkSize::planar(rows, cols, limits),
        }
    }
}

/// Trait for compute backends
///
/// Buffers are zero-filled on allocation. Transfers and launches are synchronous.
pub trait ComputeBackend {
    /// Get device type
    fn device_type(&self) -> DeviceType;

    /// Work-group limits used to size launches for this device
    fn limits(&self) -> DeviceLimits;

    /// Allocate a zero-filled buffer of `len` floats
    fn allocate(&mut self, len: usize) -> Result<BufferId>;

    /// Allocate a zero-filled buffer of `len` indices
    fn allocate_indices(&mut self, len: usize) -> Result<BufferId>;

    /// Overwrite a float buffer with host data of exactly its length
    fn write(&mut self, buffer: BufferId, data: &[f32]) -> Result<()>;

    /// Overwrite an index buffer with host data of exactly its length
    fn write_indices(&mut self, buffer: BufferId, data: &[u32]) -> Result<()>;

    /// Copy a float buffer back to the host
    fn read(&self, buffer: BufferId) -> Result<Vec<f32>>;

    /// Run a kernel to completion
    fn launch(&mut self, kernel: &Kernel, work: &WorkSize) -> Result<()>;

    /// Human readable device description
    fn device_info(&self) -> String;
}

pub(crate) fn check_len(operation: &str, buffer: BufferId, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(NetError::backend(
            operation,
            format!("{} holds {} elements, got {}", buffer, expected, actual),
        ));
    }
    Ok(())
}

/// Entries of a receptive-field lookup table, checked against the table shape
/// and the padded volume they index into
pub(crate) fn lookup_entries<'a>(
    kernel: &str,
    memory: &'a DeviceMemory,
    lookup: BufferId,
    field_size: usize,
    n_positions: usize,
    padded_size: usize,
) -> Result<&'a [u32]> {
    let entries = memory.indices(lookup)?;
    if entries.len() != field_size * n_positions {
        return Err(NetError::backend(
            kernel,
            format!("lookup table holds {} entries, expected {}", entries.len(), field_size * n_positions),
        ));
    }
    if entries.iter().any(|&i| i as usize >= padded_size) {
        return Err(NetError::backend(kernel, "lookup table points outside the padded input"));
    }
    Ok(entries)
}

/// Fail unless `data` holds exactly `expected` elements
pub(crate) fn expect_len(kernel: &str, data: &[f32], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(NetError::backend(
            kernel,
            format!("buffer holds {} elements, expected {}", data.len(), expected),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_names_are_unique() {
        let a = BufferId::new(0);
        let kernels = vec![
            Kernel::ReluForward { output: a, input: a, len: 1 },
            Kernel::ReluBackward { input_delta: a, output_delta: a, input: a, len: 1 },
            Kernel::FcForward { output: a, input: a, weights: a, biases: a, n_in: 1, n_out: 1, batch: 1 },
            Kernel::SoftmaxForward { output: a, input: a, units: 1, batch: 1 },
            Kernel::ZeroPad { padded: a, input: a, width: 1, height: 1, depth: 1, padding: 0, batch: 1 },
        ];
        let mut names: Vec<_> = kernels.iter().map(|k| k.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), kernels.len());
    }

    #[test]
    fn test_kernel_args_follow_source_order() {
        let kernel = Kernel::ConvForward {
            output: BufferId::new(1),
            padded_input: BufferId::new(2),
            lookup: BufferId::new(3),
            weights: BufferId::new(4),
            biases: BufferId::new(5),
            n_filters: 2,
            field_size: 9,
            n_positions: 4,
            padded_size: 16,
            batch: 1,
        };
        let args = kernel.args();
        assert_eq!(args.len(), 10);
        assert_eq!(args[0], KernelArg::Floats(BufferId::new(1)));
        assert_eq!(args[2], KernelArg::Indices(BufferId::new(3)));
        assert_eq!(args[5], KernelArg::Int(2));
        assert_eq!(kernel.range(), Range::Planar(2, 4));
    }

    #[test]
    fn test_backend_kind_creation() {
        let host = BackendKind::Host.create().unwrap();
        assert_eq!(host.device_type(), DeviceType::Host);
        let simulated = BackendKind::Simulated.create().unwrap();
        assert!(simulated.device_type().is_accelerator());
    }
}
