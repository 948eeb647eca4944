//! Activation and delta buffers shared between adjacent layers

use crate::backend::{BufferId, ComputeBackend};
use crate::error::Result;
use crate::geometry::Volume;

/// A layer's output activations and the gradient of the loss with respect to them
///
/// Both buffers hold `batch * units` values, sample-major. The buffer pair is
/// owned by the layer that writes the activations; the next layer reads the
/// activations and writes the deltas through the same handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeuronBuffer {
    pub activations: BufferId,
    pub deltas: BufferId,
    pub units: usize,
    pub batch: usize,
}

impl NeuronBuffer {
    /// Allocate zero-filled activation and delta buffers
    pub fn allocate(backend: &mut dyn ComputeBackend, units: usize, batch: usize) -> Result<Self> {
        let len = units * batch;
        Ok(NeuronBuffer {
            activations: backend.allocate(len)?,
            deltas: backend.allocate(len)?,
            units,
            batch,
        })
    }

    /// Values in each buffer
    pub fn len(&self) -> usize {
        self.units * self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a layer hands its successor: the shape of its output and where it lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub volume: Volume,
    pub neurons: NeuronBuffer,
}

impl Connection {
    pub fn new(volume: Volume, neurons: NeuronBuffer) -> Self {
        Connection { volume, neurons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    #[test]
    fn test_allocate_batch_major_buffers() {
        let mut backend = HostBackend::new();
        let neurons = NeuronBuffer::allocate(&mut backend, 5, 3).unwrap();
        assert_eq!(neurons.len(), 15);
        assert_ne!(neurons.activations, neurons.deltas);
        assert_eq!(backend.read(neurons.activations).unwrap(), vec![0.0; 15]);
        assert_eq!(backend.read(neurons.deltas).unwrap().len(), 15);
    }
}
