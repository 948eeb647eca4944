//! Trainable parameters kept on the compute backend

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::backend::{BufferId, ComputeBackend};
use crate::error::{NetError, Result};
use crate::init::{ParamRng, WeightInit};

/// Weights, biases and their momentum velocities
///
/// Weights form a `[rows][cols]` matrix: one row per output unit (or filter),
/// one column per input unit (or receptive-field element).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    pub weights: BufferId,
    pub biases: BufferId,
    pub weight_velocity: BufferId,
    pub bias_velocity: BufferId,
    pub rows: usize,
    pub cols: usize,
}

impl Parameters {
    /// Allocate zero-filled parameter and velocity buffers
    pub fn allocate(backend: &mut dyn ComputeBackend, rows: usize, cols: usize) -> Result<Self> {
        Ok(Parameters {
            weights: backend.allocate(rows * cols)?,
            biases: backend.allocate(rows)?,
            weight_velocity: backend.allocate(rows * cols)?,
            bias_velocity: backend.allocate(rows)?,
            rows,
            cols,
        })
    }

    /// Draw fresh weights, set biases to their initial value and clear velocities
    pub fn initialize(&self, backend: &mut dyn ComputeBackend, init: &WeightInit, rng: &mut ParamRng) -> Result<()> {
        let weights = init.initialize_weights((self.rows, self.cols), rng)?;
        let biases = init.initialize_biases(self.rows);
        self.load(backend, &ParameterSnapshot { weights, biases })
    }

    /// Number of trainable values
    pub fn count(&self) -> usize {
        self.rows * self.cols + self.rows
    }

    /// Copy weights and biases back to the host
    pub fn snapshot(&self, backend: &dyn ComputeBackend) -> Result<ParameterSnapshot> {
        let weights = Array2::from_shape_vec((self.rows, self.cols), backend.read(self.weights)?)
            .map_err(|e| NetError::backend("read parameters", e.to_string()))?;
        let biases = Array1::from(backend.read(self.biases)?);
        Ok(ParameterSnapshot { weights, biases })
    }

    /// Overwrite weights and biases and clear the velocities
    pub fn load(&self, backend: &mut dyn ComputeBackend, snapshot: &ParameterSnapshot) -> Result<()> {
        if snapshot.weights.dim() != (self.rows, self.cols) || snapshot.biases.len() != self.rows {
            return Err(NetError::dimension_mismatch(
                format!("weights {}x{} and {} biases", self.rows, self.cols, self.rows),
                format!(
                    "weights {}x{} and {} biases",
                    snapshot.weights.nrows(),
                    snapshot.weights.ncols(),
                    snapshot.biases.len()
                ),
            ));
        }

        let weights: Vec<f32> = snapshot.weights.iter().copied().collect();
        let biases: Vec<f32> = snapshot.biases.iter().copied().collect();
        backend.write(self.weights, &weights)?;
        backend.write(self.biases, &biases)?;
        backend.write(self.weight_velocity, &vec![0.0; weights.len()])?;
        backend.write(self.bias_velocity, &vec![0.0; biases.len()])?;
        Ok(())
    }
}

/// Host copy of one layer's parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::init::{param_rng, BIAS_INIT};
    use ndarray::array;

    #[test]
    fn test_initialize_then_snapshot() {
        let mut backend = HostBackend::new();
        let params = Parameters::allocate(&mut backend, 3, 4).unwrap();
        params.initialize(&mut backend, &WeightInit::He, &mut param_rng(Some(3))).unwrap();

        let snapshot = params.snapshot(&backend).unwrap();
        assert_eq!(snapshot.weights.dim(), (3, 4));
        assert!(snapshot.biases.iter().all(|&b| b == BIAS_INIT));
        assert_eq!(backend.read(params.weight_velocity).unwrap(), vec![0.0; 12]);
        assert_eq!(params.count(), 15);
    }

    #[test]
    fn test_load_rejects_wrong_shape() {
        let mut backend = HostBackend::new();
        let params = Parameters::allocate(&mut backend, 2, 2).unwrap();
        let snapshot = ParameterSnapshot {
            weights: array![[1.0, 2.0, 3.0]],
            biases: array![0.0],
        };
        let err = params.load(&mut backend, &snapshot).unwrap_err();
        assert!(matches!(err, NetError::DimensionMismatch { .. }));
    }
}
