//! Sample sources the network is fed from

use ndarray::{Array2, ArrayView1};

use crate::error::{NetError, Result};

/// An indexable collection of labelled, flattened samples
pub trait DataSet {
    /// Number of samples
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values per sample; must match the network's input unit count
    fn input_units(&self) -> usize;

    /// Flat activation vector of one sample, laid out depth-major then row-major
    fn sample(&self, index: usize) -> Result<ArrayView1<'_, f32>>;

    /// Class index of one sample
    fn label(&self, index: usize) -> Result<usize>;
}

/// Samples held in memory, one row per sample
#[derive(Debug, Clone)]
pub struct InMemoryDataSet {
    inputs: Array2<f32>,
    labels: Vec<usize>,
}

impl InMemoryDataSet {
    pub fn new(inputs: Array2<f32>, labels: Vec<usize>) -> Result<Self> {
        if inputs.nrows() != labels.len() {
            return Err(NetError::dimension_mismatch(
                format!("{} labels", inputs.nrows()),
                format!("{} labels", labels.len()),
            ));
        }
        Ok(InMemoryDataSet { inputs, labels })
    }

    /// Number of distinct classes, taken as one past the largest label
    pub fn class_count(&self) -> usize {
        self.labels.iter().max().map_or(0, |&m| m + 1)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.labels.len() {
            return Err(NetError::usage(
                "DataSet.sample",
                format!("index {} out of range for {} samples", index, self.labels.len()),
            ));
        }
        Ok(())
    }
}

impl DataSet for InMemoryDataSet {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn input_units(&self) -> usize {
        self.inputs.ncols()
    }

    fn sample(&self, index: usize) -> Result<ArrayView1<'_, f32>> {
        self.check_index(index)?;
        Ok(self.inputs.row(index))
    }

    fn label(&self, index: usize) -> Result<usize> {
        self.check_index(index)?;
        Ok(self.labels[index])
    }
}
