//! Loss functions for the SoftMax output
//!
//! The gradient is taken with respect to the SoftMax *input*, which fuses the
//! softmax Jacobian with the cross-entropy derivative into `p − y`.

use ndarray::{Array2, ArrayView2};

use crate::error::{NetError, Result};

/// Smallest probability fed to the logarithm
const PROBABILITY_FLOOR: f32 = 1e-12;

/// Trait defining the interface for loss functions
pub trait Loss {
    /// Mean loss over a batch of predictions, one row per sample
    fn compute_batch(&self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> f32;

    /// Gradient for a batch, already divided by the batch size
    fn gradient_batch(&self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> Array2<f32>;
}

/// Categorical cross-entropy on SoftMax probabilities
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl Loss for CrossEntropy {
    fn compute_batch(&self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> f32 {
        let batch = predictions.nrows().max(1) as f32;
        let total: f32 = predictions
            .iter()
            .zip(targets.iter())
            .map(|(&p, &t)| if t > 0.0 { -t * p.max(PROBABILITY_FLOOR).ln() } else { 0.0 })
            .sum();
        total / batch
    }

    fn gradient_batch(&self, predictions: ArrayView2<f32>, targets: ArrayView2<f32>) -> Array2<f32> {
        let batch = predictions.nrows().max(1) as f32;
        (&predictions - &targets) / batch
    }
}

/// One row per label with a single 1 at the label's class
pub fn one_hot(labels: &[usize], classes: usize) -> Result<Array2<f32>> {
    let mut targets = Array2::zeros((labels.len(), classes));
    for (row, &label) in labels.iter().enumerate() {
        if label >= classes {
            return Err(NetError::dimension_mismatch(
                format!("label below {}", classes),
                format!("label {}", label),
            ));
        }
        targets[[row, label]] = 1.0;
    }
    Ok(targets)
}

/// Mean cross-entropy of `probabilities` against integer `labels`
pub fn cross_entropy(probabilities: ArrayView2<f32>, labels: &[usize]) -> Result<f32> {
    check_batch(probabilities, labels)?;
    let targets = one_hot(labels, probabilities.ncols())?;
    Ok(CrossEntropy.compute_batch(probabilities, targets.view()))
}

/// `(p − onehot(labels)) / batch`, ready for [`crate::network::Network::set_output_gradient`]
pub fn cross_entropy_gradient(probabilities: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>> {
    check_batch(probabilities, labels)?;
    let targets = one_hot(labels, probabilities.ncols())?;
    Ok(CrossEntropy.gradient_batch(probabilities, targets.view()))
}

/// Index of the most probable class in each row
pub fn predictions(probabilities: ArrayView2<f32>) -> Vec<usize> {
    probabilities
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                .0
        })
        .collect()
}

fn check_batch(probabilities: ArrayView2<f32>, labels: &[usize]) -> Result<()> {
    if probabilities.nrows() != labels.len() {
        return Err(NetError::dimension_mismatch(
            format!("{} labels", probabilities.nrows()),
            format!("{} labels", labels.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cross_entropy_of_confident_prediction() {
        let p = array![[0.9, 0.05, 0.05]];
        let loss = cross_entropy(p.view(), &[0]).unwrap();
        assert!((loss - (-(0.9f32).ln())).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_is_p_minus_y_over_batch() {
        let p = array![[0.2, 0.8], [0.6, 0.4]];
        let g = cross_entropy_gradient(p.view(), &[1, 0]).unwrap();
        let expected = array![[0.1, -0.1], [-0.2, 0.2]];
        for (a, b) in g.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_label_out_of_range() {
        let p = array![[0.5, 0.5]];
        assert!(cross_entropy(p.view(), &[2]).is_err());
        assert!(cross_entropy(p.view(), &[0, 1]).is_err());
    }

    #[test]
    fn test_predictions_pick_argmax() {
        let p = array![[0.1, 0.7, 0.2], [0.5, 0.2, 0.3]];
        assert_eq!(predictions(p.view()), vec![1, 0]);
    }
}
