//! Central-difference gradient estimates
//!
//! Used to validate the analytic gradients that backpropagation and the fused
//! update kernels produce.

use crate::error::Result;

/// Estimate `∂loss/∂values[i]` for every `i` by central differences
///
/// `loss` is evaluated with one value nudged by `±epsilon` at a time; every
/// value is restored before returning, including on error.
pub fn numerical_gradient<F>(values: &mut [f32], epsilon: f32, mut loss: F) -> Result<Vec<f32>>
where
    F: FnMut(&[f32]) -> Result<f64>,
{
    let mut gradient = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let original = values[i];

        values[i] = original + epsilon;
        let plus = loss(values);
        values[i] = original - epsilon;
        let minus = loss(values);
        values[i] = original;

        let difference = plus? - minus?;
        gradient.push((difference / (2.0 * epsilon as f64)) as f32);
    }
    Ok(gradient)
}

/// `|a − b| / max(|a|, |b|)`, or zero when both are (nearly) zero
pub fn relative_error(a: f32, b: f32) -> f32 {
    let scale = a.abs().max(b.abs());
    if scale < 1e-12 {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

/// Largest relative error between two gradient estimates, ignoring entries
/// where both magnitudes fall below `floor`
pub fn max_relative_error(analytic: &[f32], numerical: &[f32], floor: f32) -> f32 {
    analytic
        .iter()
        .zip(numerical)
        .filter(|(a, n)| a.abs().max(n.abs()) >= floor)
        .map(|(&a, &n)| relative_error(a, n))
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_of_quadratic() {
        let mut values = vec![1.0, -2.0, 0.5];
        let gradient = numerical_gradient(&mut values, 1e-2, |v| {
            Ok(v.iter().map(|&x| (x as f64) * (x as f64)).sum())
        })
        .unwrap();

        for (g, x) in gradient.iter().zip([1.0f32, -2.0, 0.5]) {
            assert!((g - 2.0 * x).abs() < 1e-4);
        }
        assert_eq!(values, vec![1.0, -2.0, 0.5]);
    }

    #[test]
    fn test_relative_error() {
        assert_eq!(relative_error(0.0, 0.0), 0.0);
        assert!((relative_error(1.0, 1.1) - 0.1 / 1.1).abs() < 1e-6);
        assert_eq!(max_relative_error(&[1.0, 1e-9], &[1.0, 5e-9], 1e-6), 0.0);
    }
}
