pub mod test_network;

use ndarray::{Array1, Array2};

use crate::backend::{ComputeBackend, HostBackend, SimulatedDevice};
use crate::error::Result;
use crate::geometry::Volume;
use crate::loss::cross_entropy;
use crate::network::Network;

/// One backend of each dispatch family
pub(crate) fn backends() -> Vec<(&'static str, Box<dyn ComputeBackend>)> {
    vec![
        ("host", Box::new(HostBackend::new())),
        ("simulated", Box::new(SimulatedDevice::new())),
    ]
}

/// Deterministic inputs in `[0.2, 0.9]`, clear of any rectifier kink
pub(crate) fn positive_inputs(len: usize) -> Vec<f32> {
    (0..len).map(|i| 0.2 + ((i * 7) % 11) as f32 * 0.07).collect()
}

/// Forward pass followed by the mean cross-entropy of the output
pub(crate) fn batch_loss(network: &mut Network, labels: &[usize]) -> Result<f64> {
    network.forward_pass()?;
    let probabilities = network.output()?;
    Ok(cross_entropy(probabilities.view(), labels)? as f64)
}

/// Direct sliding-window convolution of one sample, output `[filter][y][x]`
pub(crate) fn reference_convolution(
    input: &[f32],
    volume: Volume,
    weights: &Array2<f32>,
    biases: &Array1<f32>,
    filter_size: usize,
    stride: usize,
    padding: usize,
) -> Vec<f32> {
    let size = volume.width;
    let out = (size - filter_size + 2 * padding) / stride + 1;
    let mut output = Vec::with_capacity(weights.nrows() * out * out);

    for k in 0..weights.nrows() {
        for oy in 0..out {
            for ox in 0..out {
                let mut sum = biases[k];
                for c in 0..volume.depth {
                    for ky in 0..filter_size {
                        for kx in 0..filter_size {
                            let y = (oy * stride + ky) as isize - padding as isize;
                            let x = (ox * stride + kx) as isize - padding as isize;
                            if y < 0 || x < 0 || y >= size as isize || x >= size as isize {
                                continue;
                            }
                            let value = input[(c * size + y as usize) * size + x as usize];
                            sum += weights[[k, (c * filter_size + ky) * filter_size + kx]] * value;
                        }
                    }
                }
                output.push(sum);
            }
        }
    }
    output
}
