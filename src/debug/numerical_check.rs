use log::warn;

use crate::error::Result;
use crate::network::Network;

/// Types of numerical issues
#[derive(Debug, Clone, PartialEq)]
pub enum NumericalIssue {
    NaN { layer: usize, count: usize },
    Infinity { layer: usize, count: usize },
}

/// Scan every layer's weights and biases for NaN or infinite values
pub fn check_parameters(network: &Network) -> Result<Vec<NumericalIssue>> {
    let mut issues = Vec::new();

    for layer in 0..network.layer_count() {
        let Some(snapshot) = network.parameters(layer)? else {
            continue;
        };
        let values = snapshot.weights.iter().chain(snapshot.biases.iter());
        let (nan_count, inf_count) = values.fold((0, 0), |(nan, inf), v| {
            (nan + v.is_nan() as usize, inf + v.is_infinite() as usize)
        });

        if nan_count > 0 {
            warn!("Layer {}: found {} NaN parameters", layer, nan_count);
            issues.push(NumericalIssue::NaN { layer, count: nan_count });
        }
        if inf_count > 0 {
            warn!("Layer {}: found {} infinite parameters", layer, inf_count);
            issues.push(NumericalIssue::Infinity { layer, count: inf_count });
        }
    }

    Ok(issues)
}
