//! Layer geometry
//!
//! Geometry is never set directly: a layer derives its output volume from its
//! predecessor's output volume and its own hyperparameters when it is connected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NetError, Result};

/// A 3D activation volume, stored depth-major then row-major
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Volume {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Volume {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Volume { width, height, depth }
    }

    /// A flat vector of `units` values (the shape of a fully connected output)
    pub fn flat(units: usize) -> Self {
        Volume { width: 1, height: 1, depth: units }
    }

    /// Number of units in the volume
    pub fn units(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Spatial area of one depth slice
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    /// The same volume grown by `padding` zeros on every spatial side
    pub fn padded(&self, padding: usize) -> Self {
        Volume {
            width: self.width + 2 * padding,
            height: self.height + 2 * padding,
            depth: self.depth,
        }
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Input and output volumes of a connected layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub input: Volume,
    pub output: Volume,
}

impl Geometry {
    pub fn new(input: Volume, output: Volume) -> Self {
        Geometry { input, output }
    }

    /// Number of output units
    pub fn unit_count(&self) -> usize {
        self.output.units()
    }
}

/// Spatial output size of a convolution: `(input - filter + 2 * padding) / stride + 1`.
///
/// Fails when the filter size is even, the stride is zero, the filter does not fit
/// inside the padded input, or the division leaves a remainder.
pub fn convolution_output_size(
    input_size: usize,
    filter_size: usize,
    stride: usize,
    padding: usize,
) -> Result<usize> {
    const LAYER: &str = "Convolutional";

    if filter_size == 0 || filter_size % 2 == 0 {
        return Err(NetError::geometry(
            LAYER,
            format!("filter size must be odd, got {}", filter_size),
        ));
    }
    if stride == 0 {
        return Err(NetError::geometry(LAYER, "stride must be at least 1"));
    }

    let padded = input_size + 2 * padding;
    if padded < filter_size {
        return Err(NetError::geometry(
            LAYER,
            format!(
                "filter size {} exceeds padded input size {}",
                filter_size, padded
            ),
        ));
    }

    let span = padded - filter_size;
    if span % stride != 0 {
        return Err(NetError::geometry(
            LAYER,
            format!(
                "input size {}, filter size {}, padding {} and stride {} do not fit: ({} - {} + 2*{}) / {} is not an integer",
                input_size, filter_size, padding, stride, input_size, filter_size, padding, stride
            ),
        ));
    }

    Ok(span / stride + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_size_valid_combinations() {
        assert_eq!(convolution_output_size(4, 3, 1, 0).unwrap(), 2);
        assert_eq!(convolution_output_size(4, 3, 1, 1).unwrap(), 4);
        assert_eq!(convolution_output_size(7, 3, 2, 0).unwrap(), 3);
        assert_eq!(convolution_output_size(5, 5, 1, 0).unwrap(), 1);
        assert_eq!(convolution_output_size(32, 5, 1, 2).unwrap(), 32);
    }

    #[test]
    fn test_output_size_rejects_non_integral() {
        let err = convolution_output_size(6, 3, 2, 0).unwrap_err();
        assert!(err.is_geometry());
    }

    #[test]
    fn test_output_size_rejects_even_filter() {
        assert!(convolution_output_size(8, 4, 1, 0).unwrap_err().is_geometry());
        assert!(convolution_output_size(8, 0, 1, 0).unwrap_err().is_geometry());
    }

    #[test]
    fn test_output_size_rejects_oversized_filter_and_zero_stride() {
        assert!(convolution_output_size(2, 5, 1, 0).unwrap_err().is_geometry());
        assert!(convolution_output_size(5, 3, 0, 0).unwrap_err().is_geometry());
    }

    #[test]
    fn test_volume_helpers() {
        let v = Volume::new(4, 4, 3);
        assert_eq!(v.units(), 48);
        assert_eq!(v.area(), 16);
        assert_eq!(v.padded(1), Volume::new(6, 6, 3));
        assert_eq!(Volume::flat(10).units(), 10);
        assert_eq!(v.to_string(), "4x4x3");
    }
}
