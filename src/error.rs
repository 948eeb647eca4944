use std::fmt;

/// Result type for convnet operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Main error type for the convnet library
///
/// Every variant is fatal for the setup or training step that produced it: the
/// numeric pipeline is synchronous and single-pass, so there is nothing to retry.
#[derive(Debug, Clone, PartialEq)]
pub enum NetError {
    /// Incompatible layer-chain dimensions, non-integral convolution output size,
    /// even filter size or non-square spatial input
    Geometry {
        layer: String,
        reason: String,
    },

    /// A caller bug: an operation invoked out of order or on a layer that forbids it
    Usage {
        operation: String,
        reason: String,
    },

    /// Buffer allocation, transfer or kernel launch rejected by the compute backend
    Backend {
        operation: String,
        reason: String,
    },

    /// Host data of the wrong length handed to the network
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// IO errors (parameter files, configs)
    Io(String),

    /// Serialization/deserialization errors
    Serialization(String),

    /// Invalid configuration document
    Config(String),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Geometry { layer, reason } => {
                write!(f, "Geometry error in {}: {}", layer, reason)
            }
            NetError::Usage { operation, reason } => {
                write!(f, "Usage error in {}: {}", operation, reason)
            }
            NetError::Backend { operation, reason } => {
                write!(f, "Backend error in {}: {}", operation, reason)
            }
            NetError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            NetError::Io(msg) => write!(f, "IO error: {}", msg),
            NetError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            NetError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for NetError {}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Io(err.to_string())
    }
}

impl From<bincode::Error> for NetError {
    fn from(err: bincode::Error) -> Self {
        NetError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Config(err.to_string())
    }
}

// Helper functions for common error patterns
impl NetError {
    pub fn geometry<L: Into<String>, R: Into<String>>(layer: L, reason: R) -> Self {
        NetError::Geometry {
            layer: layer.into(),
            reason: reason.into(),
        }
    }

    pub fn usage<O: Into<String>, R: Into<String>>(operation: O, reason: R) -> Self {
        NetError::Usage {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn backend<O: Into<String>, R: Into<String>>(operation: O, reason: R) -> Self {
        NetError::Backend {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        NetError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// True for setup-time geometry failures
    pub fn is_geometry(&self) -> bool {
        matches!(self, NetError::Geometry { .. })
    }

    /// True for caller bugs
    pub fn is_usage(&self) -> bool {
        matches!(self, NetError::Usage { .. })
    }

    /// True for compute backend failures
    pub fn is_backend(&self) -> bool {
        matches!(self, NetError::Backend { .. })
    }
}
