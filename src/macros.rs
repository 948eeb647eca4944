/// A macro to create a new `Network` from a backend and a chain of layers.
///
/// # Examples
///
/// ```
/// use convnet::backend::HostBackend;
/// use convnet::layers::{Convolutional, FullyConnected, ReLU, SoftMax};
/// use convnet::network;
///
/// let mut net = network![Box::new(HostBackend::new()), seed = Some(42);
///     Convolutional::new(3, 4, 1, 1),
///     ReLU::new(),
///     FullyConnected::new(10),
///     SoftMax::new(),
/// ]
/// .unwrap();
/// net.setup(8, 8, 1, 10).unwrap();
/// ```
///
/// This will create an unconfigured `Network` on the host backend with a convolution over 3x3
/// windows producing 4 feature maps, a rectifier, a 10-unit dense layer and a SoftMax output.
/// The seed may be omitted, in which case parameters are drawn from entropy.
#[macro_export]
macro_rules! network {
    ($backend:expr, seed = $seed:expr; $( $layer:expr ),+ $(,)?) => {{
        let mut network = $crate::network::Network::new($backend, $seed);
        let mut added: $crate::error::Result<()> = Ok(());
        $(
            if added.is_ok() {
                added = network.add_layer($layer).map(|_| ());
            }
        )+
        added.map(|_| network)
    }};
    ($backend:expr; $( $layer:expr ),+ $(,)?) => {
        $crate::network!($backend, seed = None; $( $layer ),+)
    };
}
