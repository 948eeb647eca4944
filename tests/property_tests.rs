#[cfg(test)]
mod property_tests {
    use convnet::backend::HostBackend;
    use convnet::geometry::convolution_output_size;
    use convnet::layers::{Convolutional, SoftMax};
    use convnet::network::Network;
    use proptest::prelude::*;

    fn softmax(values: &[f32]) -> Vec<f32> {
        let mut network = Network::new(Box::new(HostBackend::new()), None);
        network.add_layer(SoftMax::new()).unwrap();
        network.setup(values.len(), 1, 1, values.len()).unwrap();
        network.feed_input(values).unwrap();
        network.forward_pass().unwrap();
        network.output().unwrap().iter().copied().collect()
    }

    proptest! {
        #[test]
        fn softmax_is_a_distribution(values in prop::collection::vec(-50.0f32..50.0, 1..20)) {
            let p = softmax(&values);
            let total: f32 = p.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-5);
            prop_assert!(p.iter().all(|&x| (0.0..=1.0).contains(&x)));
        }

        #[test]
        fn softmax_is_shift_invariant(
            values in prop::collection::vec(-10.0f32..10.0, 1..12),
            shift in -100.0f32..100.0,
        ) {
            let shifted: Vec<f32> = values.iter().map(|v| v + shift).collect();
            for (a, b) in softmax(&values).iter().zip(softmax(&shifted)) {
                prop_assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
            }
        }

        #[test]
        fn output_size_is_integral_or_rejected(
            input in 1usize..40,
            half_filter in 0usize..4,
            stride in 1usize..5,
            padding in 0usize..4,
        ) {
            let filter = 2 * half_filter + 1;
            let padded = input + 2 * padding;
            match convolution_output_size(input, filter, stride, padding) {
                Ok(out) => {
                    prop_assert!(padded >= filter);
                    prop_assert_eq!((out - 1) * stride + filter, padded);
                }
                Err(e) => {
                    prop_assert!(e.is_geometry());
                    prop_assert!(padded < filter || (padded - filter) % stride != 0);
                }
            }
        }

        #[test]
        fn setup_agrees_with_output_size(
            input in 3usize..12,
            stride in 1usize..4,
            padding in 0usize..3,
        ) {
            let mut network = Network::new(Box::new(HostBackend::new()), Some(0));
            network.add_layer(Convolutional::new(3, 2, stride, padding)).unwrap();
            match convolution_output_size(input, 3, stride, padding) {
                Ok(out) => prop_assert!(network.setup(input, input, 1, out * out * 2).is_ok()),
                Err(_) => prop_assert!(network.setup(input, input, 1, 1).unwrap_err().is_geometry()),
            }
        }
    }
}
