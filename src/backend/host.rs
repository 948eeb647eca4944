//! Host backend: kernels executed as synchronous ndarray operations
//!
//! Work sizes are accepted and ignored; each launch processes the whole range.

use log::{debug, trace};
use ndarray::{s, ArrayView, ArrayView1, ArrayView2, ArrayView4, ArrayViewMut, ArrayViewMut2, Axis, Dimension, Zip};

use super::constants::{HOST_MAX_WORK_GROUP_SIZE, HOST_MAX_WORK_ITEM_SIZES};
use super::{expect_len, lookup_entries, BufferId, ComputeBackend, DeviceLimits, DeviceMemory, DeviceType, Kernel, WorkSize};
use crate::error::{NetError, Result};

/// Backend that runs every kernel on the host
#[derive(Debug, Default)]
pub struct HostBackend {
    memory: DeviceMemory,
}

impl HostBackend {
    pub fn new() -> Self {
        debug!("Host backend initialized");
        HostBackend { memory: DeviceMemory::new() }
    }

    /// Allocated buffers, for diagnostics
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }
}

impl ComputeBackend for HostBackend {
    fn device_type(&self) -> DeviceType {
        DeviceType::Host
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits::new(HOST_MAX_WORK_GROUP_SIZE, HOST_MAX_WORK_ITEM_SIZES)
    }

    fn allocate(&mut self, len: usize) -> Result<BufferId> {
        Ok(self.memory.allocate(len))
    }

    fn allocate_indices(&mut self, len: usize) -> Result<BufferId> {
        Ok(self.memory.allocate_indices(len))
    }

    fn write(&mut self, buffer: BufferId, data: &[f32]) -> Result<()> {
        self.memory.write(buffer, data)
    }

    fn write_indices(&mut self, buffer: BufferId, data: &[u32]) -> Result<()> {
        self.memory.write_indices(buffer, data)
    }

    fn read(&self, buffer: BufferId) -> Result<Vec<f32>> {
        self.memory.read(buffer)
    }

    fn launch(&mut self, kernel: &Kernel, _work: &WorkSize) -> Result<()> {
        trace!("host launch {}", kernel.name());
        run(&mut self.memory, kernel)
    }

    fn device_info(&self) -> String {
        format!(
            "Device: Host\nBuffers: {}\nAllocated floats: {}",
            self.memory.buffer_count(),
            self.memory.allocated_floats()
        )
    }
}

fn run(memory: &mut DeviceMemory, kernel: &Kernel) -> Result<()> {
    let name = kernel.name();

    match *kernel {
        Kernel::ReluForward { output, input, len } => memory.with_outputs(&[output], |mem, outs| {
            let x = view1(name, mem.floats(input)?, len)?;
            let mut y = view1_mut(name, &mut outs[0], len)?;
            Zip::from(&mut y).and(&x).for_each(|y, &x| *y = x.max(0.0));
            Ok(())
        }),

        Kernel::ReluBackward { input_delta, output_delta, input, len } => {
            memory.with_outputs(&[input_delta], |mem, outs| {
                let x = view1(name, mem.floats(input)?, len)?;
                let d = view1(name, mem.floats(output_delta)?, len)?;
                let mut dx = view1_mut(name, &mut outs[0], len)?;
                Zip::from(&mut dx)
                    .and(&x)
                    .and(&d)
                    .for_each(|dx, &x, &d| *dx = if x > 0.0 { d } else { 0.0 });
                Ok(())
            })
        }

        Kernel::FcForward { output, input, weights, biases, n_in, n_out, batch } => {
            memory.with_outputs(&[output], |mem, outs| {
                let x = view2(name, mem.floats(input)?, (batch, n_in))?;
                let w = view2(name, mem.floats(weights)?, (n_out, n_in))?;
                let b = view1(name, mem.floats(biases)?, n_out)?;
                let z = x.dot(&w.t()) + &b;
                view2_mut(name, &mut outs[0], (batch, n_out))?.assign(&z);
                Ok(())
            })
        }

        Kernel::FcBackward { input_delta, output_delta, weights, n_in, n_out, batch } => {
            memory.with_outputs(&[input_delta], |mem, outs| {
                let d = view2(name, mem.floats(output_delta)?, (batch, n_out))?;
                let w = view2(name, mem.floats(weights)?, (n_out, n_in))?;
                view2_mut(name, &mut outs[0], (batch, n_in))?.assign(&d.dot(&w));
                Ok(())
            })
        }

        Kernel::FcUpdate {
            weights,
            biases,
            weight_velocity,
            bias_velocity,
            input,
            output_delta,
            n_in,
            n_out,
            batch,
            learning_rate,
            momentum,
        } => memory.with_outputs(&[weights, biases, weight_velocity, bias_velocity], |mem, outs| {
            let x = view2(name, mem.floats(input)?, (batch, n_in))?;
            let d = view2(name, mem.floats(output_delta)?, (batch, n_out))?;
            let weight_gradient = d.t().dot(&x);
            let bias_gradient = d.sum_axis(Axis(0));

            let [w, b, vw, vb] = outs else {
                return Err(NetError::backend(name, "expected four parameter buffers"));
            };
            momentum_step(
                view2_mut(name, w, (n_out, n_in))?,
                view2_mut(name, vw, (n_out, n_in))?,
                weight_gradient.view(),
                learning_rate,
                momentum,
            );
            momentum_step(
                view1_mut(name, b, n_out)?,
                view1_mut(name, vb, n_out)?,
                bias_gradient.view(),
                learning_rate,
                momentum,
            );
            Ok(())
        }),

        Kernel::ZeroPad { padded, input, width, height, depth, padding, batch } => {
            memory.with_outputs(&[padded], |mem, outs| {
                let x = view4(name, mem.floats(input)?, (batch, depth, height, width))?;
                let shape = (batch, depth, height + 2 * padding, width + 2 * padding);
                expect_len(name, &outs[0], shape.0 * shape.1 * shape.2 * shape.3)?;
                let mut target = ArrayViewMut::from_shape(shape, outs[0].as_mut_slice())
                    .map_err(|e| NetError::backend(name, e.to_string()))?;
                target
                    .slice_mut(s![.., .., padding..padding + height, padding..padding + width])
                    .assign(&x);
                Ok(())
            })
        }

        Kernel::ConvForward {
            output,
            padded_input,
            lookup,
            weights,
            biases,
            n_filters,
            field_size,
            n_positions,
            padded_size,
            batch,
        } => memory.with_outputs(&[output], |mem, outs| {
            let table = lookup_table(name, mem, lookup, field_size, n_positions, padded_size)?;
            let padded = view2(name, mem.floats(padded_input)?, (batch, padded_size))?;
            let w = view2(name, mem.floats(weights)?, (n_filters, field_size))?;
            let b = view1(name, mem.floats(biases)?, n_filters)?.insert_axis(Axis(1));

            expect_len(name, &outs[0], batch * n_filters * n_positions)?;
            let mut y = ArrayViewMut::from_shape((batch, n_filters, n_positions), outs[0].as_mut_slice())
                .map_err(|e| NetError::backend(name, e.to_string()))?;

            for (sample, mut y) in padded.outer_iter().zip(y.outer_iter_mut()) {
                let patches = table.mapv(|i| sample[i as usize]);
                y.assign(&(w.dot(&patches) + &b));
            }
            Ok(())
        }),

        Kernel::ConvBackward {
            patch_delta,
            output_delta,
            weights,
            n_filters,
            field_size,
            n_positions,
            batch,
        } => memory.with_outputs(&[patch_delta], |mem, outs| {
            let d = view3(name, mem.floats(output_delta)?, (batch, n_filters, n_positions))?;
            let w = view2(name, mem.floats(weights)?, (n_filters, field_size))?;

            expect_len(name, &outs[0], batch * field_size * n_positions)?;
            let mut g = ArrayViewMut::from_shape((batch, field_size, n_positions), outs[0].as_mut_slice())
                .map_err(|e| NetError::backend(name, e.to_string()))?;

            for (d, mut g) in d.outer_iter().zip(g.outer_iter_mut()) {
                g.assign(&w.t().dot(&d));
            }
            Ok(())
        }),

        Kernel::Col2Im {
            padded_delta,
            patch_delta,
            lookup,
            field_size,
            n_positions,
            padded_size,
            batch,
        } => memory.with_outputs(&[padded_delta], |mem, outs| {
            let table = lookup_table(name, mem, lookup, field_size, n_positions, padded_size)?;
            let g = view3(name, mem.floats(patch_delta)?, (batch, field_size, n_positions))?;
            let mut target = view2_mut(name, &mut outs[0], (batch, padded_size))?;

            for (g, mut row) in g.outer_iter().zip(target.outer_iter_mut()) {
                row.fill(0.0);
                Zip::from(&g).and(&table).for_each(|&delta, &i| row[i as usize] += delta);
            }
            Ok(())
        }),

        Kernel::Unpad { input_delta, padded_delta, width, height, depth, padding, batch } => {
            memory.with_outputs(&[input_delta], |mem, outs| {
                let shape = (batch, depth, height + 2 * padding, width + 2 * padding);
                let source = view4(name, mem.floats(padded_delta)?, shape)?;
                expect_len(name, &outs[0], batch * depth * height * width)?;
                let mut target = ArrayViewMut::from_shape((batch, depth, height, width), outs[0].as_mut_slice())
                    .map_err(|e| NetError::backend(name, e.to_string()))?;
                target.assign(&source.slice(s![.., .., padding..padding + height, padding..padding + width]));
                Ok(())
            })
        }

        Kernel::ConvUpdate {
            weights,
            biases,
            weight_velocity,
            bias_velocity,
            padded_input,
            lookup,
            output_delta,
            n_filters,
            field_size,
            n_positions,
            padded_size,
            batch,
            learning_rate,
            momentum,
        } => memory.with_outputs(&[weights, biases, weight_velocity, bias_velocity], |mem, outs| {
            let table = lookup_table(name, mem, lookup, field_size, n_positions, padded_size)?;
            let padded = view2(name, mem.floats(padded_input)?, (batch, padded_size))?;
            let d = view3(name, mem.floats(output_delta)?, (batch, n_filters, n_positions))?;

            let mut weight_gradient = ndarray::Array2::<f32>::zeros((n_filters, field_size));
            let mut bias_gradient = ndarray::Array1::<f32>::zeros(n_filters);
            for (sample, d) in padded.outer_iter().zip(d.outer_iter()) {
                let patches = table.mapv(|i| sample[i as usize]);
                weight_gradient += &d.dot(&patches.t());
                bias_gradient += &d.sum_axis(Axis(1));
            }

            let [w, b, vw, vb] = outs else {
                return Err(NetError::backend(name, "expected four parameter buffers"));
            };
            momentum_step(
                view2_mut(name, w, (n_filters, field_size))?,
                view2_mut(name, vw, (n_filters, field_size))?,
                weight_gradient.view(),
                learning_rate,
                momentum,
            );
            momentum_step(
                view1_mut(name, b, n_filters)?,
                view1_mut(name, vb, n_filters)?,
                bias_gradient.view(),
                learning_rate,
                momentum,
            );
            Ok(())
        }),

        Kernel::SoftmaxForward { output, input, units, batch } => {
            memory.with_outputs(&[output], |mem, outs| {
                let x = view2(name, mem.floats(input)?, (batch, units))?;
                let mut y = view2_mut(name, &mut outs[0], (batch, units))?;
                for (x, mut y) in x.outer_iter().zip(y.outer_iter_mut()) {
                    let max = x.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                    y.assign(&x.mapv(|v| (v - max).exp()));
                    let sum = y.sum();
                    y.mapv_inplace(|v| v / sum);
                }
                Ok(())
            })
        }
    }
}

/// `v = momentum * v - learning_rate * g`, then `p += v`
fn momentum_step<D: Dimension>(
    mut params: ArrayViewMut<f32, D>,
    mut velocity: ArrayViewMut<f32, D>,
    gradient: ArrayView<f32, D>,
    learning_rate: f32,
    momentum: f32,
) {
    Zip::from(&mut params)
        .and(&mut velocity)
        .and(&gradient)
        .for_each(|p, v, &g| {
            *v = momentum * *v - learning_rate * g;
            *p += *v;
        });
}

fn lookup_table<'a>(
    kernel: &str,
    mem: &'a DeviceMemory,
    lookup: BufferId,
    field_size: usize,
    n_positions: usize,
    padded_size: usize,
) -> Result<ArrayView2<'a, u32>> {
    let entries = lookup_entries(kernel, mem, lookup, field_size, n_positions, padded_size)?;
    ArrayView2::from_shape((field_size, n_positions), entries).map_err(|e| NetError::backend(kernel, e.to_string()))
}

fn view1<'a>(kernel: &str, data: &'a [f32], len: usize) -> Result<ArrayView1<'a, f32>> {
    expect_len(kernel, data, len)?;
    Ok(ArrayView1::from(data))
}

fn view1_mut<'a>(kernel: &str, data: &'a mut [f32], len: usize) -> Result<ArrayViewMut<'a, f32, ndarray::Ix1>> {
    expect_len(kernel, data, len)?;
    Ok(ArrayViewMut::from(data))
}

fn view2<'a>(kernel: &str, data: &'a [f32], shape: (usize, usize)) -> Result<ArrayView2<'a, f32>> {
    expect_len(kernel, data, shape.0 * shape.1)?;
    ArrayView2::from_shape(shape, data).map_err(|e| NetError::backend(kernel, e.to_string()))
}

fn view2_mut<'a>(kernel: &str, data: &'a mut [f32], shape: (usize, usize)) -> Result<ArrayViewMut2<'a, f32>> {
    expect_len(kernel, data, shape.0 * shape.1)?;
    ArrayViewMut2::from_shape(shape, data).map_err(|e| NetError::backend(kernel, e.to_string()))
}

fn view3<'a>(
    kernel: &str,
    data: &'a [f32],
    shape: (usize, usize, usize),
) -> Result<ArrayView<'a, f32, ndarray::Ix3>> {
    expect_len(kernel, data, shape.0 * shape.1 * shape.2)?;
    ArrayView::from_shape(shape, data).map_err(|e| NetError::backend(kernel, e.to_string()))
}

fn view4<'a>(kernel: &str, data: &'a [f32], shape: (usize, usize, usize, usize)) -> Result<ArrayView4<'a, f32>> {
    expect_len(kernel, data, shape.0 * shape.1 * shape.2 * shape.3)?;
    ArrayView4::from_shape(shape, data).map_err(|e| NetError::backend(kernel, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch(backend: &mut HostBackend, kernel: Kernel) {
        let work = WorkSize::linear(1, &backend.limits()).unwrap();
        backend.launch(&kernel, &work).unwrap();
    }

    #[test]
    fn test_fc_forward_matches_manual_product() {
        let mut backend = HostBackend::new();
        let input = backend.allocate(2).unwrap();
        let weights = backend.allocate(6).unwrap();
        let biases = backend.allocate(3).unwrap();
        let output = backend.allocate(3).unwrap();
        backend.write(input, &[1.0, 2.0]).unwrap();
        backend.write(weights, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
        backend.write(biases, &[0.5, 0.0, -1.0]).unwrap();

        launch(
            &mut backend,
            Kernel::FcForward { output, input, weights, biases, n_in: 2, n_out: 3, batch: 1 },
        );
        assert_eq!(backend.read(output).unwrap(), vec![1.5, 2.0, 2.0]);
    }

    #[test]
    fn test_zero_pad_and_unpad_keep_interior() {
        let mut backend = HostBackend::new();
        let input = backend.allocate(4).unwrap();
        let padded = backend.allocate(16).unwrap();
        let cropped = backend.allocate(4).unwrap();
        backend.write(input, &[1.0, 2.0, 3.0, 4.0]).unwrap();

        launch(
            &mut backend,
            Kernel::ZeroPad { padded, input, width: 2, height: 2, depth: 1, padding: 1, batch: 1 },
        );
        let p = backend.read(padded).unwrap();
        assert_eq!(p[5], 1.0);
        assert_eq!(p[6], 2.0);
        assert_eq!(p[9], 3.0);
        assert_eq!(p[10], 4.0);
        assert_eq!(p.iter().sum::<f32>(), 10.0);

        launch(
            &mut backend,
            Kernel::Unpad {
                input_delta: cropped,
                padded_delta: padded,
                width: 2,
                height: 2,
                depth: 1,
                padding: 1,
                batch: 1,
            },
        );
        assert_eq!(backend.read(cropped).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_wrong_buffer_length_is_backend_error() {
        let mut backend = HostBackend::new();
        let input = backend.allocate(3).unwrap();
        let output = backend.allocate(4).unwrap();
        let work = WorkSize::linear(4, &backend.limits()).unwrap();
        let err = backend
            .launch(&Kernel::ReluForward { output, input, len: 4 }, &work)
            .unwrap_err();
        assert!(err.is_backend());
        // the output buffer survives a failed launch
        assert_eq!(backend.read(output).unwrap().len(), 4);
    }
}
