//! Simulated accelerator
//!
//! Runs every kernel the way a device would: one work-item at a time over the
//! padded global range, with the same out-of-range guards and the same
//! per-item arithmetic as `kernels.cl`. Launches whose work-group layout the
//! configured limits would reject fail here too, so the dispatch path can be
//! exercised without accelerator hardware.

use log::{trace, warn};

use super::constants::{SIMULATED_COMPUTE_UNITS, SIMULATED_MAX_WORK_GROUP_SIZE, SIMULATED_MAX_WORK_ITEM_SIZES};
use super::{
    expect_len, lookup_entries, BufferId, ComputeBackend, DeviceLimits, DeviceMemory, DeviceType, Kernel, Range,
    WorkSize,
};
use crate::error::{NetError, Result};

/// Kernel-dispatch backend executing on the host
pub struct SimulatedDevice {
    memory: DeviceMemory,
    limits: DeviceLimits,
    launches: usize,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        warn!("Using simulated accelerator backend. Kernels run work-item by work-item on the host.");
        Self::with_limits(DeviceLimits::new(SIMULATED_MAX_WORK_GROUP_SIZE, SIMULATED_MAX_WORK_ITEM_SIZES))
    }

    /// Simulate a device with custom work-group limits
    pub fn with_limits(limits: DeviceLimits) -> Self {
        SimulatedDevice { memory: DeviceMemory::new(), limits, launches: 0 }
    }

    /// Kernels launched so far
    pub fn launch_count(&self) -> usize {
        self.launches
    }

    fn check_range(&self, kernel: &Kernel, work: &WorkSize) -> Result<()> {
        work.validate(&self.limits)?;

        let required: Vec<usize> = match kernel.range() {
            Range::Linear(count) => vec![count],
            Range::Planar(rows, cols) => vec![rows, cols],
        };
        if required.len() != work.dimensions() {
            return Err(NetError::backend(
                kernel.name(),
                format!("kernel needs a {}D range, got {}D", required.len(), work.dimensions()),
            ));
        }
        for (d, (&needed, &global)) in required.iter().zip(work.global()).enumerate() {
            if global < needed {
                return Err(NetError::backend(
                    kernel.name(),
                    format!("global size {} in dimension {} does not cover {} work-items", global, d, needed),
                ));
            }
        }
        Ok(())
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for SimulatedDevice {
    fn device_type(&self) -> DeviceType {
        DeviceType::SimulatedGpu
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
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

    fn launch(&mut self, kernel: &Kernel, work: &WorkSize) -> Result<()> {
        self.check_range(kernel, work)?;
        trace!(
            "simulated launch {} global {:?} local {:?}",
            kernel.name(),
            work.global(),
            work.local()
        );
        self.launches += 1;
        execute(&mut self.memory, kernel, work)
    }

    fn device_info(&self) -> String {
        format!(
            "Device: Simulated accelerator\nCompute Units: {}\nMax Work Group Size: {}\nMax Work Item Sizes: {:?}\nBuffers: {}",
            SIMULATED_COMPUTE_UNITS,
            self.limits.max_work_group_size,
            self.limits.max_work_item_sizes,
            self.memory.buffer_count()
        )
    }
}

/// Visit every work-item of a linear range
fn linear(work: &WorkSize, mut item: impl FnMut(usize)) {
    for gid in 0..work.global()[0] {
        item(gid);
    }
}

/// Visit every work-item of a planar range, row-major
fn planar(work: &WorkSize, mut item: impl FnMut(usize, usize)) {
    let global = work.global();
    for row in 0..global[0] {
        for col in 0..global[1] {
            item(row, col);
        }
    }
}

fn execute(memory: &mut DeviceMemory, kernel: &Kernel, work: &WorkSize) -> Result<()> {
    let name = kernel.name();

    match *kernel {
        Kernel::ReluForward { output, input, len } => memory.with_outputs(&[output], |mem, outs| {
            let x = mem.floats(input)?;
            expect_len(name, x, len)?;
            let y = &mut outs[0];
            expect_len(name, y, len)?;
            linear(work, |i| {
                if i < len {
                    y[i] = if x[i] > 0.0 { x[i] } else { 0.0 };
                }
            });
            Ok(())
        }),

        Kernel::ReluBackward { input_delta, output_delta, input, len } => {
            memory.with_outputs(&[input_delta], |mem, outs| {
                let x = mem.floats(input)?;
                let d = mem.floats(output_delta)?;
                expect_len(name, x, len)?;
                expect_len(name, d, len)?;
                let dx = &mut outs[0];
                expect_len(name, dx, len)?;
                linear(work, |i| {
                    if i < len {
                        dx[i] = if x[i] > 0.0 { d[i] } else { 0.0 };
                    }
                });
                Ok(())
            })
        }

        Kernel::FcForward { output, input, weights, biases, n_in, n_out, batch } => {
            memory.with_outputs(&[output], |mem, outs| {
                let x = mem.floats(input)?;
                let w = mem.floats(weights)?;
                let b = mem.floats(biases)?;
                expect_len(name, x, batch * n_in)?;
                expect_len(name, w, n_out * n_in)?;
                expect_len(name, b, n_out)?;
                let y = &mut outs[0];
                expect_len(name, y, batch * n_out)?;
                linear(work, |gid| {
                    if gid >= batch * n_out {
                        return;
                    }
                    let (sample, i) = (gid / n_out, gid % n_out);
                    let mut sum = b[i];
                    for j in 0..n_in {
                        sum += w[i * n_in + j] * x[sample * n_in + j];
                    }
                    y[gid] = sum;
                });
                Ok(())
            })
        }

        Kernel::FcBackward { input_delta, output_delta, weights, n_in, n_out, batch } => {
            memory.with_outputs(&[input_delta], |mem, outs| {
                let d = mem.floats(output_delta)?;
                let w = mem.floats(weights)?;
                expect_len(name, d, batch * n_out)?;
                expect_len(name, w, n_out * n_in)?;
                let dx = &mut outs[0];
                expect_len(name, dx, batch * n_in)?;
                linear(work, |gid| {
                    if gid >= batch * n_in {
                        return;
                    }
                    let (sample, j) = (gid / n_in, gid % n_in);
                    let mut sum = 0.0;
                    for i in 0..n_out {
                        sum += w[i * n_in + j] * d[sample * n_out + i];
                    }
                    dx[gid] = sum;
                });
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
            let x = mem.floats(input)?;
            let d = mem.floats(output_delta)?;
            expect_len(name, x, batch * n_in)?;
            expect_len(name, d, batch * n_out)?;
            let [w, b, vw, vb] = outs else {
                return Err(NetError::backend(name, "expected four parameter buffers"));
            };
            expect_len(name, w, n_out * n_in)?;
            expect_len(name, vw, n_out * n_in)?;
            expect_len(name, b, n_out)?;
            expect_len(name, vb, n_out)?;

            planar(work, |i, j| {
                if i >= n_out || j >= n_in {
                    return;
                }
                let mut gradient = 0.0;
                for sample in 0..batch {
                    gradient += d[sample * n_out + i] * x[sample * n_in + j];
                }
                let k = i * n_in + j;
                vw[k] = momentum * vw[k] - learning_rate * gradient;
                w[k] += vw[k];

                if j == 0 {
                    let mut gradient = 0.0;
                    for sample in 0..batch {
                        gradient += d[sample * n_out + i];
                    }
                    vb[i] = momentum * vb[i] - learning_rate * gradient;
                    b[i] += vb[i];
                }
            });
            Ok(())
        }),

        Kernel::ZeroPad { padded, input, width, height, depth, padding, batch } => {
            memory.with_outputs(&[padded], |mem, outs| {
                let x = mem.floats(input)?;
                let units = width * height * depth;
                expect_len(name, x, batch * units)?;
                let (pw, ph) = (width + 2 * padding, height + 2 * padding);
                let target = &mut outs[0];
                expect_len(name, target, batch * pw * ph * depth)?;
                linear(work, |gid| {
                    if gid >= batch * units {
                        return;
                    }
                    let col = gid % width;
                    let row = (gid / width) % height;
                    let channel = (gid / (width * height)) % depth;
                    let sample = gid / units;
                    let at = sample * pw * ph * depth + channel * pw * ph + (row + padding) * pw + col + padding;
                    target[at] = x[gid];
                });
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
            let table = lookup_entries(name, mem, lookup, field_size, n_positions, padded_size)?;
            let x = mem.floats(padded_input)?;
            let w = mem.floats(weights)?;
            let b = mem.floats(biases)?;
            expect_len(name, x, batch * padded_size)?;
            expect_len(name, w, n_filters * field_size)?;
            expect_len(name, b, n_filters)?;
            let y = &mut outs[0];
            expect_len(name, y, batch * n_filters * n_positions)?;

            planar(work, |f, q| {
                if f >= n_filters || q >= batch * n_positions {
                    return;
                }
                let (sample, p) = (q / n_positions, q % n_positions);
                let base = sample * padded_size;
                let mut sum = b[f];
                for r in 0..field_size {
                    sum += w[f * field_size + r] * x[base + table[r * n_positions + p] as usize];
                }
                y[(sample * n_filters + f) * n_positions + p] = sum;
            });
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
            let d = mem.floats(output_delta)?;
            let w = mem.floats(weights)?;
            expect_len(name, d, batch * n_filters * n_positions)?;
            expect_len(name, w, n_filters * field_size)?;
            let g = &mut outs[0];
            expect_len(name, g, batch * field_size * n_positions)?;

            planar(work, |r, q| {
                if r >= field_size || q >= batch * n_positions {
                    return;
                }
                let (sample, p) = (q / n_positions, q % n_positions);
                let mut sum = 0.0;
                for f in 0..n_filters {
                    sum += w[f * field_size + r] * d[(sample * n_filters + f) * n_positions + p];
                }
                g[(sample * field_size + r) * n_positions + p] = sum;
            });
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
            let table = lookup_entries(name, mem, lookup, field_size, n_positions, padded_size)?;
            let g = mem.floats(patch_delta)?;
            expect_len(name, g, batch * field_size * n_positions)?;
            let target = &mut outs[0];
            expect_len(name, target, batch * padded_size)?;

            linear(work, |sample| {
                if sample >= batch {
                    return;
                }
                let row = &mut target[sample * padded_size..(sample + 1) * padded_size];
                row.fill(0.0);
                for r in 0..field_size {
                    for p in 0..n_positions {
                        row[table[r * n_positions + p] as usize] += g[(sample * field_size + r) * n_positions + p];
                    }
                }
            });
            Ok(())
        }),

        Kernel::Unpad { input_delta, padded_delta, width, height, depth, padding, batch } => {
            memory.with_outputs(&[input_delta], |mem, outs| {
                let source = mem.floats(padded_delta)?;
                let units = width * height * depth;
                let (pw, ph) = (width + 2 * padding, height + 2 * padding);
                expect_len(name, source, batch * pw * ph * depth)?;
                let dx = &mut outs[0];
                expect_len(name, dx, batch * units)?;
                linear(work, |gid| {
                    if gid >= batch * units {
                        return;
                    }
                    let col = gid % width;
                    let row = (gid / width) % height;
                    let channel = (gid / (width * height)) % depth;
                    let sample = gid / units;
                    dx[gid] = source[sample * pw * ph * depth + channel * pw * ph + (row + padding) * pw + col + padding];
                });
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
            let table = lookup_entries(name, mem, lookup, field_size, n_positions, padded_size)?;
            let x = mem.floats(padded_input)?;
            let d = mem.floats(output_delta)?;
            expect_len(name, x, batch * padded_size)?;
            expect_len(name, d, batch * n_filters * n_positions)?;
            let [w, b, vw, vb] = outs else {
                return Err(NetError::backend(name, "expected four parameter buffers"));
            };
            expect_len(name, w, n_filters * field_size)?;
            expect_len(name, vw, n_filters * field_size)?;
            expect_len(name, b, n_filters)?;
            expect_len(name, vb, n_filters)?;

            planar(work, |f, r| {
                if f >= n_filters || r >= field_size {
                    return;
                }
                let mut gradient = 0.0;
                for sample in 0..batch {
                    let delta = &d[(sample * n_filters + f) * n_positions..(sample * n_filters + f + 1) * n_positions];
                    for (p, &dp) in delta.iter().enumerate() {
                        gradient += dp * x[sample * padded_size + table[r * n_positions + p] as usize];
                    }
                }
                let k = f * field_size + r;
                vw[k] = momentum * vw[k] - learning_rate * gradient;
                w[k] += vw[k];

                if r == 0 {
                    let mut gradient = 0.0;
                    for sample in 0..batch {
                        let start = (sample * n_filters + f) * n_positions;
                        gradient += d[start..start + n_positions].iter().sum::<f32>();
                    }
                    vb[f] = momentum * vb[f] - learning_rate * gradient;
                    b[f] += vb[f];
                }
            });
            Ok(())
        }),

        Kernel::SoftmaxForward { output, input, units, batch } => {
            memory.with_outputs(&[output], |mem, outs| {
                let x = mem.floats(input)?;
                expect_len(name, x, batch * units)?;
                let y = &mut outs[0];
                expect_len(name, y, batch * units)?;
                linear(work, |sample| {
                    if sample >= batch {
                        return;
                    }
                    let row = &x[sample * units..(sample + 1) * units];
                    let max = row.iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                    let mut sum = 0.0;
                    for (k, &v) in row.iter().enumerate() {
                        let e = (v - max).exp();
                        y[sample * units + k] = e;
                        sum += e;
                    }
                    for k in 0..units {
                        y[sample * units + k] /= sum;
                    }
                });
                Ok(())
            })
        }
    }
}
