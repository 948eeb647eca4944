//! Work-group sizing for kernel launches
//!
//! The global range is rounded up to a multiple of a power-of-two base so that
//! odd element counts still get a usable group size; kernels guard against
//! work-items past the real count. The local size starts at the largest power
//! of two the device allows and is halved until it divides the global range.

use serde::{Deserialize, Serialize};

use super::constants::{PREFERRED_LINEAR_GROUP, PREFERRED_PLANAR_GROUP};
use crate::error::{NetError, Result};

/// Work-group limits reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLimits {
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 3],
}

impl DeviceLimits {
    pub fn new(max_work_group_size: usize, max_work_item_sizes: [usize; 3]) -> Self {
        DeviceLimits { max_work_group_size, max_work_item_sizes }
    }
}

/// Global and local ranges of a launch, one or two dimensional
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    dims: usize,
    global: [usize; 2],
    local: [usize; 2],
}

impl WorkSize {
    /// One work-item per element of a `count` long range
    pub fn linear(count: usize, limits: &DeviceLimits) -> Result<Self> {
        let max_local = limits.max_work_group_size.min(limits.max_work_item_sizes[0]);
        let (global, local) = fit(count, max_local, PREFERRED_LINEAR_GROUP)?;
        let work = WorkSize { dims: 1, global: [global, 1], local: [local, 1] };
        work.ensure_usable(count)?;
        Ok(work)
    }

    /// One work-item per cell of a `rows × cols` grid
    ///
    /// Rows keep up to [`PREFERRED_PLANAR_GROUP`] items of the group before
    /// columns are sized.
    pub fn planar(rows: usize, cols: usize, limits: &DeviceLimits) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(NetError::backend("work size", "empty work range"));
        }
        let max_rows = limits.max_work_group_size.min(limits.max_work_item_sizes[0]);
        if max_rows == 0 {
            return Err(NetError::backend("work size", "device allows no work-items per group"));
        }
        let row_share = previous_power_of_two(rows.min(PREFERRED_PLANAR_GROUP).min(max_rows));

        let col_budget = (limits.max_work_group_size / row_share).min(limits.max_work_item_sizes[1]);
        let (global_cols, local_cols) = fit(cols, col_budget, PREFERRED_PLANAR_GROUP)?;

        let row_budget = (limits.max_work_group_size / local_cols).min(limits.max_work_item_sizes[0]);
        let (global_rows, local_rows) = fit(rows, row_budget, PREFERRED_PLANAR_GROUP)?;

        let work = WorkSize {
            dims: 2,
            global: [global_rows, global_cols],
            local: [local_rows, local_cols],
        };
        work.ensure_usable(rows * cols)?;
        Ok(work)
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    pub fn global(&self) -> &[usize] {
        &self.global[..self.dims]
    }

    pub fn local(&self) -> &[usize] {
        &self.local[..self.dims]
    }

    /// Total work-items per group
    pub fn group_volume(&self) -> usize {
        self.local().iter().product()
    }

    /// Reject ranges a device with `limits` could not execute
    pub fn validate(&self, limits: &DeviceLimits) -> Result<()> {
        for d in 0..self.dims {
            let (global, local) = (self.global[d], self.local[d]);
            if local == 0 || global % local != 0 {
                return Err(NetError::backend(
                    "launch",
                    format!("local size {} does not divide global size {} in dimension {}", local, global, d),
                ));
            }
            if local > limits.max_work_item_sizes[d] {
                return Err(NetError::backend(
                    "launch",
                    format!(
                        "local size {} exceeds the device limit {} in dimension {}",
                        local, limits.max_work_item_sizes[d], d
                    ),
                ));
            }
        }
        if self.group_volume() > limits.max_work_group_size {
            return Err(NetError::backend(
                "launch",
                format!(
                    "work-group of {} items exceeds the device limit {}",
                    self.group_volume(),
                    limits.max_work_group_size
                ),
            ));
        }
        Ok(())
    }

    fn ensure_usable(&self, count: usize) -> Result<()> {
        if self.group_volume() == 1 && self.global().iter().product::<usize>() > 1 {
            return Err(NetError::backend(
                "work size",
                format!("no usable work-group size for {} work-items", count),
            ));
        }
        Ok(())
    }

    /// Build an explicit range, bypassing the sizing policy
    pub fn explicit(global: &[usize], local: &[usize]) -> Result<Self> {
        if global.is_empty() || global.len() > 2 || global.len() != local.len() {
            return Err(NetError::backend("work size", "expected one or two matching dimensions"));
        }
        let mut size = WorkSize { dims: global.len(), global: [1, 1], local: [1, 1] };
        size.global[..global.len()].copy_from_slice(global);
        size.local[..local.len()].copy_from_slice(local);
        Ok(size)
    }
}

fn previous_power_of_two(n: usize) -> usize {
    debug_assert!(n > 0);
    1 << (usize::BITS - 1 - n.leading_zeros())
}

fn fit(count: usize, max_local: usize, preferred: usize) -> Result<(usize, usize)> {
    if count == 0 {
        return Err(NetError::backend("work size", "empty work range"));
    }
    if max_local == 0 {
        return Err(NetError::backend("work size", "device allows no work-items per group"));
    }

    let base = previous_power_of_two(preferred.min(max_local));
    let global = count.div_ceil(base) * base;

    let mut local = previous_power_of_two(max_local.min(global));
    while global % local != 0 {
        local /= 2;
    }
    Ok((global, local))
}
