//! Constants for kernel dispatch

/// Preferred work-group size for one-dimensional launches
pub const PREFERRED_LINEAR_GROUP: usize = 64;

/// Preferred work-group edge for two-dimensional launches
pub const PREFERRED_PLANAR_GROUP: usize = 16;

/// Simulated accelerator specifications
pub const SIMULATED_MAX_WORK_GROUP_SIZE: usize = 256;
pub const SIMULATED_MAX_WORK_ITEM_SIZES: [usize; 3] = [256, 256, 64];
pub const SIMULATED_COMPUTE_UNITS: u32 = 16;

/// Host loops have no work-group constraint
pub const HOST_MAX_WORK_GROUP_SIZE: usize = 1024;
pub const HOST_MAX_WORK_ITEM_SIZES: [usize; 3] = [1024, 1024, 1024];
