use log::{info, trace, warn};
use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::DeviceType as OclDeviceType;
use ocl::{Buffer, Context, Device, Platform, Program, Queue, SpatialDims};

use super::{BufferId, ComputeBackend, DeviceLimits, DeviceType, Kernel, KernelArg, WorkSize};
use crate::error::{NetError, Result};

impl From<ocl::Error> for NetError {
    fn from(err: ocl::Error) -> Self {
        NetError::backend("opencl", err.to_string())
    }
}

enum DeviceBuffer {
    Float(Buffer<f32>),
    Index(Buffer<u32>),
}

/// GPU backend using OpenCL
pub struct OpenClBackend {
    queue: Queue,
    device: Device,
    device_type: DeviceType,
    program: Program,
    limits: DeviceLimits,
    buffers: Vec<DeviceBuffer>,
}

impl OpenClBackend {
    /// Create a backend on the best available device, preferring Intel, then
    /// NVIDIA, then AMD GPUs, then any GPU, then an OpenCL CPU device
    pub fn new() -> Result<Self> {
        let (platform, device, device_type) = Self::find_best_device()?;

        let context = Context::builder().platform(platform).devices(device).build()?;
        let queue = Queue::new(&context, device, None)?;
        let program = Program::builder()
            .source(include_str!("kernels.cl"))
            .devices(device)
            .build(&context)?;

        let max_work_group_size = device.max_wg_size()?;
        let max_work_item_sizes = match device.info(DeviceInfo::MaxWorkItemSizes)? {
            DeviceInfoResult::MaxWorkItemSizes(sizes) => {
                let mut dims = [1usize; 3];
                for (dim, size) in dims.iter_mut().zip(sizes) {
                    *dim = size;
                }
                dims
            }
            _ => return Err(NetError::backend("create backend", "failed to query max work item sizes")),
        };

        info!("OpenCL backend initialized on: {:?}", device_type);

        Ok(Self {
            queue,
            device,
            device_type,
            program,
            limits: DeviceLimits::new(max_work_group_size, max_work_item_sizes),
            buffers: Vec::new(),
        })
    }

    fn find_best_device() -> Result<(Platform, Device, DeviceType)> {
        let platforms = std::panic::catch_unwind(Platform::list).map_err(|_| {
            NetError::backend("create backend", "OpenCL not available. Install OpenCL drivers for your device.")
        })?;
        if platforms.is_empty() {
            return Err(NetError::backend("create backend", "no OpenCL platforms found"));
        }

        let mut candidates = Vec::new();
        for platform in &platforms {
            for device in Device::list_all(platform)? {
                if let DeviceInfoResult::Type(kind) = device.info(DeviceInfo::Type)? {
                    let vendor = device.vendor()?;
                    candidates.push((*platform, device, classify(kind, &vendor)));
                }
            }
        }

        let priority = [
            DeviceType::IntelGpu,
            DeviceType::NvidiaGpu,
            DeviceType::AmdGpu,
            DeviceType::OtherGpu,
            DeviceType::OpenClCpu,
        ];
        for wanted in priority {
            if let Some(&(platform, device, _)) = candidates.iter().find(|c| c.2 == Some(wanted)) {
                if wanted == DeviceType::OpenClCpu {
                    warn!("No GPU found, using CPU OpenCL device");
                }
                return Ok((platform, device, wanted));
            }
        }

        Err(NetError::backend("create backend", "no OpenCL device found (neither GPU nor CPU)"))
    }

    fn float_buffer(&self, id: BufferId) -> Result<&Buffer<f32>> {
        match self.buffers.get(id.index()) {
            Some(DeviceBuffer::Float(buffer)) => Ok(buffer),
            Some(DeviceBuffer::Index(_)) => Err(NetError::backend("buffer access", format!("{} does not hold float data", id))),
            None => Err(NetError::backend("buffer access", format!("unknown {}", id))),
        }
    }

    fn index_buffer(&self, id: BufferId) -> Result<&Buffer<u32>> {
        match self.buffers.get(id.index()) {
            Some(DeviceBuffer::Index(buffer)) => Ok(buffer),
            Some(DeviceBuffer::Float(_)) => Err(NetError::backend("buffer access", format!("{} does not hold index data", id))),
            None => Err(NetError::backend("buffer access", format!("unknown {}", id))),
        }
    }
}

fn classify(kind: OclDeviceType, vendor: &str) -> Option<DeviceType> {
    if kind.contains(OclDeviceType::GPU) {
        Some(if vendor.contains("Intel") {
            DeviceType::IntelGpu
        } else if vendor.contains("NVIDIA") {
            DeviceType::NvidiaGpu
        } else if vendor.contains("AMD") || vendor.contains("Advanced Micro Devices") {
            DeviceType::AmdGpu
        } else {
            DeviceType::OtherGpu
        })
    } else if kind.contains(OclDeviceType::CPU) {
        Some(DeviceType::OpenClCpu)
    } else {
        None
    }
}

fn spatial(dims: &[usize]) -> Result<SpatialDims> {
    match *dims {
        [x] => Ok(SpatialDims::One(x)),
        [x, y] => Ok(SpatialDims::Two(x, y)),
        _ => Err(NetError::backend("launch", "unsupported work dimensions")),
    }
}

impl ComputeBackend for OpenClBackend {
    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn allocate(&mut self, len: usize) -> Result<BufferId> {
        if len == 0 {
            return Err(NetError::backend("allocate", "zero-length buffers are not supported"));
        }
        let buffer = Buffer::<f32>::builder()
            .queue(self.queue.clone())
            .flags(ocl::flags::MEM_READ_WRITE)
            .len(len)
            .fill_val(0.0f32)
            .build()?;
        self.buffers.push(DeviceBuffer::Float(buffer));
        Ok(BufferId::new(self.buffers.len() - 1))
    }

    fn allocate_indices(&mut self, len: usize) -> Result<BufferId> {
        if len == 0 {
            return Err(NetError::backend("allocate", "zero-length buffers are not supported"));
        }
        let buffer = Buffer::<u32>::builder()
            .queue(self.queue.clone())
            .flags(ocl::flags::MEM_READ_ONLY)
            .len(len)
            .fill_val(0u32)
            .build()?;
        self.buffers.push(DeviceBuffer::Index(buffer));
        Ok(BufferId::new(self.buffers.len() - 1))
    }

    fn write(&mut self, buffer: BufferId, data: &[f32]) -> Result<()> {
        let target = self.float_buffer(buffer)?;
        super::check_len("write", buffer, target.len(), data.len())?;
        target.write(data).enq()?;
        Ok(())
    }

    fn write_indices(&mut self, buffer: BufferId, data: &[u32]) -> Result<()> {
        let target = self.index_buffer(buffer)?;
        super::check_len("write_indices", buffer, target.len(), data.len())?;
        target.write(data).enq()?;
        Ok(())
    }

    fn read(&self, buffer: BufferId) -> Result<Vec<f32>> {
        let source = self.float_buffer(buffer)?;
        let mut data = vec![0.0f32; source.len()];
        source.read(&mut data).enq()?;
        Ok(data)
    }

    fn launch(&mut self, kernel: &Kernel, work: &WorkSize) -> Result<()> {
        work.validate(&self.limits)?;

        let mut builder = ocl::Kernel::builder();
        builder.program(&self.program).name(kernel.name()).queue(self.queue.clone());
        for arg in kernel.args() {
            match arg {
                KernelArg::Floats(id) => {
                    builder.arg(self.float_buffer(id)?);
                }
                KernelArg::Indices(id) => {
                    builder.arg(self.index_buffer(id)?);
                }
                KernelArg::Int(value) => {
                    builder.arg(value);
                }
                KernelArg::Float(value) => {
                    builder.arg(value);
                }
            }
        }
        let compiled = builder.build()?;

        trace!("opencl launch {} global {:?} local {:?}", kernel.name(), work.global(), work.local());
        unsafe {
            compiled
                .cmd()
                .global_work_size(spatial(work.global())?)
                .local_work_size(spatial(work.local())?)
                .enq()?;
        }
        self.queue.finish()?;
        Ok(())
    }

    fn device_info(&self) -> String {
        let describe = || -> Result<String> {
            let name = self.device.name()?;
            let vendor = self.device.vendor()?;
            let version = self.device.version()?;
            let compute_units = match self.device.info(DeviceInfo::MaxComputeUnits)? {
                DeviceInfoResult::MaxComputeUnits(units) => units,
                _ => 0,
            };
            Ok(format!(
                "Device: {}\nVendor: {}\nVersion: {}\nCompute Units: {}\nMax Work Group Size: {}\nMax Work Item Sizes: {:?}",
                name,
                vendor,
                version,
                compute_units,
                self.limits.max_work_group_size,
                self.limits.max_work_item_sizes
            ))
        };
        describe().unwrap_or_else(|e| format!("OpenCL device ({:?}): {}", self.device_type, e))
    }
}
