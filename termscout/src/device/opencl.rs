use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_GPU,
};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{Buffer, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_id, cl_device_type, cl_int, CL_BLOCKING};
use std::collections::HashMap;
use std::ptr;
use tracing::{debug, trace};

use super::backend::{
    BufferSpec, ComputeBackend, DeviceClass, DeviceId, DeviceInfo, Handle, KernelArgs, PlatformId,
    PlatformInfo, ResourceKind,
};
use crate::errors::{DeviceError, DeviceResult};

enum Resource {
    Context(Context),
    Queue(CommandQueue),
    Program(Program),
    Kernel(Kernel),
    Bytes(Buffer<u8>),
    Ints(Buffer<cl_int>),
}

/// Compute backend over the system's OpenCL runtime.
///
/// Dropping a resource releases the underlying OpenCL object, so `release`
/// only has to remove it from the table.
pub struct OpenClBackend {
    platforms: Vec<Platform>,
    devices: Vec<cl_device_id>,
    resources: HashMap<u64, Resource>,
    next_id: u64,
}

impl OpenClBackend {
    pub fn new() -> Self {
        Self {
            platforms: Vec::new(),
            devices: Vec::new(),
            resources: HashMap::new(),
            next_id: 0,
        }
    }

    fn insert(&mut self, kind: ResourceKind, resource: Resource) -> Handle {
        self.next_id += 1;
        self.resources.insert(self.next_id, resource);
        Handle::new(kind, self.next_id)
    }

    fn context(&self, handle: Handle) -> DeviceResult<&Context> {
        match self.resources.get(&handle.id) {
            Some(Resource::Context(context)) => Ok(context),
            _ => Err(DeviceError::UnknownHandle(handle.to_string())),
        }
    }

    fn queue(&self, handle: Handle) -> DeviceResult<&CommandQueue> {
        match self.resources.get(&handle.id) {
            Some(Resource::Queue(queue)) => Ok(queue),
            _ => Err(DeviceError::UnknownHandle(handle.to_string())),
        }
    }

    fn bytes(&self, handle: Handle) -> DeviceResult<&Buffer<u8>> {
        match self.resources.get(&handle.id) {
            Some(Resource::Bytes(buffer)) => Ok(buffer),
            _ => Err(DeviceError::UnknownHandle(handle.to_string())),
        }
    }

    fn ints(&self, handle: Handle) -> DeviceResult<&Buffer<cl_int>> {
        match self.resources.get(&handle.id) {
            Some(Resource::Ints(buffer)) => Ok(buffer),
            _ => Err(DeviceError::UnknownHandle(handle.to_string())),
        }
    }

    fn device(&self, device: DeviceId) -> DeviceResult<Device> {
        self.devices
            .get(device.0)
            .map(|id| Device::new(*id))
            .ok_or_else(|| DeviceError::Context(format!("no device with index {}", device.0)))
    }
}

impl Default for OpenClBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(dev_type: cl_device_type) -> Option<DeviceClass> {
    if dev_type & CL_DEVICE_TYPE_GPU != 0 {
        Some(DeviceClass::Gpu)
    } else if dev_type & CL_DEVICE_TYPE_CPU != 0 {
        Some(DeviceClass::Cpu)
    } else if dev_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
        Some(DeviceClass::Accelerator)
    } else {
        None
    }
}

impl ComputeBackend for OpenClBackend {
    fn name(&self) -> &str {
        "opencl"
    }

    fn platforms(&mut self) -> DeviceResult<Vec<PlatformInfo>> {
        // A missing ICD loader reads as zero platforms
        self.platforms = get_platforms().unwrap_or_default();
        Ok(self
            .platforms
            .iter()
            .enumerate()
            .map(|(i, platform)| PlatformInfo {
                id: PlatformId(i),
                name: platform.name().unwrap_or_default().trim().to_string(),
            })
            .collect())
    }

    fn devices(&mut self, platform: PlatformId) -> DeviceResult<Vec<DeviceInfo>> {
        let platform = self
            .platforms
            .get(platform.0)
            .ok_or(DeviceError::NoPlatform)?;
        let ids = platform.get_devices(CL_DEVICE_TYPE_ALL).unwrap_or_default();

        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let device = Device::new(id);
            let Some(class) = classify(device.dev_type().unwrap_or(0)) else {
                continue;
            };
            // Selection probes every run; keep one slot per physical device
            let index = match self.devices.iter().position(|known| *known == id) {
                Some(index) => index,
                None => {
                    self.devices.push(id);
                    self.devices.len() - 1
                }
            };
            found.push(DeviceInfo {
                id: DeviceId(index),
                name: device.name().unwrap_or_default().trim().to_string(),
                class,
            });
        }
        Ok(found)
    }

    fn create_context(&mut self, device: DeviceId) -> DeviceResult<Handle> {
        let device = self.device(device)?;
        let context =
            Context::from_device(&device).map_err(|e| DeviceError::Context(e.to_string()))?;
        Ok(self.insert(ResourceKind::Context, Resource::Context(context)))
    }

    fn create_queue(&mut self, context: Handle, _device: DeviceId) -> DeviceResult<Handle> {
        let context = self
            .context(context)
            .map_err(|e| DeviceError::Queue(e.to_string()))?;
        // OpenCL 1.2 entry point; some platforms never shipped 2.0
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(context, 0)
            .map_err(|e| DeviceError::Queue(e.to_string()))?;
        Ok(self.insert(ResourceKind::Queue, Resource::Queue(queue)))
    }

    fn build_program(&mut self, context: Handle, source: &str) -> DeviceResult<Handle> {
        let context = self
            .context(context)
            .map_err(|e| DeviceError::Build { log: e.to_string() })?;
        let program = Program::create_and_build_from_source(context, source, "")
            .map_err(|log| DeviceError::Build { log })?;
        debug!("Built OpenCL program");
        Ok(self.insert(ResourceKind::Program, Resource::Program(program)))
    }

    fn create_kernel(&mut self, program: Handle, entry_point: &str) -> DeviceResult<Handle> {
        let program = match self.resources.get(&program.id) {
            Some(Resource::Program(program)) => program,
            _ => return Err(DeviceError::Kernel(program.to_string())),
        };
        let kernel = Kernel::create(program, entry_point)
            .map_err(|e| DeviceError::Kernel(format!("{}: {}", entry_point, e)))?;
        Ok(self.insert(ResourceKind::Kernel, Resource::Kernel(kernel)))
    }

    fn create_buffer(&mut self, context: Handle, spec: BufferSpec<'_>) -> DeviceResult<Handle> {
        let context = self
            .context(context)
            .map_err(|e| DeviceError::Buffer(e.to_string()))?;
        let resource = match spec {
            BufferSpec::ReadOnlyBytes(data) => {
                // COPY_HOST_PTR copies `data` during creation; the pointer is
                // not retained.
                let buffer = unsafe {
                    Buffer::<u8>::create(
                        context,
                        CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                        data.len(),
                        data.as_ptr() as *mut _,
                    )
                }
                .map_err(|e| DeviceError::Buffer(e.to_string()))?;
                Resource::Bytes(buffer)
            }
            BufferSpec::WriteOnlyInts(len) => {
                let buffer = unsafe {
                    Buffer::<cl_int>::create(context, CL_MEM_WRITE_ONLY, len, ptr::null_mut())
                }
                .map_err(|e| DeviceError::Buffer(e.to_string()))?;
                Resource::Ints(buffer)
            }
        };
        Ok(self.insert(ResourceKind::Buffer, resource))
    }

    fn launch(
        &mut self,
        queue: Handle,
        kernel: Handle,
        args: &KernelArgs,
        global_work_size: usize,
    ) -> DeviceResult<()> {
        let launch_err = |e: DeviceError| DeviceError::Launch(e.to_string());
        let queue = self.queue(queue).map_err(launch_err)?;
        let kernel = match self.resources.get(&kernel.id) {
            Some(Resource::Kernel(kernel)) => kernel,
            _ => return Err(DeviceError::Launch(kernel.to_string())),
        };
        let text = self.bytes(args.text).map_err(launch_err)?;
        let pattern = self.bytes(args.pattern).map_err(launch_err)?;
        let output = self.ints(args.output).map_err(launch_err)?;

        trace!("Enqueueing {} work-items", global_work_size);
        let event = unsafe {
            ExecuteKernel::new(kernel)
                .set_arg(text)
                .set_arg(pattern)
                .set_arg(output)
                .set_arg(&args.text_len)
                .set_arg(&args.pattern_len)
                .set_global_work_size(global_work_size)
                .enqueue_nd_range(queue)
                .map_err(|e| DeviceError::Launch(e.to_string()))?
        };
        event
            .wait()
            .map_err(|e| DeviceError::Launch(e.to_string()))
    }

    fn read_output(&mut self, queue: Handle, buffer: Handle, out: &mut [i32]) -> DeviceResult<()> {
        let read_err = |e: DeviceError| DeviceError::ReadBack(e.to_string());
        let queue = self.queue(queue).map_err(read_err)?;
        let buffer = self.ints(buffer).map_err(read_err)?;
        let event = unsafe {
            queue
                .enqueue_read_buffer(buffer, CL_BLOCKING, 0, out, &[])
                .map_err(|e| DeviceError::ReadBack(e.to_string()))?
        };
        event
            .wait()
            .map_err(|e| DeviceError::ReadBack(e.to_string()))
    }

    fn release(&mut self, handle: Handle) -> DeviceResult<()> {
        self.resources
            .remove(&handle.id)
            .map(drop)
            .ok_or_else(|| DeviceError::UnknownHandle(handle.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{list_devices, match_at, select_device, BUNDLED_KERNEL};

    #[test]
    fn test_classify() {
        assert_eq!(classify(CL_DEVICE_TYPE_GPU), Some(DeviceClass::Gpu));
        assert_eq!(classify(CL_DEVICE_TYPE_CPU), Some(DeviceClass::Cpu));
        assert_eq!(
            classify(CL_DEVICE_TYPE_ACCELERATOR),
            Some(DeviceClass::Accelerator)
        );
        assert_eq!(classify(0), None);
    }

    #[test]
    fn test_release_unknown_handle() {
        let mut backend = OpenClBackend::new();
        let result = backend.release(Handle::new(ResourceKind::Buffer, 42));
        assert!(matches!(result, Err(DeviceError::UnknownHandle(_))));
    }

    /// First device of any class, or `None` on machines without OpenCL
    fn any_device(backend: &mut OpenClBackend) -> Option<DeviceInfo> {
        let found = list_devices(backend).ok()?;
        found.into_iter().map(|(_, device)| device).next()
    }

    #[test]
    fn test_device_table_is_stable_across_selections() {
        let mut backend = OpenClBackend::new();
        let Some(first) = any_device(&mut backend) else {
            eprintln!("no OpenCL platform, skipping");
            return;
        };
        let known = backend.devices.len();
        for _ in 0..5 {
            let again = select_device(&mut backend, first.class).unwrap();
            assert_eq!(again.id, first.id);
        }
        assert_eq!(backend.devices.len(), known);
    }

    fn run_kernel(
        backend: &mut OpenClBackend,
        device: DeviceId,
        text: &[u8],
        pattern: &[u8],
    ) -> Vec<i32> {
        let context = backend.create_context(device).unwrap();
        let queue = backend.create_queue(context, device).unwrap();
        let program = backend.build_program(context, BUNDLED_KERNEL).unwrap();
        let kernel = backend.create_kernel(program, "count_term").unwrap();
        let text_buf = backend
            .create_buffer(context, BufferSpec::ReadOnlyBytes(text))
            .unwrap();
        let pattern_buf = backend
            .create_buffer(context, BufferSpec::ReadOnlyBytes(pattern))
            .unwrap();
        let output = backend
            .create_buffer(context, BufferSpec::WriteOnlyInts(text.len()))
            .unwrap();

        let args = KernelArgs {
            text: text_buf,
            pattern: pattern_buf,
            output,
            text_len: text.len() as i32,
            pattern_len: pattern.len() as i32,
        };
        backend.launch(queue, kernel, &args, text.len()).unwrap();
        let mut flags = vec![-1; text.len()];
        backend.read_output(queue, output, &mut flags).unwrap();

        for handle in [output, pattern_buf, text_buf, kernel, program, queue, context] {
            backend.release(handle).unwrap();
        }
        flags
    }

    #[test]
    fn test_bundled_kernel_agrees_with_host_reference() {
        let mut backend = OpenClBackend::new();
        let Some(device) = any_device(&mut backend) else {
            eprintln!("no OpenCL platform, skipping");
            return;
        };

        let cases: [(&[u8], &[u8]); 5] = [
            (b"the whale, the whale! whalebone white_whale", b"whale"),
            (b"whale", b"whale"),
            (b"wha", b"whale"),
            (b"cat\ncat scatter cat9 cat", b"cat"),
            (b"snake_case snake snake_", b"snake"),
        ];
        for (text, pattern) in cases {
            let flags = run_kernel(&mut backend, device.id, text, pattern);
            let expected: Vec<i32> = (0..text.len()).map(|i| match_at(text, pattern, i)).collect();
            assert_eq!(
                flags,
                expected,
                "kernel disagrees on {:?}",
                String::from_utf8_lossy(text)
            );
        }
        assert!(backend.resources.is_empty());
    }
}
