use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::DeviceResult;

/// Class of compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Gpu,
    Cpu,
    Accelerator,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceClass::Gpu => "gpu",
            DeviceClass::Cpu => "cpu",
            DeviceClass::Accelerator => "accelerator",
        })
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceClass::Gpu),
            "cpu" => Ok(DeviceClass::Cpu),
            "accelerator" => Ok(DeviceClass::Accelerator),
            other => Err(format!(
                "unknown device class '{}' (expected gpu, cpu or accelerator)",
                other
            )),
        }
    }
}

/// Index of a platform within its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformId(pub usize);

/// Index of a device within its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub id: PlatformId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub class: DeviceClass,
}

/// Kinds of resources a backend hands out and must later release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
}

/// Opaque reference to a backend-owned resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: ResourceKind,
    pub id: u64,
}

impl Handle {
    pub fn new(kind: ResourceKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

/// What to allocate in `create_buffer`
#[derive(Debug, Clone, Copy)]
pub enum BufferSpec<'a> {
    /// Read-only bytes initialised from host memory
    ReadOnlyBytes(&'a [u8]),
    /// Write-only `i32` slots, uninitialised
    WriteOnlyInts(usize),
}

/// The five arguments of the counting kernel, in signature order
#[derive(Debug, Clone, Copy)]
pub struct KernelArgs {
    pub text: Handle,
    pub pattern: Handle,
    pub output: Handle,
    pub text_len: i32,
    pub pattern_len: i32,
}

/// A source of compute devices.
///
/// Every `create_*`/`build_*` call hands out a [`Handle`] the caller owns
/// until it passes it back to [`release`](ComputeBackend::release). Platform
/// and device enumeration allocate nothing that needs releasing.
pub trait ComputeBackend {
    /// Short name for logs
    fn name(&self) -> &str;

    fn platforms(&mut self) -> DeviceResult<Vec<PlatformInfo>>;

    fn devices(&mut self, platform: PlatformId) -> DeviceResult<Vec<DeviceInfo>>;

    fn create_context(&mut self, device: DeviceId) -> DeviceResult<Handle>;

    fn create_queue(&mut self, context: Handle, device: DeviceId) -> DeviceResult<Handle>;

    /// Compiles `source`. Failures carry the compiler's build log.
    fn build_program(&mut self, context: Handle, source: &str) -> DeviceResult<Handle>;

    fn create_kernel(&mut self, program: Handle, entry_point: &str) -> DeviceResult<Handle>;

    fn create_buffer(&mut self, context: Handle, spec: BufferSpec<'_>) -> DeviceResult<Handle>;

    /// Enqueues `global_work_size` work-items and blocks until they finish
    fn launch(
        &mut self,
        queue: Handle,
        kernel: Handle,
        args: &KernelArgs,
        global_work_size: usize,
    ) -> DeviceResult<()>;

    /// Blocking read of an `i32` buffer into `out`
    fn read_output(&mut self, queue: Handle, buffer: Handle, out: &mut [i32]) -> DeviceResult<()>;

    fn release(&mut self, handle: Handle) -> DeviceResult<()>;
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn platforms(&mut self) -> DeviceResult<Vec<PlatformInfo>> {
        (**self).platforms()
    }

    fn devices(&mut self, platform: PlatformId) -> DeviceResult<Vec<DeviceInfo>> {
        (**self).devices(platform)
    }

    fn create_context(&mut self, device: DeviceId) -> DeviceResult<Handle> {
        (**self).create_context(device)
    }

    fn create_queue(&mut self, context: Handle, device: DeviceId) -> DeviceResult<Handle> {
        (**self).create_queue(context, device)
    }

    fn build_program(&mut self, context: Handle, source: &str) -> DeviceResult<Handle> {
        (**self).build_program(context, source)
    }

    fn create_kernel(&mut self, program: Handle, entry_point: &str) -> DeviceResult<Handle> {
        (**self).create_kernel(program, entry_point)
    }

    fn create_buffer(&mut self, context: Handle, spec: BufferSpec<'_>) -> DeviceResult<Handle> {
        (**self).create_buffer(context, spec)
    }

    fn launch(
        &mut self,
        queue: Handle,
        kernel: Handle,
        args: &KernelArgs,
        global_work_size: usize,
    ) -> DeviceResult<()> {
        (**self).launch(queue, kernel, args, global_work_size)
    }

    fn read_output(&mut self, queue: Handle, buffer: Handle, out: &mut [i32]) -> DeviceResult<()> {
        (**self).read_output(queue, buffer, out)
    }

    fn release(&mut self, handle: Handle) -> DeviceResult<()> {
        (**self).release(handle)
    }
}
