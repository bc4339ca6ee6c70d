use rayon::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, trace};

use super::backend::{
    BufferSpec, ComputeBackend, DeviceClass, DeviceId, DeviceInfo, Handle, KernelArgs, PlatformId,
    PlatformInfo, ResourceKind,
};
use super::match_at;
use crate::errors::{DeviceError, DeviceResult};

const PLATFORM_NAME: &str = "termscout host emulation";

#[derive(Debug)]
enum Resource {
    Context { device: DeviceId },
    Queue,
    Program { entry_points: Vec<String> },
    Kernel { entry_point: String },
    Bytes(Vec<u8>),
    Ints(Vec<i32>),
}

/// A compute backend that runs on the host.
///
/// It hands out real handles, tracks every live resource, validates kernel
/// sources for an entry point and executes the counting kernel with rayon.
/// Whatever entry point is requested, a launch computes what the bundled
/// `count_term` kernel computes.
#[derive(Debug)]
pub struct EmulatedBackend {
    platform_available: bool,
    devices: Vec<(String, DeviceClass)>,
    resources: HashMap<u64, Resource>,
    next_id: u64,
}

impl EmulatedBackend {
    /// One platform with a single emulated GPU
    pub fn new() -> Self {
        Self::with_devices(vec![("Emulated GPU".to_string(), DeviceClass::Gpu)])
    }

    /// One platform exposing exactly `devices`
    pub fn with_devices(devices: Vec<(String, DeviceClass)>) -> Self {
        Self {
            platform_available: true,
            devices,
            resources: HashMap::new(),
            next_id: 0,
        }
    }

    /// No platform at all
    pub fn unavailable() -> Self {
        Self {
            platform_available: false,
            ..Self::with_devices(Vec::new())
        }
    }

    /// Resources created and not yet released
    pub fn live_resources(&self) -> usize {
        self.resources.len()
    }

    fn insert(&mut self, kind: ResourceKind, resource: Resource) -> Handle {
        self.next_id += 1;
        self.resources.insert(self.next_id, resource);
        Handle::new(kind, self.next_id)
    }

    fn get(&self, handle: Handle, kind: ResourceKind) -> DeviceResult<&Resource> {
        if handle.kind != kind {
            return Err(DeviceError::UnknownHandle(format!(
                "{} is not a {:?}",
                handle, kind
            )));
        }
        self.resources
            .get(&handle.id)
            .ok_or_else(|| DeviceError::UnknownHandle(handle.to_string()))
    }

    fn bytes(&self, handle: Handle) -> DeviceResult<&[u8]> {
        match self.get(handle, ResourceKind::Buffer)? {
            Resource::Bytes(data) => Ok(data),
            _ => Err(DeviceError::Launch(format!("{} is not a byte buffer", handle))),
        }
    }

    fn check_device(&self, device: DeviceId) -> DeviceResult<()> {
        if device.0 < self.devices.len() {
            Ok(())
        } else {
            Err(DeviceError::Context(format!("no device with index {}", device.0)))
        }
    }
}

impl Default for EmulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry points declared in an OpenCL C source
fn entry_points(source: &str) -> DeviceResult<Vec<String>> {
    let pattern = Regex::new(r"(?m)\b(?:__)?kernel\s+void\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(")
        .map_err(|e| DeviceError::Build { log: e.to_string() })?;
    Ok(pattern
        .captures_iter(source)
        .map(|caps| caps[1].to_string())
        .collect())
}

impl ComputeBackend for EmulatedBackend {
    fn name(&self) -> &str {
        "emulated"
    }

    fn platforms(&mut self) -> DeviceResult<Vec<PlatformInfo>> {
        if !self.platform_available {
            return Ok(Vec::new());
        }
        Ok(vec![PlatformInfo {
            id: PlatformId(0),
            name: PLATFORM_NAME.to_string(),
        }])
    }

    fn devices(&mut self, platform: PlatformId) -> DeviceResult<Vec<DeviceInfo>> {
        if !self.platform_available || platform.0 != 0 {
            return Err(DeviceError::NoPlatform);
        }
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(i, (name, class))| DeviceInfo {
                id: DeviceId(i),
                name: name.clone(),
                class: *class,
            })
            .collect())
    }

    fn create_context(&mut self, device: DeviceId) -> DeviceResult<Handle> {
        self.check_device(device)?;
        Ok(self.insert(ResourceKind::Context, Resource::Context { device }))
    }

    fn create_queue(&mut self, context: Handle, device: DeviceId) -> DeviceResult<Handle> {
        match self.get(context, ResourceKind::Context) {
            Ok(Resource::Context { device: owner }) if *owner == device => {}
            Ok(_) => {
                return Err(DeviceError::Queue(format!(
                    "device {} does not belong to {}",
                    device.0, context
                )))
            }
            Err(e) => return Err(DeviceError::Queue(e.to_string())),
        }
        Ok(self.insert(ResourceKind::Queue, Resource::Queue))
    }

    fn build_program(&mut self, context: Handle, source: &str) -> DeviceResult<Handle> {
        self.get(context, ResourceKind::Context)
            .map_err(|e| DeviceError::Build { log: e.to_string() })?;
        let entry_points = entry_points(source)?;
        if entry_points.is_empty() {
            return Err(DeviceError::Build {
                log: "error: no __kernel function defined in program source".to_string(),
            });
        }
        debug!("Built emulated program with entry points {:?}", entry_points);
        Ok(self.insert(
            ResourceKind::Program,
            Resource::Program { entry_points },
        ))
    }

    fn create_kernel(&mut self, program: Handle, entry_point: &str) -> DeviceResult<Handle> {
        let known = match self.get(program, ResourceKind::Program) {
            Ok(Resource::Program { entry_points }) => {
                entry_points.iter().any(|e| e == entry_point)
            }
            Ok(_) => false,
            Err(e) => return Err(DeviceError::Kernel(e.to_string())),
        };
        if !known {
            return Err(DeviceError::Kernel(format!(
                "no kernel named '{}' in program",
                entry_point
            )));
        }
        Ok(self.insert(
            ResourceKind::Kernel,
            Resource::Kernel {
                entry_point: entry_point.to_string(),
            },
        ))
    }

    fn create_buffer(&mut self, context: Handle, spec: BufferSpec<'_>) -> DeviceResult<Handle> {
        self.get(context, ResourceKind::Context)
            .map_err(|e| DeviceError::Buffer(e.to_string()))?;
        let resource = match spec {
            BufferSpec::ReadOnlyBytes(data) if data.is_empty() => {
                return Err(DeviceError::Buffer("zero-sized buffer".to_string()))
            }
            BufferSpec::WriteOnlyInts(0) => {
                return Err(DeviceError::Buffer("zero-sized buffer".to_string()))
            }
            BufferSpec::ReadOnlyBytes(data) => Resource::Bytes(data.to_vec()),
            BufferSpec::WriteOnlyInts(len) => Resource::Ints(vec![0; len]),
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
        self.get(queue, ResourceKind::Queue)
            .map_err(|e| DeviceError::Launch(e.to_string()))?;
        if let Resource::Kernel { entry_point } = self
            .get(kernel, ResourceKind::Kernel)
            .map_err(|e| DeviceError::Launch(e.to_string()))?
        {
            trace!("Launching {} over {} work-items", entry_point, global_work_size);
        }

        let (text_len, pattern_len) = match (
            usize::try_from(args.text_len),
            usize::try_from(args.pattern_len),
        ) {
            (Ok(t), Ok(p)) => (t, p),
            _ => {
                return Err(DeviceError::Launch(
                    "negative length argument".to_string(),
                ))
            }
        };

        let text = self.bytes(args.text)?;
        let pattern = self.bytes(args.pattern)?;
        if text_len > text.len() || pattern_len > pattern.len() {
            return Err(DeviceError::Launch(
                "length argument exceeds buffer size".to_string(),
            ));
        }
        let text = &text[..text_len];
        let pattern = &pattern[..pattern_len];

        let results: Vec<i32> = (0..global_work_size)
            .into_par_iter()
            .map(|offset| {
                if offset < text_len {
                    match_at(text, pattern, offset)
                } else {
                    0
                }
            })
            .collect();

        match self.resources.get_mut(&args.output.id) {
            Some(Resource::Ints(out)) if args.output.kind == ResourceKind::Buffer => {
                if out.len() < global_work_size {
                    return Err(DeviceError::Launch(format!(
                        "output buffer holds {} slots, {} work-items launched",
                        out.len(),
                        global_work_size
                    )));
                }
                out[..global_work_size].copy_from_slice(&results);
                Ok(())
            }
            _ => Err(DeviceError::Launch(format!(
                "{} is not an output buffer",
                args.output
            ))),
        }
    }

    fn read_output(&mut self, queue: Handle, buffer: Handle, out: &mut [i32]) -> DeviceResult<()> {
        self.get(queue, ResourceKind::Queue)
            .map_err(|e| DeviceError::ReadBack(e.to_string()))?;
        match self.get(buffer, ResourceKind::Buffer) {
            Ok(Resource::Ints(data)) if data.len() >= out.len() => {
                out.copy_from_slice(&data[..out.len()]);
                Ok(())
            }
            Ok(_) => Err(DeviceError::ReadBack(format!(
                "{} cannot fill {} slots",
                buffer,
                out.len()
            ))),
            Err(e) => Err(DeviceError::ReadBack(e.to_string())),
        }
    }

    fn release(&mut self, handle: Handle) -> DeviceResult<()> {
        self.get(handle, handle.kind)?;
        if let Some(resource) = self.resources.remove(&handle.id) {
            trace!("Released emulated {:?}", resource_name(&resource));
        }
        Ok(())
    }
}

fn resource_name(resource: &Resource) -> &'static str {
    match resource {
        Resource::Context { .. } => "context",
        Resource::Queue => "queue",
        Resource::Program { .. } => "program",
        Resource::Kernel { .. } => "kernel",
        Resource::Bytes(_) | Resource::Ints(_) => "buffer",
    }
}
