/// Device offload.
///
/// [`DeviceCounter`] copies the case-folded corpus to a compute device and
/// launches one work-item per byte offset. Each work-item writes 1 if a
/// whole-word match starts at its offset and 0 otherwise; the host sums the
/// read-back flags.
///
/// Devices are reached through the [`ComputeBackend`] trait. The default
/// build uses [`EmulatedBackend`], which runs the kernel on the host; with
/// the `opencl` feature the real OpenCL runtime is used instead.
///
/// Every resource acquired during an invocation is owned by a
/// [`ResourceStack`] and released in reverse order of acquisition on every
/// exit path.
///
/// Launched work cannot be cancelled. A kernel that never finishes blocks
/// the caller until the platform's own watchdog intervenes.
pub mod backend;
pub mod cleanup;
pub mod emulated;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use backend::{
    BufferSpec, ComputeBackend, DeviceClass, DeviceId, DeviceInfo, Handle, KernelArgs, PlatformId,
    PlatformInfo, ResourceKind,
};
pub use cleanup::ResourceStack;
pub use emulated::EmulatedBackend;
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, EncodingMode};
use crate::corpus::Corpus;
use crate::count::{is_word_byte, Strategy, Tally, TermCounter, TokenMatcher};
use crate::errors::{CountError, CountResult, DeviceError, DeviceResult};
use crate::metrics::PipelineMetrics;

/// Kernel source compiled when no override is configured
pub const BUNDLED_KERNEL: &str = include_str!("../../kernels/count_term.cl");

#[cfg(feature = "opencl")]
pub type DefaultBackend = OpenClBackend;
#[cfg(not(feature = "opencl"))]
pub type DefaultBackend = EmulatedBackend;

/// The backend this build talks to
pub fn default_backend() -> DefaultBackend {
    DefaultBackend::default()
}

/// Host reference for one work-item of the counting kernel.
///
/// Returns 1 if `pattern` occurs at `offset` in `text` with a non-word byte
/// (or the edge of the text) on each side.
pub fn match_at(text: &[u8], pattern: &[u8], offset: usize) -> i32 {
    let end = match offset.checked_add(pattern.len()) {
        Some(end) if end <= text.len() && !pattern.is_empty() => end,
        _ => return 0,
    };
    if &text[offset..end] != pattern {
        return 0;
    }
    if offset > 0 && is_word_byte(text[offset - 1]) {
        return 0;
    }
    if end < text.len() && is_word_byte(text[end]) {
        return 0;
    }
    1
}

/// Where the kernel source comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    Bundled,
    File(PathBuf),
}

impl KernelSource {
    pub fn from_config(path: Option<&Path>) -> Self {
        match path {
            Some(path) => KernelSource::File(path.to_path_buf()),
            None => KernelSource::Bundled,
        }
    }

    pub fn load(&self) -> CountResult<Cow<'static, str>> {
        match self {
            KernelSource::Bundled => Ok(Cow::Borrowed(BUNDLED_KERNEL)),
            KernelSource::File(path) => fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|source| CountError::KernelSource {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

/// First device of `class`, scanning platforms and devices in enumeration order
pub fn select_device<B: ComputeBackend + ?Sized>(
    backend: &mut B,
    class: DeviceClass,
) -> DeviceResult<DeviceInfo> {
    let platforms = backend.platforms()?;
    if platforms.is_empty() {
        return Err(DeviceError::NoPlatform);
    }
    for platform in platforms {
        if let Some(device) = backend
            .devices(platform.id)?
            .into_iter()
            .find(|d| d.class == class)
        {
            debug!("Selected {} device '{}' on {}", class, device.name, platform.name);
            return Ok(device);
        }
    }
    Err(DeviceError::NoDevice { class })
}

/// Every device on every platform
pub fn list_devices<B: ComputeBackend + ?Sized>(
    backend: &mut B,
) -> DeviceResult<Vec<(PlatformInfo, DeviceInfo)>> {
    let mut found = Vec::new();
    for platform in backend.platforms()? {
        for device in backend.devices(platform.id)? {
            found.push((platform.clone(), device));
        }
    }
    Ok(found)
}

/// Counts a corpus on a compute device
pub struct DeviceCounter<B> {
    backend: B,
    class: DeviceClass,
    kernel: KernelSource,
    entry_point: String,
    encoding_mode: EncodingMode,
    metrics: PipelineMetrics,
}

impl<B: ComputeBackend> DeviceCounter<B> {
    pub fn new(backend: B, config: &DeviceConfig, encoding_mode: EncodingMode) -> Self {
        Self::with_metrics(backend, config, encoding_mode, PipelineMetrics::new())
    }

    pub fn with_metrics(
        backend: B,
        config: &DeviceConfig,
        encoding_mode: EncodingMode,
        metrics: PipelineMetrics,
    ) -> Self {
        info!(
            "Device offload via {} backend on a {} device; launched kernels cannot be cancelled",
            backend.name(),
            config.class
        );
        Self {
            backend,
            class: config.class,
            kernel: KernelSource::from_config(config.kernel_path.as_deref()),
            entry_point: config.entry_point.clone(),
            encoding_mode,
            metrics,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Counts `corpus` in one device dispatch.
    ///
    /// An empty corpus returns 0 without touching the device. Any failing
    /// stage aborts the invocation; resources acquired up to that point are
    /// released before the error is returned.
    pub fn run(&mut self, corpus: &Corpus, matcher: &TokenMatcher) -> CountResult<Tally> {
        let text = corpus.load_folded(self.encoding_mode)?;
        self.metrics.record_load(text.len() as u64, 0);
        if text.is_empty() {
            debug!("{} is empty, skipping dispatch", corpus.label());
            return Ok(Tally::default());
        }

        let source = self.kernel.load()?;
        let pattern = matcher.term().as_bytes();
        let text_len = i32::try_from(text.len()).map_err(|_| {
            CountError::config_error(format!(
                "{} is {} bytes, more than a single dispatch can address",
                corpus.label(),
                text.len()
            ))
        })?;
        let pattern_len = i32::try_from(pattern.len())
            .map_err(|_| CountError::invalid_term("term too long for device offload"))?;

        let mut stack = ResourceStack::new(&mut self.backend, &self.metrics);
        let device = select_device(stack.backend(), self.class)?;
        let context = stack.acquire(|b| b.create_context(device.id))?;
        let queue = stack.acquire(|b| b.create_queue(context, device.id))?;
        let program = stack.acquire(|b| b.build_program(context, &source))?;
        let kernel = stack.acquire(|b| b.create_kernel(program, &self.entry_point))?;
        let text_buf =
            stack.acquire(|b| b.create_buffer(context, BufferSpec::ReadOnlyBytes(&text)))?;
        let pattern_buf =
            stack.acquire(|b| b.create_buffer(context, BufferSpec::ReadOnlyBytes(pattern)))?;
        let output_buf =
            stack.acquire(|b| b.create_buffer(context, BufferSpec::WriteOnlyInts(text.len())))?;

        let args = KernelArgs {
            text: text_buf,
            pattern: pattern_buf,
            output: output_buf,
            text_len,
            pattern_len,
        };
        debug!(
            "Dispatching {} work-items for '{}' in {}",
            text.len(),
            matcher.term(),
            corpus.label()
        );
        stack.backend().launch(queue, kernel, &args, text.len())?;
        self.metrics.record_launch(text.len() as u64);

        let mut flags = vec![0i32; text.len()];
        stack.backend().read_output(queue, output_buf, &mut flags)?;
        let rejected = stack.release_all();
        if rejected > 0 {
            warn!("{} device handles could not be released", rejected);
        }
        drop(stack);

        Ok(reduce_flags(&flags))
    }
}

/// Sums per-offset flags. Anything other than 0 or 1 is a misbehaving
/// work-item and is counted as a failed unit.
fn reduce_flags(flags: &[i32]) -> Tally {
    let mut tally = Tally::default();
    for &flag in flags {
        match flag {
            0 => {}
            1 => tally.occurrences += 1,
            _ => tally.failed_units += 1,
        }
    }
    if tally.failed_units > 0 {
        warn!("{} work-items returned invalid flags", tally.failed_units);
    }
    tally
}

impl<B: ComputeBackend> TermCounter for DeviceCounter<B> {
    fn strategy(&self) -> Strategy {
        Strategy::DeviceOffload
    }

    fn count(&mut self, corpus: &Corpus, matcher: &TokenMatcher) -> CountResult<Tally> {
        self.run(corpus, matcher)
    }
}
