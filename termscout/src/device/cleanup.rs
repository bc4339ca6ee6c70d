use tracing::{trace, warn};

use super::backend::{ComputeBackend, Handle};
use crate::errors::DeviceResult;
use crate::metrics::PipelineMetrics;

/// Owns every handle acquired during one device invocation.
///
/// Handles are released in the reverse order of acquisition when the stack
/// is dropped, whichever way the invocation leaves: success, `?` on a failed
/// stage, or unwinding.
pub struct ResourceStack<'a, B: ComputeBackend + ?Sized> {
    backend: &'a mut B,
    metrics: &'a PipelineMetrics,
    held: Vec<Handle>,
}

impl<'a, B: ComputeBackend + ?Sized> ResourceStack<'a, B> {
    pub fn new(backend: &'a mut B, metrics: &'a PipelineMetrics) -> Self {
        Self {
            backend,
            metrics,
            held: Vec::new(),
        }
    }

    /// Runs one acquisition stage and takes ownership of the handle it yields
    pub fn acquire<F>(&mut self, stage: F) -> DeviceResult<Handle>
    where
        F: FnOnce(&mut B) -> DeviceResult<Handle>,
    {
        let handle = stage(&mut *self.backend)?;
        trace!("Acquired {}", handle);
        self.metrics.record_acquire();
        self.held.push(handle);
        Ok(handle)
    }

    /// The backend, for calls that allocate nothing
    pub fn backend(&mut self) -> &mut B {
        &mut *self.backend
    }

    pub fn held(&self) -> &[Handle] {
        &self.held
    }

    /// Releases everything still held, newest first. Returns how many
    /// releases the backend rejected.
    pub fn release_all(&mut self) -> usize {
        let mut rejected = 0;
        while let Some(handle) = self.held.pop() {
            match self.backend.release(handle) {
                Ok(()) => {
                    trace!("Released {}", handle);
                    self.metrics.record_release();
                }
                Err(e) => {
                    warn!("Failed to release {}: {}", handle, e);
                    rejected += 1;
                }
            }
        }
        rejected
    }
}

impl<B: ComputeBackend + ?Sized> Drop for ResourceStack<'_, B> {
    fn drop(&mut self) {
        self.release_all();
    }
}
