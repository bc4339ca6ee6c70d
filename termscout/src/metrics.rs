use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks work and device-resource counters across a run.
///
/// Clones share the same counters, so one instance can be handed to every
/// counter in a harness and read back at the end.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    // Input
    bytes_loaded: Arc<AtomicU64>,
    lines_read: Arc<AtomicU64>,

    // Parallel units
    units_dispatched: Arc<AtomicU64>,
    units_failed: Arc<AtomicU64>,

    // Device resources
    handles_acquired: Arc<AtomicU64>,
    handles_released: Arc<AtomicU64>,
    work_items_launched: Arc<AtomicU64>,
}

impl PipelineMetrics {
    /// Creates a new PipelineMetrics instance
    pub fn new() -> Self {
        Self {
            bytes_loaded: Arc::new(AtomicU64::new(0)),
            lines_read: Arc::new(AtomicU64::new(0)),
            units_dispatched: Arc::new(AtomicU64::new(0)),
            units_failed: Arc::new(AtomicU64::new(0)),
            handles_acquired: Arc::new(AtomicU64::new(0)),
            handles_released: Arc::new(AtomicU64::new(0)),
            work_items_launched: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records corpus bytes pulled into memory or streamed
    pub fn record_load(&self, bytes: u64, lines: u64) {
        let total = self.bytes_loaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.lines_read.fetch_add(lines, Ordering::Relaxed);
        debug!("Corpus loaded: {} bytes, total: {} bytes", bytes, total);
    }

    /// Records parallel units submitted and how many of them failed
    pub fn record_units(&self, dispatched: u64, failed: u64) {
        self.units_dispatched
            .fetch_add(dispatched, Ordering::Relaxed);
        self.units_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Records acquisition of one device handle
    pub fn record_acquire(&self) {
        self.handles_acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// Records release of one device handle
    pub fn record_release(&self) {
        self.handles_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a kernel launch of `work_items` work-items
    pub fn record_launch(&self, work_items: u64) {
        self.work_items_launched
            .fetch_add(work_items, Ordering::Relaxed);
    }

    /// Device handles acquired but not yet released
    pub fn outstanding_handles(&self) -> u64 {
        self.handles_acquired
            .load(Ordering::Relaxed)
            .saturating_sub(self.handles_released.load(Ordering::Relaxed))
    }

    /// Gets the current counters
    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            bytes_loaded: self.bytes_loaded.load(Ordering::Relaxed),
            lines_read: self.lines_read.load(Ordering::Relaxed),
            units_dispatched: self.units_dispatched.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            handles_acquired: self.handles_acquired.load(Ordering::Relaxed),
            handles_released: self.handles_released.load(Ordering::Relaxed),
            work_items_launched: self.work_items_launched.load(Ordering::Relaxed),
        }
    }

    /// Logs the current counters
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Pipeline stats:\n\
             Bytes loaded: {}\n\
             Lines read: {}\n\
             Parallel units dispatched/failed: {}/{}\n\
             Device handles acquired/released: {}/{}\n\
             Device work-items launched: {}",
            stats.bytes_loaded,
            stats.lines_read,
            stats.units_dispatched,
            stats.units_failed,
            stats.handles_acquired,
            stats.handles_released,
            stats.work_items_launched
        );
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`PipelineMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub bytes_loaded: u64,
    pub lines_read: u64,
    pub units_dispatched: u64,
    pub units_failed: u64,
    pub handles_acquired: u64,
    pub handles_released: u64,
    pub work_items_launched: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_tracking() {
        let metrics = PipelineMetrics::new();

        metrics.record_load(1000, 10);
        metrics.record_load(500, 5);
        let stats = metrics.get_stats();
        assert_eq!(stats.bytes_loaded, 1500);
        assert_eq!(stats.lines_read, 15);
    }

    #[test]
    fn test_handle_balance() {
        let metrics = PipelineMetrics::new();

        metrics.record_acquire();
        metrics.record_acquire();
        assert_eq!(metrics.outstanding_handles(), 2);

        metrics.record_release();
        metrics.record_release();
        assert_eq!(metrics.outstanding_handles(), 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = PipelineMetrics::new();
        let clone = metrics.clone();

        clone.record_units(8, 1);
        clone.record_launch(4096);
        let stats = metrics.get_stats();
        assert_eq!(stats.units_dispatched, 8);
        assert_eq!(stats.units_failed, 1);
        assert_eq!(stats.work_items_launched, 4096);
    }
}
