use crate::config::WebSrcConfig;

/// Snapshot of the fields the watermark policy looks at.
#[derive(Debug, Clone, Copy)]
pub struct QueueSnapshot {
    pub size: Option<u64>,
    pub is_seekable: bool,
    pub is_eos: bool,
    pub queued: u64,
    pub read_position: u64,
    pub is_ready: bool,
}

/// Watermark policy deciding when to pause and resume the network load so that at most a small
/// fraction of a large, seekable resource sits in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackpressureGovernor {
    small_resource_max_size: u64,
    high_water_basis_points: u32,
    low_water_percent: u32,
    suspended: bool,
}

impl BackpressureGovernor {
    pub fn new(config: &WebSrcConfig) -> Self {
        Self {
            small_resource_max_size: config.small_resource_max_size,
            high_water_basis_points: config.high_water_basis_points,
            low_water_percent: config.low_water_percent,
            suspended: false,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn high_watermark(&self, size: u64) -> u64 {
        (size as u128 * self.high_water_basis_points as u128 / 10_000) as u64
    }

    pub fn low_watermark(&self, size: u64) -> u64 {
        (self.high_watermark(size) as u128 * self.low_water_percent as u128 / 100) as u64
    }

    /// Only large seekable resources of known size can be paused and restarted at an offset.
    fn throttleable(&self, snapshot: &QueueSnapshot) -> Option<u64> {
        let size = snapshot.size?;
        if !snapshot.is_seekable || size <= self.small_resource_max_size {
            return None;
        }
        Some(size)
    }

    pub fn should_suspend(&self, snapshot: &QueueSnapshot) -> bool {
        if self.suspended {
            tracing::trace!("download already suspended");
            return false;
        }

        let Some(size) = self.throttleable(snapshot) else {
            tracing::trace!("download cannot be stopped/restarted");
            return false;
        };

        if snapshot.queued < self.high_watermark(size) {
            tracing::trace!("queue size {} under high watermark, not stopping download", snapshot.queued);
            return false;
        }

        if snapshot.read_position >= size {
            tracing::trace!("just downloaded the last chunk in the file, load is about to finish");
            return false;
        }

        true
    }

    pub fn should_resume(&self, snapshot: &QueueSnapshot) -> bool {
        if !self.suspended {
            return false;
        }

        let Some(size) = self.throttleable(snapshot) else {
            tracing::trace!("download cannot be stopped/restarted");
            return false;
        };

        if snapshot.is_eos
            || snapshot.read_position == 0
            || snapshot.read_position == size
            || !snapshot.is_ready
        {
            tracing::trace!("can't restart download at read position {}", snapshot.read_position);
            return false;
        }

        if snapshot.queued >= self.low_watermark(size) {
            tracing::trace!("queue size {} above low watermark, not restarting download", snapshot.queued);
            return false;
        }

        true
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }
}
