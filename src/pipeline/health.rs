//! Health counters for the relay path

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for a relay binding
///
/// All fields use atomic operations so the streaming thread can record while the
/// event loop or the caller thread reads a summary.
#[derive(Debug, Default)]
pub struct RelayHealth {
    /// Frames pushed to the display source and accepted
    pub frames_relayed: AtomicU64,

    /// Notifications for which no frame could be pulled
    pub pull_misses: AtomicU64,

    /// Frames that could not be mapped for reading
    pub map_failures: AtomicU64,

    /// Frames the display source refused (backpressure, flushing, caps)
    pub push_refusals: AtomicU64,

    /// Total bytes handed to the display source
    pub bytes_relayed: AtomicU64,

    /// Last computed frame rate, stored as `f64` bits
    last_rate: AtomicU64,
}

impl RelayHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_relayed(&self, size: usize) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_pull_miss(&self) {
        self.pull_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_map_failure(&self) {
        self.map_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_refusal(&self) {
        self.push_refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate(&self, fps: f64) {
        self.last_rate.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn frames_relayed(&self) -> u64 {
        self.frames_relayed.load(Ordering::Relaxed)
    }

    pub fn pull_misses(&self) -> u64 {
        self.pull_misses.load(Ordering::Relaxed)
    }

    pub fn map_failures(&self) -> u64 {
        self.map_failures.load(Ordering::Relaxed)
    }

    pub fn push_refusals(&self) -> u64 {
        self.push_refusals.load(Ordering::Relaxed)
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed.load(Ordering::Relaxed)
    }

    /// Frame rate of the last closed sampling window, 0 before the first one
    pub fn frame_rate(&self) -> f64 {
        f64::from_bits(self.last_rate.load(Ordering::Relaxed))
    }

    /// Calculate the refusal rate as a percentage of attempted pushes
    pub fn refusal_rate(&self) -> f64 {
        let refused = self.push_refusals();
        let attempted = refused + self.frames_relayed();
        if attempted == 0 {
            return 0.0;
        }
        (refused as f64 / attempted as f64) * 100.0
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_relayed: self.frames_relayed(),
            pull_misses: self.pull_misses(),
            map_failures: self.map_failures(),
            push_refusals: self.push_refusals(),
            bytes_relayed: self.bytes_relayed(),
            frame_rate: self.frame_rate(),
            refusal_rate: self.refusal_rate(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub frames_relayed: u64,
    pub pull_misses: u64,
    pub map_failures: u64,
    pub push_refusals: u64,
    pub bytes_relayed: u64,
    pub frame_rate: f64,
    pub refusal_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames relayed ({:.1} fps), {} refused ({:.2}%), {} pull misses, {} map failures, {} bytes",
            self.frames_relayed,
            self.frame_rate,
            self.push_refusals,
            self.refusal_rate,
            self.pull_misses,
            self.map_failures,
            self.bytes_relayed
        )
    }
}
