//! Pipeline counters and rolling transform timings

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Frame counters shared between the capture thread and the controller.
#[derive(Default)]
pub struct PipelineStats {
    frames_captured: CachePadded<AtomicU64>,
    frames_dropped: CachePadded<AtomicU64>,
    frames_transformed: CachePadded<AtomicU64>,
    frames_failed: CachePadded<AtomicU64>,
    frames_published: CachePadded<AtomicU64>,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    /// Frames skipped at the source because no buffer slot was free.
    pub frames_dropped: u64,
    pub frames_transformed: u64,
    /// Frames rejected by the transform (size mismatch and the like).
    pub frames_failed: u64,
    pub frames_published: u64,
}

impl PipelineStats {
    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("edgeview_frames_captured").increment(1);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("edgeview_frames_dropped", "stage" => "source").increment(1);
    }

    pub fn record_transformed(&self, elapsed: Duration) {
        self.frames_transformed.fetch_add(1, Ordering::Relaxed);
        metrics::histogram!("edgeview_transform_us").record(elapsed.as_micros() as f64);
    }

    pub fn record_failed(&self) {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("edgeview_frames_dropped", "stage" => "transform").increment(1);
    }

    pub fn record_published(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_transformed: self.frames_transformed.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
        }
    }
}

/// Summary of the timing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSummary {
    pub samples: usize,
    pub mean_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Rolling window of the most recent transform durations.
///
/// Owned by the capture thread; the oldest sample is overwritten once the
/// window is full.
pub struct FrameTimings {
    window: HeapRb<u32>,
    sorted: Vec<u32>,
}

impl FrameTimings {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: HeapRb::new(capacity),
            sorted: Vec::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        let micros = u32::try_from(elapsed.as_micros()).unwrap_or(u32::MAX);
        self.window.push_overwrite(micros);
    }

    pub fn len(&self) -> usize {
        self.window.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&mut self) -> Option<TimingSummary> {
        if self.window.is_empty() {
            return None;
        }
        self.sorted.clear();
        self.sorted.extend(self.window.iter().copied());
        self.sorted.sort_unstable();

        let samples = self.sorted.len();
        let total: u64 = self.sorted.iter().map(|&v| u64::from(v)).sum();
        let p99_index = ((samples * 99).div_ceil(100)).saturating_sub(1);
        Some(TimingSummary {
            samples,
            mean_us: total / samples as u64,
            p99_us: u64::from(self.sorted[p99_index]),
            max_us: u64::from(self.sorted[samples - 1]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_latest_samples() {
        let mut timings = FrameTimings::new(4);
        for ms in 1..=6 {
            timings.record(Duration::from_millis(ms));
        }
        assert_eq!(timings.len(), 4);
        let summary = timings.summary().unwrap();
        assert_eq!(summary.samples, 4);
        assert_eq!(summary.max_us, 6_000);
        assert_eq!(summary.mean_us, 4_500);
    }

    #[test]
    fn p99_of_hundred_samples() {
        let mut timings = FrameTimings::new(100);
        for us in 1..=100 {
            timings.record(Duration::from_micros(us));
        }
        let summary = timings.summary().unwrap();
        assert_eq!(summary.p99_us, 99);
        assert_eq!(summary.max_us, 100);
    }

    #[test]
    fn counters_snapshot() {
        let stats = PipelineStats::default();
        stats.record_captured();
        stats.record_captured();
        stats.record_dropped();
        stats.record_published();
        let snap = stats.snapshot();
        assert_eq!(snap.frames_captured, 2);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.frames_published, 1);
        assert_eq!(snap.frames_failed, 0);
    }

    #[test]
    fn empty_window_has_no_summary() {
        assert!(FrameTimings::new(8).summary().is_none());
    }
}
