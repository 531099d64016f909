//! Metrics and observability for video_meta

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::backend::BackendKind;

/// Global metrics collector
#[derive(Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-operation counters
    pub apply_count: AtomicU64,
    pub strip_count: AtomicU64,
    pub read_count: AtomicU64,
    pub preview_count: AtomicU64,
    pub profile_count: AtomicU64,

    // Per-backend counters
    pub ffmpeg_count: AtomicU64,
    pub exiftool_count: AtomicU64,
    pub mp4tags_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, op: &str, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        // Increment operation-specific counter
        match op {
            "metadata.apply" => self.apply_count.fetch_add(1, Ordering::Relaxed),
            "metadata.strip" => self.strip_count.fetch_add(1, Ordering::Relaxed),
            "metadata.read" => self.read_count.fetch_add(1, Ordering::Relaxed),
            "metadata.preview" => self.preview_count.fetch_add(1, Ordering::Relaxed),
            "profiles.list" | "profiles.show" => self.profile_count.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// Count one write that reached a backend
    pub fn record_backend(&self, backend: BackendKind) {
        let counter = match backend {
            BackendKind::Ffmpeg => &self.ffmpeg_count,
            BackendKind::ExifTool => &self.exiftool_count,
            BackendKind::Mp4Tags => &self.mp4tags_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            operations: OperationMetrics {
                metadata_apply: self.apply_count.load(Ordering::Relaxed),
                metadata_strip: self.strip_count.load(Ordering::Relaxed),
                metadata_read: self.read_count.load(Ordering::Relaxed),
                metadata_preview: self.preview_count.load(Ordering::Relaxed),
                profiles: self.profile_count.load(Ordering::Relaxed),
            },
            backends: BackendMetrics {
                ffmpeg: self.ffmpeg_count.load(Ordering::Relaxed),
                exiftool: self.exiftool_count.load(Ordering::Relaxed),
                mp4tags: self.mp4tags_count.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub operations: OperationMetrics,
    pub backends: BackendMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub metadata_apply: u64,
    pub metadata_strip: u64,
    pub metadata_read: u64,
    pub metadata_preview: u64,
    pub profiles: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub ffmpeg: u64,
    pub exiftool: u64,
    pub mp4tags: u64,
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
