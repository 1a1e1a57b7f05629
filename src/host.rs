//! The narrow slice of the surrounding harness the driver core depends on

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Clock, runtime settings and diagnostics for the driver core
pub trait Host: Send + Sync {
    /// Current UTC time and driver-local monotonic seconds
    fn now(&self) -> (DateTime<Utc>, f64);

    /// Whether captured data should actually be written
    fn should_record(&self) -> bool;

    /// Directory new artifacts go to; may change at runtime
    fn output_directory(&self) -> PathBuf;

    /// Surface a non-fatal diagnostic upstream
    fn report(&self, message: &str);
}

/// Host for the real process: wall clock plus runtime-swappable settings
pub struct SystemHost {
    started: Instant,
    recording: AtomicBool,
    directory: ArcSwap<PathBuf>,
    diagnostics: flume::Sender<String>,
}

impl SystemHost {
    /// Returns the host and the receiving end of its diagnostics channel
    pub fn new(directory: PathBuf, recording: bool) -> (Self, flume::Receiver<String>) {
        let (diagnostics, rx) = flume::unbounded();
        let host = Self {
            started: Instant::now(),
            recording: AtomicBool::new(recording),
            directory: ArcSwap::from_pointee(directory),
            diagnostics,
        };
        (host, rx)
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Relaxed);
    }

    pub fn set_output_directory(&self, directory: impl Into<PathBuf>) {
        self.directory.store(Arc::new(directory.into()));
    }
}

impl Host for SystemHost {
    fn now(&self) -> (DateTime<Utc>, f64) {
        (Utc::now(), self.started.elapsed().as_secs_f64())
    }

    fn should_record(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    fn output_directory(&self) -> PathBuf {
        self.directory.load().as_ref().clone()
    }

    fn report(&self, message: &str) {
        warn!("{}", message);
        let _ = self.diagnostics.send(message.to_string());
    }
}

/// Host with a hand-driven clock, for tests and simulations
pub struct ManualHost {
    epoch: DateTime<Utc>,
    monotonic_bits: AtomicU64,
    recording: AtomicBool,
    directory: ArcSwap<PathBuf>,
    reports: Mutex<Vec<String>>,
}

impl ManualHost {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            epoch: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            monotonic_bits: AtomicU64::new(0f64.to_bits()),
            recording: AtomicBool::new(true),
            directory: ArcSwap::from_pointee(directory.as_ref().to_path_buf()),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Set the monotonic clock; UTC follows at the same offset from a fixed epoch
    pub fn set_time(&self, seconds: f64) {
        self.monotonic_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Relaxed);
    }

    pub fn set_output_directory(&self, directory: impl Into<PathBuf>) {
        self.directory.store(Arc::new(directory.into()));
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

impl Host for ManualHost {
    fn now(&self) -> (DateTime<Utc>, f64) {
        let monotonic = f64::from_bits(self.monotonic_bits.load(Ordering::Relaxed));
        let offset = chrono::Duration::microseconds((monotonic * 1_000_000.0).round() as i64);
        (self.epoch + offset, monotonic)
    }

    fn should_record(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    fn output_directory(&self) -> PathBuf {
        self.directory.load().as_ref().clone()
    }

    fn report(&self, message: &str) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(message.to_string());
        }
    }
}
