pub mod capture;
pub mod distance;
pub mod driver;
pub mod error;
pub mod health;
pub mod host;
pub mod pipeline;
pub mod runner;
pub mod storage;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{CaptureEvent, CaptureInstant, StreamKind};
pub use error::ConfigError;
pub use health::HealthState;

/// Largest accepted sensor latency
pub const MAX_SENSOR_LATENCY_MS: f64 = 10_000.0;

/// Prefix for environment overrides, e.g. `ORION__STREAMS__COLOR_PERIOD=0.5`
pub const ENV_PREFIX: &str = "ORION";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorConfig,
    pub streams: StreamsConfig,
    pub output: OutputConfig,
    pub health: HealthConfig,
    pub runtime: RuntimeConfig,
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Leading component of every output file name
    pub identifier: String,
    /// Subtracted from arrival time to approximate true capture time
    pub sensor_latency_ms: f64,
    pub jpeg_quality: u8,
    /// Append the per-stream sequence number to file names
    pub sequence_suffix: bool,
}

/// Capture periods in seconds. Negative disables a stream, 0 saves every frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    pub color_period: f64,
    pub depth_period: f64,
    pub ir_period: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub out_directory: PathBuf,
    /// Overrides `out_directory` when set. May change at runtime.
    pub data_file_directory: Option<PathBuf>,
    pub recording: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub tick_secs: f64,
    pub grace_secs: f64,
    pub min_period_floor_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub close_timeout_secs: f64,
    pub reconnect_interval_secs: f64,
    pub persist_queue_depth: usize,
    pub event_queue_depth: usize,
    /// Write on the notification thread instead of the persistence worker
    pub inline_persistence: bool,
}

/// Parameters for the synthetic test-pattern device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub fps: u32,
    pub color_width: u32,
    pub color_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    pub base_distance_mm: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            identifier: "kinect".into(),
            sensor_latency_ms: 0.0,
            jpeg_quality: 90,
            sequence_suffix: false,
        }
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            color_period: 2.0,
            depth_period: 2.0,
            ir_period: 2.0,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            out_directory: PathBuf::from("./capture"),
            data_file_directory: None,
            recording: true,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            tick_secs: 0.5,
            grace_secs: 3.0,
            min_period_floor_secs: 0.1,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            close_timeout_secs: 3.5,
            reconnect_interval_secs: 2.0,
            persist_queue_depth: 6,
            event_queue_depth: 64,
            inline_persistence: false,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            color_width: 640,
            color_height: 360,
            // Kinect v2 native depth/IR resolution
            depth_width: 512,
            depth_height: 424,
            base_distance_mm: 1500,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `ORION__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.sensor.jpeg_quality) {
            return Err(invalid("sensor.jpeg_quality", "must be within 1..=100"));
        }
        if !(0.0..=MAX_SENSOR_LATENCY_MS).contains(&self.sensor.sensor_latency_ms) {
            return Err(invalid("sensor.sensor_latency_ms", "must be within 0..=10000"));
        }
        for (key, period) in [
            ("streams.color_period", self.streams.color_period),
            ("streams.depth_period", self.streams.depth_period),
            ("streams.ir_period", self.streams.ir_period),
        ] {
            if period.is_nan() {
                return Err(invalid(key, "must be a number"));
            }
        }
        if !(self.health.tick_secs > 0.0) {
            return Err(invalid("health.tick_secs", "must be positive"));
        }
        if !(self.health.grace_secs >= 0.0) {
            return Err(invalid("health.grace_secs", "must not be negative"));
        }
        if !(self.health.min_period_floor_secs >= 0.0) {
            return Err(invalid("health.min_period_floor_secs", "must not be negative"));
        }
        if !(self.runtime.close_timeout_secs >= 0.0) {
            return Err(invalid("runtime.close_timeout_secs", "must not be negative"));
        }
        if !(self.runtime.reconnect_interval_secs > 0.0) {
            return Err(invalid("runtime.reconnect_interval_secs", "must be positive"));
        }
        if self.runtime.persist_queue_depth == 0 {
            return Err(invalid("runtime.persist_queue_depth", "must be at least 1"));
        }
        if self.runtime.event_queue_depth == 0 {
            return Err(invalid("runtime.event_queue_depth", "must be at least 1"));
        }
        if self.device.fps == 0 {
            return Err(invalid("device.fps", "must be at least 1"));
        }
        Ok(())
    }

    /// Directory artifacts are written to at startup
    pub fn output_directory(&self) -> PathBuf {
        self.output
            .data_file_directory
            .clone()
            .unwrap_or_else(|| self.output.out_directory.clone())
    }

    pub fn sensor_latency(&self) -> f64 {
        self.sensor.sensor_latency_ms / 1000.0
    }
}

impl RuntimeConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.close_timeout_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_interval_secs)
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
