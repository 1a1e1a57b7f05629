//! Error types for the capture driver
//!
//! None of these are fatal to the driver: each one degrades to a logged and
//! reported status.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration loading or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Frame source failures
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),

    #[error("sensor disconnected")]
    Disconnected,

    #[error("sensor is not open")]
    NotOpen,
}

/// Persistence failures, surfaced per save
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("buffer of {len} bytes does not match {width}x{height} image")]
    Dimensions { len: usize, width: u32, height: u32 },

    #[error("persistence queue full, dropped {0:?}")]
    QueueFull(PathBuf),

    #[error("persistence worker stopped")]
    WorkerStopped,
}

/// Reasons the distance report can't produce a value
#[derive(Debug, Error, PartialEq)]
pub enum DistanceError {
    #[error("no depth frame has been received")]
    NoDepth,

    #[error("no valid depth samples in the center of the frame")]
    NoValidSamples,
}
