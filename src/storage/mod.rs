//! Persistence of captured frames
//!
//! The scheduler hands owned [`SaveJob`]s to a [`Persistence`] implementation:
//! either [`PersistWorker`] (bounded background thread) or
//! [`InlinePersistence`] (writes on the calling thread).

pub mod encode;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{GrayImage, RgbImage};
use tracing::{debug, info};

use crate::capture::StreamKind;
use crate::error::StorageError;
use crate::host::Host;
use crate::RuntimeConfig;

pub use worker::PersistWorker;

/// Owned frame data, detached from the notification buffers
#[derive(Debug, Clone)]
pub enum Payload {
    Color(RgbImage),
    Infrared(GrayImage),
    Depth(Vec<u16>),
}

#[derive(Debug, Clone)]
pub struct SaveJob {
    pub kind: StreamKind,
    pub path: PathBuf,
    pub quality: u8,
    pub payload: Payload,
}

pub trait Persistence: Send {
    /// A previously submitted save for `kind` has not finished yet
    fn in_flight(&self, kind: StreamKind) -> bool;

    /// Queue or perform a save
    fn submit(&self, job: SaveJob) -> Result<(), StorageError>;
}

/// Encode and write one job, recording timing
pub fn write_job(job: &SaveJob) -> Result<(), StorageError> {
    let started = Instant::now();
    let result = match &job.payload {
        Payload::Color(image) => encode::save_jpeg(&job.path, job.quality, image),
        Payload::Infrared(image) => encode::save_gray_jpeg(&job.path, job.quality, image),
        Payload::Depth(samples) => encode::save_raw_u16(&job.path, samples),
    };

    let elapsed = started.elapsed();
    metrics::histogram!("orion_persist_time_ms", "stream" => job.kind.tag())
        .record(elapsed.as_secs_f64() * 1000.0);
    if result.is_ok() {
        debug!(path = ?job.path, ?elapsed, "Saved {}", job.kind);
    }
    result
}

/// Synchronous writes on the notification thread
#[derive(Debug, Default)]
pub struct InlinePersistence;

impl Persistence for InlinePersistence {
    fn in_flight(&self, _kind: StreamKind) -> bool {
        false
    }

    fn submit(&self, job: SaveJob) -> Result<(), StorageError> {
        write_job(&job)
    }
}

/// The persistence mode selected by configuration
pub enum Writer {
    Background(PersistWorker),
    Inline(InlinePersistence),
}

impl Writer {
    pub fn from_config(config: &RuntimeConfig, host: Arc<dyn Host>) -> std::io::Result<Self> {
        if config.inline_persistence {
            info!("Writing captures on the notification thread");
            Ok(Writer::Inline(InlinePersistence))
        } else {
            PersistWorker::spawn(config.persist_queue_depth, host).map(Writer::Background)
        }
    }

    /// Wait up to `timeout` for pending writes. Returns `false` if any were abandoned.
    pub fn shutdown(self, timeout: Duration) -> bool {
        match self {
            Writer::Background(worker) => worker.shutdown(timeout),
            Writer::Inline(_) => true,
        }
    }
}

impl Persistence for Writer {
    fn in_flight(&self, kind: StreamKind) -> bool {
        match self {
            Writer::Background(worker) => worker.in_flight(kind),
            Writer::Inline(inline) => inline.in_flight(kind),
        }
    }

    fn submit(&self, job: SaveJob) -> Result<(), StorageError> {
        match self {
            Writer::Background(worker) => worker.submit(job),
            Writer::Inline(inline) => inline.submit(job),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_writes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.bin");
        InlinePersistence
            .submit(SaveJob {
                kind: StreamKind::Depth,
                path: path.clone(),
                quality: 90,
                payload: Payload::Depth(vec![1, 2, 3]),
            })
            .unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 6);
        assert!(!InlinePersistence.in_flight(StreamKind::Depth));
    }

    #[test]
    fn writer_follows_config() {
        let host: Arc<dyn Host> = Arc::new(crate::host::ManualHost::new("/tmp"));
        let mut config = RuntimeConfig::default();
        config.inline_persistence = true;
        let writer = Writer::from_config(&config, host.clone()).unwrap();
        assert!(matches!(writer, Writer::Inline(_)));
        assert!(writer.shutdown(Duration::ZERO));

        config.inline_persistence = false;
        let writer = Writer::from_config(&config, host).unwrap();
        assert!(matches!(writer, Writer::Background(_)));
        assert!(writer.shutdown(Duration::from_secs(5)));
    }
}
