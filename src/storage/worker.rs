//! Bounded background writer
//!
//! Keeps disk latency off the notification thread. Each stream kind has an
//! in-flight flag that is set on submit and cleared once the write finishes,
//! so the scheduler can keep at most one save per stream pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::{write_job, Persistence, SaveJob};
use crate::capture::StreamKind;
use crate::error::StorageError;
use crate::host::Host;

pub struct PersistWorker {
    tx: Option<flume::Sender<SaveJob>>,
    in_flight: Arc<[AtomicBool; 3]>,
    done: flume::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl PersistWorker {
    /// Start the writer thread with room for `queue_depth` pending jobs
    pub fn spawn(queue_depth: usize, host: Arc<dyn Host>) -> std::io::Result<Self> {
        let (tx, rx) = flume::bounded::<SaveJob>(queue_depth.max(1));
        let (done_tx, done) = flume::bounded(1);
        let in_flight: Arc<[AtomicBool; 3]> = Arc::new(Default::default());

        let flags = in_flight.clone();
        let handle = thread::Builder::new()
            .name("orion-persist".into())
            .spawn(move || {
                for job in rx.iter() {
                    if let Err(e) = write_job(&job) {
                        metrics::counter!("orion_persist_failures", "stream" => job.kind.tag())
                            .increment(1);
                        host.report(&format!("Failed to save {}: {}", job.kind, e));
                    }
                    flags[job.kind.index()].store(false, Ordering::Release);
                }
                debug!("Persistence worker drained");
                let _ = done_tx.send(());
            })?;

        info!("Persistence worker started, queue depth {}", queue_depth);

        Ok(Self {
            tx: Some(tx),
            in_flight,
            done,
            handle: Some(handle),
        })
    }

    /// Stop accepting jobs and wait up to `timeout` for pending writes.
    /// Returns `false` if writes were abandoned.
    #[instrument(skip(self))]
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        self.tx.take();
        match self.done.recv_timeout(timeout) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                info!("Persistence worker stopped");
                true
            }
            Err(_) => {
                warn!("Abandoning pending saves after {:?}", timeout);
                false
            }
        }
    }
}

impl Persistence for PersistWorker {
    fn in_flight(&self, kind: StreamKind) -> bool {
        self.in_flight[kind.index()].load(Ordering::Acquire)
    }

    fn submit(&self, job: SaveJob) -> Result<(), StorageError> {
        let tx = self.tx.as_ref().ok_or(StorageError::WorkerStopped)?;
        let flag = &self.in_flight[job.kind.index()];
        flag.store(true, Ordering::Release);
        tx.try_send(job).map_err(|e| {
            flag.store(false, Ordering::Release);
            match e {
                flume::TrySendError::Full(job) => StorageError::QueueFull(job.path),
                flume::TrySendError::Disconnected(_) => StorageError::WorkerStopped,
            }
        })
    }
}

impl Drop for PersistWorker {
    fn drop(&mut self) {
        // Let the thread drain on its own; never block here
        self.tx.take();
    }
}
