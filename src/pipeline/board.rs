//! Last-saved timestamps published for the staleness monitor
//!
//! The scheduler owns the authoritative [`StreamPolicy`] set on the
//! notification thread; this board mirrors `last_saved_at` through atomics so
//! the health tick can read it without touching scheduler state.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use crate::capture::stream::{StreamKind, StreamPolicy};

/// Bit pattern meaning "never saved"
const NEVER: u64 = u64::MAX;

/// Point-in-time view of one stream, as seen by the health check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStatus {
    pub kind: StreamKind,
    pub enabled: bool,
    pub period: f64,
    pub last_saved_at: Option<f64>,
}

struct Entry {
    enabled: bool,
    period: f64,
    last_saved: CachePadded<AtomicU64>,
}

pub struct SaveBoard {
    entries: [Entry; 3],
}

impl SaveBoard {
    pub fn new(policies: &[StreamPolicy; 3]) -> Self {
        Self {
            entries: StreamKind::ALL.map(|kind| {
                let policy = &policies[kind.index()];
                Entry {
                    enabled: policy.enabled(),
                    period: policy.period(),
                    last_saved: CachePadded::new(AtomicU64::new(
                        policy.last_saved_at().map_or(NEVER, f64::to_bits),
                    )),
                }
            }),
        }
    }

    pub fn publish(&self, kind: StreamKind, saved_at: f64) {
        self.entries[kind.index()]
            .last_saved
            .store(saved_at.to_bits(), Ordering::Release);
    }

    pub fn status(&self, kind: StreamKind) -> StreamStatus {
        let entry = &self.entries[kind.index()];
        let bits = entry.last_saved.load(Ordering::Acquire);
        StreamStatus {
            kind,
            enabled: entry.enabled,
            period: entry.period,
            last_saved_at: (bits != NEVER).then(|| f64::from_bits(bits)),
        }
    }

    pub fn snapshot(&self) -> [StreamStatus; 3] {
        StreamKind::ALL.map(|kind| self.status(kind))
    }
}
