//! Stream kinds and their capture policies

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::StreamsConfig;

/// One of the independently scheduled sensor feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    #[serde(rename = "COLOR")]
    Color,
    #[serde(rename = "DEPTH")]
    Depth,
    #[serde(rename = "IR")]
    Infrared,
}

impl StreamKind {
    /// Processing order within a notification
    pub const ALL: [StreamKind; 3] = [StreamKind::Color, StreamKind::Depth, StreamKind::Infrared];

    pub const fn index(self) -> usize {
        match self {
            StreamKind::Color => 0,
            StreamKind::Depth => 1,
            StreamKind::Infrared => 2,
        }
    }

    /// Uppercase tag used in file names and event records
    pub const fn tag(self) -> &'static str {
        match self {
            StreamKind::Color => "COLOR",
            StreamKind::Depth => "DEPTH",
            StreamKind::Infrared => "IR",
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            StreamKind::Color | StreamKind::Infrared => "jpg",
            StreamKind::Depth => "bin",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Capture schedule and bookkeeping for one stream
#[derive(Debug, Clone)]
pub struct StreamPolicy {
    kind: StreamKind,
    enabled: bool,
    period: f64,
    /// Driver-local monotonic seconds of the last dispatched save, `None` if never saved
    last_saved_at: Option<f64>,
    sequence: u64,
}

impl StreamPolicy {
    /// A negative period disables the stream for the driver's lifetime
    pub fn new(kind: StreamKind, period: f64) -> Self {
        let enabled = period >= 0.0;
        Self {
            kind,
            enabled,
            period: if enabled { period } else { -1.0 },
            last_saved_at: None,
            sequence: 0,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn last_saved_at(&self) -> Option<f64> {
        self.last_saved_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Strictly more than one period has elapsed since the last save
    pub fn is_due(&self, now: f64) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_saved_at {
            Some(last) => now - last > self.period,
            None => true,
        }
    }

    /// Record a dispatched save at `at`. Never moves the timestamp backwards.
    pub fn mark_saved(&mut self, at: f64) {
        self.last_saved_at = Some(match self.last_saved_at {
            Some(last) => last.max(at),
            None => at,
        });
    }

    /// Consume the current sequence number
    pub fn advance_sequence(&mut self) -> u64 {
        let current = self.sequence;
        self.sequence += 1;
        current
    }
}

/// Build the policy set, indexed by [`StreamKind::index`]
pub fn policies_from_config(config: &StreamsConfig) -> [StreamPolicy; 3] {
    [
        StreamPolicy::new(StreamKind::Color, config.color_period),
        StreamPolicy::new(StreamKind::Depth, config.depth_period),
        StreamPolicy::new(StreamKind::Infrared, config.ir_period),
    ]
}
