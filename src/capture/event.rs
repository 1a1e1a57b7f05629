//! Capture instants and the event records relayed upstream

use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::stream::StreamKind;

/// Timestamp pair shared by every stream handled in one notification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureInstant {
    pub utc: DateTime<Utc>,
    /// Driver-local monotonic seconds
    pub monotonic: f64,
}

impl CaptureInstant {
    /// Shift arrival time back by the sensor latency (seconds).
    /// An offset chrono can't represent leaves the UTC stamp unshifted.
    pub fn compensated(utc: DateTime<Utc>, monotonic: f64, latency: f64) -> Self {
        let offset = ChronoDuration::microseconds((latency * 1_000_000.0).round() as i64);
        Self {
            utc: utc.checked_sub_signed(offset).unwrap_or(utc),
            monotonic: monotonic - latency,
        }
    }
}

/// Record of one dispatched save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureEvent {
    #[serde(with = "utc_millis")]
    pub utc_time: DateTime<Utc>,
    #[serde(rename = "sys_time")]
    pub monotonic_time: f64,
    #[serde(rename = "stream")]
    pub stream_kind: StreamKind,
    pub file_path: PathBuf,
    pub sequence: u64,
}

/// Consumer of capture events. Must not block the notification thread.
pub trait EventSink: Send {
    fn emit(&self, event: CaptureEvent);
}

impl EventSink for flume::Sender<CaptureEvent> {
    fn emit(&self, event: CaptureEvent) {
        if let Err(e) = self.try_send(event) {
            metrics::counter!("orion_events_dropped").increment(1);
            warn!("Dropping capture event: {}", e);
        }
    }
}

mod utc_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
