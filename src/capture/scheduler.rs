//! Per-notification capture decisions
//!
//! Runs synchronously on the sensor's notification thread. For each
//! notification it fixes one latency-compensated [`CaptureInstant`], then walks
//! the streams in [`StreamKind::ALL`] order, saving those that are due and
//! present. A save advances `last_saved_at` before persistence is attempted,
//! so a slow or failing write never triggers a duplicate save of the same
//! interval.

use std::sync::Arc;

use tracing::{debug, trace};

use super::event::{CaptureEvent, CaptureInstant};
use super::frame::FrameSet;
use super::naming::FileNamer;
use super::stream::{policies_from_config, StreamKind, StreamPolicy};
use crate::host::Host;
use crate::pipeline::{DepthBuffer, DepthReader, DepthStore, SaveBoard};
use crate::storage::{Payload, Persistence, SaveJob};
use crate::Config;

pub struct CaptureScheduler {
    policies: [StreamPolicy; 3],
    namer: FileNamer,
    /// Seconds subtracted from arrival time
    sensor_latency: f64,
    jpeg_quality: u8,
    depth: DepthStore,
    board: Arc<SaveBoard>,
    /// Streams whose last due frame was unreadable, reported once until recovery
    unreadable: [bool; 3],
}

impl CaptureScheduler {
    pub fn new(
        policies: [StreamPolicy; 3],
        namer: FileNamer,
        sensor_latency: f64,
        jpeg_quality: u8,
    ) -> Self {
        let board = Arc::new(SaveBoard::new(&policies));
        Self {
            policies,
            namer,
            sensor_latency,
            jpeg_quality,
            depth: DepthStore::new(),
            board,
            unreadable: [false; 3],
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            policies_from_config(&config.streams),
            FileNamer::new(config.sensor.identifier.clone(), config.sensor.sequence_suffix),
            config.sensor_latency(),
            config.sensor.jpeg_quality,
        )
    }

    pub fn policy(&self, kind: StreamKind) -> &StreamPolicy {
        &self.policies[kind.index()]
    }

    /// Seconds between true capture and notification arrival
    pub fn sensor_latency(&self) -> f64 {
        self.sensor_latency
    }

    /// Saved-time mirror for the staleness monitor
    pub fn board(&self) -> Arc<SaveBoard> {
        self.board.clone()
    }

    /// Read handle on the latest depth frame
    pub fn depth_reader(&self) -> DepthReader {
        self.depth.reader()
    }

    /// The capture instant for a notification arriving now
    pub fn capture_instant(&self, host: &dyn Host) -> CaptureInstant {
        let (utc, monotonic) = host.now();
        CaptureInstant::compensated(utc, monotonic, self.sensor_latency)
    }

    /// Process one notification. Returns the events for every dispatched save,
    /// in stream order.
    pub fn handle_notification(
        &mut self,
        instant: CaptureInstant,
        frames: &mut dyn FrameSet,
        host: &dyn Host,
        persistence: &dyn Persistence,
    ) -> Vec<CaptureEvent> {
        // Depth is copied on every arrival so the distance report stays current
        let depth = frames
            .depth()
            .and_then(|frame| self.depth.write(&frame, instant.monotonic));

        let recording = host.should_record();
        let directory = host.output_directory();
        let mut events = Vec::new();

        for kind in StreamKind::ALL {
            let policy = &self.policies[kind.index()];
            if !policy.is_due(instant.monotonic) {
                continue;
            }
            if recording && persistence.in_flight(kind) {
                metrics::counter!("orion_saves_skipped_in_flight", "stream" => kind.tag())
                    .increment(1);
                debug!("Previous {} save still pending, skipping", kind);
                continue;
            }

            let payload = match acquire(kind, frames, depth.as_deref(), recording) {
                Acquired::Absent => {
                    trace!("{} due but absent from notification", kind);
                    continue;
                }
                Acquired::Present(payload) => {
                    if payload.is_some() && self.unreadable[kind.index()] {
                        debug!("{} frames readable again", kind);
                        self.unreadable[kind.index()] = false;
                    }
                    payload
                }
                Acquired::Unreadable(e) => {
                    metrics::counter!("orion_unreadable_frames", "stream" => kind.tag())
                        .increment(1);
                    if std::mem::replace(&mut self.unreadable[kind.index()], true) {
                        trace!("{} frame still unreadable: {}", kind, e);
                    } else {
                        host.report(&format!("Unreadable {} frame: {}", kind, e));
                    }
                    continue;
                }
            };

            let policy = &mut self.policies[kind.index()];
            policy.mark_saved(instant.monotonic);
            self.board.publish(kind, instant.monotonic);

            let sequence = policy.advance_sequence();
            let path = directory.join(self.namer.file_name(&instant, kind, sequence));

            if let Some(payload) = payload {
                let job = SaveJob {
                    kind,
                    path: path.clone(),
                    quality: self.jpeg_quality,
                    payload,
                };
                if let Err(e) = persistence.submit(job) {
                    metrics::counter!("orion_persist_failures", "stream" => kind.tag())
                        .increment(1);
                    host.report(&format!("Failed to save {}: {}", kind, e));
                }
            }

            metrics::counter!("orion_saves_dispatched", "stream" => kind.tag()).increment(1);
            events.push(CaptureEvent {
                utc_time: instant.utc,
                monotonic_time: instant.monotonic,
                stream_kind: kind,
                file_path: path,
                sequence,
            });
        }

        events
    }
}

enum Acquired {
    Absent,
    /// Frame present; payload only built when recording
    Present(Option<Payload>),
    Unreadable(crate::error::StorageError),
}

fn acquire(
    kind: StreamKind,
    frames: &mut dyn FrameSet,
    depth: Option<&DepthBuffer>,
    recording: bool,
) -> Acquired {
    match kind {
        StreamKind::Color => match frames.color() {
            None => Acquired::Absent,
            Some(_) if !recording => Acquired::Present(None),
            Some(frame) => match frame.to_rgb_image() {
                Ok(image) => Acquired::Present(Some(Payload::Color(image))),
                Err(e) => Acquired::Unreadable(e),
            },
        },
        StreamKind::Depth => match depth {
            None => Acquired::Absent,
            Some(_) if !recording => Acquired::Present(None),
            Some(buffer) => Acquired::Present(Some(Payload::Depth(buffer.samples().to_vec()))),
        },
        StreamKind::Infrared => match frames.infrared() {
            None => Acquired::Absent,
            Some(_) if !recording => Acquired::Present(None),
            Some(frame) => match frame.to_gray_image() {
                Ok(image) => Acquired::Present(Some(Payload::Infrared(image))),
                Err(e) => Acquired::Unreadable(e),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{ColorFrame, DepthFrame, InfraredFrame, Notification, PixelFormat};
    use crate::error::StorageError;
    use crate::host::ManualHost;
    use crate::StreamsConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingPersistence {
        jobs: Mutex<Vec<SaveJob>>,
        fail: bool,
    }

    impl Persistence for CountingPersistence {
        fn in_flight(&self, _kind: StreamKind) -> bool {
            false
        }

        fn submit(&self, job: SaveJob) -> Result<(), StorageError> {
            let path = job.path.clone();
            self.jobs.lock().unwrap().push(job);
            if self.fail {
                Err(StorageError::QueueFull(path))
            } else {
                Ok(())
            }
        }
    }

    impl CountingPersistence {
        fn count(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }
    }

    /// Reports `kind` as busy until cleared
    struct BusyPersistence {
        busy: Mutex<Option<StreamKind>>,
    }

    impl Persistence for BusyPersistence {
        fn in_flight(&self, kind: StreamKind) -> bool {
            *self.busy.lock().unwrap() == Some(kind)
        }

        fn submit(&self, _job: SaveJob) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn scheduler(color: f64, depth: f64, ir: f64) -> CaptureScheduler {
        CaptureScheduler::new(
            policies_from_config(&StreamsConfig {
                color_period: color,
                depth_period: depth,
                ir_period: ir,
            }),
            FileNamer::new("k", true),
            0.0,
            90,
        )
    }

    const RGB: [u8; 12] = [9; 12];
    const DEPTH: [u16; 4] = [1000, 2000, 0, 3000];
    const IR: [u16; 4] = [512; 4];

    fn full() -> Notification<'static> {
        Notification {
            color: Some(ColorFrame {
                data: &RGB,
                width: 2,
                height: 2,
                format: PixelFormat::Rgb24,
            }),
            depth: Some(DepthFrame {
                samples: &DEPTH,
                width: 2,
                height: 2,
            }),
            infrared: Some(InfraredFrame {
                samples: &IR,
                width: 2,
                height: 2,
            }),
        }
    }

    fn tick(
        scheduler: &mut CaptureScheduler,
        host: &ManualHost,
        persistence: &dyn Persistence,
        at: f64,
        frames: &mut Notification<'_>,
    ) -> Vec<CaptureEvent> {
        host.set_time(at);
        let instant = scheduler.capture_instant(host);
        scheduler.handle_notification(instant, frames, host, persistence)
    }

    #[test]
    fn zero_period_saves_every_arrival() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(0.0, -1.0, -1.0);

        for i in 1..=5 {
            let events = tick(&mut s, &host, &persistence, i as f64 * 0.033, &mut full());
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].sequence, i - 1);
        }
        assert_eq!(persistence.count(), 5);
    }

    #[test]
    fn two_second_period_saves_at_most_once_per_window() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(2.0, -1.0, -1.0);

        let mut saved_at = Vec::new();
        let mut t = 0.0;
        while t < 7.0 {
            for event in tick(&mut s, &host, &persistence, t, &mut full()) {
                saved_at.push(event.monotonic_time);
            }
            t += 0.1;
        }
        assert!(saved_at.len() >= 3 && saved_at.len() <= 4, "{:?}", saved_at);
        for pair in saved_at.windows(2) {
            assert!(pair[1] - pair[0] > 2.0);
        }
    }

    #[test]
    fn streams_share_one_instant_in_fixed_order() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(0.0, 0.0, 0.0);

        let events = tick(&mut s, &host, &persistence, 1.0, &mut full());
        let kinds: Vec<_> = events.iter().map(|e| e.stream_kind).collect();
        assert_eq!(kinds, StreamKind::ALL.to_vec());
        assert!(events.iter().all(|e| e.monotonic_time == 1.0));
        assert!(events.iter().all(|e| e.utc_time == events[0].utc_time));
    }

    #[test]
    fn latency_is_subtracted_from_instant() {
        let host = ManualHost::new("/out");
        let mut s = CaptureScheduler::new(
            policies_from_config(&StreamsConfig {
                color_period: 0.0,
                depth_period: -1.0,
                ir_period: -1.0,
            }),
            FileNamer::new("k", false),
            0.05,
            90,
        );
        let events = tick(&mut s, &host, &InlineNoop, 1.0, &mut full());
        assert!((events[0].monotonic_time - 0.95).abs() < 1e-12);
    }

    struct InlineNoop;

    impl Persistence for InlineNoop {
        fn in_flight(&self, _kind: StreamKind) -> bool {
            false
        }

        fn submit(&self, _job: SaveJob) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn absent_stream_does_not_advance() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(1.0, 1.0, 1.0);

        let mut frames = full();
        frames.infrared = None;
        let events = tick(&mut s, &host, &persistence, 0.5, &mut frames);
        assert_eq!(events.len(), 2);
        assert_eq!(s.policy(StreamKind::Infrared).last_saved_at(), None);
        assert_eq!(s.policy(StreamKind::Infrared).sequence(), 0);

        // Arrives on the next notification and is saved right away
        let events = tick(&mut s, &host, &persistence, 0.6, &mut full());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stream_kind, StreamKind::Infrared);
    }

    #[test]
    fn not_recording_emits_without_persisting() {
        let host = ManualHost::new("/out");
        host.set_recording(false);
        let persistence = CountingPersistence::default();
        let mut s = scheduler(0.0, 0.0, 0.0);

        let events = tick(&mut s, &host, &persistence, 1.0, &mut full());
        assert_eq!(events.len(), 3);
        assert_eq!(persistence.count(), 0);
        for kind in StreamKind::ALL {
            assert_eq!(s.policy(kind).last_saved_at(), Some(1.0));
        }
        // Depth is still queryable
        assert_eq!(s.depth_reader().latest().unwrap().samples(), &DEPTH);
    }

    #[test]
    fn failed_save_still_emits_and_advances() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence {
            fail: true,
            ..Default::default()
        };
        let mut s = scheduler(5.0, -1.0, -1.0);

        let events = tick(&mut s, &host, &persistence, 1.0, &mut full());
        assert_eq!(events.len(), 1);
        assert_eq!(s.policy(StreamKind::Color).last_saved_at(), Some(1.0));
        assert_eq!(host.reports().len(), 1);

        // No immediate retry within the period
        assert!(tick(&mut s, &host, &persistence, 1.1, &mut full()).is_empty());
    }

    #[test]
    fn pending_save_blocks_second_save_of_same_stream() {
        let host = ManualHost::new("/out");
        let persistence = BusyPersistence {
            busy: Mutex::new(Some(StreamKind::Color)),
        };
        let mut s = scheduler(0.0, 0.0, -1.0);

        let events = tick(&mut s, &host, &persistence, 1.0, &mut full());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stream_kind, StreamKind::Depth);
        assert_eq!(s.policy(StreamKind::Color).last_saved_at(), None);

        *persistence.busy.lock().unwrap() = None;
        let events = tick(&mut s, &host, &persistence, 1.1, &mut full());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn depth_copied_even_when_depth_disabled() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(-1.0, -1.0, -1.0);

        assert!(tick(&mut s, &host, &persistence, 1.0, &mut full()).is_empty());
        let latest = s.depth_reader().latest().unwrap();
        assert_eq!(latest.captured_at(), 1.0);
    }

    #[test]
    fn event_paths_follow_runtime_directory() {
        let host = ManualHost::new("/first");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(0.0, -1.0, -1.0);

        let a = tick(&mut s, &host, &persistence, 1.0, &mut full());
        host.set_output_directory("/second");
        let b = tick(&mut s, &host, &persistence, 2.0, &mut full());
        assert!(a[0].file_path.starts_with("/first"));
        assert!(b[0].file_path.starts_with("/second"));
        assert_ne!(a[0].file_path, b[0].file_path);
    }

    #[test]
    fn unreadable_frame_is_reported_once_until_recovery() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(0.0, -1.0, -1.0);
        let short = [0u8; 5];
        let broken = || Notification {
            color: Some(ColorFrame {
                data: &short,
                width: 2,
                height: 2,
                format: PixelFormat::Rgb24,
            }),
            ..Default::default()
        };

        for i in 1..=30 {
            assert!(tick(&mut s, &host, &persistence, i as f64 / 30.0, &mut broken()).is_empty());
        }
        assert_eq!(host.reports().len(), 1);
        assert_eq!(s.policy(StreamKind::Color).last_saved_at(), None);

        assert_eq!(tick(&mut s, &host, &persistence, 1.1, &mut full()).len(), 1);
        tick(&mut s, &host, &persistence, 1.2, &mut broken());
        tick(&mut s, &host, &persistence, 1.3, &mut broken());
        let reports = host.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports[1].starts_with("Unreadable COLOR frame"));
    }

    /// Counts which streams the scheduler pulled
    struct Tracking<'a> {
        inner: Notification<'a>,
        pulled: Vec<StreamKind>,
    }

    impl FrameSet for Tracking<'_> {
        fn color(&mut self) -> Option<ColorFrame<'_>> {
            self.pulled.push(StreamKind::Color);
            self.inner.color
        }

        fn depth(&mut self) -> Option<DepthFrame<'_>> {
            self.pulled.push(StreamKind::Depth);
            self.inner.depth
        }

        fn infrared(&mut self) -> Option<InfraredFrame<'_>> {
            self.pulled.push(StreamKind::Infrared);
            self.inner.infrared
        }
    }

    #[test]
    fn only_depth_is_pulled_when_nothing_is_due() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(5.0, 5.0, 5.0);

        tick(&mut s, &host, &persistence, 1.0, &mut full());
        let mut frames = Tracking {
            inner: full(),
            pulled: Vec::new(),
        };
        host.set_time(2.0);
        let instant = s.capture_instant(&host);
        assert!(s
            .handle_notification(instant, &mut frames, &host, &persistence)
            .is_empty());
        assert_eq!(frames.pulled, vec![StreamKind::Depth]);
    }

    #[test]
    fn board_mirrors_saves() {
        let host = ManualHost::new("/out");
        let persistence = CountingPersistence::default();
        let mut s = scheduler(0.0, -1.0, -1.0);
        let board = s.board();

        tick(&mut s, &host, &persistence, 3.0, &mut full());
        assert_eq!(board.status(StreamKind::Color).last_saved_at, Some(3.0));
        assert_eq!(board.status(StreamKind::Depth).last_saved_at, None);
    }
}
