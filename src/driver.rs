//! Imperative shell around the capture scheduler
//!
//! [`Driver`] owns the scheduler and forwards its events to the sink.
//! [`HealthWatch`] and [`DistanceProbe`] are the read-only handles used from
//! other threads.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::capture::{CaptureScheduler, Device, EventSink, FrameSet};
use crate::distance::{report_distance, DistanceReport};
use crate::error::DistanceError;
use crate::health::{HealthState, StalenessMonitor};
use crate::host::Host;
use crate::pipeline::{DepthReader, SaveBoard};
use crate::storage::Persistence;

/// Longest a single `wait_frames` call blocks, bounding shutdown latency
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub struct Driver<P: Persistence> {
    scheduler: CaptureScheduler,
    host: Arc<dyn Host>,
    persistence: P,
    sink: Box<dyn EventSink>,
}

impl<P: Persistence> Driver<P> {
    pub fn new(
        scheduler: CaptureScheduler,
        host: Arc<dyn Host>,
        persistence: P,
        sink: Box<dyn EventSink>,
    ) -> Self {
        Self {
            scheduler,
            host,
            persistence,
            sink,
        }
    }

    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.scheduler
    }

    /// Handle one hardware notification. Returns the number of events emitted.
    pub fn on_notification(&mut self, frames: &mut dyn FrameSet) -> usize {
        let instant = self.scheduler.capture_instant(self.host.as_ref());
        let events = self.scheduler.handle_notification(
            instant,
            frames,
            self.host.as_ref(),
            &self.persistence,
        );
        let count = events.len();
        for event in events {
            self.sink.emit(event);
        }
        count
    }

    pub fn health_watch(&self, monitor: StalenessMonitor) -> HealthWatch {
        HealthWatch::new(
            self.scheduler.board(),
            monitor,
            self.host.clone(),
            self.scheduler.sensor_latency(),
        )
    }

    pub fn distance_probe(&self) -> DistanceProbe {
        DistanceProbe {
            reader: self.scheduler.depth_reader(),
            host: self.host.clone(),
            sensor_latency: self.scheduler.sensor_latency(),
        }
    }

    /// Give back the persistence layer so it can be drained
    pub fn into_persistence(self) -> P {
        self.persistence
    }
}

/// Host time shifted onto the capture-instant clock
fn capture_clock(host: &dyn Host, sensor_latency: f64) -> f64 {
    let (_, now) = host.now();
    now - sensor_latency
}

/// Periodic staleness check with transition logging
///
/// Saved times are latency-compensated capture instants, so "now" is shifted
/// by the same latency before ages are computed.
pub struct HealthWatch {
    board: Arc<SaveBoard>,
    monitor: StalenessMonitor,
    host: Arc<dyn Host>,
    sensor_latency: f64,
    last: Option<HealthState>,
}

impl HealthWatch {
    pub fn new(
        board: Arc<SaveBoard>,
        monitor: StalenessMonitor,
        host: Arc<dyn Host>,
        sensor_latency: f64,
    ) -> Self {
        Self {
            board,
            monitor,
            host,
            sensor_latency,
            last: None,
        }
    }

    /// Current health without recording a transition
    pub fn current(&self) -> HealthState {
        let now = capture_clock(self.host.as_ref(), self.sensor_latency);
        self.monitor.check(&self.board.snapshot(), now)
    }

    pub fn tick(&mut self) -> HealthState {
        let state = self.current();
        if self.last != Some(state) {
            match state {
                HealthState::Normal => info!("Health: {}", state),
                HealthState::TimedOut => {
                    metrics::counter!("orion_health_timeouts").increment(1);
                    let now = capture_clock(self.host.as_ref(), self.sensor_latency);
                    let stale: Vec<_> = self
                        .board
                        .snapshot()
                        .iter()
                        .filter(|status| self.monitor.is_stale(status, now))
                        .map(|status| status.kind.tag())
                        .collect();
                    self.host.report(&format!("Stream timeout: {}", stale.join(", ")));
                }
            }
            self.last = Some(state);
        }
        state
    }
}

/// On-demand "last distance" query
#[derive(Clone)]
pub struct DistanceProbe {
    reader: DepthReader,
    host: Arc<dyn Host>,
    sensor_latency: f64,
}

impl DistanceProbe {
    pub fn report(&self) -> Result<DistanceReport, DistanceError> {
        let now = capture_clock(self.host.as_ref(), self.sensor_latency);
        report_distance(&self.reader, now)
    }
}

/// Dropping every sender of this channel asks the acquisition loop to stop
pub type StopSignal = flume::Receiver<()>;

fn stop_requested(stop: &StopSignal) -> bool {
    stop.is_disconnected()
}

/// Sleep for `duration`, waking at once when `stop` disconnects
fn sleep_unless(stop: &StopSignal, duration: Duration) {
    let _ = stop.recv_timeout(duration);
}

/// Pump notifications from `device` into `driver` until `stop` disconnects.
///
/// An unavailable or disconnected device doesn't end the loop: the driver
/// stays alive (health goes stale) and `open` is retried every `reconnect`.
#[instrument(skip_all, fields(device = device.name()))]
pub fn run_acquisition<P: Persistence>(
    device: &mut dyn Device,
    driver: &mut Driver<P>,
    stop: &StopSignal,
    reconnect: Duration,
) {
    let mut open = false;
    let mut attempts = 0u32;

    while !stop_requested(stop) {
        if !open {
            match device.open() {
                Ok(()) => {
                    info!("Device opened after {} failed attempt(s)", attempts);
                    open = true;
                    attempts = 0;
                }
                Err(e) => {
                    if attempts == 0 {
                        driver.host.report(&format!("Sensor not available: {}", e));
                    }
                    attempts += 1;
                    warn!("Open attempt {} failed: {}", attempts, e);
                    sleep_unless(stop, reconnect);
                    continue;
                }
            }
        }

        let result = device.wait_frames(POLL_TIMEOUT, &mut |frames| {
            driver.on_notification(frames);
        });
        if let Err(e) = result {
            error!("Device error: {}", e);
            driver.host.report(&format!("Sensor error: {}", e));
            device.close();
            open = false;
            sleep_unless(stop, reconnect);
        }
    }

    device.close();
    info!("Acquisition stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use crate::capture::frame::{DepthFrame, Notification};
    use crate::capture::stream::policies_from_config;
    use crate::capture::{CaptureEvent, FileNamer, StreamKind, SyntheticDevice};
    use crate::error::StorageError;
    use crate::host::ManualHost;
    use crate::storage::SaveJob;
    use crate::{DeviceConfig, StreamsConfig};

    struct NullPersistence;

    impl Persistence for NullPersistence {
        fn in_flight(&self, _kind: StreamKind) -> bool {
            false
        }

        fn submit(&self, _job: SaveJob) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn driver(
        host: Arc<ManualHost>,
        streams: StreamsConfig,
    ) -> (Driver<NullPersistence>, flume::Receiver<CaptureEvent>) {
        driver_with_latency(host, streams, 0.0)
    }

    fn driver_with_latency(
        host: Arc<ManualHost>,
        streams: StreamsConfig,
        sensor_latency: f64,
    ) -> (Driver<NullPersistence>, flume::Receiver<CaptureEvent>) {
        let (tx, rx) = flume::unbounded();
        let scheduler = CaptureScheduler::new(
            policies_from_config(&streams),
            FileNamer::new("k", false),
            sensor_latency,
            90,
        );
        (
            Driver::new(scheduler, host, NullPersistence, Box::new(tx)),
            rx,
        )
    }

    fn depth_only(samples: &[u16]) -> Notification<'_> {
        Notification {
            depth: Some(DepthFrame {
                samples,
                width: 2,
                height: 2,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn notification_events_reach_sink() {
        let host = Arc::new(ManualHost::new("/out"));
        let (mut driver, rx) = driver(
            host.clone(),
            StreamsConfig {
                color_period: 0.0,
                depth_period: 0.0,
                ir_period: 0.0,
            },
        );

        host.set_time(1.0);
        assert_eq!(driver.on_notification(&mut depth_only(&[5; 4])), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.stream_kind, StreamKind::Depth);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn health_goes_stale_without_frames_and_recovers() {
        let host = Arc::new(ManualHost::new("/out"));
        let (mut driver, _rx) = driver(
            host.clone(),
            StreamsConfig {
                color_period: -1.0,
                depth_period: 1.0,
                ir_period: -1.0,
            },
        );
        let mut watch = driver.health_watch(StalenessMonitor::new(3.0, 0.1));

        host.set_time(1.0);
        assert_eq!(watch.tick(), HealthState::Normal);
        host.set_time(3.5);
        assert_eq!(watch.tick(), HealthState::TimedOut);
        assert_eq!(host.reports(), vec!["Stream timeout: DEPTH".to_string()]);

        driver.on_notification(&mut depth_only(&[5; 4]));
        host.set_time(5.49);
        assert_eq!(watch.tick(), HealthState::Normal);
        host.set_time(5.51);
        assert_eq!(watch.tick(), HealthState::TimedOut);
    }

    #[test]
    fn sensor_latency_does_not_age_streaming_frames() {
        let host = Arc::new(ManualHost::new("/out"));
        let (mut driver, _rx) = driver_with_latency(
            host.clone(),
            StreamsConfig {
                color_period: -1.0,
                depth_period: 0.0,
                ir_period: -1.0,
            },
            0.25,
        );
        let mut watch = driver.health_watch(StalenessMonitor::new(3.0, 0.1));

        // 10 s at 30 fps, checking health after every notification
        for n in 0..300 {
            host.set_time(n as f64 / 30.0);
            driver.on_notification(&mut depth_only(&[5; 4]));
            assert_eq!(watch.tick(), HealthState::Normal, "frame {}", n);
        }
        assert!(host.reports().is_empty());

        // Frames stop: stale once 2 * floor has passed on the capture clock
        host.set_time(299.0 / 30.0 + 0.19);
        assert_eq!(watch.tick(), HealthState::Normal);
        host.set_time(299.0 / 30.0 + 0.21);
        assert_eq!(watch.tick(), HealthState::TimedOut);
    }

    #[test]
    fn distance_age_uses_capture_clock() {
        let host = Arc::new(ManualHost::new("/out"));
        let (mut driver, _rx) = driver_with_latency(host.clone(), StreamsConfig::default(), 0.5);
        let probe = driver.distance_probe();

        host.set_time(4.0);
        driver.on_notification(&mut depth_only(&[1000; 4]));
        assert_eq!(probe.report().unwrap().age, 0.0);
        host.set_time(5.0);
        assert_eq!(probe.report().unwrap().age, 1.0);
    }

    #[test]
    fn stop_wakes_sleeping_loop() {
        let (stop_tx, stop) = flume::bounded::<()>(0);
        let started = Instant::now();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(stop_tx);
        });
        assert!(!stop_requested(&stop));
        sleep_unless(&stop, Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(stop_requested(&stop));
        waker.join().unwrap();
    }

    #[test]
    fn distance_probe_reads_latest_depth() {
        let host = Arc::new(ManualHost::new("/out"));
        let (mut driver, _rx) = driver(host.clone(), StreamsConfig::default());
        let probe = driver.distance_probe();
        assert_eq!(probe.report(), Err(DistanceError::NoDepth));

        host.set_time(2.0);
        driver.on_notification(&mut depth_only(&[2500; 4]));
        host.set_time(2.25);
        let report = probe.report().unwrap();
        assert_eq!(report.meters, 2.5);
        assert_eq!(report.age, 0.25);
    }

    #[test]
    fn acquisition_survives_unavailable_device() {
        let host = Arc::new(ManualHost::new("/out"));
        let (mut driver, rx) = driver(
            host.clone(),
            StreamsConfig {
                color_period: 0.0,
                depth_period: -1.0,
                ir_period: -1.0,
            },
        );
        let mut device = SyntheticDevice::new(DeviceConfig {
            fps: 100,
            color_width: 4,
            color_height: 4,
            depth_width: 8,
            depth_height: 8,
            base_distance_mm: 1000,
        })
        .with_open_failures(2)
        .with_disconnect_after(3);

        let (stop_tx, stop) = flume::bounded::<()>(0);
        let handle = thread::spawn(move || {
            run_acquisition(&mut device, &mut driver, &stop, Duration::from_millis(10));
        });

        // The manual clock only moves when set, so keep it following wall time
        let started = Instant::now();
        let mut received = 0;
        while received < 5 && started.elapsed() < Duration::from_secs(10) {
            host.set_time(started.elapsed().as_secs_f64());
            if rx.recv_timeout(Duration::from_millis(20)).is_ok() {
                received += 1;
            }
        }
        drop(stop_tx);
        handle.join().unwrap();

        assert!(received >= 5, "only {} events", received);
        let reports = host.reports();
        assert!(reports.iter().any(|r| r.starts_with("Sensor not available")));
        assert!(reports.iter().any(|r| r.starts_with("Sensor error")));
    }
}
