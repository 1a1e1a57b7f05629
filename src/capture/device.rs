//! Sensor devices that deliver multi-stream notifications

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use super::frame::{ColorFrame, DepthFrame, FrameSet, InfraredFrame, Notification, PixelFormat};
use crate::error::DeviceError;
use crate::DeviceConfig;

/// A multi-stream sensor
///
/// `wait_frames` blocks for at most `timeout` and calls `handler` once per
/// notification. Frame buffers handed to the handler are only valid inside it.
pub trait Device: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), DeviceError>;

    /// Returns `Ok(false)` when no notification arrived within `timeout`
    fn wait_frames(
        &mut self,
        timeout: Duration,
        handler: &mut dyn FnMut(&mut dyn FrameSet),
    ) -> Result<bool, DeviceError>;

    fn close(&mut self);
}

/// Test-pattern generator standing in for real hardware
///
/// Produces a moving BGRA gradient, a tilted-plane depth scene around
/// `base_distance_mm` and an IR ramp, all at `fps`.
pub struct SyntheticDevice {
    config: DeviceConfig,
    open: bool,
    /// Remaining `open` calls that fail, to exercise reconnection
    open_failures: u32,
    /// Notifications delivered before the device reports a disconnect
    disconnect_after: Option<u64>,
    frame_number: u64,
    next_frame: Instant,
    color: Vec<u8>,
    depth: Vec<u16>,
    infrared: Vec<u16>,
}

impl SyntheticDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            open: false,
            open_failures: 0,
            disconnect_after: None,
            frame_number: 0,
            next_frame: Instant::now(),
            color: Vec::new(),
            depth: Vec::new(),
            infrared: Vec::new(),
        }
    }

    /// Fail the first `count` calls to `open`
    pub fn with_open_failures(mut self, count: u32) -> Self {
        self.open_failures = count;
        self
    }

    /// Report a disconnect after `count` notifications
    pub fn with_disconnect_after(mut self, count: u64) -> Self {
        self.disconnect_after = Some(count);
        self
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64)
    }

    fn render(&mut self) {
        let n = self.frame_number;
        let (cw, ch) = (self.config.color_width as usize, self.config.color_height as usize);
        let (dw, dh) = (self.config.depth_width as usize, self.config.depth_height as usize);

        self.color.resize(cw * ch * 4, 0);
        for (i, px) in self.color.chunks_exact_mut(4).enumerate() {
            let (x, y) = (i % cw, i / cw);
            px[0] = ((x as u64 + n) % 256) as u8; // B
            px[1] = (y % 256) as u8; // G
            px[2] = ((x + y) % 256) as u8; // R
            px[3] = 255;
        }

        self.depth.resize(dw * dh, 0);
        let base = self.config.base_distance_mm as i64;
        for (i, sample) in self.depth.iter_mut().enumerate() {
            let (x, y) = ((i % dw) as i64, (i / dw) as i64);
            // Leave a border of invalid readings like a real sensor
            *sample = if x < 4 || y < 4 || x >= dw as i64 - 4 || y >= dh as i64 - 4 {
                0
            } else {
                (base + (y - dh as i64 / 2) * 2).clamp(1, u16::MAX as i64) as u16
            };
        }

        self.infrared.resize(dw * dh, 0);
        for (i, sample) in self.infrared.iter_mut().enumerate() {
            *sample = (((i % dw) as u64 * 128 + n * 64) % u16::MAX as u64) as u16;
        }
    }
}

impl Device for SyntheticDevice {
    fn name(&self) -> &str {
        "synthetic"
    }

    #[instrument(skip(self))]
    fn open(&mut self) -> Result<(), DeviceError> {
        if self.open_failures > 0 {
            self.open_failures -= 1;
            return Err(DeviceError::Unavailable("synthetic device not ready".into()));
        }
        info!(
            "Synthetic device open: color {}x{}, depth {}x{} @ {} fps",
            self.config.color_width,
            self.config.color_height,
            self.config.depth_width,
            self.config.depth_height,
            self.config.fps
        );
        self.open = true;
        self.next_frame = Instant::now();
        Ok(())
    }

    fn wait_frames(
        &mut self,
        timeout: Duration,
        handler: &mut dyn FnMut(&mut dyn FrameSet),
    ) -> Result<bool, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        if self.disconnect_after.is_some_and(|limit| self.frame_number >= limit) {
            self.open = false;
            self.disconnect_after = None;
            return Err(DeviceError::Disconnected);
        }

        let now = Instant::now();
        if self.next_frame > now {
            let wait = self.next_frame - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(false);
            }
            thread::sleep(wait);
        }
        self.next_frame += self.frame_interval();

        self.render();
        let mut notification = Notification {
            color: Some(ColorFrame {
                data: &self.color,
                width: self.config.color_width,
                height: self.config.color_height,
                format: PixelFormat::Bgra32,
            }),
            depth: Some(DepthFrame {
                samples: &self.depth,
                width: self.config.depth_width,
                height: self.config.depth_height,
            }),
            infrared: Some(InfraredFrame {
                samples: &self.infrared,
                width: self.config.depth_width,
                height: self.config.depth_height,
            }),
        };
        handler(&mut notification);

        self.frame_number += 1;
        if self.frame_number % 300 == 0 {
            debug!("Synthetic device: {} notifications", self.frame_number);
        }
        Ok(true)
    }

    fn close(&mut self) {
        if self.open {
            info!("Synthetic device closed after {} notifications", self.frame_number);
        }
        self.open = false;
    }
}
