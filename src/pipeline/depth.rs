//! Latest-depth buffer shared with diagnostic readers
//!
//! The notification thread is the only writer. It keeps two buffers: one
//! published through an `ArcSwapOption` for readers, one spare that it
//! overwrites in place on the next depth frame and then swaps in. Readers never
//! take a lock; a reader still holding the spare just forces a fresh
//! allocation for that frame.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{info, warn};

use crate::capture::frame::DepthFrame;

/// Depth samples in millimeters, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBuffer {
    width: u32,
    height: u32,
    samples: Vec<u16>,
    /// Monotonic capture time of the samples
    captured_at: f64,
}

impl DepthBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            samples: vec![0; width as usize * height as usize],
            captured_at: 0.0,
        }
    }

    /// Wrap existing samples; `None` if the length doesn't match the dimensions
    pub fn from_samples(
        width: u32,
        height: u32,
        samples: Vec<u16>,
        captured_at: f64,
    ) -> Option<Self> {
        (samples.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            samples,
            captured_at,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn captured_at(&self) -> f64 {
        self.captured_at
    }
}

/// Writer side, owned by the scheduler
pub struct DepthStore {
    shared: Arc<ArcSwapOption<DepthBuffer>>,
    spare: Option<Arc<DepthBuffer>>,
}

/// Read side, cheap to clone
#[derive(Clone)]
pub struct DepthReader {
    shared: Arc<ArcSwapOption<DepthBuffer>>,
}

impl DepthStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ArcSwapOption::empty()),
            spare: None,
        }
    }

    pub fn reader(&self) -> DepthReader {
        DepthReader {
            shared: self.shared.clone(),
        }
    }

    /// Copy a frame in and publish it. Returns `None` for a malformed frame.
    pub fn write(&mut self, frame: &DepthFrame<'_>, captured_at: f64) -> Option<Arc<DepthBuffer>> {
        let len = frame.width as usize * frame.height as usize;
        if len == 0 || frame.samples.len() < len {
            warn!(
                "Ignoring depth frame: {} samples for {}x{}",
                frame.samples.len(),
                frame.width,
                frame.height
            );
            return None;
        }

        let mut buffer = match self.spare.take() {
            Some(spare) if spare.width == frame.width && spare.height == frame.height => spare,
            Some(spare) => {
                info!(
                    "Depth resolution changed {}x{} -> {}x{}, reallocating",
                    spare.width, spare.height, frame.width, frame.height
                );
                Arc::new(DepthBuffer::new(frame.width, frame.height))
            }
            None => Arc::new(DepthBuffer::new(frame.width, frame.height)),
        };

        // A reader still holds the spare: fall back to a fresh buffer
        if Arc::get_mut(&mut buffer).is_none() {
            buffer = Arc::new(DepthBuffer::new(frame.width, frame.height));
        }
        if let Some(target) = Arc::get_mut(&mut buffer) {
            target.samples.copy_from_slice(&frame.samples[..len]);
            target.captured_at = captured_at;
        }

        self.spare = self.shared.swap(Some(buffer.clone()));
        Some(buffer)
    }
}

impl Default for DepthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthReader {
    /// Most recently published depth frame, if any
    pub fn latest(&self) -> Option<Arc<DepthBuffer>> {
        self.shared.load_full()
    }
}
