//! Per-notification frame views handed over by the sensor
//!
//! Buffers are borrowed: they are only valid for the duration of the
//! notification callback, so anything that outlives it must copy.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Color layouts a sensor may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgra32,
    Rgb24,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// Borrowed color frame
#[derive(Debug, Clone, Copy)]
pub struct ColorFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Borrowed depth frame, millimeters per sample, row-major
#[derive(Debug, Clone, Copy)]
pub struct DepthFrame<'a> {
    pub samples: &'a [u16],
    pub width: u32,
    pub height: u32,
}

/// Borrowed 16-bit infrared intensity frame, row-major
#[derive(Debug, Clone, Copy)]
pub struct InfraredFrame<'a> {
    pub samples: &'a [u16],
    pub width: u32,
    pub height: u32,
}

impl ColorFrame<'_> {
    /// Copy into an owned RGB image ready for JPEG encoding
    pub fn to_rgb_image(&self) -> Result<RgbImage, StorageError> {
        let pixels = self.width as usize * self.height as usize;
        let expected = pixels * self.format.bytes_per_pixel();
        if self.data.len() < expected {
            return Err(StorageError::Dimensions {
                len: self.data.len(),
                width: self.width,
                height: self.height,
            });
        }

        let rgb = match self.format {
            PixelFormat::Rgb24 => self.data[..expected].to_vec(),
            PixelFormat::Bgra32 => {
                let mut rgb = Vec::with_capacity(pixels * 3);
                for chunk in self.data[..expected].chunks_exact(4) {
                    rgb.push(chunk[2]); // R
                    rgb.push(chunk[1]); // G
                    rgb.push(chunk[0]); // B
                }
                rgb
            }
        };

        RgbImage::from_raw(self.width, self.height, rgb).ok_or(StorageError::Dimensions {
            len: self.data.len(),
            width: self.width,
            height: self.height,
        })
    }
}

impl InfraredFrame<'_> {
    /// Scale 16-bit intensities down to 8-bit grayscale
    pub fn to_gray_image(&self) -> Result<GrayImage, StorageError> {
        let pixels = self.width as usize * self.height as usize;
        if self.samples.len() < pixels {
            return Err(StorageError::Dimensions {
                len: self.samples.len() * 2,
                width: self.width,
                height: self.height,
            });
        }

        let luma = self.samples[..pixels]
            .iter()
            .map(|&ir| (ir >> 7).min(u8::MAX as u16) as u8)
            .collect();

        GrayImage::from_raw(self.width, self.height, luma).ok_or(StorageError::Dimensions {
            len: self.samples.len() * 2,
            width: self.width,
            height: self.height,
        })
    }
}

/// The streams carried by one hardware notification
///
/// Color and infrared are pulled only when the scheduler decides they are
/// due. Depth is pulled from every notification that carries it, to keep the
/// distance report current. Any stream may be absent.
pub trait FrameSet {
    fn color(&mut self) -> Option<ColorFrame<'_>>;
    fn depth(&mut self) -> Option<DepthFrame<'_>>;
    fn infrared(&mut self) -> Option<InfraredFrame<'_>>;
}

/// A notification backed by plain borrowed slices
#[derive(Debug, Default, Clone, Copy)]
pub struct Notification<'a> {
    pub color: Option<ColorFrame<'a>>,
    pub depth: Option<DepthFrame<'a>>,
    pub infrared: Option<InfraredFrame<'a>>,
}

impl FrameSet for Notification<'_> {
    fn color(&mut self) -> Option<ColorFrame<'_>> {
        self.color
    }

    fn depth(&mut self) -> Option<DepthFrame<'_>> {
        self.depth
    }

    fn infrared(&mut self) -> Option<InfraredFrame<'_>> {
        self.infrared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_is_swizzled_to_rgb() {
        let data = [10u8, 20, 30, 255, 1, 2, 3, 255];
        let frame = ColorFrame {
            data: &data,
            width: 2,
            height: 1,
            format: PixelFormat::Bgra32,
        };
        let image = frame.to_rgb_image().unwrap();
        assert_eq!(image.as_raw(), &vec![30, 20, 10, 3, 2, 1]);
    }

    #[test]
    fn short_color_buffer_is_rejected() {
        let data = [0u8; 5];
        let frame = ColorFrame {
            data: &data,
            width: 2,
            height: 1,
            format: PixelFormat::Rgb24,
        };
        assert!(matches!(
            frame.to_rgb_image(),
            Err(StorageError::Dimensions { width: 2, height: 1, .. })
        ));
    }

    #[test]
    fn infrared_scales_and_saturates() {
        let samples = [0u16, 128, 256 * 128, u16::MAX];
        let frame = InfraredFrame {
            samples: &samples,
            width: 4,
            height: 1,
        };
        let image = frame.to_gray_image().unwrap();
        assert_eq!(image.as_raw(), &vec![0, 1, 255, 255]);
    }
}
