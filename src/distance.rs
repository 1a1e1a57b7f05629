//! "Last distance" diagnostic read from the most recent depth frame

use std::fmt;

use crate::error::DistanceError;
use crate::pipeline::{DepthBuffer, DepthReader};

/// Fraction of each dimension covered by the sampled center patch
const PATCH_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceReport {
    pub meters: f64,
    /// Seconds since the depth frame was captured
    pub age: f64,
    /// Non-zero samples that went into the average
    pub valid_samples: usize,
}

impl fmt::Display for DistanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} m ({:.2} s ago)", self.meters, self.age)
    }
}

/// Column/row ranges of the centered patch
fn center_patch(width: u32, height: u32) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
    let span = |len: u32| {
        let len = len as usize;
        let size = ((len as f64 * PATCH_FRACTION).round() as usize)
            .max(1)
            .min(len);
        let start = (len - size) / 2;
        start..start + size
    };
    (span(width), span(height))
}

/// Mean of the non-zero samples in the center patch, in millimeters
pub fn center_average_mm(buffer: &DepthBuffer) -> Result<(f64, usize), DistanceError> {
    let (cols, rows) = center_patch(buffer.width(), buffer.height());
    let width = buffer.width() as usize;
    let samples = buffer.samples();

    let (sum, count) = rows
        .flat_map(|row| cols.clone().map(move |col| row * width + col))
        .filter_map(|index| samples.get(index).copied())
        .filter(|&mm| mm != 0)
        .fold((0u64, 0usize), |(sum, count), mm| (sum + mm as u64, count + 1));

    if count == 0 {
        return Err(DistanceError::NoValidSamples);
    }
    Ok((sum as f64 / count as f64, count))
}

/// Report the distance at the center of the latest depth frame
pub fn report_distance(reader: &DepthReader, now: f64) -> Result<DistanceReport, DistanceError> {
    let buffer = reader.latest().ok_or(DistanceError::NoDepth)?;
    let (mm, valid_samples) = center_average_mm(&buffer)?;
    Ok(DistanceReport {
        meters: mm / 1000.0,
        age: (now - buffer.captured_at()).max(0.0),
        valid_samples,
    })
}
