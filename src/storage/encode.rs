//! Image and raw-sample writers

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GrayImage, RgbImage};

use crate::error::StorageError;

/// Create the parent directory of `path` if it doesn't exist yet
pub fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn create(path: &Path) -> Result<BufWriter<File>, StorageError> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::new(file))
}

fn encode_jpeg(
    path: &Path,
    quality: u8,
    data: &[u8],
    width: u32,
    height: u32,
    color: ExtendedColorType,
) -> Result<(), StorageError> {
    let mut writer = create(path)?;
    JpegEncoder::new_with_quality(&mut writer, quality)
        .encode(data, width, height, color)
        .map_err(|source| StorageError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    writer.flush().map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_jpeg(path: &Path, quality: u8, image: &RgbImage) -> Result<(), StorageError> {
    encode_jpeg(
        path,
        quality,
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )
}

pub fn save_gray_jpeg(path: &Path, quality: u8, image: &GrayImage) -> Result<(), StorageError> {
    encode_jpeg(
        path,
        quality,
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::L8,
    )
}

/// Headerless little-endian u16 samples, in the order given
pub fn save_raw_u16(path: &Path, samples: &[u16]) -> Result<(), StorageError> {
    let mut writer = create(path)?;
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    writer
        .write_all(&bytes)
        .and_then(|_| writer.flush())
        .map_err(|source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        })
}
