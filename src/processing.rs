use crate::error::Result;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::path::Path;
use tracing::debug;

/// Maximum output dimensions for captured frames (720p).
const MAX_WIDTH: u32 = 1280;
const MAX_HEIGHT: u32 = 720;

/// JPEG quality for re-encoded captures.
const JPEG_QUALITY: u8 = 90;

/// Result of running a captured frame through the resize pipeline.
#[derive(Debug, Clone)]
pub struct ProcessedCapture {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode a captured JPEG frame, bound it to 720p preserving aspect ratio,
/// and re-encode at fixed quality.
///
/// Frames already within bounds keep their dimensions. Decode failure is an
/// error for this frame only; callers drop the frame and move on. The
/// function is stateless and safe to run concurrently on independent frames.
pub fn process_capture(bytes: &[u8]) -> Result<ProcessedCapture> {
    let img = image::load_from_memory(bytes)?;

    let (width, height) = (img.width(), img.height());

    let img = if width > MAX_WIDTH || height > MAX_HEIGHT {
        let aspect = width as f64 / height as f64;
        let (target_width, target_height) = if aspect > 16.0 / 9.0 {
            // Width is the limiting factor
            let target_height = ((MAX_WIDTH as f64 / aspect).round() as u32).max(1);
            (MAX_WIDTH, target_height)
        } else {
            // Height is the limiting factor
            let target_width = ((MAX_HEIGHT as f64 * aspect).round() as u32).max(1);
            (target_width, MAX_HEIGHT)
        };

        debug!(
            "Resizing capture from {}x{} to {}x{}",
            width, height, target_width, target_height
        );
        img.resize_exact(target_width, target_height, FilterType::Lanczos3)
    } else {
        debug!(
            "Capture {}x{} already within {}x{}, keeping original size",
            width, height, MAX_WIDTH, MAX_HEIGHT
        );
        img
    };

    let rgb = img.to_rgb8();
    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
    encoder.encode_image(&rgb)?;

    Ok(ProcessedCapture {
        width: rgb.width(),
        height: rgb.height(),
        bytes: encoded,
    })
}

/// Write a processed capture under the capture directory.
///
/// The filename is derived from the current time and the reading's track id,
/// mirroring the path recorded on the detection.
pub async fn save_capture(dir: &Path, bytes: &[u8], track_id: i64) -> Result<String> {
    tokio::fs::create_dir_all(dir).await?;

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let filename = format!("mqtt_capture_{}_track_{}.jpg", stamp, track_id);
    let path = dir.join(filename);

    tokio::fs::write(&path, bytes).await?;

    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([40, 80, 120]));
        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
        encoder.encode_image(&img).unwrap();
        bytes
    }

    #[test]
    fn test_oversized_16_9_frame_resizes_to_720p() {
        let input = jpeg_fixture(2560, 1440);
        let processed = process_capture(&input).unwrap();
        assert_eq!((processed.width, processed.height), (1280, 720));

        let decoded = image::load_from_memory(&processed.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1280, 720));
    }

    #[test]
    fn test_ultrawide_frame_scales_by_width() {
        let input = jpeg_fixture(3840, 1080);
        let processed = process_capture(&input).unwrap();
        assert_eq!(processed.width, 1280);
        assert_eq!(processed.height, 360);
    }

    #[test]
    fn test_tall_frame_scales_by_height() {
        let input = jpeg_fixture(1080, 1920);
        let processed = process_capture(&input).unwrap();
        assert_eq!(processed.height, 720);
        assert_eq!(processed.width, 405);
    }

    #[test]
    fn test_small_frame_keeps_dimensions() {
        let input = jpeg_fixture(800, 600);
        let processed = process_capture(&input).unwrap();
        assert_eq!((processed.width, processed.height), (800, 600));
    }

    #[test]
    fn test_non_image_bytes_yield_decode_error() {
        let result = process_capture(b"definitely not a jpeg");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_save_capture_writes_track_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_capture(dir.path(), b"jpegbytes", 7).await.unwrap();

        assert!(path.contains("mqtt_capture_"));
        assert!(path.ends_with("_track_7.jpg"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"jpegbytes");
    }
}
