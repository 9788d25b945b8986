use crate::detector::CanvasDetector;
use crate::frame::Frame;
use sparkbox_foundation::CameraError;
use std::path::{Path, PathBuf};

/// Rectify a raw frame and persist it twice: a permanent copy under the
/// capture directory and a working copy under the temp directory (the
/// one the pipeline reads, deleted on clean shutdown).
pub fn save_rectified_snapshot(
    frame: &Frame,
    detector: &CanvasDetector,
    capture_dir: &Path,
    temp_dir: &Path,
) -> Result<(PathBuf, PathBuf), CameraError> {
    let rectified = detector.rectify(&frame.pixels);

    let filename = format!("capture_{}.jpg", chrono::Local::now().format("%Y%m%d_%H%M%S"));

    std::fs::create_dir_all(capture_dir)
        .map_err(|e| CameraError::ReadFailed(format!("create {}: {}", capture_dir.display(), e)))?;
    std::fs::create_dir_all(temp_dir)
        .map_err(|e| CameraError::ReadFailed(format!("create {}: {}", temp_dir.display(), e)))?;

    let capture_path = capture_dir.join(&filename);
    let temp_path = temp_dir.join(&filename);

    rectified
        .save(&capture_path)
        .map_err(|e| CameraError::ReadFailed(format!("save {}: {}", capture_path.display(), e)))?;
    rectified
        .save(&temp_path)
        .map_err(|e| CameraError::ReadFailed(format!("save {}: {}", temp_path.display(), e)))?;

    tracing::info!(path = %capture_path.display(), "Snapshot saved");
    Ok((capture_path, temp_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrinsics::CameraIntrinsics;
    use image::{Rgb, RgbImage};

    #[test]
    fn snapshot_writes_both_copies() {
        let dir = tempfile::tempdir().unwrap();
        let capture_dir = dir.path().join("capture");
        let temp_dir = dir.path().join("temp");

        let detector = CanvasDetector::new(CameraIntrinsics::identity());
        let frame = Frame::new(RgbImage::from_pixel(64, 48, Rgb([128, 128, 128])));

        let (capture_path, temp_path) =
            save_rectified_snapshot(&frame, &detector, &capture_dir, &temp_dir).unwrap();

        assert!(capture_path.exists());
        assert!(temp_path.exists());
        assert_eq!(
            capture_path.file_name().unwrap(),
            temp_path.file_name().unwrap()
        );
        let name = capture_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("capture_") && name.ends_with(".jpg"));
    }
}
