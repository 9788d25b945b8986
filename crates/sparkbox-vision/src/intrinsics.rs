use image::RgbImage;
use serde::Deserialize;
use sparkbox_foundation::ConfigError;
use std::path::Path;

/// Pinhole calibration: 3×3 camera matrix plus the usual five distortion
/// coefficients (k1, k2, p1, p2, k3).
#[derive(Debug, Clone, Deserialize)]
pub struct CameraIntrinsics {
    pub camera_matrix: [[f64; 3]; 3],
    #[serde(default)]
    pub distortion: [f64; 5],
}

impl CameraIntrinsics {
    /// No-op calibration: identity matrix, zero distortion.
    pub fn identity() -> Self {
        Self {
            camera_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            distortion: [0.0; 5],
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Intrinsics(format!("{}: {}", path.display(), e)))?;
        let intrinsics: CameraIntrinsics = toml::from_str(&body)
            .map_err(|e| ConfigError::Intrinsics(format!("{}: {}", path.display(), e)))?;
        if intrinsics.camera_matrix[0][0] <= 0.0 || intrinsics.camera_matrix[1][1] <= 0.0 {
            return Err(ConfigError::Intrinsics(format!(
                "{}: focal lengths must be positive",
                path.display()
            )));
        }
        Ok(intrinsics)
    }

    pub fn has_distortion(&self) -> bool {
        self.distortion.iter().any(|&d| d != 0.0)
    }

    /// Build the undistorted image by mapping each output pixel through
    /// the distortion model and sampling the captured frame bilinearly.
    /// Returns a plain clone when there is nothing to correct.
    pub fn undistort(&self, img: &RgbImage) -> RgbImage {
        if !self.has_distortion() {
            return img.clone();
        }

        let fx = self.camera_matrix[0][0];
        let fy = self.camera_matrix[1][1];
        let cx = self.camera_matrix[0][2];
        let cy = self.camera_matrix[1][2];
        let [k1, k2, p1, p2, k3] = self.distortion;

        let (w, h) = img.dimensions();
        let mut out = RgbImage::new(w, h);
        for v in 0..h {
            for u in 0..w {
                let x = (u as f64 - cx) / fx;
                let y = (v as f64 - cy) / fy;
                let r2 = x * x + y * y;
                let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
                let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                let src_x = (fx * xd + cx) as f32;
                let src_y = (fy * yd + cy) as f32;
                out.put_pixel(u, v, crate::imgproc::sample_bilinear(img, src_x, src_y));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn identity_undistort_is_a_clone() {
        let mut img = RgbImage::new(8, 8);
        img.put_pixel(3, 3, image::Rgb([200, 10, 10]));
        let out = CameraIntrinsics::identity().undistort(&img);
        assert_eq!(out, img);
    }

    #[test]
    fn loads_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "camera_matrix = [[900.0, 0.0, 640.0], [0.0, 900.0, 360.0], [0.0, 0.0, 1.0]]\ndistortion = [-0.1, 0.02, 0.0, 0.0, 0.0]"
        )
        .unwrap();
        let intrinsics = CameraIntrinsics::load(file.path()).unwrap();
        assert!(intrinsics.has_distortion());
        assert_eq!(intrinsics.camera_matrix[0][2], 640.0);
    }

    #[test]
    fn rejects_non_positive_focal_length() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "camera_matrix = [[0.0, 0.0, 640.0], [0.0, 900.0, 360.0], [0.0, 0.0, 1.0]]"
        )
        .unwrap();
        assert!(CameraIntrinsics::load(file.path()).is_err());
    }
}
