//! Per-frame canvas detection. The target is a 180 mm white square with a
//! concentric 20 mm black border; the detector finds the outer quad,
//! validates the nested border, and keeps the last good corners for
//! rectification at capture time.

use crate::geometry::{Corners, Point};
use crate::imgproc;
use crate::intrinsics::CameraIntrinsics;
use crate::overlay;
use crate::RASTER_SIZE;
use image::{GrayImage, RgbImage};

/// Minimum pixel area for an outer-quad candidate.
const MIN_OUTER_AREA: f64 = 5_000.0;
/// Minimum pixel area for the border and inner-white quads.
const MIN_INNER_AREA: f64 = 1_000.0;
/// Polygon approximation tolerance as a fraction of the perimeter.
const EPSILON_RATIO: f64 = 0.02;
/// Outer quad side-length tolerance (max/min).
const MAX_OUTER_SIDE_RATIO: f32 = 1.5;
/// Inner-white quad side-length tolerance.
const MAX_INNER_SIDE_RATIO: f32 = 1.2;

/// What one call to [`CanvasDetector::process`] produced.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    /// Currently stored corners, possibly carried from a previous frame.
    pub corners: Option<Corners>,
    /// Whether this frame produced a fresh detection.
    pub found_this_frame: bool,
}

pub struct CanvasDetector {
    intrinsics: CameraIntrinsics,
    corners: Option<Corners>,
}

impl CanvasDetector {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            corners: None,
        }
    }

    pub fn corners(&self) -> Option<Corners> {
        self.corners
    }

    /// Run detection on a raw frame. Returns the undistorted frame with
    /// the detected quad drawn on it. A frame with no valid quad leaves
    /// the stored corners untouched.
    pub fn process(&mut self, raw: &RgbImage) -> (RgbImage, DetectionReport) {
        let undistorted = self.intrinsics.undistort(raw);

        let gray = imgproc::grayscale(&undistorted);
        let blurred = imgproc::gaussian_blur5(&gray);
        let binary = imgproc::otsu_threshold(&blurred, false);

        let outer = self.find_outer_quad(&binary);
        let confirmed = outer.filter(|quad| self.validate_border(&blurred, quad));

        let mut found = false;
        if let Some(quad) = confirmed {
            self.corners = Some(quad);
            found = true;
        }

        let mut annotated = undistorted;
        if let Some(quad) = self.corners {
            overlay::draw_quad(&mut annotated, &quad, found);
        }

        (
            annotated,
            DetectionReport {
                corners: self.corners,
                found_this_frame: found,
            },
        )
    }

    /// Warp the undistorted frame so the stored outer quad fills a
    /// 720×720 raster. With no stored corners the frame passes through
    /// unchanged and the caller proceeds in degraded mode.
    pub fn rectify(&self, raw: &RgbImage) -> RgbImage {
        let undistorted = self.intrinsics.undistort(raw);
        match &self.corners {
            Some(corners) => imgproc::warp_to_square(&undistorted, corners, RASTER_SIZE),
            None => {
                tracing::warn!("Rectify requested with no stored corners; passing frame through");
                undistorted
            }
        }
    }

    /// Largest 4-vertex convex contour passing the area and side-ratio
    /// gates.
    fn find_outer_quad(&self, binary: &GrayImage) -> Option<Corners> {
        let mut best: Option<(f32, Corners)> = None;

        for contour in imgproc::external_contours(binary, MIN_OUTER_AREA) {
            let Some(quad) = approx_quad(&contour) else {
                continue;
            };
            if !quad.is_convex() || quad.side_ratio() > MAX_OUTER_SIDE_RATIO {
                continue;
            }
            let area = quad.area();
            if best.as_ref().map_or(true, |(a, _)| area > *a) {
                best = Some((area, quad));
            }
        }
        best.map(|(_, quad)| quad)
    }

    /// Confirm the nested structure inside the candidate: an inverted
    /// re-binarization of the quad's bounding rectangle must contain a
    /// convex 4-vertex border child centered inside the quad, and that
    /// child must in turn enclose the true inner-white quad.
    fn validate_border(&self, blurred: &GrayImage, outer: &Corners) -> bool {
        let Some(border) = self.find_child_quad(blurred, outer, true, MAX_OUTER_SIDE_RATIO) else {
            return false;
        };
        // Recurse once: the border's interior must hold the inner white
        // square.
        self.find_child_quad(blurred, &border, false, MAX_INNER_SIDE_RATIO)
            .is_some()
    }

    fn find_child_quad(
        &self,
        blurred: &GrayImage,
        parent: &Corners,
        invert: bool,
        max_side_ratio: f32,
    ) -> Option<Corners> {
        let (x, y, w, h) = parent.bounding_rect(blurred.width(), blurred.height());
        if w < 8 || h < 8 {
            return None;
        }
        let region = imgproc::crop(blurred, x, y, w, h);
        let binary = imgproc::otsu_threshold(&region, invert);

        let mut best: Option<(f32, Corners)> = None;
        for contour in imgproc::external_contours(&binary, MIN_INNER_AREA) {
            let Some(local) = approx_quad(&contour) else {
                continue;
            };
            // Back into full-image coordinates.
            let shifted = shift(&local, x as f32, y as f32);
            if !shifted.is_convex() || shifted.side_ratio() > max_side_ratio {
                continue;
            }
            if !parent.contains(shifted.centroid()) {
                continue;
            }
            // The child must be strictly smaller than its parent, not the
            // parent's own outline re-traced.
            if shifted.area() >= parent.area() * 0.98 {
                continue;
            }
            let area = shifted.area();
            if best.as_ref().map_or(true, |(a, _)| area > *a) {
                best = Some((area, shifted));
            }
        }
        best.map(|(_, quad)| quad)
    }
}

fn approx_quad(contour: &imgproc::Contour) -> Option<Corners> {
    let epsilon = EPSILON_RATIO * contour.perimeter();
    let poly = imgproc::approx_polygon(contour, epsilon);
    if poly.len() != 4 {
        return None;
    }
    Some(Corners::order([poly[0], poly[1], poly[2], poly[3]]))
}

fn shift(corners: &Corners, dx: f32, dy: f32) -> Corners {
    let s = |p: Point| Point::new(p.x + dx, p.y + dy);
    Corners {
        tl: s(corners.tl),
        tr: s(corners.tr),
        br: s(corners.br),
        bl: s(corners.bl),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn empty_frame_leaves_corners_unset() {
        let mut detector = CanvasDetector::new(CameraIntrinsics::identity());
        let frame = RgbImage::from_pixel(320, 240, Rgb([40, 40, 40]));
        let (_, report) = detector.process(&frame);
        assert!(!report.found_this_frame);
        assert!(report.corners.is_none());
    }

    #[test]
    fn rectify_without_corners_passes_frame_through() {
        let detector = CanvasDetector::new(CameraIntrinsics::identity());
        let frame = RgbImage::from_pixel(320, 240, Rgb([40, 40, 40]));
        let out = detector.rectify(&frame);
        assert_eq!(out.dimensions(), (320, 240));
    }

    #[test]
    fn plain_white_square_without_border_is_rejected() {
        let mut frame = RgbImage::from_pixel(640, 480, Rgb([30, 30, 30]));
        for y in 100..380 {
            for x in 180..460 {
                frame.put_pixel(x, y, Rgb([245, 245, 245]));
            }
        }
        let mut detector = CanvasDetector::new(CameraIntrinsics::identity());
        let (_, report) = detector.process(&frame);
        assert!(!report.found_this_frame, "square with no border must not validate");
    }
}
