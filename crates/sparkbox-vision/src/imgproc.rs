//! Raster primitives the detector is built from: grayscale, blur, Otsu
//! binarization, external contour tracing, polygon approximation and the
//! perspective warp. Binary images use 255 for foreground, 0 for
//! background.

use crate::geometry::{Corners, Homography, Point};
use image::{GrayImage, Luma, Rgb, RgbImage};

pub fn grayscale(rgb: &RgbImage) -> GrayImage {
    image::imageops::grayscale(rgb)
}

/// 5×5 Gaussian blur, run as two separable passes of [1 4 6 4 1]/16
/// with clamped borders.
pub fn gaussian_blur5(src: &GrayImage) -> GrayImage {
    const KERNEL: [u32; 5] = [1, 4, 6, 4, 1];
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }

    let mut tmp = vec![0u8; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for (k, weight) in KERNEL.iter().enumerate() {
                let sx = (x as i64 + k as i64 - 2).clamp(0, w as i64 - 1) as u32;
                acc += weight * src.get_pixel(sx, y)[0] as u32;
            }
            tmp[(y * w + x) as usize] = (acc / 16) as u8;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for (k, weight) in KERNEL.iter().enumerate() {
                let sy = (y as i64 + k as i64 - 2).clamp(0, h as i64 - 1) as u32;
                acc += weight * tmp[(sy * w + x) as usize] as u32;
            }
            out.put_pixel(x, y, Luma([(acc / 16) as u8]));
        }
    }
    out
}

/// Otsu's threshold over the image histogram: the level maximizing
/// between-class variance.
pub fn otsu_level(gray: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p[0] as usize] += 1;
    }

    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0;
    }
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut sum_bg = 0.0f64;
    let mut weight_bg = 0u64;
    let mut best_level = 0u8;
    let mut best_variance = 0.0f64;

    for level in 0..256usize {
        weight_bg += hist[level];
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += level as f64 * hist[level] as f64;

        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let variance =
            weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg) * (mean_bg - mean_fg);
        if variance > best_variance {
            best_variance = variance;
            best_level = level as u8;
        }
    }
    best_level
}

/// Binarize at the Otsu level. `invert` selects the dark side as
/// foreground.
pub fn otsu_threshold(gray: &GrayImage, invert: bool) -> GrayImage {
    let level = otsu_level(gray);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, p) in gray.enumerate_pixels() {
        let fg = if invert { p[0] <= level } else { p[0] > level };
        out.put_pixel(x, y, Luma([if fg { 255 } else { 0 }]));
    }
    out
}

/// Sub-view copy of a region, clamped to the image.
pub fn crop(gray: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
    image::imageops::crop_imm(gray, x, y, w, h).to_image()
}

/// An ordered boundary of one connected foreground component.
#[derive(Debug, Clone)]
pub struct Contour {
    pub points: Vec<(i32, i32)>,
}

impl Contour {
    /// Shoelace area of the boundary polygon.
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut acc = 0.0f64;
        for i in 0..n {
            let (x0, y0) = self.points[i];
            let (x1, y1) = self.points[(i + 1) % n];
            acc += x0 as f64 * y1 as f64 - x1 as f64 * y0 as f64;
        }
        acc.abs() / 2.0
    }

    pub fn perimeter(&self) -> f64 {
        let n = self.points.len();
        if n < 2 {
            return 0.0;
        }
        let mut acc = 0.0f64;
        for i in 0..n {
            let (x0, y0) = self.points[i];
            let (x1, y1) = self.points[(i + 1) % n];
            let (dx, dy) = ((x1 - x0) as f64, (y1 - y0) as f64);
            acc += (dx * dx + dy * dy).sqrt();
        }
        acc
    }
}

/// External boundaries of 8-connected foreground components, traced with
/// Moore-neighbor following. Components smaller than `min_area` are
/// dropped.
pub fn external_contours(bin: &GrayImage, min_area: f64) -> Vec<Contour> {
    let (w, h) = (bin.width() as i32, bin.height() as i32);
    let fg = |x: i32, y: i32| -> bool {
        x >= 0 && y >= 0 && x < w && y < h && bin.get_pixel(x as u32, y as u32)[0] > 0
    };

    let mut labeled = vec![false; (w * h) as usize];
    let mut contours = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if !fg(x, y) || labeled[(y * w + x) as usize] {
                continue;
            }
            // Scan order guarantees this is a left-edge pixel of a new
            // component, so tracing enters from the west.
            let contour = trace_boundary(&fg, (x, y));
            flood_label(bin, &mut labeled, x, y);

            let traced = Contour { points: contour };
            if traced.area() >= min_area {
                contours.push(traced);
            }
        }
    }
    contours
}

/// Clockwise Moore-neighbor offsets starting from the west.
const MOORE: [(i32, i32); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

fn trace_boundary(fg: &dyn Fn(i32, i32) -> bool, start: (i32, i32)) -> Vec<(i32, i32)> {
    let mut boundary = vec![start];
    let mut current = start;
    // We entered the start pixel from the west.
    let mut backtrack = 0usize;

    let limit = 1_000_000usize;
    for _ in 0..limit {
        let mut found = None;
        for step in 0..8 {
            let dir = (backtrack + 1 + step) % 8;
            let (dx, dy) = MOORE[dir];
            let next = (current.0 + dx, current.1 + dy);
            if fg(next.0, next.1) {
                found = Some((next, dir));
                break;
            }
        }

        let Some((next, dir)) = found else {
            break; // isolated pixel
        };

        if next == start && boundary.len() > 1 {
            break;
        }

        boundary.push(next);
        current = next;
        // The new backtrack direction points at the previous pixel.
        backtrack = (dir + 4) % 8;
    }
    boundary
}

fn flood_label(bin: &GrayImage, labeled: &mut [bool], sx: i32, sy: i32) {
    let (w, h) = (bin.width() as i32, bin.height() as i32);
    let mut stack = vec![(sx, sy)];
    while let Some((x, y)) = stack.pop() {
        if x < 0 || y < 0 || x >= w || y >= h {
            continue;
        }
        let idx = (y * w + x) as usize;
        if labeled[idx] || bin.get_pixel(x as u32, y as u32)[0] == 0 {
            continue;
        }
        labeled[idx] = true;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx != 0 || dy != 0 {
                    stack.push((x + dx, y + dy));
                }
            }
        }
    }
}

/// Ramer–Douglas–Peucker simplification of a closed contour. The chain is
/// split at the two mutually farthest anchor points, each half simplified
/// against `epsilon`.
pub fn approx_polygon(contour: &Contour, epsilon: f64) -> Vec<Point> {
    let pts = &contour.points;
    if pts.len() < 4 {
        return pts
            .iter()
            .map(|&(x, y)| Point::new(x as f32, y as f32))
            .collect();
    }

    // Anchor 1: index 0. Anchor 2: farthest point from it.
    let (x0, y0) = pts[0];
    let far = (0..pts.len())
        .max_by(|&i, &j| {
            let di = dist2(pts[i], (x0, y0));
            let dj = dist2(pts[j], (x0, y0));
            di.total_cmp(&dj)
        })
        .unwrap();

    let first: Vec<(i32, i32)> = pts[0..=far].to_vec();
    let mut second: Vec<(i32, i32)> = pts[far..].to_vec();
    second.push(pts[0]);

    let mut out = Vec::new();
    rdp(&first, epsilon, &mut out);
    out.pop(); // shared anchor
    rdp(&second, epsilon, &mut out);
    out.pop(); // closing point duplicates index 0

    out.into_iter()
        .map(|(x, y)| Point::new(x as f32, y as f32))
        .collect()
}

fn dist2(a: (i32, i32), b: (i32, i32)) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    dx * dx + dy * dy
}

fn perpendicular_distance(p: (i32, i32), a: (i32, i32), b: (i32, i32)) -> f64 {
    let (px, py) = (p.0 as f64, p.1 as f64);
    let (ax, ay) = (a.0 as f64, a.1 as f64);
    let (bx, by) = (b.0 as f64, b.1 as f64);
    let (dx, dy) = (bx - ax, by - ay);
    let norm = (dx * dx + dy * dy).sqrt();
    if norm < f64::EPSILON {
        return ((px - ax).powi(2) + (py - ay).powi(2)).sqrt();
    }
    ((dx * (ay - py)) - ((ax - px) * dy)).abs() / norm
}

fn rdp(chain: &[(i32, i32)], epsilon: f64, out: &mut Vec<(i32, i32)>) {
    if chain.len() < 3 {
        out.extend_from_slice(chain);
        return;
    }
    let first = chain[0];
    let last = chain[chain.len() - 1];

    let (mut max_dist, mut index) = (0.0f64, 0usize);
    for (i, &p) in chain.iter().enumerate().skip(1).take(chain.len() - 2) {
        let d = perpendicular_distance(p, first, last);
        if d > max_dist {
            max_dist = d;
            index = i;
        }
    }

    if max_dist > epsilon {
        rdp(&chain[0..=index], epsilon, out);
        out.pop();
        rdp(&chain[index..], epsilon, out);
    } else {
        out.push(first);
        out.push(last);
    }
}

/// Warp the region bounded by `src` onto an axis-aligned `size`×`size`
/// raster, sampling bilinearly from the source image.
pub fn warp_to_square(img: &RgbImage, src: &Corners, size: u32) -> RgbImage {
    let dst = Corners::square(Point::new(0.0, 0.0), size as f32);
    // Map output coordinates back into the source image.
    let Some(back) = Homography::from_corners(&dst, src) else {
        return img.clone();
    };

    let mut out = RgbImage::new(size, size);
    for y in 0..size {
        for x in 0..size {
            let p = back.apply(Point::new(x as f32, y as f32));
            out.put_pixel(x, y, sample_bilinear(img, p.x, p.y));
        }
    }
    out
}

pub fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |xi: i64, yi: i64| -> [f32; 3] {
        let xi = xi.clamp(0, w - 1) as u32;
        let yi = yi.clamp(0, h - 1) as u32;
        let p = img.get_pixel(xi, yi);
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };

    if x0 < -1 || y0 < -1 || x0 > w || y0 > h {
        return Rgb([0, 0, 0]);
    }

    let p00 = at(x0, y0);
    let p10 = at(x0 + 1, y0);
    let p01 = at(x0, y0 + 1);
    let p11 = at(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_rect(w: u32, h: u32, x0: u32, y0: u32, rw: u32, rh: u32) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for y in y0..(y0 + rh) {
            for x in x0..(x0 + rw) {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        img
    }

    #[test]
    fn otsu_separates_bimodal_histogram() {
        let mut img = GrayImage::new(10, 10);
        for (i, p) in img.pixels_mut().enumerate() {
            *p = Luma([if i % 2 == 0 { 30 } else { 220 }]);
        }
        let level = otsu_level(&img);
        assert!(level >= 30 && level < 220, "level = {}", level);
    }

    #[test]
    fn threshold_inversion_flips_foreground() {
        let img = filled_rect(20, 20, 5, 5, 10, 10);
        let normal = otsu_threshold(&img, false);
        let inverted = otsu_threshold(&img, true);
        assert_eq!(normal.get_pixel(10, 10)[0], 255);
        assert_eq!(inverted.get_pixel(10, 10)[0], 0);
        assert_eq!(inverted.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn contour_of_rectangle_has_expected_area() {
        let img = filled_rect(100, 100, 20, 30, 40, 25);
        let contours = external_contours(&img, 100.0);
        assert_eq!(contours.len(), 1);
        let area = contours[0].area();
        // Boundary shoelace area of a w×h block is (w-1)(h-1).
        assert!((area - 39.0 * 24.0).abs() < 2.0, "area = {}", area);
    }

    #[test]
    fn approx_reduces_rectangle_to_four_vertices() {
        let img = filled_rect(200, 200, 40, 50, 100, 80);
        let contours = external_contours(&img, 100.0);
        let poly = approx_polygon(&contours[0], 0.02 * contours[0].perimeter());
        assert_eq!(poly.len(), 4, "poly = {:?}", poly);
    }

    #[test]
    fn small_components_are_filtered() {
        let mut img = filled_rect(100, 100, 10, 10, 50, 50);
        img.put_pixel(90, 90, Luma([255]));
        let contours = external_contours(&img, 100.0);
        assert_eq!(contours.len(), 1);
    }

    #[test]
    fn warp_identity_square_is_lossless_at_corners() {
        let mut img = RgbImage::new(100, 100);
        for y in 0..100 {
            for x in 0..100 {
                img.put_pixel(x, y, Rgb([x as u8, y as u8, 0]));
            }
        }
        let src = Corners::square(Point::new(0.0, 0.0), 99.0);
        let out = warp_to_square(&img, &src, 100);
        assert_eq!(out.dimensions(), (100, 100));
        let p = out.get_pixel(50, 50);
        assert!((p[0] as i32 - 49).abs() <= 1);
    }
}
