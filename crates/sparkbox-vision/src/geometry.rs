//! Small planar-geometry toolkit: ordered quads and the homography used
//! for rectification.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// The four corners of a detected quad, ordered TL, TR, BR, BL
/// (clockwise in image coordinates).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners {
    pub tl: Point,
    pub tr: Point,
    pub br: Point,
    pub bl: Point,
}

impl Corners {
    /// Order an unordered quadruple: TL minimizes x+y, BR maximizes x+y,
    /// TR minimizes y−x, BL maximizes y−x.
    pub fn order(points: [Point; 4]) -> Self {
        let sum = |p: &Point| p.x + p.y;
        let diff = |p: &Point| p.y - p.x;

        let tl = *points
            .iter()
            .min_by(|a, b| sum(a).total_cmp(&sum(b)))
            .unwrap();
        let br = *points
            .iter()
            .max_by(|a, b| sum(a).total_cmp(&sum(b)))
            .unwrap();
        let tr = *points
            .iter()
            .min_by(|a, b| diff(a).total_cmp(&diff(b)))
            .unwrap();
        let bl = *points
            .iter()
            .max_by(|a, b| diff(a).total_cmp(&diff(b)))
            .unwrap();

        Self { tl, tr, br, bl }
    }

    /// Axis-aligned square with the given top-left origin and side.
    pub fn square(origin: Point, side: f32) -> Self {
        Self {
            tl: origin,
            tr: Point::new(origin.x + side, origin.y),
            br: Point::new(origin.x + side, origin.y + side),
            bl: Point::new(origin.x, origin.y + side),
        }
    }

    /// TL, TR, BR, BL.
    pub fn as_array(&self) -> [Point; 4] {
        [self.tl, self.tr, self.br, self.bl]
    }

    pub fn side_lengths(&self) -> [f32; 4] {
        [
            self.tl.distance(&self.tr),
            self.tr.distance(&self.br),
            self.br.distance(&self.bl),
            self.bl.distance(&self.tl),
        ]
    }

    /// max side / min side.
    pub fn side_ratio(&self) -> f32 {
        let sides = self.side_lengths();
        let max = sides.iter().cloned().fold(f32::MIN, f32::max);
        let min = sides.iter().cloned().fold(f32::MAX, f32::min);
        if min <= f32::EPSILON {
            f32::INFINITY
        } else {
            max / min
        }
    }

    /// All cross products of consecutive edges share a sign.
    pub fn is_convex(&self) -> bool {
        let pts = self.as_array();
        let mut sign = 0.0f32;
        for i in 0..4 {
            let a = pts[i];
            let b = pts[(i + 1) % 4];
            let c = pts[(i + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            if cross.abs() < f32::EPSILON {
                // Three collinear points do not form a usable quad.
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Clockwise in image coordinates (y grows downward), i.e. positive
    /// signed area over TL→TR→BR→BL.
    pub fn is_clockwise(&self) -> bool {
        self.signed_area() > 0.0
    }

    fn signed_area(&self) -> f32 {
        let pts = self.as_array();
        let mut acc = 0.0;
        for i in 0..4 {
            let a = pts[i];
            let b = pts[(i + 1) % 4];
            acc += a.x * b.y - b.x * a.y;
        }
        acc / 2.0
    }

    pub fn area(&self) -> f32 {
        self.signed_area().abs()
    }

    pub fn centroid(&self) -> Point {
        let pts = self.as_array();
        Point::new(
            pts.iter().map(|p| p.x).sum::<f32>() / 4.0,
            pts.iter().map(|p| p.y).sum::<f32>() / 4.0,
        )
    }

    /// Point-in-convex-quad test via edge cross products.
    pub fn contains(&self, p: Point) -> bool {
        let pts = self.as_array();
        let mut sign = 0.0f32;
        for i in 0..4 {
            let a = pts[i];
            let b = pts[(i + 1) % 4];
            let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
            if cross == 0.0 {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Integer bounding rectangle clamped to an image extent,
    /// as (x, y, width, height).
    pub fn bounding_rect(&self, max_w: u32, max_h: u32) -> (u32, u32, u32, u32) {
        let pts = self.as_array();
        let min_x = pts.iter().map(|p| p.x).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
        let min_y = pts.iter().map(|p| p.y).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
        let max_x = (pts.iter().map(|p| p.x).fold(f32::MIN, f32::max).ceil() as u32).min(max_w);
        let max_y = (pts.iter().map(|p| p.y).fold(f32::MIN, f32::max).ceil() as u32).min(max_h);
        (
            min_x,
            min_y,
            max_x.saturating_sub(min_x),
            max_y.saturating_sub(min_y),
        )
    }
}

/// 3×3 projective transform.
#[derive(Debug, Clone, Copy)]
pub struct Homography {
    m: [f64; 9],
}

impl Homography {
    /// Transform mapping `src`'s corners onto `dst`'s, corner by corner.
    /// `None` when the system is degenerate (e.g. collinear corners).
    pub fn from_corners(src: &Corners, dst: &Corners) -> Option<Self> {
        let s = src.as_array();
        let d = dst.as_array();

        // Two rows per correspondence; unknowns a..h with i fixed at 1.
        let mut a = [[0.0f64; 9]; 8];
        for k in 0..4 {
            let (x, y) = (s[k].x as f64, s[k].y as f64);
            let (u, v) = (d[k].x as f64, d[k].y as f64);
            a[2 * k] = [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, u];
            a[2 * k + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, v];
        }

        let h = solve_8x8(&mut a)?;
        Some(Self {
            m: [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0],
        })
    }

    pub fn apply(&self, p: Point) -> Point {
        let (x, y) = (p.x as f64, p.y as f64);
        let w = self.m[6] * x + self.m[7] * y + self.m[8];
        let u = (self.m[0] * x + self.m[1] * y + self.m[2]) / w;
        let v = (self.m[3] * x + self.m[4] * y + self.m[5]) / w;
        Point::new(u as f32, v as f32)
    }
}

/// Gaussian elimination with partial pivoting on the 8×9 augmented system.
fn solve_8x8(a: &mut [[f64; 9]; 8]) -> Option<[f64; 8]> {
    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-10 {
            return None;
        }
        a.swap(col, pivot);

        for row in (col + 1)..8 {
            let factor = a[row][col] / a[col][col];
            for k in col..9 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut x = [0.0f64; 8];
    for row in (0..8).rev() {
        let mut acc = a[row][8];
        for k in (row + 1)..8 {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-2, "{} != {}", a, b);
    }

    #[test]
    fn ordering_recovers_clockwise_quad() {
        let shuffled = [
            Point::new(620.0, 410.0), // BR
            Point::new(100.0, 90.0),  // TL
            Point::new(110.0, 400.0), // BL
            Point::new(610.0, 100.0), // TR
        ];
        let corners = Corners::order(shuffled);
        assert_eq!(corners.tl, Point::new(100.0, 90.0));
        assert_eq!(corners.tr, Point::new(610.0, 100.0));
        assert_eq!(corners.br, Point::new(620.0, 410.0));
        assert_eq!(corners.bl, Point::new(110.0, 400.0));
        assert!(corners.is_clockwise());
        assert!(corners.is_convex());
    }

    #[test]
    fn side_ratio_of_square_is_one() {
        let sq = Corners::square(Point::new(10.0, 20.0), 100.0);
        approx(sq.side_ratio(), 1.0);
        approx(sq.area(), 10_000.0);
    }

    #[test]
    fn contains_checks_interior_points() {
        let sq = Corners::square(Point::new(0.0, 0.0), 100.0);
        assert!(sq.contains(Point::new(50.0, 50.0)));
        assert!(!sq.contains(Point::new(150.0, 50.0)));
    }

    #[test]
    fn homography_maps_corners_exactly() {
        let src = Corners::order([
            Point::new(105.0, 98.0),
            Point::new(590.0, 110.0),
            Point::new(602.0, 415.0),
            Point::new(95.0, 402.0),
        ]);
        let dst = Corners::square(Point::new(0.0, 0.0), 720.0);
        let h = Homography::from_corners(&src, &dst).expect("non-degenerate");

        let mapped = h.apply(src.tl);
        approx(mapped.x, 0.0);
        approx(mapped.y, 0.0);
        let mapped = h.apply(src.br);
        approx(mapped.x, 720.0);
        approx(mapped.y, 720.0);
    }

    #[test]
    fn degenerate_quad_has_no_homography() {
        // Three collinear source corners.
        let src = Corners {
            tl: Point::new(0.0, 0.0),
            tr: Point::new(10.0, 0.0),
            br: Point::new(20.0, 0.0),
            bl: Point::new(0.0, 10.0),
        };
        let dst = Corners::square(Point::new(0.0, 0.0), 720.0);
        assert!(Homography::from_corners(&src, &dst).is_none());
    }
}
