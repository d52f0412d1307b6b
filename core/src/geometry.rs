//! Planar ray casting against line-segment obstacles.
//!
//! The ray `origin + t·d, t ≥ 0` and the segment `p1 + u·(p2 - p1), u ∈ [0, 1]` are intersected by
//! solving the 2×2 linear system with two-dimensional cross products:
//!
//! $$
//! t = \frac{(p_1 - o) \times s}{d \times s}, \qquad u = \frac{(p_1 - o) \times d}{d \times s}
//! $$
//!
//! with $s = p_2 - p_1$. The system is treated as singular (parallel, or a zero-length segment)
//! when $|d \times s| \le \epsilon |d| |s|$ with $\epsilon$ = [`PARALLEL_EPSILON`]. The segment
//! parameter is accepted on $[-\delta, 1 + \delta]$ with $\delta$ = [`ENDPOINT_EPSILON`], so a ray
//! through an end point is a hit regardless of rounding in the direction vector.
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Relative tolerance on the ray/segment determinant below which the two are considered parallel.
pub const PARALLEL_EPSILON: f64 = 1e-12;
/// Slack on the segment parameter `u` so that end point hits do not flicker.
pub const ENDPOINT_EPSILON: f64 = 1e-9;

/// An obstacle edge from `(x1, y1)` to `(x2, y2)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}
impl From<(f64, f64, f64, f64)> for Segment {
    fn from(tuple: (f64, f64, f64, f64)) -> Self {
        Segment::new(tuple.0, tuple.1, tuple.2, tuple.3)
    }
}
impl Segment {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Segment {
        Segment { x1, y1, x2, y2 }
    }
    pub fn start(&self) -> Point2<f64> {
        Point2::new(self.x1, self.y1)
    }
    pub fn end(&self) -> Point2<f64> {
        Point2::new(self.x2, self.y2)
    }
    /// Vector from start to end.
    pub fn direction(&self) -> Vector2<f64> {
        self.end() - self.start()
    }
    pub fn length(&self) -> f64 {
        self.direction().norm()
    }
    pub fn midpoint(&self) -> Point2<f64> {
        Point2::new(0.5 * (self.x1 + self.x2), 0.5 * (self.y1 + self.y2))
    }
    /// Zero-length segments are kept in maps but never intersect anything.
    pub fn is_degenerate(&self) -> bool {
        self.x1 == self.x2 && self.y1 == self.y2
    }
    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// Two-dimensional cross product (z component of the 3D cross product).
#[inline]
pub fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Distance along a ray to its intersection with a single segment.
///
/// # Arguments
/// * `origin` - Ray origin.
/// * `direction` - Ray direction; normalized internally, a zero vector never hits.
/// * `segment` - Obstacle edge.
/// * `max_range` - Hits farther than this are ignored.
///
/// # Returns
/// * `Some(distance)` with `0 ≤ distance ≤ max_range`, or `None` when the ray is parallel to the
///   segment, misses it, or the hit lies behind the origin or beyond `max_range`.
///
/// # Example
/// ```rust
/// use mcl::geometry::{intersect, Segment};
/// use nalgebra::{Point2, Vector2};
///
/// let wall = Segment::new(4.0, -1.0, 4.0, 1.0);
/// let hit = intersect(&Point2::new(0.0, 0.0), &Vector2::new(1.0, 0.0), &wall, 10.0);
/// assert!((hit.unwrap() - 4.0).abs() < 1e-12);
/// ```
pub fn intersect(
    origin: &Point2<f64>,
    direction: &Vector2<f64>,
    segment: &Segment,
    max_range: f64,
) -> Option<f64> {
    let norm = direction.norm();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    let d = direction / norm;
    let s = segment.direction();
    let denom = cross(&d, &s);
    if denom.abs() <= PARALLEL_EPSILON * s.norm() {
        return None;
    }
    let w = segment.start() - origin;
    let t = cross(&w, &s) / denom;
    let u = cross(&w, &d) / denom;
    let on_segment = (-ENDPOINT_EPSILON..=1.0 + ENDPOINT_EPSILON).contains(&u);
    if on_segment && t >= 0.0 && t <= max_range {
        Some(t)
    } else {
        None
    }
}

/// Whether a move from `a` to `b` runs into `segment`.
///
/// Contact at `a` itself does not count, so a move may leave a wall it starts on. Any other
/// contact does, including collinear overlaps and arriving exactly on the wall. A zero-length
/// move never crosses anything.
pub fn segment_crosses(a: &Point2<f64>, b: &Point2<f64>, segment: &Segment) -> bool {
    if segment.is_degenerate() {
        return false;
    }
    let r = b - a;
    let rr = r.dot(&r);
    if rr == 0.0 {
        return false;
    }
    let s = segment.direction();
    let w = segment.start() - a;
    let denom = cross(&r, &s);
    let scale = r.norm() * s.norm();

    if denom.abs() <= PARALLEL_EPSILON * scale {
        // Parallel: only a collinear overlap can touch.
        if cross(&w, &s).abs() > PARALLEL_EPSILON * s.norm() * w.norm().max(1.0) {
            return false;
        }
        // Overlap measured along the move, in units of its length.
        let p0 = w.dot(&r) / rr;
        let p1 = (segment.end() - a).dot(&r) / rr;
        let (lo, hi) = if p0 <= p1 { (p0, p1) } else { (p1, p0) };
        return hi > ENDPOINT_EPSILON && lo <= 1.0;
    }
    let t = cross(&w, &s) / denom;
    let u = cross(&w, &r) / denom;
    t > ENDPOINT_EPSILON && t <= 1.0 && (0.0..=1.0).contains(&u)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::FRAC_1_SQRT_2;

    #[test]
    fn ray_at_midpoint_returns_euclidean_distance() {
        let wall = Segment::new(3.0, 7.0, 9.0, 1.0);
        let origin = Point2::new(0.5, -0.5);
        let to_mid = wall.midpoint() - origin;
        let distance = intersect(&origin, &to_mid, &wall, 100.0).unwrap();
        assert_approx_eq!(distance, to_mid.norm(), 1e-9);
    }

    #[test]
    fn ray_aimed_away_misses() {
        let wall = Segment::new(4.0, -1.0, 4.0, 1.0);
        let origin = Point2::new(0.0, 0.0);
        assert!(intersect(&origin, &Vector2::new(-1.0, 0.0), &wall, 100.0).is_none());
        assert!(intersect(&origin, &Vector2::new(0.0, 1.0), &wall, 100.0).is_none());
    }

    #[test]
    fn parallel_and_collinear_rays_miss() {
        let wall = Segment::new(0.0, 1.0, 5.0, 1.0);
        let origin = Point2::new(0.0, 0.0);
        assert!(intersect(&origin, &Vector2::new(1.0, 0.0), &wall, 100.0).is_none());
        let collinear = Point2::new(-1.0, 1.0);
        assert!(intersect(&collinear, &Vector2::new(1.0, 0.0), &wall, 100.0).is_none());
    }

    #[test]
    fn degenerate_segment_never_hits() {
        let dot = Segment::new(2.0, 0.0, 2.0, 0.0);
        assert!(dot.is_degenerate());
        assert!(intersect(&Point2::origin(), &Vector2::new(1.0, 0.0), &dot, 10.0).is_none());
    }

    #[test]
    fn max_range_cuts_off_distant_hits() {
        let wall = Segment::new(4.0, -1.0, 4.0, 1.0);
        let origin = Point2::new(0.0, 0.0);
        let dir = Vector2::new(1.0, 0.0);
        assert!(intersect(&origin, &dir, &wall, 3.99).is_none());
        assert_approx_eq!(intersect(&origin, &dir, &wall, 4.0).unwrap(), 4.0, 1e-12);
    }

    #[test]
    fn endpoint_hits_are_inclusive() {
        let wall = Segment::new(2.0, 0.0, 2.0, 1.0);
        let origin = Point2::new(0.0, 0.0);
        let lower = intersect(&origin, &Vector2::new(1.0, 0.0), &wall, 10.0);
        assert_approx_eq!(lower.unwrap(), 2.0, 1e-9);
        let upper = intersect(&origin, &Vector2::new(2.0, 1.0), &wall, 10.0);
        assert_approx_eq!(upper.unwrap(), 5.0_f64.sqrt(), 1e-9);
    }

    #[test]
    fn direction_is_normalized() {
        let wall = Segment::new(3.0, -5.0, 3.0, 5.0);
        let origin = Point2::new(0.0, 0.0);
        let hit = intersect(&origin, &Vector2::new(10.0, 10.0), &wall, 100.0).unwrap();
        assert_approx_eq!(hit, 3.0 / FRAC_1_SQRT_2, 1e-9);
        assert!(intersect(&origin, &Vector2::zeros(), &wall, 100.0).is_none());
    }

    #[test]
    fn origin_on_segment_hits_at_zero() {
        let wall = Segment::new(0.0, -1.0, 0.0, 1.0);
        let hit = intersect(&Point2::origin(), &Vector2::new(1.0, 0.0), &wall, 10.0);
        assert_approx_eq!(hit.unwrap(), 0.0, 1e-12);
    }

    #[test]
    fn segment_crossing_cases() {
        let wall = Segment::new(5.0, 5.0, 5.0, 6.0);
        // straight through
        assert!(segment_crosses(
            &Point2::new(4.5, 5.5),
            &Point2::new(5.5, 5.5),
            &wall
        ));
        // stops short
        assert!(!segment_crosses(
            &Point2::new(4.0, 5.5),
            &Point2::new(4.9, 5.5),
            &wall
        ));
        // passes below the end point
        assert!(!segment_crosses(
            &Point2::new(4.5, 4.9),
            &Point2::new(5.5, 4.9),
            &wall
        ));
        // slides along the wall
        assert!(segment_crosses(
            &Point2::new(5.0, 4.0),
            &Point2::new(5.0, 5.2),
            &wall
        ));
        // collinear but disjoint
        assert!(!segment_crosses(
            &Point2::new(5.0, 7.0),
            &Point2::new(5.0, 8.0),
            &wall
        ));
        // parallel offset
        assert!(!segment_crosses(
            &Point2::new(5.1, 4.0),
            &Point2::new(5.1, 8.0),
            &wall
        ));
        // arrives on the wall
        assert!(segment_crosses(
            &Point2::new(4.5, 5.5),
            &Point2::new(5.0, 5.5),
            &wall
        ));
    }

    #[test]
    fn leaving_a_wall_is_not_a_crossing() {
        let wall = Segment::new(2.0, 2.0, 3.0, 2.0);
        let start = Point2::new(2.0, 2.0);
        assert!(!segment_crosses(&start, &Point2::new(2.1, 2.1), &wall));
        assert!(!segment_crosses(&Point2::new(2.5, 2.0), &Point2::new(2.5, 2.3), &wall));
        // collinear, moving off the end
        assert!(!segment_crosses(&start, &Point2::new(1.5, 2.0), &wall));
        // collinear, sliding onto the rest of the wall
        assert!(segment_crosses(&start, &Point2::new(2.5, 2.0), &wall));
        assert!(!segment_crosses(&start, &start, &wall));
    }
}
