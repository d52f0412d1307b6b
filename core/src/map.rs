//! Obstacle map: rectangular environment bounds plus an ordered list of wall segments.
//!
//! The map is validated once at construction and is read-only afterwards. Segment coordinates are
//! not checked against the bounds; a wall may stick out of the room or sit entirely outside it.
use nalgebra::Point2;
use serde::Serialize;

use crate::error::ConfigError;
use crate::geometry::{Segment, segment_crosses};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObstacleMap {
    width: f64,
    height: f64,
    segments: Vec<Segment>,
}
impl ObstacleMap {
    /// Create a map from bounds and segments.
    ///
    /// # Errors
    /// * [`ConfigError::InvalidBounds`] if either bound is not positive and finite.
    /// * [`ConfigError::NonFiniteSegment`] if a segment has a NaN or infinite coordinate.
    ///
    /// # Example
    /// ```rust
    /// use mcl::map::ObstacleMap;
    /// use mcl::geometry::Segment;
    ///
    /// let map = ObstacleMap::new(10.0, 8.0, vec![Segment::new(2.0, 2.0, 2.0, 6.0)]).unwrap();
    /// assert_eq!(map.segments().len(), 1);
    /// assert!(ObstacleMap::new(0.0, 8.0, vec![]).is_err());
    /// ```
    pub fn new(width: f64, height: f64, segments: Vec<Segment>) -> Result<ObstacleMap, ConfigError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(width) || !valid(height) {
            return Err(ConfigError::InvalidBounds { width, height });
        }
        if let Some(index) = segments.iter().position(|s| !s.is_finite()) {
            return Err(ConfigError::NonFiniteSegment { index });
        }
        Ok(ObstacleMap {
            width,
            height,
            segments,
        })
    }
    /// Create a map whose bounds are closed by four walls, followed by the interior walls.
    pub fn enclosed(
        width: f64,
        height: f64,
        interior: Vec<Segment>,
    ) -> Result<ObstacleMap, ConfigError> {
        let mut segments = Vec::with_capacity(interior.len() + 4);
        segments.extend_from_slice(&boundary_walls(width, height));
        segments.extend(interior);
        ObstacleMap::new(width, height, segments)
    }
    pub fn width(&self) -> f64 {
        self.width
    }
    pub fn height(&self) -> f64 {
        self.height
    }
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
    /// Whether a point lies inside the closed rectangle `[0, width] × [0, height]`.
    pub fn contains(&self, point: &Point2<f64>) -> bool {
        (0.0..=self.width).contains(&point.x) && (0.0..=self.height).contains(&point.y)
    }
    /// Clamp a point into the bounds.
    pub fn clamp(&self, point: &Point2<f64>) -> Point2<f64> {
        Point2::new(
            point.x.clamp(0.0, self.width),
            point.y.clamp(0.0, self.height),
        )
    }
    /// Whether a segment runs along one of the four edges of the bounds.
    pub fn on_border(&self, segment: &Segment) -> bool {
        let along = |a: f64, b: f64, edge: f64| a == edge && b == edge;
        along(segment.x1, segment.x2, 0.0)
            || along(segment.x1, segment.x2, self.width)
            || along(segment.y1, segment.y2, 0.0)
            || along(segment.y1, segment.y2, self.height)
    }
    /// Whether the straight path from `from` to `to` runs into a wall.
    ///
    /// Contact at `from` is ignored. Walls on the border are skipped: whether `to` is inside the
    /// bounds is a question for [`ObstacleMap::contains`], so a move may end on the border.
    pub fn path_blocked(&self, from: &Point2<f64>, to: &Point2<f64>) -> bool {
        self.segments
            .iter()
            .filter(|s| !self.on_border(s))
            .any(|s| segment_crosses(from, to, s))
    }
}

/// The four walls closing `[0, width] × [0, height]`, counter clockwise from the origin.
pub fn boundary_walls(width: f64, height: f64) -> [Segment; 4] {
    [
        Segment::new(0.0, 0.0, width, 0.0),
        Segment::new(width, 0.0, width, height),
        Segment::new(width, height, 0.0, height),
        Segment::new(0.0, height, 0.0, 0.0),
    ]
}
