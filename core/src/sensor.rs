//! Ray-casting rangefinder model.
//!
//! A [`RangeSensor`] has `K` beams evenly spaced over a full turn. Beam `i` points along
//! `θ + 2π·i/K` where `θ` is the heading of the sensing pose, and reads the distance to the nearest
//! wall along that bearing, clipped to the maximum range. With `noise_std > 0` each reading is
//! perturbed by independent zero-mean Gaussian noise and clamped back into `[0, max_range]`. The
//! noisy variant is only used to synthesize "true" measurements; the particle filter compares them
//! against noise-free expected scans.
use nalgebra::{Point2, Vector2};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::Pose;
use crate::error::{ConfigError, check_noise};
use crate::geometry::{Segment, intersect};
use crate::map::ObstacleMap;

/// One scan: `K` ranges, index `i` taken at bearing `2π·i/K` relative to the heading.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub ranges: Vec<f64>,
}
impl From<Vec<f64>> for Measurement {
    fn from(ranges: Vec<f64>) -> Self {
        Measurement { ranges }
    }
}
impl Measurement {
    pub fn len(&self) -> usize {
        self.ranges.len()
    }
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
    /// Bearing of beam `index` relative to the sensing heading.
    pub fn beam_angle(&self, index: usize) -> f64 {
        beam_angle(index, self.ranges.len())
    }
    /// World coordinates of each beam end point when the scan was taken from `pose`.
    pub fn endpoints(&self, pose: &Pose) -> Vec<Point2<f64>> {
        self.ranges
            .iter()
            .enumerate()
            .map(|(i, range)| {
                let bearing = pose.theta + self.beam_angle(i);
                pose.position() + Vector2::new(bearing.cos(), bearing.sin()) * *range
            })
            .collect()
    }
}

/// Bearing of beam `index` out of `num_beams`, relative to the heading.
pub fn beam_angle(index: usize, num_beams: usize) -> f64 {
    2.0 * PI * index as f64 / num_beams as f64
}

/// Distance to the nearest segment along a ray, or `max_range` when nothing is hit within range.
pub fn cast_ray(
    origin: &Point2<f64>,
    direction: &Vector2<f64>,
    segments: &[Segment],
    max_range: f64,
) -> f64 {
    segments
        .iter()
        .filter_map(|segment| intersect(origin, direction, segment, max_range))
        .fold(max_range, f64::min)
}

/// Noise-free scan of `map` from `pose`.
pub fn expected_scan(
    pose: &Pose,
    map: &ObstacleMap,
    num_beams: usize,
    max_range: f64,
) -> Measurement {
    let origin = pose.position();
    let ranges = (0..num_beams)
        .map(|i| {
            let bearing = pose.theta + beam_angle(i, num_beams);
            let direction = Vector2::new(bearing.cos(), bearing.sin());
            cast_ray(&origin, &direction, map.segments(), max_range)
        })
        .collect();
    Measurement { ranges }
}

/// Scan of `map` from `pose` with additive Gaussian range noise.
///
/// With `noise_std <= 0` this is identical to [`expected_scan`] and draws nothing from `rng`. A
/// non-finite `noise_std` is a caller error: debug builds panic, release builds return the
/// noise-free scan.
/// Readings are clamped to `[0, max_range]` after noise is added.
///
/// # Example
/// ```rust
/// use mcl::Pose;
/// use mcl::map::ObstacleMap;
/// use mcl::sensor::scan;
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let map = ObstacleMap::enclosed(10.0, 10.0, vec![]).unwrap();
/// let mut rng = StdRng::seed_from_u64(42);
/// let z = scan(&Pose::new(5.0, 5.0, 0.0), &map, 4, 20.0, 0.0, &mut rng);
/// assert_eq!(z.ranges, vec![5.0, 5.0, 5.0, 5.0]);
/// ```
pub fn scan<R: Rng + ?Sized>(
    pose: &Pose,
    map: &ObstacleMap,
    num_beams: usize,
    max_range: f64,
    noise_std: f64,
    rng: &mut R,
) -> Measurement {
    debug_assert!(noise_std.is_finite(), "invalid range noise: {noise_std}");
    let mut measurement = expected_scan(pose, map, num_beams, max_range);
    if noise_std > 0.0 {
        if let Ok(normal) = Normal::new(0.0, noise_std) {
            for range in measurement.ranges.iter_mut() {
                *range = (*range + normal.sample(rng)).clamp(0.0, max_range);
            }
        }
    }
    measurement
}

/// Validated rangefinder parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeSensor {
    num_beams: usize,
    max_range: f64,
    noise_std: f64,
}
impl RangeSensor {
    /// # Errors
    /// * [`ConfigError::NoBeams`] for `num_beams == 0`.
    /// * [`ConfigError::InvalidMaxRange`] for a non-positive or non-finite range.
    /// * [`ConfigError::InvalidNoise`] for a negative or non-finite noise level.
    pub fn new(num_beams: usize, max_range: f64, noise_std: f64) -> Result<RangeSensor, ConfigError> {
        if num_beams == 0 {
            return Err(ConfigError::NoBeams);
        }
        if !(max_range.is_finite() && max_range > 0.0) {
            return Err(ConfigError::InvalidMaxRange(max_range));
        }
        check_noise("range noise", noise_std)?;
        Ok(RangeSensor {
            num_beams,
            max_range,
            noise_std,
        })
    }
    pub fn num_beams(&self) -> usize {
        self.num_beams
    }
    pub fn max_range(&self) -> f64 {
        self.max_range
    }
    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }
    /// Noisy scan, used to synthesize what the real sensor would report.
    pub fn scan<R: Rng + ?Sized>(&self, pose: &Pose, map: &ObstacleMap, rng: &mut R) -> Measurement {
        scan(pose, map, self.num_beams, self.max_range, self.noise_std, rng)
    }
    /// Noise-free scan, used for particle likelihoods.
    pub fn expected_scan(&self, pose: &Pose, map: &ObstacleMap) -> Measurement {
        expected_scan(pose, map, self.num_beams, self.max_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::SQRT_2;

    #[test]
    fn empty_map_reads_max_range_everywhere() {
        let map = ObstacleMap::new(10.0, 10.0, vec![]).unwrap();
        for pose in [
            Pose::new(5.0, 5.0, 0.0),
            Pose::new(-3.0, 12.0, 2.5),
            Pose::new(0.0, 0.0, -7.0),
        ] {
            let z = expected_scan(&pose, &map, 360, 7.5);
            assert_eq!(z.len(), 360);
            assert!(z.ranges.iter().all(|r| *r == 7.5));
        }
    }

    #[test]
    fn square_room_eight_beams_closed_form() {
        let map = ObstacleMap::enclosed(10.0, 10.0, vec![]).unwrap();
        let z = expected_scan(&Pose::new(5.0, 5.0, 0.0), &map, 8, 20.0);
        let diagonal = 5.0 * SQRT_2;
        let expected = [
            5.0, diagonal, 5.0, diagonal, 5.0, diagonal, 5.0, diagonal,
        ];
        for (reading, truth) in z.ranges.iter().zip(expected.iter()) {
            assert_approx_eq!(*reading, *truth, 1e-9);
        }
    }

    #[test]
    fn readings_are_clipped_to_max_range() {
        let map = ObstacleMap::enclosed(10.0, 10.0, vec![]).unwrap();
        let z = expected_scan(&Pose::new(1.0, 5.0, 0.0), &map, 4, 3.0);
        // east wall is 9 m away, west wall 1 m
        assert_approx_eq!(z.ranges[0], 3.0, 1e-12);
        assert_approx_eq!(z.ranges[2], 1.0, 1e-9);
    }

    #[test]
    fn beams_rotate_with_heading() {
        let map = ObstacleMap::enclosed(10.0, 10.0, vec![]).unwrap();
        let z = expected_scan(&Pose::new(2.0, 5.0, PI), &map, 4, 20.0);
        // beam 0 now points west
        assert_approx_eq!(z.ranges[0], 2.0, 1e-9);
        assert_approx_eq!(z.ranges[2], 8.0, 1e-9);
    }

    #[test]
    fn nearest_wall_wins() {
        let map = ObstacleMap::enclosed(10.0, 10.0, vec![Segment::new(7.0, 0.0, 7.0, 10.0)]).unwrap();
        let z = expected_scan(&Pose::new(5.0, 5.0, 0.0), &map, 4, 20.0);
        assert_approx_eq!(z.ranges[0], 2.0, 1e-9);
    }

    #[test]
    fn noisy_scan_stays_in_range_and_is_reproducible() {
        let map = ObstacleMap::enclosed(10.0, 10.0, vec![]).unwrap();
        let pose = Pose::new(0.2, 9.9, 0.3);
        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        let a = scan(&pose, &map, 90, 4.0, 1.0, &mut rng_a);
        let b = scan(&pose, &map, 90, 4.0, 1.0, &mut rng_b);
        assert_eq!(a, b);
        assert!(a.ranges.iter().all(|r| (0.0..=4.0).contains(r)));
        let clean = expected_scan(&pose, &map, 90, 4.0);
        assert_ne!(a, clean);
    }

    #[test]
    fn endpoints_land_on_walls() {
        let map = ObstacleMap::enclosed(10.0, 10.0, vec![]).unwrap();
        let pose = Pose::new(5.0, 5.0, 0.0);
        let z = expected_scan(&pose, &map, 4, 20.0);
        let points = z.endpoints(&pose);
        assert_approx_eq!(points[0].x, 10.0, 1e-9);
        assert_approx_eq!(points[1].y, 10.0, 1e-9);
        assert_approx_eq!(points[2].x, 0.0, 1e-9);
        assert_approx_eq!(points[3].y, 0.0, 1e-9);
    }

    #[test]
    fn sensor_validation() {
        assert_eq!(RangeSensor::new(0, 10.0, 0.0), Err(ConfigError::NoBeams));
        assert_eq!(
            RangeSensor::new(8, 0.0, 0.0),
            Err(ConfigError::InvalidMaxRange(0.0))
        );
        assert!(RangeSensor::new(8, 10.0, -0.5).is_err());
        let sensor = RangeSensor::new(8, 10.0, 0.5).unwrap();
        assert_eq!(sensor.num_beams(), 8);
        assert_approx_eq!(sensor.max_range(), 10.0, 1e-12);
    }
}
