//! Monte Carlo localization toolbox for a planar robot carrying a rotating rangefinder
//!
//! This crate estimates the pose (position and heading) of a mobile agent moving inside a bounded,
//! two-dimensional environment whose obstacles are straight line segments. The estimator is a
//! sequential Monte Carlo (particle) filter driven by noisy motion commands and a simulated
//! rangefinder that reports, for a fixed set of bearings, the distance to the nearest obstacle.
//! The sensor is LIDAR-like: `K` beams evenly spaced over a full revolution relative to the
//! heading of the agent.
//!
//! The crate is a test bench for the estimator rather than a robot driver. The map is given, the
//! measurements are synthesized by ray casting against that same map, and the control inputs come
//! from a script. Rendering, teleoperation and any environment format beyond "bounds plus
//! segments" are left to the caller.
//!
//! # Components
//!
//! Listed leaves first:
//!
//! - [`geometry`]: ray/segment and segment/segment intersection.
//! - [`map`]: the immutable [`map::ObstacleMap`] (bounds plus segments).
//! - [`sensor`]: the ray-casting range model producing a [`sensor::Measurement`].
//! - [`motion`]: the additive motion model applying a [`motion::Control`] to a [`Pose`].
//! - [`particle`]: the particle filter with its resampling and averaging strategies.
//! - [`sim`]: the explicit simulation state that drives the true agent and the filter, and the
//!   per-step results that can be written to CSV.
//! - [`config`]: serializable simulation configuration (JSON, YAML or TOML).
//!
//! # Filter cycle
//!
//! Each simulation step runs the same fixed cycle:
//!
//! $$
//! u_k \rightarrow x_k = f(x_{k-1}, u_k) \rightarrow z_k = h(x_k) + v_k
//! \rightarrow \text{predict} \rightarrow \text{update} \rightarrow \text{resample}
//! \rightarrow \hat{x}_k
//! $$
//!
//! where $f$ is the additive motion model, $h$ the ray-cast range model and $v_k$ zero-mean
//! Gaussian range noise. The update assigns each particle the weight
//!
//! $$
//! w^{(j)} \propto \prod_{i=0}^{K-1} \mathcal{N}\left(z_i; \hat{z}^{(j)}_i, \sigma^2\right)
//! $$
//!
//! evaluated in log space, and the estimate is the weighted mean pose with the heading averaged on
//! the unit circle.
//!
//! Every stochastic operation draws from an explicitly injected random number generator so that a
//! run is reproducible from its seed.

pub mod config;
pub mod error;
pub mod geometry;
pub mod map;
pub mod motion;
pub mod particle;
pub mod sensor;
pub mod sim;

use nalgebra::{Matrix3, Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Display};

use crate::map::ObstacleMap;
use crate::motion::Control;
use crate::sensor::{Measurement, RangeSensor};

/// Generic Bayesian localization filter trait that provides the interface shared by the filters
/// in this crate.
///
/// Resampling is not part of the trait; it only applies to sample-based filters.
pub trait LocalizationFilter {
    /// Propagate the belief with a control input.
    fn predict(&mut self, control: &Control);
    /// Correct the belief with a range measurement taken against `map` by `sensor`.
    fn update(&mut self, measurement: &Measurement, map: &ObstacleMap, sensor: &RangeSensor);
    /// Point estimate of the pose.
    fn estimate(&self) -> Pose;
    /// Covariance of (x, y, heading) about the estimate.
    fn certainty(&self) -> Matrix3<f64>;
}

/// Planar pose of the agent or of a particle.
///
/// Position is in environment coordinates; the heading `theta` is in radians, measured counter
/// clockwise from the +x axis. The heading is not normalized on construction: motion accumulates
/// it freely and callers wrap it when they need a canonical value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4}, y: {:.4}, theta: {:.4} rad ({:.2} deg) }}",
            self.x,
            self.y,
            self.theta,
            self.theta.to_degrees()
        )
    }
}
impl From<(f64, f64, f64)> for Pose {
    fn from(tuple: (f64, f64, f64)) -> Self {
        Pose::new(tuple.0, tuple.1, tuple.2)
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Pose {
        Pose { x, y, theta }
    }
    /// Position as a point.
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
    /// Unit vector along the heading.
    pub fn heading_vector(&self) -> Vector2<f64> {
        Vector2::new(self.theta.cos(), self.theta.sin())
    }
    /// Euclidean distance between the positions of two poses.
    pub fn distance_to(&self, other: &Pose) -> f64 {
        (self.position() - other.position()).norm()
    }
    /// Signed heading difference `self - other` wrapped to [-π, π).
    pub fn heading_error(&self, other: &Pose) -> f64 {
        angle_difference(self.theta, other.theta)
    }
    /// Copy of the pose with the heading wrapped to [-π, π).
    pub fn normalized(&self) -> Pose {
        Pose::new(self.x, self.y, wrap_to_pi(self.theta))
    }
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.theta.is_finite()
    }
}

/// Wrap an angle to the range [-π, π) radians
///
/// # Example
/// ```rust
/// use mcl::wrap_to_pi;
/// use std::f64::consts::PI;
/// let wrapped = wrap_to_pi(3.0 * PI / 2.0);
/// assert!((wrapped + PI / 2.0).abs() < 1e-12);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}
/// Wrap an angle to the range [0, 2π) radians
///
/// # Example
/// ```rust
/// use mcl::wrap_to_2pi;
/// use std::f64::consts::PI;
/// let wrapped = wrap_to_2pi(-PI / 2.0);
/// assert!((wrapped - 3.0 * PI / 2.0).abs() < 1e-12);
/// ```
pub fn wrap_to_2pi(angle: f64) -> f64 {
    angle.rem_euclid(2.0 * PI)
}
/// Smallest signed difference `a - b` between two angles, in [-π, π).
pub fn angle_difference(a: f64, b: f64) -> f64 {
    wrap_to_pi(a - b)
}
