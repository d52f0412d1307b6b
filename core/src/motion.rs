//! Additive planar motion model.
//!
//! A control `u = (dx, dy, dθ)` is applied as a world-frame displacement:
//!
//! $$
//! x' = x + dx + \epsilon_x, \quad y' = y + dy + \epsilon_y, \quad \theta' = \theta + d\theta + \epsilon_\theta
//! $$
//!
//! with $\epsilon_x, \epsilon_y \sim \mathcal{N}(0, \sigma_t^2)$ and
//! $\epsilon_\theta \sim \mathcal{N}(0, \sigma_r^2)$. The same model moves the true agent and every
//! particle. Nothing here clamps the result; bounding the true agent is the caller's choice.
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::Pose;
use crate::error::{ConfigError, check_noise};

/// World-frame motion increment commanded for one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}
impl From<(f64, f64, f64)> for Control {
    fn from(tuple: (f64, f64, f64)) -> Self {
        Control::new(tuple.0, tuple.1, tuple.2)
    }
}
impl Control {
    pub fn new(dx: f64, dy: f64, dtheta: f64) -> Control {
        Control { dx, dy, dtheta }
    }
}

/// Standard deviations of the noise added to a control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionNoise {
    /// Applied independently to `dx` and `dy`.
    pub translation_std: f64,
    /// Applied to `dθ`, radians.
    pub rotation_std: f64,
}
impl MotionNoise {
    pub fn new(translation_std: f64, rotation_std: f64) -> MotionNoise {
        MotionNoise {
            translation_std,
            rotation_std,
        }
    }
    /// Same standard deviation on all three components.
    pub fn isotropic(std: f64) -> MotionNoise {
        MotionNoise::new(std, std)
    }
    /// Noise-free motion.
    pub fn none() -> MotionNoise {
        MotionNoise::default()
    }
    pub fn is_zero(&self) -> bool {
        self.translation_std == 0.0 && self.rotation_std == 0.0
    }
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_noise("translation noise", self.translation_std)?;
        check_noise("rotation noise", self.rotation_std)
    }
}

/// Apply a control to a pose without noise.
pub fn apply_exact(pose: &Pose, control: &Control) -> Pose {
    Pose::new(
        pose.x + control.dx,
        pose.y + control.dy,
        pose.theta + control.dtheta,
    )
}

/// Apply a control to a pose, perturbing the increment with Gaussian noise.
///
/// Components whose standard deviation is zero are applied exactly and draw nothing from `rng`, so
/// [`MotionNoise::none`] reproduces [`apply_exact`] bit for bit.
///
/// # Arguments
/// * `pose` - Pose before the move.
/// * `control` - Commanded increment.
/// * `noise` - Standard deviations of the increment noise; assumed validated. Debug builds panic
///   on invalid noise, release builds skip any component that cannot be sampled.
/// * `rng` - Source of randomness.
///
/// # Example
/// ```rust
/// use mcl::Pose;
/// use mcl::motion::{apply, Control, MotionNoise};
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
///
/// let mut rng = StdRng::seed_from_u64(1);
/// let moved = apply(&Pose::new(1.0, 2.0, 0.0), &Control::new(0.5, -0.5, 0.1), &MotionNoise::none(), &mut rng);
/// assert_eq!(moved, Pose::new(1.5, 1.5, 0.1));
/// ```
pub fn apply<R: Rng + ?Sized>(
    pose: &Pose,
    control: &Control,
    noise: &MotionNoise,
    rng: &mut R,
) -> Pose {
    debug_assert!(noise.validate().is_ok(), "invalid motion noise: {noise:?}");
    let mut moved = apply_exact(pose, control);
    if noise.translation_std > 0.0 {
        if let Ok(normal) = Normal::new(0.0, noise.translation_std) {
            moved.x += normal.sample(rng);
            moved.y += normal.sample(rng);
        }
    }
    if noise.rotation_std > 0.0 {
        if let Ok(normal) = Normal::new(0.0, noise.rotation_std) {
            moved.theta += normal.sample(rng);
        }
    }
    moved
}
