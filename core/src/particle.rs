//! Sequential Monte Carlo localization filter.
//!
//! The filter keeps `N` weighted pose hypotheses. Each cycle moves every hypothesis with the noisy
//! motion model (`predict`), reweights it by how well a noise-free scan from its pose explains the
//! measured scan (`update`), draws a fresh unweighted population proportional to the weights
//! (`resample`) and reports a weighted mean pose (`estimate`).
//!
//! The measurement likelihood is a product of independent Gaussians over the beams and is
//! evaluated in log space:
//!
//! $$
//! \log w^{(j)} = -\frac{1}{2\sigma^2} \sum_{i=0}^{K-1} \left(z_i - \hat{z}^{(j)}_i\right)^2
//! $$
//!
//! Before exponentiating, the maximum log weight is subtracted so the best particle has an
//! unnormalized weight of one and the others cannot all underflow to zero. If no particle has a
//! finite log weight the population falls back to uniform weights.
//!
//! Headings are averaged on the unit circle, so hypotheses at `0.1` and `2π - 0.1` average to `0`
//! rather than `π`.
use crate::error::{ConfigError, check_noise};
use crate::map::ObstacleMap;
use crate::motion::{self, Control, MotionNoise};
use crate::sensor::{Measurement, RangeSensor};
use crate::{LocalizationFilter, Pose, angle_difference};

use log::{debug, warn};
use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::{self, Debug, Display};

/// A pose hypothesis and its importance weight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub pose: Pose,
    pub weight: f64,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &self.pose.x)
            .field("y", &self.pose.y)
            .field("theta_deg", &self.pose.theta.to_degrees())
            .field("weight", &self.weight)
            .finish()
    }
}
impl Particle {
    pub fn new(pose: Pose, weight: f64) -> Particle {
        Particle { pose, weight }
    }
}
impl From<(Pose, f64)> for Particle {
    fn from(tuple: (Pose, f64)) -> Self {
        Particle::new(tuple.0, tuple.1)
    }
}

/// How the population is reduced to a single pose estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    #[default]
    WeightedAverage,
    UnweightedAverage,
    HighestWeight,
}

/// How a new population is drawn from the weighted one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleResamplingStrategy {
    #[default]
    Systematic,
    Multinomial,
    Stratified,
    Residual,
}
impl ParticleResamplingStrategy {
    /// Draw `n` indices into `weights` with this strategy.
    pub fn resample<R: Rng + ?Sized>(&self, weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
        match self {
            ParticleResamplingStrategy::Systematic => systematic_resample(weights, n, rng),
            ParticleResamplingStrategy::Multinomial => multinomial_resample(weights, n, rng),
            ParticleResamplingStrategy::Stratified => stratified_resample(weights, n, rng),
            ParticleResamplingStrategy::Residual => residual_resample(weights, n, rng),
        }
    }
}

/// Particle filter configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFilterConfig {
    pub num_particles: usize,
    /// Standard deviation of the per-beam range residual in the likelihood, metres.
    pub likelihood_std: f64,
    /// Noise added to every particle's control in `predict`.
    pub motion_noise: MotionNoise,
    pub resampling_strategy: ParticleResamplingStrategy,
    pub averaging_strategy: ParticleAveragingStrategy,
    /// Evaluate particle likelihoods on the rayon thread pool.
    pub parallel: bool,
    pub seed: u64,
}
impl Default for ParticleFilterConfig {
    fn default() -> Self {
        Self {
            num_particles: 100,
            likelihood_std: 1.0,
            motion_noise: MotionNoise::isotropic(0.1),
            resampling_strategy: ParticleResamplingStrategy::Systematic,
            averaging_strategy: ParticleAveragingStrategy::WeightedAverage,
            parallel: true,
            seed: 42,
        }
    }
}
impl ParticleFilterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_particles == 0 {
            return Err(ConfigError::NoParticles);
        }
        if !(self.likelihood_std.is_finite() && self.likelihood_std > 0.0) {
            return Err(ConfigError::InvalidLikelihoodStd(self.likelihood_std));
        }
        self.motion_noise.validate()
    }
}

/// Monte Carlo localization filter over planar poses.
#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<Particle>,
    config: ParticleFilterConfig,
    rng: StdRng,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = self.estimate();
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field(
                "mean_pose",
                &format_args!(
                    "({:.3} m, {:.3} m, {:.2}°)",
                    mean.x,
                    mean.y,
                    mean.theta.to_degrees()
                ),
            )
            .field("resampling_strategy", &self.config.resampling_strategy)
            .field("averaging_strategy", &self.config.averaging_strategy)
            .finish()
    }
}
impl ParticleFilter {
    /// Build a filter from explicit poses with uniform weights.
    ///
    /// The population size is `poses.len()`; `config.num_particles` is not consulted.
    ///
    /// # Errors
    /// [`ConfigError::NoParticles`] for an empty pose list, or any error from
    /// [`ParticleFilterConfig::validate`].
    pub fn from_poses(
        poses: Vec<Pose>,
        config: ParticleFilterConfig,
    ) -> Result<ParticleFilter, ConfigError> {
        if poses.is_empty() {
            return Err(ConfigError::NoParticles);
        }
        let config = ParticleFilterConfig {
            num_particles: poses.len(),
            ..config
        };
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self::with_rng(poses, config, rng))
    }
    /// Spread particles uniformly over the map bounds with headings uniform in [0, 2π).
    ///
    /// # Example
    /// ```rust
    /// use mcl::map::ObstacleMap;
    /// use mcl::particle::{ParticleFilter, ParticleFilterConfig};
    ///
    /// let map = ObstacleMap::enclosed(10.0, 10.0, vec![]).unwrap();
    /// let pf = ParticleFilter::uniform(&map, ParticleFilterConfig::default()).unwrap();
    /// assert_eq!(pf.len(), 100);
    /// assert!(pf.particles().iter().all(|p| map.contains(&p.pose.position())));
    /// ```
    pub fn uniform(
        map: &ObstacleMap,
        config: ParticleFilterConfig,
    ) -> Result<ParticleFilter, ConfigError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let poses = (0..config.num_particles)
            .map(|_| {
                Pose::new(
                    rng.random_range(0.0..map.width()),
                    rng.random_range(0.0..map.height()),
                    rng.random_range(0.0..2.0 * PI),
                )
            })
            .collect();
        Ok(Self::with_rng(poses, config, rng))
    }
    /// Spread particles normally around `center`.
    ///
    /// # Arguments
    /// * `center` - Mean pose.
    /// * `position_std` - Standard deviation applied to x and y, metres.
    /// * `heading_std` - Standard deviation applied to the heading, radians.
    /// * `config` - Filter configuration.
    pub fn gaussian(
        center: &Pose,
        position_std: f64,
        heading_std: f64,
        config: ParticleFilterConfig,
    ) -> Result<ParticleFilter, ConfigError> {
        config.validate()?;
        check_noise("initial position spread", position_std)?;
        check_noise("initial heading spread", heading_std)?;
        let normal_pos = Normal::new(0.0, position_std).map_err(|_| ConfigError::InvalidNoise {
            name: "initial position spread",
            value: position_std,
        })?;
        let normal_heading =
            Normal::new(0.0, heading_std).map_err(|_| ConfigError::InvalidNoise {
                name: "initial heading spread",
                value: heading_std,
            })?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let poses = (0..config.num_particles)
            .map(|_| {
                Pose::new(
                    center.x + normal_pos.sample(&mut rng),
                    center.y + normal_pos.sample(&mut rng),
                    center.theta + normal_heading.sample(&mut rng),
                )
            })
            .collect();
        Ok(Self::with_rng(poses, config, rng))
    }
    fn with_rng(poses: Vec<Pose>, config: ParticleFilterConfig, rng: StdRng) -> ParticleFilter {
        let weight = 1.0 / poses.len() as f64;
        let particles = poses.into_iter().map(|p| Particle::new(p, weight)).collect();
        ParticleFilter {
            particles,
            config,
            rng,
        }
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn config(&self) -> &ParticleFilterConfig {
        &self.config
    }
    /// Change the noise used by subsequent `predict` calls, e.g. to anneal it as the filter settles.
    pub fn set_motion_noise(&mut self, noise: MotionNoise) -> Result<(), ConfigError> {
        noise.validate()?;
        self.config.motion_noise = noise;
        Ok(())
    }
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }
    /// Particle poses as a `3 × N` matrix with rows x, y, θ.
    pub fn particles_to_matrix(&self) -> DMatrix<f64> {
        let mut data = Vec::with_capacity(self.particles.len() * 3);
        for particle in &self.particles {
            data.push(particle.pose.x);
            data.push(particle.pose.y);
            data.push(particle.pose.theta);
        }
        DMatrix::from_vec(3, self.particles.len(), data)
    }
    /// Overwrite the weights, one per particle, without normalizing.
    ///
    /// # Panics
    /// If `weights.len()` differs from the population size.
    pub fn set_weights(&mut self, weights: &[f64]) {
        assert_eq!(weights.len(), self.particles.len());
        for (particle, &w) in self.particles.iter_mut().zip(weights.iter()) {
            particle.weight = w;
        }
    }
    /// Scale the weights to sum to one, or reset them to `1/N` if their sum is zero or not finite.
    pub fn normalize_weights(&mut self) {
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        if sum > 0.0 && sum.is_finite() {
            for particle in &mut self.particles {
                particle.weight /= sum;
            }
        } else {
            warn!("degenerate particle weights (sum = {sum}), resetting to uniform");
            self.reset_weights();
        }
    }
    fn reset_weights(&mut self) {
        let uniform = 1.0 / self.particles.len() as f64;
        for particle in &mut self.particles {
            particle.weight = uniform;
        }
    }
    /// Set the weights from log weights, shifting by the maximum before exponentiating.
    fn set_log_weights(&mut self, log_weights: &[f64]) {
        let max_log = log_weights
            .iter()
            .copied()
            .filter(|w| w.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if !max_log.is_finite() {
            warn!("no particle has a finite likelihood, resetting weights to uniform");
            self.reset_weights();
            return;
        }
        for (particle, log_w) in self.particles.iter_mut().zip(log_weights.iter()) {
            particle.weight = if log_w.is_finite() {
                (log_w - max_log).exp()
            } else {
                0.0
            };
        }
        self.normalize_weights();
    }
    /// Replace the population with `N` draws proportional to weight, then reset weights to `1/N`.
    pub fn resample(&mut self) {
        let n = self.particles.len();
        let weights = self.weights();
        let indices = self
            .config
            .resampling_strategy
            .resample(&weights, n, &mut self.rng);
        let uniform = 1.0 / n as f64;
        let resampled: Vec<Particle> = indices
            .into_iter()
            .map(|i| Particle::new(self.particles[i].pose, uniform))
            .collect();
        self.particles = resampled;
        debug!(
            "resampled {} particles ({:?})",
            n, self.config.resampling_strategy
        );
    }
    /// `1 / Σ w²`; equals `N` for uniform weights.
    pub fn effective_sample_size(&self) -> f64 {
        let sum_of_squares: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        if sum_of_squares > 0.0 {
            1.0 / sum_of_squares
        } else {
            0.0
        }
    }
    /// Point estimate and covariance under the configured averaging strategy.
    pub fn estimate_with_covariance(&self) -> (Pose, Matrix3<f64>) {
        match self.config.averaging_strategy {
            ParticleAveragingStrategy::WeightedAverage => {
                ParticleAveragingStrategy::weighted_average_state(&self.particles)
            }
            ParticleAveragingStrategy::UnweightedAverage => {
                ParticleAveragingStrategy::unweighted_average_state(&self.particles)
            }
            ParticleAveragingStrategy::HighestWeight => {
                ParticleAveragingStrategy::highest_weight_state(&self.particles)
            }
        }
    }
}
impl LocalizationFilter for ParticleFilter {
    fn predict(&mut self, control: &Control) {
        for particle in self.particles.iter_mut() {
            particle.pose = motion::apply(
                &particle.pose,
                control,
                &self.config.motion_noise,
                &mut self.rng,
            );
        }
    }
    fn update(&mut self, measurement: &Measurement, map: &ObstacleMap, sensor: &RangeSensor) {
        if measurement.len() != sensor.num_beams() {
            warn!(
                "measurement has {} ranges but the sensor has {} beams; comparing the common prefix",
                measurement.len(),
                sensor.num_beams()
            );
        }
        let sigma = self.config.likelihood_std;
        let log_weights: Vec<f64> = if self.config.parallel {
            self.particles
                .par_iter()
                .map(|p| scan_log_likelihood(&sensor.expected_scan(&p.pose, map), measurement, sigma))
                .collect()
        } else {
            self.particles
                .iter()
                .map(|p| scan_log_likelihood(&sensor.expected_scan(&p.pose, map), measurement, sigma))
                .collect()
        };
        self.set_log_weights(&log_weights);
        debug!(
            "update: effective sample size {:.1} of {}",
            self.effective_sample_size(),
            self.particles.len()
        );
    }
    fn estimate(&self) -> Pose {
        self.estimate_with_covariance().0
    }
    fn certainty(&self) -> Matrix3<f64> {
        self.estimate_with_covariance().1
    }
}

/// Gaussian log-likelihood of a measured scan given an expected one, up to a constant.
///
/// Non-finite residuals give `-∞`.
pub fn scan_log_likelihood(expected: &Measurement, measured: &Measurement, sigma: f64) -> f64 {
    let inv_var = 1.0 / (sigma * sigma);
    let mut quad = 0.0;
    for (z_hat, z) in expected.ranges.iter().zip(measured.ranges.iter()) {
        let residual = z - z_hat;
        if !residual.is_finite() {
            return f64::NEG_INFINITY;
        }
        quad += residual * residual;
    }
    -0.5 * quad * inv_var
}

/// Weighted mean of angles on the unit circle, `atan2(Σ w sin θ, Σ w cos θ)`.
///
/// # Example
/// ```rust
/// use mcl::particle::circular_mean;
/// use std::f64::consts::PI;
///
/// let mean = circular_mean(&[0.1, 2.0 * PI - 0.1], &[0.5, 0.5]);
/// assert!(mean.abs() < 1e-12);
/// ```
pub fn circular_mean(angles: &[f64], weights: &[f64]) -> f64 {
    let (sin_sum, cos_sum) = angles
        .iter()
        .zip(weights.iter())
        .fold((0.0_f64, 0.0_f64), |(s, c), (theta, w)| {
            (s + w * theta.sin(), c + w * theta.cos())
        });
    sin_sum.atan2(cos_sum)
}

impl ParticleAveragingStrategy {
    fn weighted_average_state(particles: &[Particle]) -> (Pose, Matrix3<f64>) {
        let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
        let total: f64 = weights.iter().sum();
        if total > 0.0 && total.is_finite() {
            mean_and_covariance(particles, &weights)
        } else {
            Self::unweighted_average_state(particles)
        }
    }
    fn unweighted_average_state(particles: &[Particle]) -> (Pose, Matrix3<f64>) {
        let weights = vec![1.0; particles.len()];
        mean_and_covariance(particles, &weights)
    }
    fn highest_weight_state(particles: &[Particle]) -> (Pose, Matrix3<f64>) {
        let best = particles
            .iter()
            .max_by(|a, b| a.weight.total_cmp(&b.weight))
            .map(|p| p.pose)
            .unwrap_or_default();
        (best, Matrix3::zeros())
    }
}

/// Mean pose (circular in θ) and the covariance of (x, y, θ) with wrapped heading residuals.
fn mean_and_covariance(particles: &[Particle], weights: &[f64]) -> (Pose, Matrix3<f64>) {
    let total: f64 = weights.iter().sum();
    if particles.is_empty() || total <= 0.0 {
        return (Pose::default(), Matrix3::zeros());
    }
    let mut x = 0.0;
    let mut y = 0.0;
    for (particle, w) in particles.iter().zip(weights.iter()) {
        x += w * particle.pose.x;
        y += w * particle.pose.y;
    }
    let headings: Vec<f64> = particles.iter().map(|p| p.pose.theta).collect();
    let mean = Pose::new(x / total, y / total, circular_mean(&headings, weights));

    let mut cov = Matrix3::<f64>::zeros();
    for (particle, w) in particles.iter().zip(weights.iter()) {
        let diff = Vector3::new(
            particle.pose.x - mean.x,
            particle.pose.y - mean.y,
            angle_difference(particle.pose.theta, mean.theta),
        );
        cov += (w / total) * diff * diff.transpose();
    }
    (mean, cov)
}

/// Cumulative sum of the usable (finite, positive) weights.
fn cumulative_weights(weights: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    weights
        .iter()
        .map(|&w| {
            if w.is_finite() && w > 0.0 {
                total += w;
            }
            total
        })
        .collect()
}

/// Index of the particle owning position `u` on the cumulative weight axis.
///
/// Picks the first index whose cumulative weight exceeds `u`, so a zero-weight particle can only
/// be chosen when every weight is zero. Positions past the end (rounding) map to the last particle
/// with positive weight.
fn select(cumsum: &[f64], u: f64, last_positive: usize) -> usize {
    cumsum.partition_point(|&c| c <= u).min(last_positive)
}

/// Cumulative weights, their total and the last index with positive weight.
///
/// Falls back to uniform weights when no weight is usable.
fn prepare(weights: &[f64]) -> (Vec<f64>, f64, usize) {
    let mut cumsum = cumulative_weights(weights);
    let mut total = cumsum.last().copied().unwrap_or(0.0);
    if !(total > 0.0 && total.is_finite()) {
        cumsum = (1..=weights.len()).map(|i| i as f64).collect();
        total = weights.len() as f64;
    }
    let last_positive = cumsum
        .iter()
        .enumerate()
        .rev()
        .find(|&(i, &c)| i == 0 || c > cumsum[i - 1])
        .map(|(i, _)| i)
        .unwrap_or(0);
    (cumsum, total, last_positive)
}

/// Systematic resampling: one uniform offset, `n` evenly spaced pointers.
pub fn systematic_resample<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    if weights.is_empty() || n == 0 {
        return Vec::new();
    }
    let (cumsum, total, last) = prepare(weights);
    let step = total / n as f64;
    let offset = rng.random::<f64>() * step;
    (0..n)
        .map(|i| select(&cumsum, offset + i as f64 * step, last))
        .collect()
}

/// Multinomial resampling: `n` independent draws.
pub fn multinomial_resample<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    if weights.is_empty() || n == 0 {
        return Vec::new();
    }
    let (cumsum, total, last) = prepare(weights);
    (0..n)
        .map(|_| select(&cumsum, rng.random::<f64>() * total, last))
        .collect()
}

/// Stratified resampling: one independent draw inside each of `n` equal strata.
pub fn stratified_resample<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    if weights.is_empty() || n == 0 {
        return Vec::new();
    }
    let (cumsum, total, last) = prepare(weights);
    let step = total / n as f64;
    (0..n)
        .map(|i| select(&cumsum, (i as f64 + rng.random::<f64>()) * step, last))
        .collect()
}

/// Residual resampling: `⌊n w_i⌋` deterministic copies, the remainder drawn systematically from
/// the fractional parts.
pub fn residual_resample<R: Rng + ?Sized>(weights: &[f64], n: usize, rng: &mut R) -> Vec<usize> {
    if weights.is_empty() || n == 0 {
        return Vec::new();
    }
    let usable: Vec<f64> = weights
        .iter()
        .map(|&w| if w.is_finite() && w > 0.0 { w } else { 0.0 })
        .collect();
    let total: f64 = usable.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return systematic_resample(weights, n, rng);
    }
    let mut indices = Vec::with_capacity(n);
    let mut residual = Vec::with_capacity(usable.len());
    for (i, &w) in usable.iter().enumerate() {
        let expected = w / total * n as f64;
        let copies = (expected.floor() as usize).min(n - indices.len());
        indices.extend(std::iter::repeat_n(i, copies));
        residual.push(expected - copies as f64);
    }
    let remaining = n - indices.len();
    if remaining > 0 {
        let source = if residual.iter().sum::<f64>() > 0.0 {
            &residual
        } else {
            &usable
        };
        indices.extend(systematic_resample(source, remaining, rng));
    }
    indices
}
