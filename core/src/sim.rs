//! Closed-loop localization simulation and its recorded results.
//!
//! This module provides:
//! - [`Simulation`], which owns the map, the sensor, the particle filter, the true agent pose and
//!   the random number generator that drives the agent and the synthetic measurements
//! - [`StepReport`], everything a reporting front end needs after one step
//! - [`LocalizationRecord`] and [`LocalizationResult`] for storing a run, writing it to CSV and
//!   summarizing its error
//!
//! One call to [`Simulation::step`] runs the full cycle: move the true agent, scan from its pose,
//! predict, update, optionally resample, estimate.
use log::{debug, info};
use nalgebra::Matrix3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::error::ConfigError;
use crate::map::ObstacleMap;
use crate::motion::{self, Control, MotionNoise};
use crate::particle::{Particle, ParticleFilter};
use crate::sensor::{Measurement, RangeSensor};
use crate::{LocalizationFilter, Pose};

/// What happens when a move would take the true agent out of the map.
///
/// Only the true agent is bounded; particles are free to leave the map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Clamp the position into the bounds; the heading still changes.
    #[default]
    Clamp,
    /// Drop the whole move if it ends outside the bounds or its path touches a wall.
    Reject,
    /// Apply every move as is.
    Unbounded,
}

/// Output of one simulation step.
#[derive(Clone, Debug)]
pub struct StepReport {
    /// 1-based step number.
    pub step: usize,
    pub control: Control,
    pub true_pose: Pose,
    pub measurement: Measurement,
    pub estimate: Pose,
    pub covariance: Matrix3<f64>,
    /// Population after resampling (if it happened).
    pub particles: Vec<Particle>,
    /// Effective sample size right after the update, before any resampling.
    pub effective_sample_size: f64,
    pub resampled: bool,
}

/// Explicit simulation state: no globals, one seeded generator for the agent and the sensor.
#[derive(Debug)]
pub struct Simulation {
    map: ObstacleMap,
    sensor: RangeSensor,
    filter: ParticleFilter,
    true_pose: Pose,
    agent_noise: MotionNoise,
    boundary: BoundaryPolicy,
    resample_threshold: f64,
    rng: StdRng,
    step: usize,
}
impl Simulation {
    /// Create a simulation that resamples after every update.
    ///
    /// # Arguments
    /// * `map` - Environment shared by the agent, the sensor and the filter.
    /// * `sensor` - Rangefinder used both to synthesize measurements and to weigh particles.
    /// * `filter` - Initialized particle filter.
    /// * `true_pose` - Initial pose of the agent.
    /// * `agent_noise` - Noise on the agent's own motion.
    /// * `boundary` - How the agent is kept inside the map.
    /// * `seed` - Seed for the agent motion and measurement noise.
    pub fn new(
        map: ObstacleMap,
        sensor: RangeSensor,
        filter: ParticleFilter,
        true_pose: Pose,
        agent_noise: MotionNoise,
        boundary: BoundaryPolicy,
        seed: u64,
    ) -> Result<Simulation, ConfigError> {
        agent_noise.validate()?;
        Ok(Simulation {
            map,
            sensor,
            filter,
            true_pose,
            agent_noise,
            boundary,
            resample_threshold: 1.0,
            rng: StdRng::seed_from_u64(seed),
            step: 0,
        })
    }
    /// Only resample when the effective sample size drops below `threshold · N`.
    ///
    /// `1.0` resamples every step, `0.0` never.
    pub fn with_resample_threshold(mut self, threshold: f64) -> Result<Simulation, ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidResampleThreshold(threshold));
        }
        self.resample_threshold = threshold;
        Ok(self)
    }
    pub fn map(&self) -> &ObstacleMap {
        &self.map
    }
    pub fn sensor(&self) -> &RangeSensor {
        &self.sensor
    }
    pub fn filter(&self) -> &ParticleFilter {
        &self.filter
    }
    pub fn filter_mut(&mut self) -> &mut ParticleFilter {
        &mut self.filter
    }
    pub fn true_pose(&self) -> Pose {
        self.true_pose
    }
    pub fn boundary(&self) -> BoundaryPolicy {
        self.boundary
    }
    pub fn resample_threshold(&self) -> f64 {
        self.resample_threshold
    }
    pub fn steps_taken(&self) -> usize {
        self.step
    }
    /// Move the true agent under the boundary policy and return its new pose.
    pub fn move_agent(&mut self, control: &Control) -> Pose {
        let proposed = motion::apply(&self.true_pose, control, &self.agent_noise, &mut self.rng);
        self.true_pose = match self.boundary {
            BoundaryPolicy::Unbounded => proposed,
            BoundaryPolicy::Clamp => {
                let position = self.map.clamp(&proposed.position());
                Pose::new(position.x, position.y, proposed.theta)
            }
            BoundaryPolicy::Reject => {
                let from = self.true_pose.position();
                let to = proposed.position();
                if self.map.contains(&to) && !self.map.path_blocked(&from, &to) {
                    proposed
                } else {
                    debug!("rejected move from {} to {}", self.true_pose, proposed);
                    self.true_pose
                }
            }
        };
        self.true_pose
    }
    fn should_resample(&self, effective_sample_size: f64) -> bool {
        self.resample_threshold >= 1.0
            || effective_sample_size < self.resample_threshold * self.filter.len() as f64
    }
    /// Run one full cycle with `control`.
    pub fn step(&mut self, control: &Control) -> StepReport {
        let true_pose = self.move_agent(control);
        let measurement = self.sensor.scan(&true_pose, &self.map, &mut self.rng);

        self.filter.predict(control);
        self.filter.update(&measurement, &self.map, &self.sensor);
        let effective_sample_size = self.filter.effective_sample_size();
        let resampled = self.should_resample(effective_sample_size);
        if resampled {
            self.filter.resample();
        }
        let (estimate, covariance) = self.filter.estimate_with_covariance();
        self.step += 1;
        debug!(
            "step {}: truth {}, estimate {}, ess {:.1}",
            self.step, true_pose, estimate, effective_sample_size
        );
        StepReport {
            step: self.step,
            control: *control,
            true_pose,
            measurement,
            estimate,
            covariance,
            particles: self.filter.particles().to_vec(),
            effective_sample_size,
            resampled,
        }
    }
    /// Run one step per control and collect the results under `name`.
    pub fn run(&mut self, controls: &[Control], name: &str) -> LocalizationResult {
        info!(
            "running '{}' for {} steps with {} particles",
            name,
            controls.len(),
            self.filter.len()
        );
        let mut result = LocalizationResult::new(name);
        for control in controls {
            let report = self.step(control);
            result.push(LocalizationRecord::from(&report));
        }
        info!(
            "finished '{}': position RMSE {:.3} m, heading RMSE {:.2} deg, final position error {:.3} m",
            name,
            result.position_rmse(),
            result.heading_rmse().to_degrees(),
            result.final_position_error()
        );
        result
    }
}

/// One row of a localization run, as written to CSV.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalizationRecord {
    pub step: usize,
    pub true_x: f64,
    pub true_y: f64,
    /// Radians, wrapped to [-π, π).
    pub true_theta: f64,
    pub estimate_x: f64,
    pub estimate_y: f64,
    /// Radians, wrapped to [-π, π).
    pub estimate_theta: f64,
    /// Euclidean position error, metres.
    pub position_error: f64,
    /// Signed heading error `estimate - truth`, radians.
    pub heading_error: f64,
    pub effective_sample_size: f64,
    pub resampled: bool,
}
impl From<&StepReport> for LocalizationRecord {
    fn from(report: &StepReport) -> Self {
        let truth = report.true_pose.normalized();
        let estimate = report.estimate.normalized();
        LocalizationRecord {
            step: report.step,
            true_x: truth.x,
            true_y: truth.y,
            true_theta: truth.theta,
            estimate_x: estimate.x,
            estimate_y: estimate.y,
            estimate_theta: estimate.theta,
            position_error: estimate.distance_to(&truth),
            heading_error: estimate.heading_error(&truth),
            effective_sample_size: report.effective_sample_size,
            resampled: report.resampled,
        }
    }
}
impl LocalizationRecord {
    pub fn true_pose(&self) -> Pose {
        Pose::new(self.true_x, self.true_y, self.true_theta)
    }
    pub fn estimate(&self) -> Pose {
        Pose::new(self.estimate_x, self.estimate_y, self.estimate_theta)
    }
}

/// A named sequence of [`LocalizationRecord`]s with error summaries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalizationResult {
    pub name: String,
    pub records: Vec<LocalizationRecord>,
}
impl LocalizationResult {
    pub fn new(name: &str) -> Self {
        LocalizationResult {
            name: name.to_string(),
            records: Vec::new(),
        }
    }
    pub fn push(&mut self, record: LocalizationRecord) {
        self.records.push(record);
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    /// Root mean square position error over all steps; zero for an empty run.
    pub fn position_rmse(&self) -> f64 {
        rms(self.records.iter().map(|r| r.position_error))
    }
    /// Root mean square heading error over all steps, radians.
    pub fn heading_rmse(&self) -> f64 {
        rms(self.records.iter().map(|r| r.heading_error))
    }
    pub fn final_position_error(&self) -> f64 {
        self.records.last().map_or(0.0, |r| r.position_error)
    }
    pub fn final_heading_error(&self) -> f64 {
        self.records.last().map_or(0.0, |r| r.heading_error)
    }
    pub fn mean_effective_sample_size(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records
            .iter()
            .map(|r| r.effective_sample_size)
            .sum::<f64>()
            / self.records.len() as f64
    }
    /// Writes the records to a CSV file with a header row.
    ///
    /// # Example
    /// ```no_run
    /// use mcl::sim::LocalizationResult;
    ///
    /// let result = LocalizationResult::new("empty run");
    /// result.to_csv("localization.csv").expect("Failed to write results");
    /// ```
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Reads records previously written by [`LocalizationResult::to_csv`].
    ///
    /// # Returns
    /// * `Ok(LocalizationResult)` named `name` if successful.
    /// * `Err` if the file cannot be read or a row cannot be parsed.
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        name: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut result = LocalizationResult::new(name);
        for row in rdr.deserialize() {
            let record: LocalizationRecord = row?;
            result.push(record);
        }
        Ok(result)
    }
}

fn rms(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v * v, n + 1));
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Segment;
    use crate::particle::ParticleFilterConfig;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::FRAC_PI_4;

    fn room() -> ObstacleMap {
        ObstacleMap::enclosed(
            10.0,
            10.0,
            vec![
                Segment::new(5.0, 5.0, 5.0, 6.0),
                Segment::new(2.0, 2.0, 3.0, 2.0),
                Segment::new(7.0, 8.0, 8.0, 8.0),
            ],
        )
        .unwrap()
    }

    fn simulation(start: Pose, boundary: BoundaryPolicy, seed: u64) -> Simulation {
        let map = room();
        let sensor = RangeSensor::new(36, 10.0, 0.1).unwrap();
        let config = ParticleFilterConfig {
            num_particles: 200,
            parallel: false,
            seed,
            ..ParticleFilterConfig::default()
        };
        let filter = ParticleFilter::gaussian(&start, 0.3, 0.1, config).unwrap();
        Simulation::new(map, sensor, filter, start, MotionNoise::none(), boundary, seed).unwrap()
    }

    fn sample_record(step: usize, position_error: f64, heading_error: f64) -> LocalizationRecord {
        LocalizationRecord {
            step,
            true_x: 1.0,
            true_y: 2.0,
            true_theta: 0.5,
            estimate_x: 1.0 + position_error,
            estimate_y: 2.0,
            estimate_theta: 0.5 + heading_error,
            position_error,
            heading_error,
            effective_sample_size: 50.0,
            resampled: true,
        }
    }

    #[test]
    fn clamp_keeps_agent_inside() {
        let mut sim = simulation(Pose::new(9.95, 5.0, 0.0), BoundaryPolicy::Clamp, 1);
        let pose = sim.move_agent(&Control::new(0.1, 0.0, 0.2));
        assert_approx_eq!(pose.x, 10.0, 1e-12);
        assert_approx_eq!(pose.y, 5.0, 1e-12);
        assert_approx_eq!(pose.theta, 0.2, 1e-12);
    }

    #[test]
    fn reject_refuses_moves_through_walls_and_out_of_bounds() {
        let mut sim = simulation(Pose::new(4.95, 5.5, 0.0), BoundaryPolicy::Reject, 1);
        // through the wall at x = 5
        let pose = sim.move_agent(&Control::new(0.1, 0.0, 0.0));
        assert_eq!(pose, Pose::new(4.95, 5.5, 0.0));
        // away from it is fine
        let pose = sim.move_agent(&Control::new(-0.1, 0.0, 0.0));
        assert_approx_eq!(pose.x, 4.85, 1e-12);

        let mut sim = simulation(Pose::new(0.05, 4.0, 0.0), BoundaryPolicy::Reject, 1);
        let pose = sim.move_agent(&Control::new(-0.1, 0.0, 0.3));
        assert_eq!(pose, Pose::new(0.05, 4.0, 0.0));
    }

    #[test]
    fn reject_lets_the_agent_leave_a_wall_it_starts_on() {
        // (2, 2) is the end point of the wall from (2, 2) to (3, 2)
        let mut sim = simulation(Pose::new(2.0, 2.0, FRAC_PI_4), BoundaryPolicy::Reject, 1);
        for _ in 0..20 {
            sim.step(&Control::new(0.1, 0.1, 0.0));
        }
        let pose = sim.true_pose();
        assert!(pose.x > 3.0, "agent did not move: {pose}");
        assert_approx_eq!(pose.x, 4.0, 1e-9);
        assert_approx_eq!(pose.y, 4.0, 1e-9);
    }

    #[test]
    fn reject_accepts_landing_on_the_border() {
        let mut sim = simulation(Pose::new(9.5, 5.0, 0.0), BoundaryPolicy::Reject, 1);
        let pose = sim.move_agent(&Control::new(0.5, 0.0, 0.0));
        assert_eq!(pose, Pose::new(10.0, 5.0, 0.0));
        // and sliding along it
        let pose = sim.move_agent(&Control::new(0.0, 1.0, 0.0));
        assert_eq!(pose, Pose::new(10.0, 6.0, 0.0));
    }

    #[test]
    fn unbounded_agent_can_leave() {
        let mut sim = simulation(Pose::new(9.95, 5.0, 0.0), BoundaryPolicy::Unbounded, 1);
        let pose = sim.move_agent(&Control::new(0.1, 0.0, 0.0));
        assert_approx_eq!(pose.x, 10.05, 1e-12);
    }

    #[test]
    fn step_reports_are_complete() {
        let mut sim = simulation(Pose::new(2.0, 3.0, FRAC_PI_4), BoundaryPolicy::Clamp, 3);
        let report = sim.step(&Control::new(0.1, 0.1, 5f64.to_radians()));
        assert_eq!(report.step, 1);
        assert_eq!(report.measurement.len(), 36);
        assert_eq!(report.particles.len(), 200);
        assert!(report.resampled);
        assert!(report.effective_sample_size > 0.0);
        assert!(report.estimate.is_finite());
        assert_eq!(sim.steps_taken(), 1);
        assert_approx_eq!(report.true_pose.x, 2.1, 1e-12);
        let sum: f64 = report.particles.iter().map(|p| p.weight).sum();
        assert_approx_eq!(sum, 1.0, 1e-9);
    }

    #[test]
    fn runs_are_reproducible_from_the_seed() {
        let controls = vec![Control::new(0.1, 0.05, 0.05); 10];
        let mut a = simulation(Pose::new(3.0, 3.0, 0.0), BoundaryPolicy::Clamp, 17);
        let mut b = simulation(Pose::new(3.0, 3.0, 0.0), BoundaryPolicy::Clamp, 17);
        assert_eq!(a.run(&controls, "a").records, b.run(&controls, "b").records);
    }

    #[test]
    fn zero_threshold_never_resamples() {
        let mut sim = simulation(Pose::new(3.0, 3.0, 0.0), BoundaryPolicy::Clamp, 5)
            .with_resample_threshold(0.0)
            .unwrap();
        let report = sim.step(&Control::new(0.1, 0.0, 0.0));
        assert!(!report.resampled);
        let weights = sim.filter().weights();
        assert!(weights.iter().any(|w| (w - weights[0]).abs() > 1e-12));
    }

    #[test]
    fn threshold_must_be_a_fraction() {
        let sim = simulation(Pose::new(3.0, 3.0, 0.0), BoundaryPolicy::Clamp, 5);
        assert_eq!(
            sim.with_resample_threshold(1.5).unwrap_err(),
            ConfigError::InvalidResampleThreshold(1.5)
        );
    }

    #[test]
    fn summary_statistics() {
        let mut result = LocalizationResult::new("summary");
        assert_eq!(result.position_rmse(), 0.0);
        result.push(sample_record(1, 3.0, 0.1));
        result.push(sample_record(2, 4.0, -0.1));
        assert_eq!(result.len(), 2);
        assert_approx_eq!(result.position_rmse(), (12.5f64).sqrt(), 1e-12);
        assert_approx_eq!(result.heading_rmse(), 0.1, 1e-12);
        assert_approx_eq!(result.final_position_error(), 4.0, 1e-12);
        assert_approx_eq!(result.final_heading_error(), -0.1, 1e-12);
        assert_approx_eq!(result.mean_effective_sample_size(), 50.0, 1e-12);
    }

    #[test]
    fn csv_round_trip() {
        let mut result = LocalizationResult::new("written");
        for i in 0..3 {
            result.push(sample_record(i + 1, 0.1 * i as f64, 0.01 * i as f64));
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        result.to_csv(&path).unwrap();
        let read = LocalizationResult::from_csv(&path, "read").unwrap();
        assert_eq!(read.name, "read");
        assert_eq!(read.records, result.records);
        assert_eq!(read.records[2].estimate(), result.records[2].estimate());
    }

    #[test]
    fn from_csv_missing_file_errors() {
        assert!(LocalizationResult::from_csv("does/not/exist.csv", "missing").is_err());
    }

    #[test]
    fn record_wraps_headings() {
        let report = StepReport {
            step: 4,
            control: Control::default(),
            true_pose: Pose::new(0.0, 0.0, 2.0 * std::f64::consts::PI - 0.1),
            measurement: Measurement::default(),
            estimate: Pose::new(3.0, 4.0, 0.1),
            covariance: Matrix3::zeros(),
            particles: vec![],
            effective_sample_size: 1.0,
            resampled: false,
        };
        let record = LocalizationRecord::from(&report);
        assert_approx_eq!(record.true_theta, -0.1, 1e-12);
        assert_approx_eq!(record.heading_error, 0.2, 1e-12);
        assert_approx_eq!(record.position_error, 5.0, 1e-12);
    }
}
