//! Serializable simulation configuration.
//!
//! A [`SimulationConfig`] describes a complete localization experiment: the room, the sensor, the
//! filter, the true agent and the control script. It can be written to and read from JSON, YAML or
//! TOML, chosen by file extension, and turned into a ready-to-run [`Simulation`] with
//! [`SimulationConfig::build`].
//!
//! Every field has a default, so a configuration file only needs to list what it changes. The
//! defaults describe the reference scenario: a 10 m × 10 m walled room with three short interior
//! walls, an agent starting at (2, 2) facing 45°, 100 particles spread over the room, a 360 beam
//! rangefinder with a 10 m range, and 100 steps of `(0.1, 0.1, 5°)`.
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::Pose;
use crate::error::ConfigError;
use crate::geometry::Segment;
use crate::map::ObstacleMap;
use crate::motion::{Control, MotionNoise};
use crate::particle::{
    ParticleAveragingStrategy, ParticleFilter, ParticleFilterConfig, ParticleResamplingStrategy,
};
use crate::sensor::RangeSensor;
use crate::sim::{BoundaryPolicy, Simulation};

/// Environment bounds and walls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub width: f64,
    pub height: f64,
    /// Close the bounds with four walls ahead of `walls`.
    pub enclose: bool,
    pub walls: Vec<Segment>,
}
impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 10.0,
            height: 10.0,
            enclose: true,
            walls: vec![
                Segment::new(5.0, 5.0, 5.0, 6.0),
                Segment::new(2.0, 2.0, 3.0, 2.0),
                Segment::new(7.0, 8.0, 8.0, 8.0),
            ],
        }
    }
}
impl MapConfig {
    pub fn build(&self) -> Result<ObstacleMap, ConfigError> {
        if self.enclose {
            ObstacleMap::enclosed(self.width, self.height, self.walls.clone())
        } else {
            ObstacleMap::new(self.width, self.height, self.walls.clone())
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub num_beams: usize,
    pub max_range: f64,
    /// Noise on the synthesized measurements, metres.
    pub noise_std: f64,
}
impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            num_beams: 360,
            max_range: 10.0,
            noise_std: 0.5,
        }
    }
}
impl SensorConfig {
    pub fn build(&self) -> Result<RangeSensor, ConfigError> {
        RangeSensor::new(self.num_beams, self.max_range, self.noise_std)
    }
}

/// Where the initial particles are drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Initialization {
    /// Uniform over the map bounds, heading uniform in [0, 2π).
    #[default]
    Uniform,
    /// Normal around the agent's initial pose.
    Gaussian { position_std: f64, heading_std: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub num_particles: usize,
    pub likelihood_std: f64,
    pub motion_noise: MotionNoise,
    pub resampling_strategy: ParticleResamplingStrategy,
    pub averaging_strategy: ParticleAveragingStrategy,
    pub parallel: bool,
    /// Resample when the effective sample size falls below this fraction of the particle count.
    pub resample_threshold: f64,
    pub initialization: Initialization,
}
impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            num_particles: 100,
            likelihood_std: 1.0,
            motion_noise: MotionNoise::new(0.1, 0.05),
            resampling_strategy: ParticleResamplingStrategy::Systematic,
            averaging_strategy: ParticleAveragingStrategy::WeightedAverage,
            parallel: true,
            resample_threshold: 1.0,
            initialization: Initialization::Uniform,
        }
    }
}
impl FilterConfig {
    /// Filter parameters with the given seed.
    pub fn particle_filter_config(&self, seed: u64) -> ParticleFilterConfig {
        ParticleFilterConfig {
            num_particles: self.num_particles,
            likelihood_std: self.likelihood_std,
            motion_noise: self.motion_noise,
            resampling_strategy: self.resampling_strategy,
            averaging_strategy: self.averaging_strategy,
            parallel: self.parallel,
            seed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub initial_pose: Pose,
    pub motion_noise: MotionNoise,
    pub boundary: BoundaryPolicy,
}
impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            initial_pose: Pose::new(2.0, 2.0, 45f64.to_radians()),
            motion_noise: MotionNoise::new(0.1, 0.05),
            boundary: BoundaryPolicy::Clamp,
        }
    }
}

/// Control inputs for the run.
///
/// With an empty `sequence` the constant `control` is applied `steps` times; otherwise the
/// sequence is repeated until `steps` controls have been issued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlScript {
    pub steps: usize,
    pub control: Control,
    pub sequence: Vec<Control>,
}
impl Default for ControlScript {
    fn default() -> Self {
        Self {
            steps: 100,
            control: Control::new(0.1, 0.1, 5f64.to_radians()),
            sequence: Vec::new(),
        }
    }
}
impl ControlScript {
    pub fn controls(&self) -> Vec<Control> {
        if self.sequence.is_empty() {
            vec![self.control; self.steps]
        } else {
            self.sequence.iter().copied().cycle().take(self.steps).collect()
        }
    }
}

/// Complete description of one localization experiment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Label carried into the results.
    pub name: String,
    /// Seeds the agent and measurement noise; the filter uses `seed + 1`.
    pub seed: u64,
    pub map: MapConfig,
    pub sensor: SensorConfig,
    pub filter: FilterConfig,
    pub agent: AgentConfig,
    pub script: ControlScript,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: "raycast-mcl".to_string(),
            seed: 42,
            map: MapConfig::default(),
            sensor: SensorConfig::default(),
            filter: FilterConfig::default(),
            agent: AgentConfig::default(),
            script: ControlScript::default(),
        }
    }
}
impl SimulationConfig {
    /// Validate every section and assemble the simulation.
    ///
    /// # Example
    /// ```rust
    /// use mcl::config::SimulationConfig;
    ///
    /// let sim = SimulationConfig::default().build().unwrap();
    /// assert_eq!(sim.filter().len(), 100);
    /// assert_eq!(sim.sensor().num_beams(), 360);
    /// ```
    pub fn build(&self) -> Result<Simulation, ConfigError> {
        let map = self.map.build()?;
        let sensor = self.sensor.build()?;
        let filter_config = self.filter.particle_filter_config(self.seed.wrapping_add(1));
        let filter = match self.filter.initialization {
            Initialization::Uniform => ParticleFilter::uniform(&map, filter_config)?,
            Initialization::Gaussian {
                position_std,
                heading_std,
            } => ParticleFilter::gaussian(
                &self.agent.initial_pose,
                position_std,
                heading_std,
                filter_config,
            )?,
        };
        Simulation::new(
            map,
            sensor,
            filter,
            self.agent.initial_pose,
            self.agent.motion_noise,
            self.agent.boundary,
            self.seed,
        )?
        .with_resample_threshold(self.filter.resample_threshold)
    }
    /// Write the configuration, in the format named by the file extension
    /// (`.json`, `.yaml`/`.yml` or `.toml`).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let text = ConfigFormat::from_path(path)?.render(self)?;
        fs::write(path, text)
    }
    /// Read a configuration written by [`SimulationConfig::to_file`] or by hand.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        format.parse(&fs::read_to_string(path)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}
impl ConfigFormat {
    fn from_path(path: &Path) -> io::Result<ConfigFormat> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match extension.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported file extension: {}", path.display()),
            )),
        }
    }
    fn render(self, config: &SimulationConfig) -> io::Result<String> {
        match self {
            ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(io::Error::other),
            ConfigFormat::Toml => toml::to_string(config).map_err(io::Error::other),
        }
    }
    fn parse(self, text: &str) -> io::Result<SimulationConfig> {
        match self {
            ConfigFormat::Json => serde_json::from_str(text).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(io::Error::other),
            ConfigFormat::Toml => toml::from_str(text).map_err(io::Error::other),
        }
    }
}
