//! ---
//! uts_section: "01-core-functionality"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Shared primitives and utilities for the simulator runtime."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_initial_dwell() -> Duration {
    Duration::from_millis(5000)
}

fn default_dwell() -> Duration {
    Duration::from_millis(4000)
}

fn default_pre_departure() -> Duration {
    Duration::from_millis(1000)
}

fn default_transit_step_count() -> u32 {
    100
}

fn default_transit_step_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_capacity() -> usize {
    15
}

fn default_generator_enabled() -> bool {
    true
}

fn default_min_interval() -> Duration {
    Duration::from_millis(2000)
}

fn default_max_interval() -> Duration {
    Duration::from_millis(5000)
}

fn default_generator_seed() -> u64 {
    0xA11CEu64
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the UTS runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "UTS_CONFIG";

    /// Load configuration from disk, respecting the `UTS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.timing.validate()?;
        self.generator.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Stops and initial fleet for the simulated network.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub stops: Vec<String>,
    #[serde(default)]
    pub buses: Vec<BusConfig>,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stops.is_empty() {
            return Err(anyhow!("network must declare at least one stop"));
        }
        for (idx, stop) in self.stops.iter().enumerate() {
            if self.stops[..idx].contains(stop) {
                return Err(anyhow!("duplicate stop name '{}'", stop));
            }
        }
        for bus in &self.buses {
            bus.validate(&self.stops)?;
        }
        Ok(())
    }
}

/// A bus to seed into the network at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub route: Vec<String>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Position on the route where the bus is seeded at startup.
    #[serde(default)]
    pub start_index: usize,
}

impl BusConfig {
    pub fn validate(&self, known_stops: &[String]) -> Result<()> {
        if self.route.len() < 2 {
            return Err(anyhow!(
                "bus route must contain at least two stops, got {}",
                self.route.len()
            ));
        }
        if self.capacity == 0 {
            return Err(anyhow!("bus capacity must be positive"));
        }
        if self.start_index >= self.route.len() {
            return Err(anyhow!(
                "bus start_index {} outside route of {} stops",
                self.start_index,
                self.route.len()
            ));
        }
        for (idx, stop) in self.route.iter().enumerate() {
            if !known_stops.contains(stop) {
                return Err(anyhow!("bus route references unknown stop '{}'", stop));
            }
            if self.route[..idx].contains(stop) {
                return Err(anyhow!("bus route repeats stop '{}'", stop));
            }
        }
        Ok(())
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            route: Vec::new(),
            capacity: default_capacity(),
            start_index: 0,
        }
    }
}

/// Timing knobs of the movement state machine. Their product
/// `transit_step_count * transit_step_delay` is the travel time between
/// adjacent stops.
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Dwell at the very first stop before any movement, long enough to
    /// seed boarding.
    #[serde(default = "default_initial_dwell")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_dwell: Duration,
    /// Dwell at every subsequent stop.
    #[serde(default = "default_dwell")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub dwell: Duration,
    /// How long the departure window stays open after the departing signal.
    #[serde(default = "default_pre_departure")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub pre_departure: Duration,
    /// Number of discrete position updates per transit leg.
    #[serde(default = "default_transit_step_count")]
    pub transit_step_count: u32,
    /// Delay between discrete position updates.
    #[serde(default = "default_transit_step_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub transit_step_delay: Duration,
}

impl TimingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.transit_step_count == 0 {
            return Err(anyhow!("transit_step_count must be positive"));
        }
        Ok(())
    }

    /// Total travel time between two adjacent stops.
    pub fn transit_duration(&self) -> Duration {
        self.transit_step_delay * self.transit_step_count
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            initial_dwell: default_initial_dwell(),
            dwell: default_dwell(),
            pre_departure: default_pre_departure(),
            transit_step_count: default_transit_step_count(),
            transit_step_delay: default_transit_step_delay(),
        }
    }
}

/// Randomized passenger generation policy.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_enabled")]
    pub enabled: bool,
    /// Lower bound of the random pause between generated passengers.
    #[serde(default = "default_min_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_interval: Duration,
    /// Upper bound of the random pause between generated passengers.
    #[serde(default = "default_max_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_interval: Duration,
    /// Seed for the generator RNG so runs are reproducible.
    #[serde(default = "default_generator_seed")]
    pub seed: u64,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Err(anyhow!("generator min_interval must be positive"));
        }
        if self.max_interval < self.min_interval {
            return Err(anyhow!(
                "generator max_interval must not be below min_interval"
            ));
        }
        Ok(())
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_generator_enabled(),
            min_interval: default_min_interval(),
            max_interval: default_max_interval(),
            seed: default_generator_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
