//! Run configuration.
//!
//! Every run starts from [`AppConfig::default`], whose values are the bench
//! defaults of the OpenAFE plotter. A TOML file can override any subset:
//!
//! ```toml
//! port = "/dev/ttyACM0"
//! current_range_microamps = 200
//!
//! [sweep]
//! type = "CV"
//! starting_potential_millivolts = -500
//! ending_potential_millivolts = 500
//! scan_rate_millivolts_per_second = 200
//! step_size_millivolts = 5
//! number_of_cycles = 2
//! settling_time_milliseconds = 1000
//!
//! [plot]
//! title = "H2O + NaCl Cyclic Voltammetry"
//! subtitle = ""
//! grid_visible = true
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Errors raised while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The kind of sweep the device is asked to run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum VoltammetryType {
    /// Cyclic voltammetry.
    #[default]
    #[serde(rename = "CV")]
    Cyclic,
    /// Differential pulse voltammetry.
    #[serde(rename = "DPV")]
    DifferentialPulse,
    /// Square wave voltammetry.
    #[serde(rename = "SW")]
    SquareWave,
}

impl fmt::Display for VoltammetryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoltammetryType::Cyclic => "CV",
            VoltammetryType::DifferentialPulse => "DPV",
            VoltammetryType::SquareWave => "SW",
        };
        f.write_str(name)
    }
}

/// Sweep parameters sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(rename = "type")]
    pub voltammetry_type: VoltammetryType,
    pub starting_potential_millivolts: i32,
    pub ending_potential_millivolts: i32,
    pub scan_rate_millivolts_per_second: u32,
    pub step_size_millivolts: i32,
    pub number_of_cycles: u32,
    pub settling_time_milliseconds: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            voltammetry_type: VoltammetryType::Cyclic,
            starting_potential_millivolts: -500,
            ending_potential_millivolts: 500,
            scan_rate_millivolts_per_second: 200,
            step_size_millivolts: 5,
            number_of_cycles: 2,
            settling_time_milliseconds: 1000,
        }
    }
}

impl SweepConfig {
    /// Width of the potential window in millivolts.
    pub fn span_millivolts(&self) -> u64 {
        (i64::from(self.ending_potential_millivolts) - i64::from(self.starting_potential_millivolts))
            .unsigned_abs()
    }

    /// Rough duration of the sweep on the device, settling included.
    ///
    /// Returns `None` when the parameters give no usable rate, in which case
    /// only the idle timeout bounds the acquisition.
    pub fn expected_duration(&self, pulse: &PulseConfig) -> Option<Duration> {
        let settling = Duration::from_millis(u64::from(self.settling_time_milliseconds));
        let span = self.span_millivolts();

        let sweep = match self.voltammetry_type {
            VoltammetryType::Cyclic => {
                let rate = u64::from(self.scan_rate_millivolts_per_second);
                if rate == 0 {
                    return None;
                }
                // One cycle goes out and back.
                let millis = span
                    .saturating_mul(2 * 1000)
                    .saturating_mul(u64::from(self.number_of_cycles))
                    / rate;
                Duration::from_millis(millis)
            }
            VoltammetryType::DifferentialPulse => {
                let step = u64::from(self.step_size_millivolts.unsigned_abs());
                if step == 0 {
                    return None;
                }
                let period = u64::from(pulse.pulse_width_milliseconds)
                    + u64::from(pulse.base_width_milliseconds);
                Duration::from_millis((span / step).saturating_mul(period))
            }
            VoltammetryType::SquareWave => {
                let rate = u64::from(self.scan_rate_millivolts_per_second);
                if rate == 0 {
                    return None;
                }
                Duration::from_millis(span.saturating_mul(1000) / rate)
            }
        };

        Some(settling + sweep)
    }
}

/// Pulse parameters used only by DPV and SW sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PulseConfig {
    pub pulse_potential_millivolts: i32,
    pub pulse_width_milliseconds: u32,
    pub base_width_milliseconds: u32,
    pub sample_period_pulse_milliseconds: u32,
    pub sample_period_base_milliseconds: u32,
    pub pulse_frequency_hertz: u32,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            pulse_potential_millivolts: 100,
            pulse_width_milliseconds: 2,
            base_width_milliseconds: 20,
            sample_period_pulse_milliseconds: 1,
            sample_period_base_milliseconds: 2,
            pulse_frequency_hertz: 10,
        }
    }
}

/// Chart options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlotConfig {
    pub title: String,
    pub subtitle: String,
    pub grid_visible: bool,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            title: String::from("H2O + NaCl Cyclic Voltammetry"),
            subtitle: String::new(),
            grid_visible: true,
        }
    }
}

/// Serial link timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Longest silence tolerated from the device before giving up.
    pub idle_timeout_milliseconds: u64,
    /// Upper bound of a single blocking read on the port.
    pub read_timeout_milliseconds: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            idle_timeout_milliseconds: 5000,
            read_timeout_milliseconds: 100,
        }
    }
}

impl LinkConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_milliseconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_milliseconds)
    }
}

/// Root configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Serial port the board is attached to, e.g. `/dev/ttyACM0` or `COM14`.
    pub port: Option<String>,
    pub current_range_microamps: u32,
    pub sweep: SweepConfig,
    pub pulse: PulseConfig,
    pub plot: PlotConfig,
    pub link: LinkConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: None,
            current_range_microamps: 200,
            sweep: SweepConfig::default(),
            pulse: PulseConfig::default(),
            plot: PlotConfig::default(),
            link: LinkConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, keeping defaults for missing keys.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
