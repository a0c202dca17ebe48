//! Configuration System using Figment
//!
//! Configuration is layered, highest precedence last:
//! 1. Built-in defaults (the Sidekick model 1 channel table, simulated backend)
//! 2. A TOML file (default `config/sidekick.toml`, optional)
//! 3. Environment variables prefixed with `SIDEKICK_`, nested keys split on `__`
//!
//! ```text
//! SIDEKICK_APPLICATION__LOG_LEVEL=debug
//! SIDEKICK_HARDWARE__MODE=live
//! SIDEKICK_HARDWARE__PV_PREFIX="sidekick1:"
//! SIDEKICK_RUN__OPERATOR="jdoe"
//! ```
//!
//! A minimal TOML file:
//!
//! ```toml
//! [hardware]
//! mode = "live"
//! pv_prefix = "sidekick1:"
//! timeout_ms = 2000
//!
//! [run]
//! operator = "jdoe"
//! action_list = "plans/led_action_list.csv"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{Access, ValueType};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/sidekick.toml";

/// Logical channel names used by the built-in plans.
pub mod channels {
    /// LED channel 0 brightness (0-255).
    pub const LED_BRIGHTNESS: &str = "led.ch0.brightness";
    /// Shutter enable flag.
    pub const SHUTTER_ENABLE: &str = "shutter.enable";
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Backend and channel table
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// Run defaults
    #[serde(default)]
    pub run: RunConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Display name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Sidekick DAQ".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Which backend the registry binds channels to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareMode {
    /// In-memory endpoints
    #[default]
    Simulated,
    /// EPICS process variables through the CA tools
    Live,
}

/// Hardware binding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Backend to bind channels to
    #[serde(default)]
    pub mode: HardwareMode,
    /// Prepended to every channel's PV suffix (e.g. "sidekick1:").
    #[serde(default)]
    pub pv_prefix: String,
    /// `caput` executable
    #[serde(default = "default_caput")]
    pub caput: PathBuf,
    /// `caget` executable
    #[serde(default = "default_caget")]
    pub caget: PathBuf,
    /// Per-call channel access timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Channel table; defaults to the Sidekick model 1 channels
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelSpec>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            mode: HardwareMode::default(),
            pv_prefix: String::new(),
            caput: default_caput(),
            caget: default_caget(),
            timeout_ms: default_timeout_ms(),
            channels: default_channels(),
        }
    }
}

impl HardwareConfig {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Full PV name for a channel.
    pub fn pv_name(&self, spec: &ChannelSpec) -> String {
        format!("{}{}", self.pv_prefix, spec.pv)
    }
}

/// One channel in the registry table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Logical name, e.g. "led.ch0.brightness"
    pub name: String,
    /// PV suffix, e.g. "LEDS:CH0:brig"
    pub pv: String,
    /// Declared value type
    pub value_type: ValueType,
    /// Read/write access, read/write by default
    #[serde(default)]
    pub access: Access,
}

impl ChannelSpec {
    /// Read/write channel spec.
    pub fn new(name: &str, pv: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            pv: pv.to_string(),
            value_type,
            access: Access::ReadWrite,
        }
    }
}

/// Run defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Recorded in run metadata; defaults to `$USER`
    #[serde(default = "default_operator")]
    pub operator: String,
    /// Experiment label prefix
    #[serde(default = "default_experiment")]
    pub experiment: String,
    /// Action table used when `table` is invoked without a path
    #[serde(default = "default_action_list")]
    pub action_list: PathBuf,
    /// Points in the brightness sweep
    #[serde(default = "default_sweep_steps")]
    pub sweep_steps: usize,
    /// Hold at each sweep point in milliseconds
    #[serde(default)]
    pub sweep_hold_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            operator: default_operator(),
            experiment: default_experiment(),
            action_list: default_action_list(),
            sweep_steps: default_sweep_steps(),
            sweep_hold_ms: 0,
        }
    }
}

impl RunConfig {
    /// Sweep hold as a `Duration`.
    pub fn sweep_hold(&self) -> Duration {
        Duration::from_millis(self.sweep_hold_ms)
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_caput() -> PathBuf {
    PathBuf::from("caput")
}

fn default_caget() -> PathBuf {
    PathBuf::from("caget")
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_operator() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

fn default_experiment() -> String {
    "Sidekick LED".to_string()
}

fn default_action_list() -> PathBuf {
    PathBuf::from("led_action_list.csv")
}

fn default_sweep_steps() -> usize {
    6
}

/// Sidekick model 1 process variables.
pub fn default_channels() -> Vec<ChannelSpec> {
    let mut specs = Vec::new();
    for ch in 0..6 {
        specs.push(ChannelSpec::new(
            &format!("led.ch{ch}.brightness"),
            &format!("LEDS:CH{ch}:brig"),
            ValueType::Float,
        ));
    }
    for ch in 0..6 {
        specs.push(ChannelSpec::new(
            &format!("led.ch{ch}.duration"),
            &format!("LEDS:CH{ch}:dur"),
            ValueType::Float,
        ));
    }
    specs.push(ChannelSpec::new("led.debug", "LEDS:debug", ValueType::Integer));
    specs.push(ChannelSpec::new("led.info", "LEDS:info", ValueType::Integer));
    specs.push(ChannelSpec::new(
        channels::SHUTTER_ENABLE,
        "SHUTTER:enable",
        ValueType::Boolean,
    ));
    specs.push(ChannelSpec::new(
        "shutter.duration",
        "SHUTTER:DURation",
        ValueType::Float,
    ));
    specs
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load from the default path and environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file (may be absent) and environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path.as_ref()).extract::<Self>()?.validated()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SIDEKICK_").split("__"))
    }

    fn validated(self) -> AppResult<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Checks log level, channel table uniqueness and sweep length.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut names = HashSet::new();
        for spec in &self.hardware.channels {
            if spec.name.trim().is_empty() {
                return Err(DaqError::Configuration(
                    "Channel with an empty name in hardware.channels".to_string(),
                ));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate channel name: '{}'",
                    spec.name
                )));
            }
        }

        if self.run.sweep_steps == 0 {
            return Err(DaqError::Configuration(
                "run.sweep_steps must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
