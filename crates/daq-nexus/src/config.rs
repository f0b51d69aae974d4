//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/nexus.toml` (or an explicit path)
//! 2. Environment variables prefixed with `DAQ_NEXUS_`, nested with `__`
//!    (for example `DAQ_NEXUS_WRITER__WRITE_DEMAND_VALUES=false`)
//!
//! Two per-device surfaces exist. `[devices.<name>]` declares where each field
//! of a device goes and decides the shape of its tree; `[location_map.<name>]`
//! is the older flat map of paths that is applied afterwards as an extra
//! linking pass. A device may appear in both.
//!
//! # Example
//! ```no_run
//! use daq_nexus::config::NexusConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NexusConfig::load_from("config/nexus.toml")?;
//! config.validate()?;
//! let options = config.adapter_options("sample_x");
//! # Ok(())
//! # }
//! ```

use crate::adapter::AdapterOptions;
use crate::error::{NexusError, Result};
use crate::legacy::LocationMapEntry;
use crate::logging::{parse_log_level, OutputFormat};
use crate::sim::SimulatedDeviceConfig;
use crate::tree::{NexusBaseClass, NodePath};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/nexus.toml";
/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "DAQ_NEXUS_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NexusConfig {
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Declarative per-device overrides
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
    /// Legacy location map, keyed by device name
    #[serde(default)]
    pub location_map: BTreeMap<String, LocationMapEntry>,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Extra simulated devices for `nexus-sim`
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Settings shared by every adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Record demanded positions of devices moved by the scan
    #[serde(default = "default_write_demand_values")]
    pub write_demand_values: bool,
    /// Fill value of floating point datasets
    #[serde(default = "default_float_fill_value")]
    pub float_fill_value: f64,
    /// Directory detectors write their own files into
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Primary field of counter/timers; negative counts from the end
    #[serde(default)]
    pub counter_timer_primary_index: Option<isize>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            write_demand_values: default_write_demand_values(),
            float_fill_value: default_float_fill_value(),
            data_dir: None,
            counter_timer_primary_index: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: OutputFormat::default(),
            span_events: false,
        }
    }
}

/// Declarative override for one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub nx_class: Option<NexusBaseClass>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub collection_name: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    /// Field name to `name:NXclass/.../leaf` path inside the device's node.
    /// When any path is given, every field needs one.
    #[serde(default)]
    pub field_paths: BTreeMap<String, String>,
}

/// Pre-scan snapshot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_enabled")]
    pub enabled: bool,
    /// Devices read before the scan in addition to those in the scan
    #[serde(default)]
    pub devices: Vec<String>,
    /// Texts recorded as string datasets
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: default_snapshot_enabled(),
            devices: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Devices the simulator creates in addition to its built-in ones
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// One `[[simulation.positioners]]` table per device
    #[serde(default)]
    pub positioners: Vec<SimulatedDeviceConfig>,
}

// Default value functions
fn default_write_demand_values() -> bool {
    true
}

fn default_float_fill_value() -> f64 {
    f64::NAN
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_snapshot_enabled() -> bool {
    true
}

impl NexusConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment overrides
    /// still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.logging.level)?;

        for (device, config) in &self.devices {
            if config
                .collection_name
                .as_deref()
                .is_some_and(|name| name.trim().is_empty())
            {
                return Err(NexusError::Validation(format!(
                    "Device '{}' has an empty collection_name",
                    device
                )));
            }
            for (field, path) in &config.field_paths {
                path.parse::<NodePath>().map_err(|e| {
                    NexusError::Validation(format!(
                        "Device '{}' field '{}': {}",
                        device, field, e
                    ))
                })?;
            }
        }

        for (device, entry) in &self.location_map {
            entry
                .validate()
                .map_err(|message| NexusError::Validation(format!("Location map entry '{}': {}", device, message)))?;
        }

        let mut names = std::collections::HashSet::new();
        for positioner in &self.simulation.positioners {
            if positioner.name.trim().is_empty() {
                return Err(NexusError::Validation(
                    "Simulated positioner with an empty name".to_string(),
                ));
            }
            if !names.insert(positioner.name.as_str()) {
                return Err(NexusError::Validation(format!(
                    "Duplicate simulated positioner: {}",
                    positioner.name
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.snapshot.devices {
            if !seen.insert(device) {
                return Err(NexusError::Validation(format!(
                    "Duplicate snapshot device: {}",
                    device
                )));
            }
        }
        Ok(())
    }

    /// Adapter settings for `device`
    pub fn adapter_options(&self, device: &str) -> AdapterOptions {
        AdapterOptions {
            write_demand_values: self.writer.write_demand_values,
            float_fill_value: self.writer.float_fill_value,
            device_config: self.devices.get(device).cloned(),
            has_location_map_entry: self.location_map.contains_key(device),
            counter_timer_primary_index: self.writer.counter_timer_primary_index,
            data_dir: self.writer.data_dir.clone(),
            ..AdapterOptions::default()
        }
    }

    /// Devices to read before the scan: those in the scan, then configured
    /// extras, then location map prerequisites. Each name appears once.
    pub fn snapshot_devices(&self, scan_devices: &[String]) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let prerequisites = self
            .location_map
            .values()
            .flat_map(|entry| entry.prerequisites.iter());
        for name in scan_devices
            .iter()
            .chain(self.snapshot.devices.iter())
            .chain(prerequisites)
        {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}
