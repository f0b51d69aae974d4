//! Traits for the devices this crate reads from.
//!
//! Devices are owned by the instrument layer. The adapter only reads their
//! declared field names, their current value and a handful of optional hints;
//! whether a device is captured per scan or per point is decided by the scan
//! engine and passed in through [`ScanInfo`](crate::scan::ScanInfo).

use crate::error::DeviceError;
use crate::readout::ReadoutNode;
use crate::tree::NexusBaseClass;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Whether a device's value is captured once per scan or at every point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanRole {
    PerScan,
    PerPoint,
}

impl fmt::Display for ScanRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanRole::PerScan => f.write_str("per_scan"),
            ScanRole::PerPoint => f.write_str("per_point"),
        }
    }
}

/// The part a device plays in a scan, as assigned by the scan engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    /// Moved by the scan.
    Scannable,
    /// Read at every point.
    Monitor,
    /// Read once at the start of the scan.
    MonitorPerScan,
    /// Acquires data at every point.
    Detector,
}

impl DeviceRole {
    pub fn scan_role(self) -> ScanRole {
        match self {
            DeviceRole::MonitorPerScan => ScanRole::PerScan,
            DeviceRole::Scannable | DeviceRole::Monitor | DeviceRole::Detector => {
                ScanRole::PerPoint
            }
        }
    }

    /// True only for devices the scan actually moves.
    pub fn is_moved(self) -> bool {
        self == DeviceRole::Scannable
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceRole::Scannable => "scannable",
            DeviceRole::Monitor => "monitor",
            DeviceRole::MonitorPerScan => "monitor_per_scan",
            DeviceRole::Detector => "detector",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User limits of a movable device.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Limits {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// An instrument device as seen by the adapter layer.
///
/// Field order is input names followed by extra names; the device's value
/// lists one entry per field in that same order.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    /// Settable fields.
    fn input_names(&self) -> Vec<String>;

    /// Read-only companion fields.
    fn extra_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Current value of all fields.
    fn position(&self) -> Result<Value, DeviceError>;

    /// printf-style output format per field, e.g. `%5.3f` or `%s`.
    fn output_formats(&self) -> Vec<String> {
        Vec::new()
    }

    fn units(&self) -> Option<String> {
        None
    }

    /// Category hint such as `sample` or `instrument`.
    fn category(&self) -> Option<String> {
        None
    }

    fn nx_class(&self) -> Option<NexusBaseClass> {
        None
    }

    /// Additional key/value metadata written as string fields.
    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn limits(&self) -> Option<Limits> {
        None
    }

    /// Name of the control system record behind the device, if any.
    fn controller_record_name(&self) -> Option<String> {
        None
    }
}

/// A device that acquires data rather than just reporting a position.
pub trait Detector: Device {
    /// Shape of the data acquired at each point; empty or `[1]` for scalars.
    fn data_dimensions(&self) -> Vec<usize> {
        Vec::new()
    }

    /// The detector writes its own files and only reports their names.
    fn creates_own_files(&self) -> bool {
        false
    }

    /// The detector describes its output as a [`ReadoutNode`] tree.
    fn provides_readout_tree(&self) -> bool {
        false
    }

    /// Readout description used when building the tree.
    fn readout_tree(&self) -> Result<ReadoutNode, DeviceError> {
        Err(DeviceError::new(format!(
            "detector '{}' does not describe its readout",
            self.name()
        )))
    }

    fn description(&self) -> Option<String> {
        None
    }

    fn detector_type(&self) -> Option<String> {
        None
    }

    fn detector_id(&self) -> Option<String> {
        None
    }
}

/// Looks devices up by name.
pub trait DeviceRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Device>>;
}

impl DeviceRegistry for HashMap<String, Arc<dyn Device>> {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.get(name).cloned()
    }
}

impl DeviceRegistry for BTreeMap<String, Arc<dyn Device>> {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.get(name).cloned()
    }
}
