//! Simulated devices for tests and the `nexus-sim` tool.
//!
//! Positions are held in memory and can be changed between reads; readings of
//! simulated detectors are a deterministic function of the step number.

use crate::device::{Detector, Device, Limits};
use crate::error::DeviceError;
use crate::readout::ReadoutNode;
use crate::tree::NexusBaseClass;
use crate::value::{NdArray, Scalar, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// SimulatedDevice
// =============================================================================

/// Configuration for a simulated positioner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    /// Device name
    pub name: String,
    /// Input field names (default: the device name)
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Read-only field names
    #[serde(default)]
    pub extras: Vec<String>,
    /// Initial value of every field (default: 0.0)
    #[serde(default)]
    pub initial_value: f64,
    #[serde(default)]
    pub units: Option<String>,
}

/// A device whose position is whatever it was last set to.
#[derive(Debug)]
pub struct SimulatedDevice {
    name: String,
    inputs: Vec<String>,
    extras: Vec<String>,
    formats: Vec<String>,
    units: Option<String>,
    category: Option<String>,
    nx_class: Option<NexusBaseClass>,
    limits: Option<Limits>,
    metadata: BTreeMap<String, String>,
    position: RwLock<Value>,
    offline: RwLock<bool>,
}

impl SimulatedDevice {
    /// A single-input device named after its field.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::with_fields(name.clone(), vec![name], Vec::new())
    }

    pub fn with_fields(name: impl Into<String>, inputs: Vec<String>, extras: Vec<String>) -> Self {
        let count = inputs.len() + extras.len();
        let position = if count == 1 {
            Value::from(0.0)
        } else {
            Value::List(vec![Value::from(0.0); count])
        };
        Self {
            name: name.into(),
            inputs,
            extras,
            formats: Vec::new(),
            units: None,
            category: None,
            nx_class: None,
            limits: None,
            metadata: BTreeMap::new(),
            position: RwLock::new(position),
            offline: RwLock::new(false),
        }
    }

    /// Device described by a `[[simulation.positioners]]` entry.
    pub fn from_config(config: &SimulatedDeviceConfig) -> Self {
        let inputs = if config.inputs.is_empty() {
            vec![config.name.clone()]
        } else {
            config.inputs.clone()
        };
        let device = Self::with_fields(config.name.clone(), inputs, config.extras.clone())
            .with_units(config.units.clone());
        let count = device.inputs.len() + device.extras.len();
        device.set_position(if count == 1 {
            Value::from(config.initial_value)
        } else {
            Value::List(vec![Value::from(config.initial_value); count])
        });
        device
    }

    pub fn with_formats(mut self, formats: Vec<String>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_units(mut self, units: Option<String>) -> Self {
        self.units = units;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_nx_class(mut self, nx_class: NexusBaseClass) -> Self {
        self.nx_class = Some(nx_class);
        self
    }

    pub fn with_limits(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.limits = Some(Limits { lower, upper });
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), text.into());
        self
    }

    pub fn with_position(self, value: impl Into<Value>) -> Self {
        self.set_position(value);
        self
    }

    pub fn set_position(&self, value: impl Into<Value>) {
        *self.position.write() = value.into();
    }

    /// Moves the first input field, leaving the others where they are.
    pub fn move_to(&self, target: f64) {
        let mut position = self.position.write();
        let moved = match position.to_field_values() {
            Some(mut fields) if fields.len() > 1 => {
                fields[0] = Value::from(target);
                Value::List(fields)
            }
            _ => Value::from(target),
        };
        *position = moved;
    }

    /// Makes every read fail until cleared.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write() = offline;
    }
}

impl Device for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_names(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn extra_names(&self) -> Vec<String> {
        self.extras.clone()
    }

    fn position(&self) -> Result<Value, DeviceError> {
        if *self.offline.read() {
            return Err(DeviceError::new(format!("{} is offline", self.name)));
        }
        Ok(self.position.read().clone())
    }

    fn output_formats(&self) -> Vec<String> {
        self.formats.clone()
    }

    fn units(&self) -> Option<String> {
        self.units.clone()
    }

    fn category(&self) -> Option<String> {
        self.category.clone()
    }

    fn nx_class(&self) -> Option<NexusBaseClass> {
        self.nx_class
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.clone()
    }

    fn limits(&self) -> Option<Limits> {
        self.limits
    }
}

// =============================================================================
// SimulatedDetector
// =============================================================================

/// Which adapter layout a simulated detector exercises
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorMode {
    /// One `data` block of the given dimensions per point
    Data(Vec<usize>),
    /// One count per channel
    Counters(Vec<String>),
    /// Writes `<data_dir>/<name>-<step>.tif` per point
    Files(String),
    /// Describes its output with a readout tree
    Readout(ReadoutNode),
}

/// A detector producing synthetic readings.
#[derive(Debug)]
pub struct SimulatedDetector {
    name: String,
    mode: DetectorMode,
    description: Option<String>,
    units: Option<String>,
}

impl SimulatedDetector {
    pub fn new(name: impl Into<String>, mode: DetectorMode) -> Self {
        Self {
            name: name.into(),
            mode,
            description: None,
            units: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// The reading at flat step `step`.
    pub fn reading(&self, step: usize) -> Value {
        let base = step as f64;
        match &self.mode {
            DetectorMode::Data(dims) => {
                let shape = crate::detector::point_shape(dims);
                let size = shape.iter().product::<usize>();
                let data = (0..size).map(|i| Scalar::Float64(base + i as f64)).collect();
                match NdArray::new(crate::value::DType::Float64, shape, data) {
                    Ok(array) if !array.is_scalar() => Value::Array(array),
                    _ => Value::from(base),
                }
            }
            DetectorMode::Counters(channels) => Value::List(
                (0..channels.len())
                    .map(|c| Value::from(base * 100.0 + c as f64))
                    .collect(),
            ),
            DetectorMode::Files(dir) => Value::from(format!("{}/{}-{:05}.tif", dir, self.name, step)),
            DetectorMode::Readout(_) => Value::Null,
        }
    }
}

impl Device for SimulatedDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn extra_names(&self) -> Vec<String> {
        match &self.mode {
            DetectorMode::Counters(channels) => channels.clone(),
            _ => Vec::new(),
        }
    }

    fn position(&self) -> Result<Value, DeviceError> {
        Ok(self.reading(0))
    }

    fn units(&self) -> Option<String> {
        self.units.clone()
    }
}

impl Detector for SimulatedDetector {
    fn data_dimensions(&self) -> Vec<usize> {
        match &self.mode {
            DetectorMode::Data(dims) => dims.clone(),
            _ => vec![1],
        }
    }

    fn creates_own_files(&self) -> bool {
        matches!(self.mode, DetectorMode::Files(_))
    }

    fn provides_readout_tree(&self) -> bool {
        matches!(self.mode, DetectorMode::Readout(_))
    }

    fn readout_tree(&self) -> Result<ReadoutNode, DeviceError> {
        match &self.mode {
            DetectorMode::Readout(tree) => Ok(tree.clone()),
            _ => Err(DeviceError::new(format!("{} has no readout description", self.name))),
        }
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn detector_type(&self) -> Option<String> {
        Some("simulated".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_to_keeps_extras() {
        let stage = SimulatedDevice::with_fields(
            "stage",
            vec!["x".to_string()],
            vec!["temperature".to_string()],
        );
        stage.set_position(Value::from(vec![1.0, 295.0]));
        stage.move_to(4.0);
        assert_eq!(
            stage.position().unwrap(),
            Value::List(vec![Value::from(4.0), Value::from(295.0)])
        );
    }

    #[test]
    fn test_from_config() {
        let config: SimulatedDeviceConfig =
            serde_json::from_value(serde_json::json!({ "name": "theta", "initial_value": 12.5 })).unwrap();
        let theta = SimulatedDevice::from_config(&config);
        assert_eq!(theta.input_names(), vec!["theta"]);
        assert_eq!(theta.position().unwrap(), Value::from(12.5));

        let config: SimulatedDeviceConfig = serde_json::from_value(serde_json::json!({
            "name": "slit",
            "inputs": ["gap", "centre"],
            "extras": ["readback"],
            "initial_value": 0.5,
            "units": "mm"
        }))
        .unwrap();
        let slit = SimulatedDevice::from_config(&config);
        assert_eq!(slit.extra_names(), vec!["readback"]);
        assert_eq!(slit.units().as_deref(), Some("mm"));
        assert_eq!(slit.position().unwrap().to_field_values().map(|f| f.len()), Some(3));
    }

    #[test]
    fn test_offline_device() {
        let device = SimulatedDevice::new("ring_current");
        device.set_offline(true);
        assert!(device.position().is_err());
        device.set_offline(false);
        assert!(device.position().is_ok());
    }

    #[test]
    fn test_detector_readings() {
        let counters = SimulatedDetector::new(
            "ct",
            DetectorMode::Counters(vec!["i0".to_string(), "it".to_string()]),
        );
        assert_eq!(counters.reading(2), Value::List(vec![Value::from(200.0), Value::from(201.0)]));

        let image = SimulatedDetector::new("cam", DetectorMode::Data(vec![2, 3]));
        match image.reading(1) {
            Value::Array(array) => assert_eq!(array.shape(), &[2, 3]),
            other => panic!("unexpected reading {other}"),
        }

        let diode = SimulatedDetector::new("diode", DetectorMode::Data(vec![1]));
        assert_eq!(diode.reading(3), Value::from(3.0));
    }
}
