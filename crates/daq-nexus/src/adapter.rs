//! The adapter the scan engine drives for each device.
//!
//! The layout a device gets is decided once, when its adapter is created, and
//! is one of a closed set of variants ([`AdapterKind`]). Each variant owns the
//! state of the current scan from `build_tree` until `scan_end`; after
//! `scan_end` nothing from the scan is left.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut adapter = DeviceAdapter::for_device(sample_x, AdapterOptions::default());
//! let trees = adapter.build_tree(&ScanInfo::new(vec![10]).with_role("sample_x", DeviceRole::Scannable))?;
//! for step in 0..10 {
//!     let position = ScanPosition::from_step(step, &[10])?;
//!     adapter.write_point(Value::from(step as f64), &position)?;
//! }
//! adapter.scan_end();
//! ```

use crate::config::DeviceConfig;
use crate::dataset::{DatasetFactory, MemoryDatasetFactory};
use crate::detector::counter_timer::CounterTimerDetector;
use crate::detector::external::ExternalFileDetector;
use crate::detector::file_creator::FileCreatorDetector;
use crate::detector::generic::GenericDetector;
use crate::device::{Detector, Device};
use crate::error::{NexusError, Result};
use crate::positioner::{MultiPositioner, SinglePositioner};
use crate::readout::ReadoutNode;
use crate::scan::{ScanInfo, ScanPosition};
use crate::tree::{DataNode, DeviceTree};
use crate::value::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Settings an adapter is created with.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Creates the lazy datasets for per-point fields.
    pub factory: Arc<dyn DatasetFactory>,
    /// Record demanded positions of moved single-field devices.
    pub write_demand_values: bool,
    /// Fill value of floating point datasets.
    pub float_fill_value: f64,
    /// Declarative override for this device.
    pub device_config: Option<DeviceConfig>,
    /// The device also appears in the legacy location map.
    pub has_location_map_entry: bool,
    /// Primary field index of counter/timers; negative counts from the end.
    pub counter_timer_primary_index: Option<isize>,
    /// Directory file-creating detectors write into.
    pub data_dir: Option<PathBuf>,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            factory: Arc::new(MemoryDatasetFactory),
            write_demand_values: true,
            float_fill_value: f64::NAN,
            device_config: None,
            has_location_map_entry: false,
            counter_timer_primary_index: None,
            data_dir: None,
        }
    }
}

impl AdapterOptions {
    /// Uses `factory` for per-point datasets.
    pub fn with_factory(mut self, factory: Arc<dyn DatasetFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Applies a declarative override, or clears it.
    pub fn with_device_config(mut self, config: Option<DeviceConfig>) -> Self {
        self.device_config = config;
        self
    }

    /// Turns recording of demanded positions on or off.
    pub fn with_write_demand_values(mut self, enabled: bool) -> Self {
        self.write_demand_values = enabled;
        self
    }

    /// Picks the primary counter; negative indices count from the end.
    pub fn with_counter_timer_primary_index(mut self, index: Option<isize>) -> Self {
        self.counter_timer_primary_index = index;
        self
    }

    /// Directory that file names of file-creating detectors are relative to.
    pub fn with_data_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.data_dir = dir;
        self
    }
}

/// What is written at a scan point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointData {
    /// A device position or detector reading.
    Value(Value),
    /// A readout description from a detector that describes its own output.
    Readout(ReadoutNode),
}

impl From<Value> for PointData {
    fn from(value: Value) -> Self {
        PointData::Value(value)
    }
}

impl From<ReadoutNode> for PointData {
    fn from(node: ReadoutNode) -> Self {
        PointData::Readout(node)
    }
}

impl From<f64> for PointData {
    fn from(value: f64) -> Self {
        PointData::Value(Value::from(value))
    }
}

impl From<&str> for PointData {
    fn from(value: &str) -> Self {
        PointData::Value(Value::from(value))
    }
}

/// Operations every adapter variant implements.
pub(crate) trait AdapterOps {
    fn name(&self) -> &str;

    fn build_tree(&mut self, info: &ScanInfo) -> Result<Vec<DeviceTree>>;

    fn write_point(&mut self, value: &Value, position: &ScanPosition) -> Result<()>;

    fn write_readout(&mut self, _readout: &ReadoutNode, _position: &ScanPosition) -> Result<()> {
        Err(NexusError::WriteValue {
            device: self.name().to_string(),
            value: "readout".to_string(),
            reason: "this device does not accept readout descriptions".to_string(),
        })
    }

    fn write_demand(&mut self, _demand: &Value, _position: &ScanPosition) -> Result<()> {
        Ok(())
    }

    fn scan_end(&mut self);

    fn is_active(&self) -> bool;

    fn field_nodes(&self) -> Option<Vec<(String, Option<DataNode>)>> {
        None
    }
}

/// The layout chosen for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Device with one input field.
    PositionerSingle,
    /// Device with several fields, or only extra fields.
    PositionerMulti,
    /// Detector writing one `data` dataset.
    DetectorGeneric,
    /// Detector with named counter channels.
    DetectorCounter,
    /// Detector describing its own readout tree.
    DetectorExternal,
    /// Detector writing its own files.
    DetectorFileCreator,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AdapterKind::PositionerSingle => "positioner_single",
            AdapterKind::PositionerMulti => "positioner_multi",
            AdapterKind::DetectorGeneric => "detector_generic",
            AdapterKind::DetectorCounter => "detector_counter",
            AdapterKind::DetectorExternal => "detector_external",
            AdapterKind::DetectorFileCreator => "detector_file_creator",
        };
        f.write_str(label)
    }
}

/// Adapter between one device and the tree written for it.
///
/// Variants match [`AdapterKind`] one to one.
pub enum DeviceAdapter {
    /// See [`AdapterKind::PositionerSingle`].
    PositionerSingle(SinglePositioner),
    /// See [`AdapterKind::PositionerMulti`].
    PositionerMulti(MultiPositioner),
    /// See [`AdapterKind::DetectorGeneric`].
    DetectorGeneric(GenericDetector),
    /// See [`AdapterKind::DetectorCounter`].
    DetectorCounter(CounterTimerDetector),
    /// See [`AdapterKind::DetectorExternal`].
    DetectorExternal(ExternalFileDetector),
    /// See [`AdapterKind::DetectorFileCreator`].
    DetectorFileCreator(FileCreatorDetector),
}

impl DeviceAdapter {
    /// Adapter for a device with movable fields.
    pub fn for_device(device: Arc<dyn Device>, options: AdapterOptions) -> Self {
        if device.input_names().len() == 1 {
            DeviceAdapter::PositionerSingle(SinglePositioner::new(device, options))
        } else {
            DeviceAdapter::PositionerMulti(MultiPositioner::new(device, options))
        }
    }

    /// Adapter for a detector.
    ///
    /// Detectors describing their own readout get the external-file layout,
    /// detectors writing their own files only record file names, detectors
    /// with extra names are counter/timers and everything else writes one
    /// `data` dataset.
    pub fn for_detector(detector: Arc<dyn Detector>, options: AdapterOptions) -> Self {
        if detector.provides_readout_tree() {
            DeviceAdapter::DetectorExternal(ExternalFileDetector::new(detector, options))
        } else if detector.creates_own_files() {
            DeviceAdapter::DetectorFileCreator(FileCreatorDetector::new(detector, options))
        } else if !detector.extra_names().is_empty() {
            DeviceAdapter::DetectorCounter(CounterTimerDetector::new(detector, options))
        } else {
            DeviceAdapter::DetectorGeneric(GenericDetector::new(detector, options))
        }
    }

    /// The layout chosen when the adapter was created.
    pub fn kind(&self) -> AdapterKind {
        match self {
            DeviceAdapter::PositionerSingle(_) => AdapterKind::PositionerSingle,
            DeviceAdapter::PositionerMulti(_) => AdapterKind::PositionerMulti,
            DeviceAdapter::DetectorGeneric(_) => AdapterKind::DetectorGeneric,
            DeviceAdapter::DetectorCounter(_) => AdapterKind::DetectorCounter,
            DeviceAdapter::DetectorExternal(_) => AdapterKind::DetectorExternal,
            DeviceAdapter::DetectorFileCreator(_) => AdapterKind::DetectorFileCreator,
        }
    }

    fn ops(&self) -> &dyn AdapterOps {
        match self {
            DeviceAdapter::PositionerSingle(a) => a,
            DeviceAdapter::PositionerMulti(a) => a,
            DeviceAdapter::DetectorGeneric(a) => a,
            DeviceAdapter::DetectorCounter(a) => a,
            DeviceAdapter::DetectorExternal(a) => a,
            DeviceAdapter::DetectorFileCreator(a) => a,
        }
    }

    fn ops_mut(&mut self) -> &mut dyn AdapterOps {
        match self {
            DeviceAdapter::PositionerSingle(a) => a,
            DeviceAdapter::PositionerMulti(a) => a,
            DeviceAdapter::DetectorGeneric(a) => a,
            DeviceAdapter::DetectorCounter(a) => a,
            DeviceAdapter::DetectorExternal(a) => a,
            DeviceAdapter::DetectorFileCreator(a) => a,
        }
    }

    /// Name of the device.
    pub fn name(&self) -> &str {
        self.ops().name()
    }

    /// Builds the trees for a scan and starts tracking that scan.
    ///
    /// Building again without `scan_end` replaces the previous scan's state.
    pub fn build_tree(&mut self, info: &ScanInfo) -> Result<Vec<DeviceTree>> {
        let span = tracing::debug_span!("build_tree", device = %self.name(), kind = %self.kind());
        let _enter = span.enter();
        self.ops_mut().build_tree(info)
    }

    /// Writes the value read at `position`.
    pub fn write_point(&mut self, data: impl Into<PointData>, position: &ScanPosition) -> Result<()> {
        match data.into() {
            PointData::Value(value) => self.ops_mut().write_point(&value, position),
            PointData::Readout(readout) => self.ops_mut().write_readout(&readout, position),
        }
    }

    /// Writes a demanded position; a no-op for devices without demand data.
    pub fn write_demand(&mut self, demand: &Value, position: &ScanPosition) -> Result<()> {
        self.ops_mut().write_demand(demand, position)
    }

    /// Drops everything held for the current scan. Safe to call repeatedly.
    pub fn scan_end(&mut self) {
        if self.ops().is_active() {
            tracing::debug!(device = %self.name(), "Scan ended, releasing datasets");
        }
        self.ops_mut().scan_end();
    }

    /// True between `build_tree` and `scan_end`.
    pub fn is_active(&self) -> bool {
        self.ops().is_active()
    }

    /// Each field's dataset in field order, while a scan is active.
    ///
    /// Fields skipped at build time have no dataset.
    pub fn field_nodes(&self) -> Option<Vec<(String, Option<DataNode>)>> {
        self.ops().field_nodes()
    }
}

impl fmt::Debug for DeviceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAdapter")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("active", &self.is_active())
            .finish()
    }
}
