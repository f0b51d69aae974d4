//! # daq-nexus
//!
//! Turns the devices taking part in a scan into NeXus-style trees and keeps
//! those trees filled while the scan runs.
//!
//! For each device the scan engine creates a [`DeviceAdapter`]. At scan start
//! the adapter builds one or more [`DeviceTree`]s: groups of datasets, one per
//! device field, that a file writer merges into the scan file. Per-point
//! fields get lazy, growable datasets; per-scan fields get fixed ones. The
//! engine then passes every point's value to [`DeviceAdapter::write_point`],
//! which writes each field into its slice. [`DeviceAdapter::scan_end`] drops
//! everything held for the scan.
//!
//! Around that core:
//!
//! - [`legacy`] links datasets to extra paths from the flat location map
//! - [`snapshot`] records selected devices once before the first point
//! - [`config`] loads the settings with Figment, [`logging`] sets up tracing
//! - [`sim`] has simulated devices for tests and the `nexus-sim` tool
//!
//! ```rust,ignore
//! use daq_nexus::prelude::*;
//!
//! let sample_x = Arc::new(SimulatedDevice::new("sample_x"));
//! let mut adapter = DeviceAdapter::for_device(sample_x.clone(), AdapterOptions::default());
//! let info = ScanInfo::new(vec![10]).with_role("sample_x", DeviceRole::Scannable);
//! let trees = adapter.build_tree(&info)?;
//! for step in 0..10 {
//!     sample_x.move_to(step as f64);
//!     adapter.write_point(step as f64, &ScanPosition::from_step(step, info.shape())?)?;
//! }
//! adapter.scan_end();
//! ```

pub mod adapter;
pub mod builder;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod device;
pub mod error;
pub mod fields;
pub mod legacy;
pub mod logging;
pub mod positioner;
pub mod primary;
pub mod readout;
pub mod scan;
pub mod sim;
pub mod snapshot;
pub mod tree;
pub mod value;
pub mod writer;

pub use adapter::{AdapterKind, AdapterOptions, DeviceAdapter, PointData};
pub use config::NexusConfig;
pub use error::{ErrorClass, NexusError, Result};
pub use scan::{ScanInfo, ScanObject, ScanPosition};
pub use tree::{DataNode, DeviceTree, GroupNode, NexusBaseClass};
pub use value::{DType, NdArray, Scalar, Value};

/// Common imports for building and driving adapters.
pub mod prelude {
    pub use crate::adapter::{AdapterOptions, DeviceAdapter, PointData};
    pub use crate::config::NexusConfig;
    pub use crate::device::{Detector, Device, DeviceRole, ScanRole};
    pub use crate::error::{NexusError, Result};
    pub use crate::readout::ReadoutNode;
    pub use crate::scan::{ScanInfo, ScanObject, ScanPosition};
    pub use crate::sim::{DetectorMode, SimulatedDetector, SimulatedDevice};
    pub use crate::tree::{DataNode, DeviceTree, GroupNode, NexusBaseClass};
    pub use crate::value::{NdArray, Value};
    pub use std::sync::Arc;
}
