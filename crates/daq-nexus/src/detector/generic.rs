//! Detectors writing one block of data per point.

use super::{detector_group, point_shape, FIELD_DATA};
use crate::adapter::{AdapterOps, AdapterOptions};
use crate::builder::{annotate_field, DataNodeBuilder};
use crate::device::{Detector, ScanRole};
use crate::error::{NexusError, Result};
use crate::scan::{ScanInfo, ScanPosition};
use crate::tree::{DataNode, DeviceTree};
use crate::value::{DType, Value};
use crate::writer::{FieldSlot, PointWriter};
use std::sync::Arc;

#[derive(Debug)]
struct GenericScan {
    writer: PointWriter,
    data: DataNode,
}

/// Detector with a single `data` dataset of its declared dimensions.
pub struct GenericDetector {
    detector: Arc<dyn Detector>,
    options: AdapterOptions,
    scan: Option<GenericScan>,
}

impl GenericDetector {
    pub fn new(detector: Arc<dyn Detector>, options: AdapterOptions) -> Self {
        Self {
            detector,
            options,
            scan: None,
        }
    }
}

/// Element type of the detector's current reading, `Float64` when it has none.
fn reading_dtype(detector: &dyn Detector) -> DType {
    match detector.position() {
        Ok(value) => match value.to_ndarray() {
            Ok(array) => array.dtype(),
            Err(reason) => {
                tracing::debug!(device = detector.name(), %reason, "No typed reading, storing float64");
                DType::Float64
            }
        },
        Err(e) => {
            tracing::debug!(device = detector.name(), error = %e, "Reading unavailable, storing float64");
            DType::Float64
        }
    }
}

impl AdapterOps for GenericDetector {
    fn name(&self) -> &str {
        self.detector.name()
    }

    fn build_tree(&mut self, info: &ScanInfo) -> Result<Vec<DeviceTree>> {
        let name = self.detector.name().to_string();
        let role = info.role(&name);
        let builder = DataNodeBuilder::new(
            name.as_str(),
            ScanRole::PerPoint,
            info.shape().to_vec(),
            self.options.factory.clone(),
        )
        .with_float_fill_value(self.options.float_fill_value);

        let shape = point_shape(&self.detector.data_dimensions());
        let dtype = reading_dtype(self.detector.as_ref());
        let data = builder.build_lazy(FIELD_DATA, dtype, &shape, None);
        annotate_field(
            &data,
            &format!("{}.{}", name, FIELD_DATA),
            FIELD_DATA,
            self.detector.units().as_deref(),
            None,
        );

        let mut group = detector_group(self.detector.as_ref(), role);
        group.add_data_node(FIELD_DATA, data.clone());

        let slot = FieldSlot {
            field: FIELD_DATA.to_string(),
            index: 0,
            node: data.clone(),
        };
        self.scan = Some(GenericScan {
            writer: PointWriter::new(name.as_str(), 1, info.rank(), vec![slot]),
            data,
        });
        Ok(vec![DeviceTree::new(name.as_str(), name.as_str(), ScanRole::PerPoint, group)
            .with_primary_field(Some(FIELD_DATA.to_string()))])
    }

    fn write_point(&mut self, value: &Value, position: &ScanPosition) -> Result<()> {
        let scan = self.scan.as_ref().ok_or_else(|| NexusError::NoActiveScan {
            device: self.detector.name().to_string(),
        })?;
        // The whole reading is the one field.
        scan.writer.write(&Value::List(vec![value.clone()]), position)
    }

    fn scan_end(&mut self) {
        self.scan = None;
    }

    fn is_active(&self) -> bool {
        self.scan.is_some()
    }

    fn field_nodes(&self) -> Option<Vec<(String, Option<DataNode>)>> {
        self.scan
            .as_ref()
            .map(|s| vec![(FIELD_DATA.to_string(), Some(s.data.clone()))])
    }
}
