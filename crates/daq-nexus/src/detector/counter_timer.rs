//! Counter/timers: one scalar per extra name.
//!
//! Unlike positioners, the primary field is picked by position rather than by
//! range: the last extra name unless an index is configured. Negative indices
//! count from the end.

use super::detector_group;
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
struct CounterScan {
    writer: PointWriter,
    nodes: Vec<(String, Option<DataNode>)>,
}

/// Counter/timer detector.
pub struct CounterTimerDetector {
    detector: Arc<dyn Detector>,
    options: AdapterOptions,
    scan: Option<CounterScan>,
}

/// Resolves the configured primary index against `count` fields.
pub fn resolve_primary_index(count: usize, configured: Option<isize>) -> Option<usize> {
    let index = configured.unwrap_or(-1);
    let resolved = if index < 0 {
        count.checked_sub(index.unsigned_abs())?
    } else {
        index.unsigned_abs()
    };
    (resolved < count).then_some(resolved)
}

impl CounterTimerDetector {
    pub fn new(detector: Arc<dyn Detector>, options: AdapterOptions) -> Self {
        Self {
            detector,
            options,
            scan: None,
        }
    }
}

impl AdapterOps for CounterTimerDetector {
    fn name(&self) -> &str {
        self.detector.name()
    }

    fn build_tree(&mut self, info: &ScanInfo) -> Result<Vec<DeviceTree>> {
        let name = self.detector.name().to_string();
        let role = info.role(&name);
        let extras = self.detector.extra_names();
        let primary_index =
            resolve_primary_index(extras.len(), self.options.counter_timer_primary_index)
                .ok_or_else(|| NexusError::InvalidDeviceConfig {
                    device: name.clone(),
                    message: format!(
                        "primary index {:?} is out of range for {} fields",
                        self.options.counter_timer_primary_index,
                        extras.len()
                    ),
                })?;

        let builder = DataNodeBuilder::new(
            name.as_str(),
            ScanRole::PerPoint,
            info.shape().to_vec(),
            self.options.factory.clone(),
        )
        .with_float_fill_value(self.options.float_fill_value);
        let units = self.detector.units();

        let mut group = detector_group(self.detector.as_ref(), role);
        let mut slots = Vec::with_capacity(extras.len());
        let mut nodes = Vec::with_capacity(extras.len());
        for (index, field) in extras.iter().enumerate() {
            let node = builder.build_lazy(field, DType::Float64, &[], None);
            annotate_field(
                &node,
                &format!("{}.{}", name, field),
                field,
                units.as_deref(),
                None,
            );
            group.add_data_node(field.as_str(), node.clone());
            slots.push(FieldSlot {
                field: field.clone(),
                index,
                node: node.clone(),
            });
            nodes.push((field.clone(), Some(node)));
        }

        self.scan = Some(CounterScan {
            writer: PointWriter::new(name.as_str(), extras.len(), info.rank(), slots),
            nodes,
        });
        Ok(vec![DeviceTree::new(name.as_str(), name.as_str(), ScanRole::PerPoint, group)
            .with_primary_field(Some(extras[primary_index].clone()))])
    }

    fn write_point(&mut self, value: &Value, position: &ScanPosition) -> Result<()> {
        let name = self.detector.name();
        let scan = self.scan.as_ref().ok_or_else(|| NexusError::NoActiveScan {
            device: name.to_string(),
        })?;
        let expected = scan.nodes.len();
        if let Some(fields) = value.to_field_values() {
            if fields.len() > expected {
                return Err(NexusError::WriteValue {
                    device: name.to_string(),
                    value: value.to_string(),
                    reason: format!("expected {} counter values, got {}", expected, fields.len()),
                });
            }
        }
        scan.writer.write(value, position)
    }

    fn scan_end(&mut self) {
        self.scan = None;
    }

    fn is_active(&self) -> bool {
        self.scan.is_some()
    }

    fn field_nodes(&self) -> Option<Vec<(String, Option<DataNode>)>> {
        self.scan.as_ref().map(|s| s.nodes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_primary_index() {
        assert_eq!(resolve_primary_index(3, None), Some(2));
        assert_eq!(resolve_primary_index(3, Some(0)), Some(0));
        assert_eq!(resolve_primary_index(3, Some(-1)), Some(2));
        assert_eq!(resolve_primary_index(3, Some(-3)), Some(0));
        assert_eq!(resolve_primary_index(3, Some(3)), None);
        assert_eq!(resolve_primary_index(3, Some(-4)), None);
        assert_eq!(resolve_primary_index(0, None), None);
    }
}
