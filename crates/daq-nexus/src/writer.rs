//! Writes one scan point into a device's lazy datasets.
//!
//! Every field value is converted and checked against its dataset before any
//! slice is written, so a bad point leaves all of the device's datasets as
//! they were.

use crate::dataset::SliceND;
use crate::error::{DatasetError, NexusError, Result};
use crate::scan::ScanPosition;
use crate::tree::DataNode;
use crate::value::{shape_size, shape_text, NdArray, Value};

/// A field's dataset and the index of its entry in the normalised position.
#[derive(Debug, Clone)]
pub struct FieldSlot {
    pub field: String,
    pub index: usize,
    pub node: DataNode,
}

/// Per-point writer for one device.
#[derive(Debug, Clone)]
pub struct PointWriter {
    device: String,
    expected_fields: usize,
    scan_rank: usize,
    slots: Vec<FieldSlot>,
    demand: Option<DataNode>,
}

impl PointWriter {
    /// Writer for a device reporting `expected_fields` fields.
    pub fn new(
        device: impl Into<String>,
        expected_fields: usize,
        scan_rank: usize,
        slots: Vec<FieldSlot>,
    ) -> Self {
        Self {
            device: device.into(),
            expected_fields,
            scan_rank,
            slots,
            demand: None,
        }
    }

    /// Dataset demanded positions go to, if they are recorded.
    pub fn with_demand(mut self, demand: Option<DataNode>) -> Self {
        self.demand = demand;
        self
    }

    pub fn has_demand(&self) -> bool {
        self.demand.is_some()
    }

    /// The per-field datasets in field order.
    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    /// Writes the fields of `value` at `position`.
    pub fn write(&self, value: &Value, position: &ScanPosition) -> Result<()> {
        let fields = value.to_field_values().ok_or_else(|| NexusError::WriteValue {
            device: self.device.clone(),
            value: value.to_string(),
            reason: "position is null".to_string(),
        })?;
        if fields.len() < self.expected_fields {
            return Err(NexusError::PositionLength {
                device: self.device.clone(),
                expected: self.expected_fields,
                actual: fields.len(),
            });
        }

        let mut prepared = Vec::with_capacity(self.slots.len());
        for slot in self.slots.iter().filter(|s| s.node.is_lazy()) {
            let field_value = &fields[slot.index];
            let array = field_value
                .to_ndarray()
                .map_err(|reason| NexusError::WriteValue {
                    device: self.device.clone(),
                    value: field_value.to_string(),
                    reason: format!("field '{}': {}", slot.field, reason),
                })?;
            let (slice, array) = self.prepare(&slot.field, &slot.node, position, &array)?;
            prepared.push((slot, slice, array));
        }

        for (slot, slice, array) in prepared {
            slot.node
                .write_slice(&slice, &array)
                .map_err(|source| self.slice_error(&slot.field, &slice, source))?;
        }
        Ok(())
    }

    /// Writes a demanded position into the one-dimensional demand dataset.
    ///
    /// Does nothing when the device has no demand dataset.
    pub fn write_demand(&self, demand: &Value, position: &ScanPosition) -> Result<()> {
        let Some(node) = &self.demand else {
            return Ok(());
        };
        let first = demand
            .to_field_values()
            .and_then(|v| v.into_iter().next())
            .ok_or_else(|| NexusError::WriteValue {
                device: self.device.clone(),
                value: demand.to_string(),
                reason: "demand value is empty".to_string(),
            })?;
        let array = first.to_ndarray().map_err(|reason| NexusError::WriteValue {
            device: self.device.clone(),
            value: first.to_string(),
            reason,
        })?;
        let index = position.index_for(&self.device);
        let slice = SliceND::new(vec![index], vec![index + 1]);
        node.write_slice(&slice, &array)
            .map_err(|source| self.slice_error("demand", &slice, source))
    }

    fn prepare(
        &self,
        field: &str,
        node: &DataNode,
        position: &ScanPosition,
        array: &NdArray,
    ) -> Result<(SliceND, NdArray)> {
        let inner_shape = inner_shape(node, self.scan_rank);
        let slice = position.slice_for(&inner_shape);
        if slice.rank() != node.rank() {
            return Err(self.slice_error(
                field,
                &slice,
                DatasetError::RankMismatch {
                    slice_rank: slice.rank(),
                    rank: node.rank(),
                },
            ));
        }
        if array.size() != shape_size(&inner_shape) {
            return Err(self.slice_error(
                field,
                &slice,
                DatasetError::SizeMismatch {
                    data_shape: shape_text(array.shape()),
                    slice_shape: shape_text(&inner_shape),
                },
            ));
        }
        let converted = array.cast(node.dtype()).ok_or_else(|| {
            self.slice_error(
                field,
                &slice,
                DatasetError::TypeMismatch {
                    value: array.to_string(),
                    value_type: array.dtype().to_string(),
                    dtype: node.dtype().to_string(),
                },
            )
        })?;
        Ok((slice, converted))
    }

    fn slice_error(&self, field: &str, slice: &SliceND, source: DatasetError) -> NexusError {
        NexusError::SliceWrite {
            device: self.device.clone(),
            dataset: field.to_string(),
            slice: slice.to_string(),
            source,
        }
    }
}

/// Shape of one point of a per-point dataset.
pub fn inner_shape(node: &DataNode, scan_rank: usize) -> Vec<usize> {
    node.max_shape()
        .map(|max| {
            max.iter()
                .skip(scan_rank)
                .map(|d| d.unwrap_or(1))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DataNodeBuilder;
    use crate::dataset::MemoryDatasetFactory;
    use crate::device::ScanRole;
    use crate::value::Scalar;
    use std::sync::Arc;

    fn writer(shape: Vec<usize>) -> (PointWriter, DataNode, DataNode) {
        let b = DataNodeBuilder::new("stage", ScanRole::PerPoint, shape.clone(), Arc::new(MemoryDatasetFactory));
        let x = b.build_field("x", "x", &Value::from(0.0)).unwrap();
        let spec = b.build_field("spec", "spec", &Value::from(vec![0.0, 0.0])).unwrap();
        let slots = vec![
            FieldSlot { field: "x".into(), index: 0, node: x.clone() },
            FieldSlot { field: "spec".into(), index: 1, node: spec.clone() },
        ];
        (PointWriter::new("stage", 2, shape.len(), slots), x, spec)
    }

    #[test]
    fn test_write_point_round_trip() {
        let (w, x, spec) = writer(vec![2, 3]);
        let value = Value::List(vec![Value::from(1.5), Value::from(vec![7.0, 8.0])]);
        let pos = ScanPosition::from_step(4, &[2, 3]).unwrap();
        w.write(&value, &pos).unwrap();

        assert_eq!(x.read_slice(&pos.slice_for(&[])).unwrap().first(), Some(&Scalar::Float64(1.5)));
        let read = spec.read_slice(&pos.slice_for(&[2])).unwrap();
        assert_eq!(read.to_vec(), vec![Scalar::Float64(7.0), Scalar::Float64(8.0)]);
        assert_eq!(spec.shape(), vec![2, 2, 2]);
    }

    #[test]
    fn test_short_position_is_rejected() {
        let (w, x, _) = writer(vec![3]);
        let err = w.write(&Value::from(1.0), &ScanPosition::new(vec![0], 0)).unwrap_err();
        assert!(matches!(err, NexusError::PositionLength { expected: 2, actual: 1, .. }));
        assert_eq!(x.shape(), vec![0]);
    }

    #[test]
    fn test_bad_field_writes_nothing() {
        let (w, x, spec) = writer(vec![3]);
        let value = Value::List(vec![Value::from(1.0), Value::from(vec![1.0, 2.0, 3.0])]);
        let err = w.write(&value, &ScanPosition::new(vec![1], 1)).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::WriteFatal);
        assert_eq!(x.shape(), vec![0]);
        assert_eq!(spec.shape(), vec![0, 0]);
    }

    #[test]
    fn test_demand_uses_flat_index() {
        let b = DataNodeBuilder::new("stage", ScanRole::PerPoint, vec![2, 2], Arc::new(MemoryDatasetFactory));
        let demand = b.build_demand("value_set");
        let (w, _, _) = writer(vec![2, 2]);
        let w = w.with_demand(Some(demand.clone()));
        let pos = ScanPosition::from_step(3, &[2, 2]).unwrap();
        w.write_demand(&Value::from(4.25), &pos).unwrap();
        assert_eq!(demand.shape(), vec![4]);
        let read = demand.read_slice(&SliceND::new(vec![3], vec![4])).unwrap();
        assert_eq!(read.first(), Some(&Scalar::Float64(4.25)));
    }
}
