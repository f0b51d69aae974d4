//! Creates the data node for each field of a device.
//!
//! Per-scan fields get a fixed dataset holding the value read at build time.
//! Per-point fields get a lazy dataset whose leading dimensions follow the scan
//! and whose trailing dimensions follow the field's own value.

use crate::dataset::{DatasetFactory, LazyDatasetSpec};
use crate::device::ScanRole;
use crate::error::{NexusError, Result};
use crate::tree::DataNode;
use crate::value::{DType, NdArray, Value};
use std::sync::Arc;

/// Attribute holding `<device>.<field>`.
pub const ATTR_LOCAL_NAME: &str = "local_name";
/// Attribute holding the device field a dataset was written from.
pub const ATTR_FIELD_NAME: &str = "field_name";
pub const ATTR_UNITS: &str = "units";
pub const ATTR_DECIMALS: &str = "decimals";

/// Builds data nodes for one device in one scan.
#[derive(Debug, Clone)]
pub struct DataNodeBuilder {
    device: String,
    scan_role: ScanRole,
    scan_shape: Vec<usize>,
    factory: Arc<dyn DatasetFactory>,
    float_fill_value: f64,
}

impl DataNodeBuilder {
    /// Builder for `device`'s nodes in a scan of shape `scan_shape`.
    pub fn new(
        device: impl Into<String>,
        scan_role: ScanRole,
        scan_shape: Vec<usize>,
        factory: Arc<dyn DatasetFactory>,
    ) -> Self {
        Self {
            device: device.into(),
            scan_role,
            scan_shape,
            factory,
            float_fill_value: f64::NAN,
        }
    }

    /// Fill value of floating point datasets.
    pub fn with_float_fill_value(mut self, fill: f64) -> Self {
        self.float_fill_value = fill;
        self
    }

    pub fn scan_role(&self) -> ScanRole {
        self.scan_role
    }

    /// Number of scan dimensions.
    pub fn scan_rank(&self) -> usize {
        self.scan_shape.len()
    }

    /// Builds the node for `field` from the value read at build time.
    pub fn build_field(&self, field: &str, dataset_name: &str, value: &Value) -> Result<DataNode> {
        let array = value.to_ndarray().map_err(|reason| NexusError::DatasetBuild {
            device: self.device.clone(),
            field: field.to_string(),
            value: value.to_string(),
            value_type: value.type_name().to_string(),
            reason,
        })?;
        Ok(match self.scan_role {
            ScanRole::PerScan => DataNode::fixed(array),
            ScanRole::PerPoint => self.build_lazy(dataset_name, array.dtype(), array.shape(), None),
        })
    }

    /// A per-point dataset: scan dimensions unlimited, inner dimensions fixed.
    ///
    /// `inner_chunks` overrides the chunk size of the inner dimensions.
    pub fn build_lazy(
        &self,
        name: &str,
        dtype: DType,
        inner_shape: &[usize],
        inner_chunks: Option<&[usize]>,
    ) -> DataNode {
        let mut max_shape: Vec<Option<usize>> = vec![None; self.scan_shape.len()];
        max_shape.extend(inner_shape.iter().map(|d| Some(*d)));
        let mut expected = self.scan_shape.clone();
        expected.extend_from_slice(inner_shape);

        let mut spec = LazyDatasetSpec::new(name, dtype, expected.len())
            .max_shape(max_shape.clone())
            .expected_shape(expected.clone())
            .fill_value(dtype.fill_value(self.float_fill_value));
        if let Some(inner) = inner_chunks {
            let mut fixed: Vec<Option<usize>> = vec![None; self.scan_shape.len()];
            fixed.extend(inner.iter().map(|c| Some(*c)));
            spec = spec.chunks(crate::dataset::estimate_chunking(
                &expected,
                dtype.item_bytes(),
                &fixed,
                &max_shape,
            ));
        }
        DataNode::lazy(self.factory.create(spec))
    }

    /// The one-dimensional `f64` dataset recording demanded positions.
    pub fn build_demand(&self, name: &str) -> DataNode {
        let spec = LazyDatasetSpec::new(name, DType::Float64, 1)
            .chunks(vec![1])
            .fill_value(DType::Float64.fill_value(self.float_fill_value));
        DataNode::lazy(self.factory.create(spec))
    }
}

/// Attaches the standard field attributes; blank units are skipped.
pub fn annotate_field(
    node: &DataNode,
    local_name: &str,
    field: &str,
    units: Option<&str>,
    decimals: Option<u32>,
) {
    node.set_attribute(ATTR_LOCAL_NAME, local_name);
    node.set_attribute(ATTR_FIELD_NAME, field);
    if let Some(units) = units.filter(|u| !u.trim().is_empty()) {
        node.set_attribute(ATTR_UNITS, units);
    }
    if let Some(decimals) = decimals {
        node.set_attribute(ATTR_DECIMALS, NdArray::scalar(decimals));
    }
}
