//! Trees for devices with movable fields.
//!
//! A device with a single input field becomes one node: the input field is
//! stored as `value`, extra fields sit beside it and, when the device is moved
//! by the scan, a `value_set` dataset records the demanded positions.
//!
//! Any other number of input fields gives one collection node linking to every
//! field's dataset, plus one `<device>.<field>` node per input field so each
//! axis stands on its own.

use crate::adapter::{AdapterOps, AdapterOptions};
use crate::builder::{annotate_field, DataNodeBuilder};
use crate::device::{Device, DeviceRole, ScanRole};
use crate::error::{NexusError, Result};
use crate::fields::{FieldKind, FieldModel};
use crate::primary::select_primary_field;
use crate::scan::{ScanInfo, ScanPosition};
use crate::tree::{DataNode, DeviceTree, GroupNode, NexusBaseClass, NodePath};
use crate::value::Value;
use crate::writer::{FieldSlot, PointWriter};
use std::sync::Arc;
use tracing::{debug, warn};

/// Dataset name of the input field of a single-field positioner.
pub const FIELD_VALUE: &str = "value";
/// Dataset name of the demanded positions.
pub const FIELD_VALUE_SET: &str = "value_set";
pub const FIELD_NAME: &str = "name";
pub const FIELD_SOFT_LIMIT_MIN: &str = "soft_limit_min";
pub const FIELD_SOFT_LIMIT_MAX: &str = "soft_limit_max";
pub const FIELD_CONTROLLER_RECORD: &str = "controller_record";
pub const ATTR_DEVICE_NAME: &str = "device_name";
pub const ATTR_SCAN_ROLE: &str = "scan_role";
/// Collection name used for devices that also have a location map entry.
pub const COLLECTION_SCANNABLES: &str = "scannables";

/// State that lives from `build_tree` until `scan_end`.
#[derive(Debug)]
struct PositionerScan {
    writer: PointWriter,
    field_nodes: Vec<(String, Option<DataNode>)>,
}

/// What the single and multi-field layouts share.
struct PositionerCore {
    device: Arc<dyn Device>,
    fields: FieldModel,
    options: AdapterOptions,
    scan: Option<PositionerScan>,
}

/// Datasets built for one scan, before they are laid out.
struct BuiltFields {
    role: DeviceRole,
    scan_role: ScanRole,
    builder: DataNodeBuilder,
    nodes: Vec<Option<DataNode>>,
    primary: Option<String>,
}

impl PositionerCore {
    fn new(device: Arc<dyn Device>, options: AdapterOptions) -> Self {
        let fields = FieldModel::from_device(device.as_ref());
        Self {
            device,
            fields,
            options,
            scan: None,
        }
    }

    fn name(&self) -> &str {
        self.device.name()
    }

    fn units(&self) -> Option<String> {
        self.options
            .device_config
            .as_ref()
            .and_then(|c| c.units.clone())
            .or_else(|| self.device.units())
    }

    fn nx_class(&self) -> NexusBaseClass {
        self.options
            .device_config
            .as_ref()
            .and_then(|c| c.nx_class)
            .or_else(|| self.device.nx_class())
            .unwrap_or(NexusBaseClass::NXpositioner)
    }

    fn category(&self) -> Option<String> {
        self.options
            .device_config
            .as_ref()
            .and_then(|c| c.category.clone())
            .or_else(|| self.device.category())
    }

    fn collection_name(&self) -> Option<String> {
        self.options
            .device_config
            .as_ref()
            .and_then(|c| c.collection_name.clone())
            .or_else(|| {
                self.options
                    .has_location_map_entry
                    .then(|| COLLECTION_SCANNABLES.to_string())
            })
    }

    /// Where a field goes inside the device's node.
    fn field_path(&self, field: &str, default: &str) -> Result<NodePath> {
        let configured = self
            .options
            .device_config
            .as_ref()
            .filter(|c| !c.field_paths.is_empty());
        match configured {
            Some(config) => config
                .field_paths
                .get(field)
                .ok_or_else(|| NexusError::MissingFieldPath {
                    device: self.name().to_string(),
                    field: field.to_string(),
                })?
                .parse(),
            None => default.parse(),
        }
    }

    fn build_fields(&self, info: &ScanInfo) -> Result<BuiltFields> {
        let name = self.name().to_string();
        let role = info.role(&name);
        let scan_role = role.scan_role();
        let values = self.fields.read_position(self.device.as_ref())?;
        let builder = DataNodeBuilder::new(
            name.as_str(),
            scan_role,
            info.shape().to_vec(),
            self.options.factory.clone(),
        )
        .with_float_fill_value(self.options.float_fill_value);
        let units = self.units();

        let mut nodes = Vec::with_capacity(self.fields.len());
        for (index, field) in self.fields.names().iter().enumerate() {
            let value = match values.get(index) {
                Some(v) if !v.is_null() => v,
                _ => {
                    warn!(device = %name, field = %field, "Field has no value, it will not be written");
                    nodes.push(None);
                    continue;
                }
            };
            let node = builder.build_field(field, field, value)?;
            let field_units = match self.fields.kind(index) {
                FieldKind::Input => units.as_deref(),
                FieldKind::Extra => None,
            };
            annotate_field(
                &node,
                &self.fields.local_name(field),
                field,
                field_units,
                self.fields.decimals(index),
            );
            nodes.push(Some(node));
        }

        let primary = select_primary_field(&self.fields, info.scan_object(&name))?;
        debug!(device = %name, ?primary, role = %role, "Built field datasets");
        Ok(BuiltFields {
            role,
            scan_role,
            builder,
            nodes,
            primary,
        })
    }

    fn add_metadata(&self, group: &mut GroupNode) {
        for (key, text) in self.device.metadata() {
            if group.contains(&key) {
                debug!(device = %self.name(), key = %key, "Metadata clashes with a field, skipped");
                continue;
            }
            group.set_field(key, text);
        }
        if let Some(record) = self.device.controller_record_name() {
            group.set_field(FIELD_CONTROLLER_RECORD, record);
        }
    }

    fn identify(&self, group: &mut GroupNode, role: DeviceRole) {
        group.set_attribute(ATTR_DEVICE_NAME, self.name());
        group.set_attribute(ATTR_SCAN_ROLE, role.as_str());
    }

    fn start_scan(&mut self, built: &BuiltFields, demand: Option<DataNode>) {
        let names = self.fields.names();
        let slots = built
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| {
                node.as_ref().map(|node| FieldSlot {
                    field: names[index].clone(),
                    index,
                    node: node.clone(),
                })
            })
            .collect();
        let writer = PointWriter::new(self.name(), self.fields.len(), built.builder.scan_rank(), slots)
            .with_demand(demand);
        self.scan = Some(PositionerScan {
            writer,
            field_nodes: names.into_iter().zip(built.nodes.iter().cloned()).collect(),
        });
    }

    fn active(&self) -> Result<&PositionerScan> {
        self.scan.as_ref().ok_or_else(|| NexusError::NoActiveScan {
            device: self.name().to_string(),
        })
    }

    fn write_point(&self, value: &Value, position: &ScanPosition) -> Result<()> {
        self.active()?.writer.write(value, position)
    }

    fn field_nodes(&self) -> Option<Vec<(String, Option<DataNode>)>> {
        self.scan.as_ref().map(|s| s.field_nodes.clone())
    }
}

// =============================================================================
// Single input field
// =============================================================================

/// Positioner with exactly one input field.
pub struct SinglePositioner {
    core: PositionerCore,
}

impl SinglePositioner {
    pub fn new(device: Arc<dyn Device>, options: AdapterOptions) -> Self {
        Self {
            core: PositionerCore::new(device, options),
        }
    }
}

impl AdapterOps for SinglePositioner {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn build_tree(&mut self, info: &ScanInfo) -> Result<Vec<DeviceTree>> {
        let core = &self.core;
        let built = core.build_fields(info)?;
        let name = core.name().to_string();

        let mut group = GroupNode::new(core.nx_class());
        group.set_field(FIELD_NAME, name.as_str());
        core.identify(&mut group, built.role);

        let mut dataset_names = Vec::with_capacity(core.fields.len());
        for (index, field) in core.fields.names().iter().enumerate() {
            let default = match core.fields.kind(index) {
                FieldKind::Input => FIELD_VALUE,
                FieldKind::Extra => field.as_str(),
            };
            let path = core.field_path(field, default)?;
            dataset_names.push(path.leaf().to_string());
            if let Some(node) = &built.nodes[index] {
                group
                    .ensure_groups(&path, &name)?
                    .add_data_node(path.leaf(), node.clone());
            }
        }

        let demand = (built.role.is_moved()
            && built.scan_role == ScanRole::PerPoint
            && core.options.write_demand_values)
            .then(|| built.builder.build_demand(FIELD_VALUE_SET));
        if let Some(demand) = &demand {
            group.add_data_node(FIELD_VALUE_SET, demand.clone());
        }

        if let Some(limits) = core.device.limits() {
            if let Some(lower) = limits.lower {
                group.set_field(FIELD_SOFT_LIMIT_MIN, lower);
            }
            if let Some(upper) = limits.upper {
                group.set_field(FIELD_SOFT_LIMIT_MAX, upper);
            }
        }
        core.add_metadata(&mut group);

        let primary = built
            .primary
            .as_ref()
            .and_then(|p| core.fields.index_of(p))
            .map(|i| dataset_names[i].clone());
        // Demanded positions are the better axis when they are recorded.
        let axis = if demand.is_some() {
            Some(FIELD_VALUE_SET.to_string())
        } else {
            primary.clone().or_else(|| dataset_names.first().cloned())
        };
        let tree = DeviceTree::new(name.as_str(), name.as_str(), built.scan_role, group)
            .with_primary_field(primary)
            .with_axis_fields(axis.into_iter().collect())
            .with_category(core.category())
            .with_collection_name(core.collection_name());

        self.core.start_scan(&built, demand);
        Ok(vec![tree])
    }

    fn write_point(&mut self, value: &Value, position: &ScanPosition) -> Result<()> {
        self.core.write_point(value, position)
    }

    fn write_demand(&mut self, demand: &Value, position: &ScanPosition) -> Result<()> {
        self.core.active()?.writer.write_demand(demand, position)
    }

    fn scan_end(&mut self) {
        self.core.scan = None;
    }

    fn is_active(&self) -> bool {
        self.core.scan.is_some()
    }

    fn field_nodes(&self) -> Option<Vec<(String, Option<DataNode>)>> {
        self.core.field_nodes()
    }
}

// =============================================================================
// Zero or several input fields
// =============================================================================

/// Positioner with zero or more than one input field.
pub struct MultiPositioner {
    core: PositionerCore,
}

impl MultiPositioner {
    pub fn new(device: Arc<dyn Device>, options: AdapterOptions) -> Self {
        Self {
            core: PositionerCore::new(device, options),
        }
    }
}

impl AdapterOps for MultiPositioner {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn build_tree(&mut self, info: &ScanInfo) -> Result<Vec<DeviceTree>> {
        let core = &self.core;
        let built = core.build_fields(info)?;
        let name = core.name().to_string();

        let mut collection = GroupNode::new(NexusBaseClass::NXcollection);
        core.identify(&mut collection, built.role);
        let mut dataset_names = Vec::with_capacity(core.fields.len());
        for (index, field) in core.fields.names().iter().enumerate() {
            let path = core.field_path(field, field)?;
            dataset_names.push(path.leaf().to_string());
            if let Some(node) = &built.nodes[index] {
                collection
                    .ensure_groups(&path, &name)?
                    .add_data_node(path.leaf(), node.clone());
            }
        }
        core.add_metadata(&mut collection);

        let primary = built
            .primary
            .as_ref()
            .and_then(|p| core.fields.index_of(p))
            .map(|i| dataset_names[i].clone());
        let inputs = core.fields.input_names().len();
        let axis_fields: Vec<String> = if inputs > 0 {
            dataset_names[..inputs].to_vec()
        } else if core.fields.len() == 1 {
            dataset_names.clone()
        } else {
            primary.iter().cloned().collect()
        };

        let mut trees = vec![DeviceTree::new(name.as_str(), name.as_str(), built.scan_role, collection)
            .with_primary_field(primary)
            .with_axis_fields(axis_fields)
            .with_category(core.category())
            .with_collection_name(core.collection_name())];

        for (index, field) in core.fields.input_names().iter().enumerate() {
            let Some(node) = &built.nodes[index] else {
                continue;
            };
            let axis_name = core.fields.local_name(field);
            let mut group = GroupNode::new(core.nx_class());
            group.set_field(FIELD_NAME, axis_name.as_str());
            core.identify(&mut group, built.role);
            group.add_data_node(FIELD_VALUE, node.clone());
            trees.push(
                DeviceTree::new(axis_name.as_str(), name.as_str(), built.scan_role, group)
                    .with_primary_field(Some(FIELD_VALUE.to_string()))
                    .with_axis_fields(vec![FIELD_VALUE.to_string()])
                    .with_category(core.category())
                    .with_collection_name(core.collection_name()),
            );
        }

        self.core.start_scan(&built, None);
        Ok(trees)
    }

    fn write_point(&mut self, value: &Value, position: &ScanPosition) -> Result<()> {
        self.core.write_point(value, position)
    }

    fn scan_end(&mut self) {
        self.core.scan = None;
    }

    fn is_active(&self) -> bool {
        self.core.scan.is_some()
    }

    fn field_nodes(&self) -> Option<Vec<(String, Option<DataNode>)>> {
        self.core.field_nodes()
    }
}
