//! The legacy location map.
//!
//! Each entry lists, in field order, the paths below the scan entry where a
//! device's datasets should also appear, with optional units per field. The
//! datasets are attached by reference, so the same data is reachable from the
//! device's own tree and from every mapped path.
//!
//! ```toml
//! [location_map.sample_x]
//! paths = ["instrument:NXinstrument/sample_stage:NXpositioner/x"]
//! units = ["mm"]
//! prerequisites = ["sample_y"]
//! ```

use crate::adapter::DeviceAdapter;
use crate::builder::ATTR_UNITS;
use crate::error::{NexusError, Result};
use crate::tree::{DataNode, GroupNode, NexusBaseClass, Node, NodePath};
use crate::value::NdArray;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, warn};

/// `translation` or `rotation`
pub const ATTR_TRANSFORMATION_TYPE: &str = "transformation_type";
/// Next transformation in the chain
pub const ATTR_DEPENDS_ON: &str = "depends_on";
/// Offset applied before the transformation
pub const ATTR_OFFSET: &str = "offset";
/// Units of the offset
pub const ATTR_OFFSET_UNITS: &str = "offset_units";
/// Direction of a translation or axis of a rotation
pub const ATTR_VECTOR: &str = "vector";

/// One device's entry in the location map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationMapEntry {
    /// Output path per field, in field order
    #[serde(default)]
    pub paths: Vec<String>,
    /// Units per field; blank entries leave the units alone
    #[serde(default)]
    pub units: Vec<String>,
    /// Other devices whose values are recorded before the scan
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Transformation attributes of the linked fields
    #[serde(default)]
    pub transformation: Option<TransformationConfig>,
}

/// Transformation attributes per field, in field order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformationConfig {
    /// `translation` or `rotation`
    #[serde(default)]
    pub transformation: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub offset: Vec<Vec<f64>>,
    #[serde(default)]
    pub offset_units: Vec<String>,
    #[serde(default)]
    pub vector: Vec<Vec<f64>>,
}

impl TransformationConfig {
    fn apply(&self, index: usize, node: &DataNode) {
        if let Some(kind) = self.transformation.get(index) {
            node.set_attribute(ATTR_TRANSFORMATION_TYPE, kind.as_str());
        }
        if let Some(depends_on) = self.depends_on.get(index) {
            node.set_attribute(ATTR_DEPENDS_ON, depends_on.as_str());
        }
        if let Some(offset) = self.offset.get(index).and_then(|o| NdArray::vector(o.iter().copied()).ok()) {
            node.set_attribute(ATTR_OFFSET, offset);
        }
        if let Some(units) = self.offset_units.get(index).filter(|u| !u.trim().is_empty()) {
            node.set_attribute(ATTR_OFFSET_UNITS, units.as_str());
        }
        if let Some(vector) = self.vector.get(index).and_then(|v| NdArray::vector(v.iter().copied()).ok()) {
            node.set_attribute(ATTR_VECTOR, vector);
        }
    }
}

impl LocationMapEntry {
    /// Checks that every path parses and that the per-field lists line up.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for path in &self.paths {
            path.parse::<NodePath>().map_err(|e| e.to_string())?;
        }
        if self.units.len() > self.paths.len() {
            return Err(format!(
                "{} units given for {} paths",
                self.units.len(),
                self.paths.len()
            ));
        }
        if let Some(t) = &self.transformation {
            if let Some(bad) = t.offset.iter().chain(&t.vector).find(|v| v.len() != 3) {
                return Err(format!("transformation vectors need 3 components, got {:?}", bad));
            }
        }
        Ok(())
    }

    /// Links a device's datasets into `root` at the mapped paths.
    ///
    /// `field_nodes` are the device's datasets in field order, as returned by
    /// [`DeviceAdapter::field_nodes`]. Every path is checked against the
    /// existing groups and against the groups the entry itself will create
    /// before anything is attached, so a class conflict leaves
    /// `root` as it was. Returns the number of datasets linked.
    pub fn apply(
        &self,
        root: &mut GroupNode,
        device: &str,
        field_nodes: &[(String, Option<DataNode>)],
    ) -> Result<usize> {
        let paths = self
            .paths
            .iter()
            .map(|p| p.parse::<NodePath>())
            .collect::<Result<Vec<_>>>()?;
        let attached: Vec<&NodePath> = paths
            .iter()
            .zip(field_nodes)
            .filter(|(_, (_, node))| node.is_some())
            .map(|(path, _)| path)
            .collect();
        check_planned_groups(root, &attached, device)?;
        if paths.len() > field_nodes.len() {
            warn!(
                device,
                paths = paths.len(),
                fields = field_nodes.len(),
                "Location map has more paths than the device has fields"
            );
        }

        let mut linked = 0;
        for (index, (path, (field, node))) in paths.iter().zip(field_nodes).enumerate() {
            let Some(node) = node else {
                warn!(device, field = %field, path = %path, "Field was not written, nothing to link");
                continue;
            };
            let parent = root.ensure_groups(path, device)?;
            parent.add_data_node(path.leaf(), node.clone());

            if let Some(units) = self.units.get(index).filter(|u| !u.trim().is_empty()) {
                node.set_attribute(ATTR_UNITS, units.as_str());
            }
            if let Some(transformation) = &self.transformation {
                transformation.apply(index, node);
            }
            debug!(device, field = %field, path = %path, "Linked dataset");
            linked += 1;
        }
        Ok(linked)
    }
}

/// Walks every path that will be attached, against both the groups already
/// in `root` and the groups and leaves the earlier paths will add, and fails
/// on the first class conflict or non-group segment.
fn check_planned_groups(root: &GroupNode, paths: &[&NodePath], device: &str) -> Result<()> {
    let mut planned_groups: BTreeMap<String, NexusBaseClass> = BTreeMap::new();
    let mut planned_leaves: BTreeSet<String> = BTreeSet::new();
    let not_a_group = |path: &NodePath, node: &str| NexusError::NotAGroup {
        device: device.to_string(),
        path: path.to_string(),
        node: node.to_string(),
    };

    for &path in paths {
        let mut current = Some(root);
        let mut prefix = String::new();
        for segment in path.groups() {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(&segment.name);
            if planned_leaves.contains(&prefix) {
                return Err(not_a_group(path, &segment.name));
            }
            let actual = match current.and_then(|group| group.child(&segment.name)) {
                Some(Node::Group(group)) => {
                    current = Some(group);
                    group.nx_class()
                }
                Some(_) => return Err(not_a_group(path, &segment.name)),
                None => {
                    current = None;
                    *planned_groups
                        .entry(prefix.clone())
                        .or_insert(segment.nx_class.unwrap_or(NexusBaseClass::NXcollection))
                }
            };
            if let Some(expected) = segment.nx_class {
                if expected != actual {
                    return Err(NexusError::ClassMismatch {
                        device: device.to_string(),
                        path: path.to_string(),
                        group: segment.name.clone(),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
        }
        let leaf = if prefix.is_empty() {
            path.leaf().to_string()
        } else {
            format!("{}/{}", prefix, path.leaf())
        };
        if planned_groups.contains_key(&leaf) {
            return Err(not_a_group(path, path.leaf()));
        }
        planned_leaves.insert(leaf);
    }
    Ok(())
}

/// Applies the location map for every adapter with a built tree.
///
/// Devices without an entry, or without a tree in this scan, are skipped. A
/// failing device does not stop the others; its error is logged and
/// returned.
pub fn apply_location_map(
    root: &mut GroupNode,
    location_map: &BTreeMap<String, LocationMapEntry>,
    adapters: &[DeviceAdapter],
) -> Vec<NexusError> {
    let mut failures = Vec::new();
    for adapter in adapters {
        let Some(entry) = location_map.get(adapter.name()) else {
            continue;
        };
        let Some(field_nodes) = adapter.field_nodes() else {
            debug!(device = adapter.name(), "No tree built in this scan, location map skipped");
            continue;
        };
        if let Err(e) = entry.apply(root, adapter.name(), &field_nodes) {
            error!(device = adapter.name(), error = %e, "Location map could not be applied");
            failures.push(e);
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> Vec<(String, Option<DataNode>)> {
        vec![
            ("x".to_string(), Some(DataNode::fixed(1.5))),
            ("temperature".to_string(), Some(DataNode::fixed(290.0))),
        ]
    }

    #[test]
    fn test_apply_links_by_reference() {
        let entry = LocationMapEntry {
            paths: vec![
                "instrument:NXinstrument/stage:NXpositioner/x".to_string(),
                "sample:NXsample/temperature".to_string(),
            ],
            units: vec!["mm".to_string(), " ".to_string()],
            ..Default::default()
        };
        let field_nodes = nodes();
        let mut root = GroupNode::new(NexusBaseClass::NXentry);

        assert_eq!(entry.apply(&mut root, "stage", &field_nodes).unwrap(), 2);

        let x = root.find_data_node("instrument/stage/x").unwrap();
        assert!(x.ptr_eq(field_nodes[0].1.as_ref().unwrap()));
        assert_eq!(x.attribute_str(ATTR_UNITS).as_deref(), Some("mm"));
        let temperature = root.find_data_node("sample/temperature").unwrap();
        assert!(temperature.attribute(ATTR_UNITS).is_none());
    }

    #[test]
    fn test_apply_reuses_matching_group() {
        let mut root = GroupNode::new(NexusBaseClass::NXentry);
        let mut instrument = GroupNode::new(NexusBaseClass::NXinstrument);
        instrument.set_field("name", "i22");
        root.add_group("instrument", instrument);

        let entry = LocationMapEntry {
            paths: vec!["instrument:NXinstrument/x".to_string()],
            ..Default::default()
        };
        entry.apply(&mut root, "stage", &nodes()).unwrap();

        let instrument = root.group("instrument").unwrap();
        assert!(instrument.contains("name"));
        assert!(instrument.contains("x"));
    }

    #[test]
    fn test_apply_class_mismatch_leaves_root_untouched() {
        let mut root = GroupNode::new(NexusBaseClass::NXentry);
        root.add_group("instrument", GroupNode::new(NexusBaseClass::NXcollection));

        let entry = LocationMapEntry {
            paths: vec![
                "sample:NXsample/x".to_string(),
                "instrument:NXinstrument/temperature".to_string(),
            ],
            ..Default::default()
        };
        let err = entry.apply(&mut root, "stage", &nodes()).unwrap_err();
        assert!(matches!(err, NexusError::ClassMismatch { .. }));
        assert!(!root.contains("sample"));
    }

    #[test]
    fn test_conflict_between_paths_of_one_entry() {
        let mut root = GroupNode::new(NexusBaseClass::NXentry);
        let entry = LocationMapEntry {
            paths: vec![
                "sample:NXsample/x".to_string(),
                "sample:NXinstrument/temperature".to_string(),
            ],
            ..Default::default()
        };
        let err = entry.apply(&mut root, "stage", &nodes()).unwrap_err();
        assert!(matches!(err, NexusError::ClassMismatch { .. }));
        assert!(!root.contains("sample"));
    }

    #[test]
    fn test_leaf_then_group_of_same_name() {
        let mut root = GroupNode::new(NexusBaseClass::NXentry);
        let entry = LocationMapEntry {
            paths: vec!["sample:NXsample/x".to_string(), "sample/x/temperature".to_string()],
            ..Default::default()
        };
        let err = entry.apply(&mut root, "stage", &nodes()).unwrap_err();
        assert!(matches!(err, NexusError::NotAGroup { .. }));
        assert!(!root.contains("sample"));
    }

    #[test]
    fn test_transformation_attributes() {
        let entry = LocationMapEntry {
            paths: vec!["sample:NXsample/transforms:NXtransformations/x".to_string()],
            transformation: Some(TransformationConfig {
                transformation: vec!["translation".to_string()],
                depends_on: vec![".".to_string()],
                offset: vec![vec![0.0, 0.0, 1.0]],
                offset_units: vec!["mm".to_string()],
                vector: vec![vec![1.0, 0.0, 0.0]],
            }),
            ..Default::default()
        };
        let field_nodes = nodes();
        let mut root = GroupNode::new(NexusBaseClass::NXentry);
        entry.apply(&mut root, "stage", &field_nodes).unwrap();

        let x = field_nodes[0].1.as_ref().unwrap();
        assert_eq!(x.attribute_str(ATTR_TRANSFORMATION_TYPE).as_deref(), Some("translation"));
        assert_eq!(x.attribute_str(ATTR_DEPENDS_ON).as_deref(), Some("."));
        assert_eq!(x.attribute(ATTR_VECTOR).unwrap().shape(), &[3]);
        assert_eq!(x.attribute_str(ATTR_OFFSET_UNITS).as_deref(), Some("mm"));
    }

    #[test]
    fn test_entry_from_toml() {
        let entry: LocationMapEntry = toml::from_str(
            r#"
            paths = ["instrument:NXinstrument/sample_stage:NXpositioner/x"]
            units = ["mm"]
            prerequisites = ["sample_y"]

            [transformation]
            transformation = ["rotation"]
            vector = [[0.0, 1.0, 0.0]]
            "#,
        )
        .unwrap();
        assert!(entry.validate().is_ok());
        assert_eq!(entry.prerequisites, vec!["sample_y"]);
        let transformation = entry.transformation.unwrap();
        assert_eq!(transformation.transformation, vec!["rotation"]);
        assert!(transformation.depends_on.is_empty());
    }

    #[test]
    fn test_validate() {
        let mut entry = LocationMapEntry {
            paths: vec!["a:NXentry/x".to_string()],
            units: vec!["mm".to_string(), "deg".to_string()],
            ..Default::default()
        };
        assert!(entry.validate().is_err());
        entry.units.pop();
        assert!(entry.validate().is_ok());
        entry.transformation = Some(TransformationConfig {
            vector: vec![vec![1.0, 0.0]],
            ..Default::default()
        });
        assert!(entry.validate().is_err());
    }
}
