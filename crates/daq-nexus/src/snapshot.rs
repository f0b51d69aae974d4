//! Values recorded once, before the first scan point.
//!
//! Every named device is read and stored as an `NXcollection` of fixed
//! datasets under `before_scan`. A device that cannot be resolved or read is
//! logged and left out; the snapshot never fails the scan.

use crate::builder::{annotate_field, ATTR_LOCAL_NAME};
use crate::device::{Device, DeviceRegistry};
use crate::error::NexusError;
use crate::fields::{FieldKind, FieldModel};
use crate::tree::{DataNode, GroupNode, NexusBaseClass};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const GROUP_BEFORE_SCAN: &str = "before_scan";

/// The snapshot group and the devices left out of it.
#[derive(Debug)]
pub struct Snapshot {
    pub group: GroupNode,
    /// Why each missing device was skipped.
    pub skipped: Vec<NexusError>,
}

impl Snapshot {
    pub fn recorded(&self) -> Vec<String> {
        self.group
            .children()
            .filter(|(_, node)| matches!(node, crate::tree::Node::Group(_)))
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

/// Reads `names` from `registry` and records their current values.
pub fn collect_snapshot(
    registry: &dyn DeviceRegistry,
    names: &[String],
    metadata: &BTreeMap<String, String>,
) -> Snapshot {
    let mut group = GroupNode::new(NexusBaseClass::NXcollection);
    let mut skipped = Vec::new();

    for name in names {
        let Some(device) = registry.resolve(name) else {
            warn!(device = %name, "Device could not be resolved, left out of the snapshot");
            skipped.push(NexusError::UnresolvedDevice {
                device: name.clone(),
            });
            continue;
        };
        match device_snapshot(device.as_ref()) {
            Ok(device_group) => group.add_group(name.as_str(), device_group),
            Err(e) => {
                warn!(device = %name, error = %e, "Could not read device, left out of the snapshot");
                skipped.push(e);
            }
        }
    }

    for (key, text) in metadata {
        if group.contains(key) {
            warn!(key = %key, "Metadata key clashes with a device name, skipped");
            continue;
        }
        group.set_field(key.as_str(), text.as_str());
    }

    debug!(
        recorded = names.len() - skipped.len(),
        skipped = skipped.len(),
        "Collected pre-scan snapshot"
    );
    Snapshot { group, skipped }
}

fn device_snapshot(device: &dyn Device) -> Result<GroupNode, NexusError> {
    let fields = FieldModel::from_device(device);
    let values = fields.read_position(device)?;
    let units = device.units();

    let mut group = GroupNode::new(NexusBaseClass::NXcollection);
    group.set_attribute(ATTR_LOCAL_NAME, device.name());
    for (index, field) in fields.names().iter().enumerate() {
        let Some(value) = values.get(index).filter(|v| !v.is_null()) else {
            warn!(device = device.name(), field = %field, "Field has no value, left out of the snapshot");
            continue;
        };
        let array = match value.to_ndarray() {
            Ok(array) => array,
            Err(reason) => {
                warn!(device = device.name(), field = %field, %reason, "Field value cannot be stored");
                continue;
            }
        };
        let node = DataNode::fixed(array);
        let field_units = match fields.kind(index) {
            FieldKind::Input => units.as_deref(),
            FieldKind::Extra => None,
        };
        annotate_field(
            &node,
            &fields.local_name(field),
            field,
            field_units,
            fields.decimals(index),
        );
        group.add_data_node(field.as_str(), node);
    }
    Ok(group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::value::Value;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tracing_test::traced_test;

    struct Fixed {
        name: String,
        value: Option<Value>,
    }

    impl Device for Fixed {
        fn name(&self) -> &str {
            &self.name
        }

        fn input_names(&self) -> Vec<String> {
            vec![self.name.clone()]
        }

        fn position(&self) -> Result<Value, DeviceError> {
            self.value
                .clone()
                .ok_or_else(|| DeviceError::new("controller offline"))
        }

        fn units(&self) -> Option<String> {
            Some("mA".to_string())
        }
    }

    fn registry() -> HashMap<String, Arc<dyn Device>> {
        let mut devices: HashMap<String, Arc<dyn Device>> = HashMap::new();
        devices.insert(
            "ring_current".to_string(),
            Arc::new(Fixed {
                name: "ring_current".to_string(),
                value: Some(Value::from(300.2)),
            }),
        );
        devices.insert(
            "shutter".to_string(),
            Arc::new(Fixed {
                name: "shutter".to_string(),
                value: None,
            }),
        );
        devices
    }

    #[test]
    #[traced_test]
    fn test_snapshot_skips_bad_devices() {
        let names = vec![
            "ring_current".to_string(),
            "shutter".to_string(),
            "missing".to_string(),
        ];
        let metadata = BTreeMap::from([("visit".to_string(), "cm12345-1".to_string())]);
        let snapshot = collect_snapshot(&registry(), &names, &metadata);

        assert_eq!(snapshot.recorded(), vec!["ring_current"]);
        assert_eq!(snapshot.skipped.len(), 2);
        assert!(snapshot.skipped.iter().all(NexusError::can_recover));
        assert!(logs_contain("could not be resolved"));
        assert!(logs_contain("Could not read device"));

        let current = snapshot
            .group
            .find_data_node("ring_current/ring_current")
            .unwrap();
        assert!(!current.is_lazy());
        assert_eq!(current.attribute_str("units").as_deref(), Some("mA"));
        assert!(snapshot.group.data_node("visit").is_some());
    }
}
