//! Trees for detectors.
//!
//! All detector layouts are written per point and live in an `NXdetector`
//! group named after the detector:
//!
//! - [`generic`]: one `data` dataset shaped like the detector's data
//! - [`counter_timer`]: one scalar dataset per extra name
//! - [`external`]: laid out from the detector's own readout description,
//!   with links into the files it writes
//! - [`file_creator`]: only the names of the files the detector wrote

pub mod counter_timer;
pub mod external;
pub mod file_creator;
pub mod generic;

use crate::device::{Detector, DeviceRole};
use crate::positioner::{ATTR_DEVICE_NAME, ATTR_SCAN_ROLE};
use crate::tree::{GroupNode, NexusBaseClass};

pub const FIELD_DATA: &str = "data";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_ID: &str = "id";

/// `NXdetector` group carrying the detector's descriptive fields.
pub(crate) fn detector_group(detector: &dyn Detector, role: DeviceRole) -> GroupNode {
    let mut group = GroupNode::new(NexusBaseClass::NXdetector);
    group.set_attribute(ATTR_DEVICE_NAME, detector.name());
    group.set_attribute(ATTR_SCAN_ROLE, role.as_str());
    if let Some(description) = detector.description() {
        group.set_field(FIELD_DESCRIPTION, description);
    }
    if let Some(kind) = detector.detector_type() {
        group.set_field(FIELD_TYPE, kind);
    }
    if let Some(id) = detector.detector_id() {
        group.set_field(FIELD_ID, id);
    }
    group
}

/// Per-point shape of detector data; `[1]` counts as a scalar.
pub(crate) fn point_shape(dimensions: &[usize]) -> Vec<usize> {
    if dimensions == [1] {
        Vec::new()
    } else {
        dimensions.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_shape() {
        assert!(point_shape(&[1]).is_empty());
        assert!(point_shape(&[]).is_empty());
        assert_eq!(point_shape(&[512, 256]), vec![512, 256]);
        assert_eq!(point_shape(&[1, 4]), vec![1, 4]);
    }
}
