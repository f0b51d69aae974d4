//! What the scan engine tells the adapters about the scan.

use crate::dataset::SliceND;
use crate::device::DeviceRole;
use crate::error::{NexusError, Result};
use crate::value::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Planned positions of one device across the scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanObject {
    /// Every position the device will be asked to move to.
    Explicit(Vec<Value>),
    /// Start/stop/step description. Each is one entry per input field.
    Implicit {
        start: Option<Value>,
        stop: Option<Value>,
        step: Option<Value>,
    },
}

impl ScanObject {
    /// Number of planned points, when the object knows it.
    pub fn num_points(&self) -> Option<usize> {
        match self {
            ScanObject::Explicit(points) => Some(points.len()),
            ScanObject::Implicit { .. } => None,
        }
    }
}

/// Description of a scan, supplied once before trees are built.
#[derive(Debug, Clone, Default)]
pub struct ScanInfo {
    shape: Vec<usize>,
    file_path: Option<PathBuf>,
    roles: HashMap<String, DeviceRole>,
    scan_objects: HashMap<String, ScanObject>,
}

impl ScanInfo {
    pub fn new(shape: Vec<usize>) -> Self {
        Self {
            shape,
            ..Default::default()
        }
    }

    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_role(mut self, device: impl Into<String>, role: DeviceRole) -> Self {
        self.roles.insert(device.into(), role);
        self
    }

    pub fn with_scan_object(mut self, device: impl Into<String>, object: ScanObject) -> Self {
        self.scan_objects.insert(device.into(), object);
        self
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of points.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Path of the scan file, if the engine has chosen one.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Role of a device; devices the engine did not mention are monitors.
    pub fn role(&self, device: &str) -> DeviceRole {
        match self.roles.get(device) {
            Some(role) => *role,
            None => {
                tracing::debug!(device, "No scan role given, treating device as a monitor");
                DeviceRole::Monitor
            }
        }
    }

    pub fn scan_object(&self, device: &str) -> Option<&ScanObject> {
        self.scan_objects.get(device)
    }

    /// Names of devices with the given role, sorted.
    pub fn devices_with_role(&self, role: DeviceRole) -> Vec<String> {
        let mut names: Vec<String> = self
            .roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }
}

/// Where a point sits in the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPosition {
    indices: Vec<usize>,
    step: usize,
    axis_indices: HashMap<String, usize>,
}

impl ScanPosition {
    /// A position from its n-dimensional index and flat step number.
    pub fn new(indices: Vec<usize>, step: usize) -> Self {
        Self {
            indices,
            step,
            axis_indices: HashMap::new(),
        }
    }

    /// Derives the n-dimensional index of the `step`th point of a scan of the
    /// given shape (row-major, last dimension fastest).
    pub fn from_step(step: usize, shape: &[usize]) -> Result<Self> {
        let total: usize = shape.iter().product();
        if step >= total {
            return Err(NexusError::Validation(format!(
                "step {} is outside a scan of shape {:?}",
                step, shape
            )));
        }
        let mut indices = vec![0; shape.len()];
        let mut rest = step;
        for (ix, dim) in indices.iter_mut().zip(shape).rev() {
            *ix = rest % dim;
            rest /= dim;
        }
        Ok(Self::new(indices, step))
    }

    /// Records the index of the point along the axis a device moves.
    pub fn with_axis_index(mut self, device: impl Into<String>, index: usize) -> Self {
        self.axis_indices.insert(device.into(), index);
        self
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// One-dimensional index used for demand values: the device's own axis
    /// index if known, otherwise the flat step number.
    pub fn index_for(&self, device: &str) -> usize {
        self.axis_indices.get(device).copied().unwrap_or(self.step)
    }

    /// Slice selecting this point across the scan dimensions and the whole
    /// of a per-point value of shape `inner_shape`.
    pub fn slice_for(&self, inner_shape: &[usize]) -> SliceND {
        let mut start = self.indices.clone();
        let mut stop: Vec<usize> = self.indices.iter().map(|i| i + 1).collect();
        start.extend(std::iter::repeat(0).take(inner_shape.len()));
        stop.extend_from_slice(inner_shape);
        SliceND::new(start, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_step_row_major() {
        let pos = ScanPosition::from_step(7, &[3, 4]).unwrap();
        assert_eq!(pos.indices(), &[1, 3]);
        assert_eq!(pos.step(), 7);

        let pos = ScanPosition::from_step(4, &[10]).unwrap();
        assert_eq!(pos.indices(), &[4]);

        assert!(ScanPosition::from_step(12, &[3, 4]).is_err());
    }

    #[test]
    fn test_slice_for_inner_shape() {
        let pos = ScanPosition::new(vec![2, 1], 9);
        let slice = pos.slice_for(&[5, 6]);
        assert_eq!(slice.start(), &[2, 1, 0, 0]);
        assert_eq!(slice.stop(), &[3, 2, 5, 6]);
        assert_eq!(pos.slice_for(&[]).shape(), vec![1, 1]);
    }

    #[test]
    fn test_index_for_prefers_axis_index() {
        let pos = ScanPosition::new(vec![1, 2], 6).with_axis_index("x", 1);
        assert_eq!(pos.index_for("x"), 1);
        assert_eq!(pos.index_for("y"), 6);
    }

    #[test]
    fn test_missing_role_defaults_to_monitor() {
        let info = ScanInfo::new(vec![5]).with_role("x", DeviceRole::Scannable);
        assert_eq!(info.role("x"), DeviceRole::Scannable);
        assert_eq!(info.role("other"), DeviceRole::Monitor);
        assert_eq!(info.devices_with_role(DeviceRole::Scannable), vec!["x"]);
        assert_eq!(info.size(), 5);
    }
}
