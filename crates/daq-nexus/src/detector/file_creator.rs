//! Detectors that write their own files: only the file names are recorded.

use super::detector_group;
use crate::adapter::{AdapterOps, AdapterOptions};
use crate::builder::DataNodeBuilder;
use crate::device::{Detector, ScanRole};
use crate::error::{NexusError, Result};
use crate::scan::{ScanInfo, ScanPosition};
use crate::tree::{DataNode, DeviceTree, GroupNode, NexusBaseClass};
use crate::value::{DType, NdArray, Value};
use std::path::Path;
use std::sync::Arc;

pub const GROUP_DATA_FILE: &str = "data_file";
pub const FIELD_FILE_NAME: &str = "file_name";
pub const ATTR_DATA_FILENAME: &str = "data_filename";
/// Longest file name the `file_name` dataset is expected to hold.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// File name as stored: relative to `data_dir` (prefixed `./`) when it lies
/// below it, otherwise unchanged.
pub fn stored_file_name(file_name: &str, data_dir: Option<&Path>) -> String {
    let Some(dir) = data_dir else {
        return file_name.to_string();
    };
    match Path::new(file_name).strip_prefix(dir) {
        Ok(rest) if !rest.as_os_str().is_empty() => format!("./{}", rest.display()),
        _ => file_name.to_string(),
    }
}

#[derive(Debug)]
struct FileCreatorScan {
    file_names: DataNode,
}

/// Detector recording one file name per point.
pub struct FileCreatorDetector {
    detector: Arc<dyn Detector>,
    options: AdapterOptions,
    scan: Option<FileCreatorScan>,
}

impl FileCreatorDetector {
    pub fn new(detector: Arc<dyn Detector>, options: AdapterOptions) -> Self {
        Self {
            detector,
            options,
            scan: None,
        }
    }
}

impl AdapterOps for FileCreatorDetector {
    fn name(&self) -> &str {
        self.detector.name()
    }

    fn build_tree(&mut self, info: &ScanInfo) -> Result<Vec<DeviceTree>> {
        let name = self.detector.name().to_string();
        let builder = DataNodeBuilder::new(
            name.as_str(),
            ScanRole::PerPoint,
            info.shape().to_vec(),
            self.options.factory.clone(),
        );
        let file_names = builder.build_lazy(FIELD_FILE_NAME, DType::String, &[], None);

        let mut note = GroupNode::new(NexusBaseClass::NXnote);
        note.set_attribute(ATTR_DATA_FILENAME, NdArray::scalar(1i32));
        note.add_data_node(FIELD_FILE_NAME, file_names.clone());

        let mut group = detector_group(self.detector.as_ref(), info.role(&name));
        group.add_group(GROUP_DATA_FILE, note);

        self.scan = Some(FileCreatorScan { file_names });
        // File names are not plottable, so there is no primary field.
        Ok(vec![DeviceTree::new(name.as_str(), name.as_str(), ScanRole::PerPoint, group)])
    }

    fn write_point(&mut self, value: &Value, position: &ScanPosition) -> Result<()> {
        let device = self.detector.name();
        let scan = self.scan.as_ref().ok_or_else(|| NexusError::NoActiveScan {
            device: device.to_string(),
        })?;
        let file_name = value
            .to_field_values()
            .and_then(|fields| fields.into_iter().next())
            .and_then(|first| match first {
                Value::Scalar(s) => s.as_str().map(str::to_string),
                _ => None,
            })
            .ok_or_else(|| NexusError::WriteValue {
                device: device.to_string(),
                value: value.to_string(),
                reason: "expected a file name".to_string(),
            })?;

        let stored = stored_file_name(&file_name, self.options.data_dir.as_deref());
        if stored.len() > MAX_FILE_NAME_LEN {
            tracing::warn!(
                device,
                file_name = %stored,
                max = MAX_FILE_NAME_LEN,
                "File name is longer than the file name dataset expects"
            );
        }

        let slice = position.slice_for(&[]);
        scan.file_names
            .write_slice(&slice, &NdArray::scalar(stored))
            .map_err(|source| NexusError::SliceWrite {
                device: device.to_string(),
                dataset: FIELD_FILE_NAME.to_string(),
                slice: slice.to_string(),
                source,
            })
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
            .map(|s| vec![(FIELD_FILE_NAME.to_string(), Some(s.file_names.clone()))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_file_name() {
        let dir = Path::new("/data/visit");
        assert_eq!(
            stored_file_name("/data/visit/pilatus/00001.tif", Some(dir)),
            "./pilatus/00001.tif"
        );
        assert_eq!(stored_file_name("/elsewhere/1.tif", Some(dir)), "/elsewhere/1.tif");
        assert_eq!(stored_file_name("/data/visit", Some(dir)), "/data/visit");
        assert_eq!(stored_file_name("/data/visit/1.tif", None), "/data/visit/1.tif");
    }
}
