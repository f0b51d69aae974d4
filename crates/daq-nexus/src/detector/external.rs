//! Detectors that describe their own output.
//!
//! The detector hands over a [`ReadoutNode`] tree rooted at an `NXdetector`
//! group. Groups, attributes and data become nodes of the same shape; external
//! links become [`SymbolicNode`]s pointing into the files the detector wrote,
//! with the file path made relative to the directory of the scan file.
//!
//! Point-dependent data is written on every point by walking the readout the
//! detector returns at that point.

use super::detector_group;
use crate::adapter::{AdapterOps, AdapterOptions};
use crate::builder::DataNodeBuilder;
use crate::device::{Detector, ScanRole};
use crate::error::{NexusError, Result};
use crate::readout::{ReadoutKind, ReadoutNode};
use crate::scan::{ScanInfo, ScanPosition};
use crate::tree::{DataNode, DeviceTree, GroupNode, NexusBaseClass, SymbolicNode};
use crate::value::{shape_size, NdArray, Scalar, Value};
use crate::writer::inner_shape;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

const URI_SCHEME: &str = "nxfile://";
const ATTR_AXIS: &str = "axis";
const ATTR_LABEL: &str = "label";

/// Splits `nxfile://<path>#<address>` into file path and node address.
pub fn parse_nxfile_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix(URI_SCHEME)?;
    let (file, address) = rest.split_once('#')?;
    if file.is_empty() {
        return None;
    }
    let address = if address.starts_with('/') {
        address.to_string()
    } else {
        format!("/{}", address)
    };
    Some((file.to_string(), address))
}

/// `path` resolved against the working directory.
fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot resolve relative path");
            path.to_path_buf()
        }
    }
}

/// `target` relative to `base_dir`.
///
/// Relative inputs are resolved against the working directory first. Without
/// a base directory the resolved target is returned.
pub fn relative_path(target: &Path, base_dir: Option<&Path>) -> PathBuf {
    let target = absolute_path(target);
    let Some(base) = base_dir.map(absolute_path) else {
        return target;
    };
    if !target.is_absolute() || !base.is_absolute() {
        return target;
    }
    let target_parts: Vec<Component<'_>> = target.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_parts.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part.as_os_str());
    }
    relative
}

/// Adds the scan rank to the dimension numbers of an `axis` or `label`
/// attribute, which count from the first per-point dimension.
fn shift_dimension_attribute(name: &str, value: &NdArray, scan_rank: usize) -> NdArray {
    if name != ATTR_AXIS && name != ATTR_LABEL {
        return value.clone();
    }
    if let Some(text) = value.first().and_then(Scalar::as_str) {
        let shifted: Option<Vec<String>> = text
            .split(',')
            .map(|part| part.trim().parse::<usize>().ok().map(|d| (d + scan_rank).to_string()))
            .collect();
        return match shifted {
            Some(parts) => NdArray::scalar(parts.join(",")),
            None => {
                tracing::warn!(attribute = name, value = text, "Dimension attribute is not numeric, left as is");
                value.clone()
            }
        };
    }
    match value.first().filter(|s| s.dtype().is_integer()).and_then(Scalar::as_f64) {
        Some(d) if value.is_scalar() => NdArray::scalar(d as i64 + scan_rank as i64),
        _ => value.clone(),
    }
}

#[derive(Debug)]
struct ExternalScan {
    scan_rank: usize,
    /// Per-point datasets keyed by their path below the detector group.
    datasets: HashMap<String, DataNode>,
    field_nodes: Vec<(String, Option<DataNode>)>,
}

/// Detector whose tree comes from its own readout description.
pub struct ExternalFileDetector {
    detector: Arc<dyn Detector>,
    options: AdapterOptions,
    scan: Option<ExternalScan>,
}

struct BuildContext<'a> {
    device: &'a str,
    builder: DataNodeBuilder,
    scan_rank: usize,
    scan_dir: Option<PathBuf>,
    datasets: HashMap<String, DataNode>,
    /// Detector entry fields in readout order; the first is the primary field.
    primary_fields: Vec<String>,
    external_files: BTreeSet<String>,
    external_ranks: BTreeMap<String, usize>,
}

impl BuildContext<'_> {
    fn add(&mut self, parent: &mut GroupNode, node: &ReadoutNode, prefix: &str, top_level: bool) -> Result<()> {
        let path = if prefix.is_empty() {
            node.name.clone()
        } else {
            format!("{}/{}", prefix, node.name)
        };
        match &node.kind {
            ReadoutKind::Group { nx_class } => {
                let mut group = GroupNode::new(*nx_class);
                for child in &node.children {
                    self.add(&mut group, child, &path, false)?;
                }
                parent.add_group(node.name.as_str(), group);
            }
            ReadoutKind::Attribute { value } => {
                parent.set_attribute(
                    node.name.as_str(),
                    shift_dimension_attribute(&node.name, value, self.scan_rank),
                );
            }
            ReadoutKind::Data {
                value,
                is_detector_entry,
                chunk_dimensions,
            } => {
                let data = if node.point_dependent {
                    let shape = super::point_shape(value.shape());
                    let data = self.builder.build_lazy(
                        &node.name,
                        value.dtype(),
                        &shape,
                        chunk_dimensions.as_deref(),
                    );
                    self.datasets.insert(path.clone(), data.clone());
                    data
                } else {
                    DataNode::fixed(value.clone())
                };
                for child in &node.children {
                    match &child.kind {
                        ReadoutKind::Attribute { value } => data.set_attribute(
                            child.name.as_str(),
                            shift_dimension_attribute(&child.name, value, self.scan_rank),
                        ),
                        _ => tracing::debug!(
                            device = self.device,
                            node = %path,
                            child = %child.name,
                            "Ignoring non-attribute child of a data node"
                        ),
                    }
                }
                if top_level && *is_detector_entry && node.point_dependent {
                    self.mark_primary(&node.name);
                }
                parent.add_data_node(node.name.as_str(), data);
            }
            ReadoutKind::ExternalLink {
                uri,
                rank,
                is_detector_entry,
            } => {
                let (file, address) =
                    parse_nxfile_uri(uri).ok_or_else(|| NexusError::InvalidDeviceConfig {
                        device: self.device.to_string(),
                        message: format!("external link '{}' has malformed uri '{}'", path, uri),
                    })?;
                let file_path = absolute_path(Path::new(&file));
                if !file_path.exists() {
                    tracing::warn!(
                        device = self.device,
                        file = %file_path.display(),
                        "Linked file does not exist yet"
                    );
                }
                let relative = relative_path(&file_path, self.scan_dir.as_deref())
                    .display()
                    .to_string();
                parent.add_link(
                    node.name.as_str(),
                    SymbolicNode {
                        file: relative.clone(),
                        path: address,
                    },
                );
                if top_level && *is_detector_entry {
                    match rank {
                        Some(rank) => {
                            self.external_files.insert(relative);
                            self.external_ranks
                                .insert(node.name.clone(), rank + self.scan_rank);
                            self.mark_primary(&node.name);
                        }
                        None => tracing::error!(
                            device = self.device,
                            link = %path,
                            "External link has no rank, it cannot be a primary field"
                        ),
                    }
                }
            }
        }
        Ok(())
    }

    fn mark_primary(&mut self, name: &str) {
        if !self.primary_fields.iter().any(|f| f == name) {
            self.primary_fields.push(name.to_string());
        }
    }
}

impl ExternalFileDetector {
    pub fn new(detector: Arc<dyn Detector>, options: AdapterOptions) -> Self {
        Self {
            detector,
            options,
            scan: None,
        }
    }

    fn prepare_writes(
        &self,
        scan: &ExternalScan,
        node: &ReadoutNode,
        prefix: &str,
        position: &ScanPosition,
        out: &mut Vec<(DataNode, crate::dataset::SliceND, NdArray, String)>,
    ) -> Result<()> {
        let name = self.detector.name();
        for child in node.children.iter().filter(|c| c.is_point_dependent()) {
            let path = if prefix.is_empty() {
                child.name.clone()
            } else {
                format!("{}/{}", prefix, child.name)
            };
            match &child.kind {
                ReadoutKind::Group { .. } => {
                    self.prepare_writes(scan, child, &path, position, out)?;
                }
                ReadoutKind::Data { value, .. } if child.point_dependent => {
                    let data = scan.datasets.get(&path).ok_or_else(|| NexusError::WriteValue {
                        device: name.to_string(),
                        value: value.to_string(),
                        reason: format!("no dataset '{}' was built for this scan", path),
                    })?;
                    let inner = inner_shape(data, scan.scan_rank);
                    let slice = position.slice_for(&inner);
                    if value.size() != shape_size(&inner) {
                        return Err(NexusError::WriteValue {
                            device: name.to_string(),
                            value: value.to_string(),
                            reason: format!(
                                "dataset '{}' expects {} values per point, got {}",
                                path,
                                shape_size(&inner),
                                value.size()
                            ),
                        });
                    }
                    let mut point_shape = vec![1; scan.scan_rank];
                    point_shape.extend_from_slice(&inner);
                    let array = value
                        .reshape(point_shape)
                        .and_then(|a| a.cast(data.dtype()))
                        .ok_or_else(|| NexusError::WriteValue {
                            device: name.to_string(),
                            value: value.to_string(),
                            reason: format!("cannot store {} in dataset '{}'", value.dtype(), path),
                        })?;
                    out.push((data.clone(), slice, array, path));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl AdapterOps for ExternalFileDetector {
    fn name(&self) -> &str {
        self.detector.name()
    }

    fn build_tree(&mut self, info: &ScanInfo) -> Result<Vec<DeviceTree>> {
        let name = self.detector.name().to_string();
        let readout = self
            .detector
            .readout_tree()
            .map_err(|e| NexusError::PositionUnavailable {
                device: name.clone(),
                message: e.to_string(),
            })?;
        match readout.kind {
            ReadoutKind::Group {
                nx_class: NexusBaseClass::NXdetector,
            } => {}
            _ => {
                return Err(NexusError::InvalidDeviceConfig {
                    device: name,
                    message: format!("readout root '{}' is not an NXdetector group", readout.name),
                })
            }
        }

        let builder = DataNodeBuilder::new(
            name.as_str(),
            ScanRole::PerPoint,
            info.shape().to_vec(),
            self.options.factory.clone(),
        )
        .with_float_fill_value(self.options.float_fill_value);
        let mut context = BuildContext {
            device: &name,
            builder,
            scan_rank: info.rank(),
            scan_dir: info.file_path().and_then(Path::parent).map(Path::to_path_buf),
            datasets: HashMap::new(),
            primary_fields: Vec::new(),
            external_files: BTreeSet::new(),
            external_ranks: BTreeMap::new(),
        };

        let mut group = detector_group(self.detector.as_ref(), info.role(&name));
        for child in &readout.children {
            context.add(&mut group, child, "", true)?;
        }
        let mut primary_fields = context.primary_fields;
        let additional = primary_fields.split_off(primary_fields.len().min(1));
        let primary = primary_fields.pop();
        let external_files = context.external_files;
        let external_ranks = context.external_ranks;
        let datasets = context.datasets;
        tracing::debug!(
            device = %name,
            datasets = datasets.len(),
            primary = ?primary,
            additional = ?additional,
            external_files = external_files.len(),
            "Built tree from detector readout"
        );

        let mut field_nodes: Vec<(String, Option<DataNode>)> = datasets
            .iter()
            .map(|(path, node)| (path.clone(), Some(node.clone())))
            .collect();
        field_nodes.sort_by(|a, b| a.0.cmp(&b.0));
        self.scan = Some(ExternalScan {
            scan_rank: info.rank(),
            datasets,
            field_nodes,
        });
        Ok(vec![DeviceTree::new(name.as_str(), name.as_str(), ScanRole::PerPoint, group)
            .with_primary_field(primary)
            .with_additional_primary_fields(additional)
            .with_external_files(external_files)
            .with_external_dataset_ranks(external_ranks)])
    }

    fn write_point(&mut self, value: &Value, _position: &ScanPosition) -> Result<()> {
        Err(NexusError::WriteValue {
            device: self.detector.name().to_string(),
            value: value.to_string(),
            reason: "this detector writes readout descriptions, not values".to_string(),
        })
    }

    fn write_readout(&mut self, readout: &ReadoutNode, position: &ScanPosition) -> Result<()> {
        let scan = self.scan.as_ref().ok_or_else(|| NexusError::NoActiveScan {
            device: self.detector.name().to_string(),
        })?;
        let mut writes = Vec::new();
        self.prepare_writes(scan, readout, "", position, &mut writes)?;
        for (node, slice, array, path) in writes {
            node.write_slice(&slice, &array)
                .map_err(|source| NexusError::SliceWrite {
                    device: self.detector.name().to_string(),
                    dataset: path,
                    slice: slice.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    fn scan_end(&mut self) {
        self.scan = None;
    }

    fn is_active(&self) -> bool {
        self.scan.is_some()
    }

    fn field_nodes(&self) -> Option<Vec<(String, Option<DataNode>)>> {
        self.scan.as_ref().map(|s| s.field_nodes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nxfile_uri() {
        assert_eq!(
            parse_nxfile_uri("nxfile:///dls/i22/data/pil-0001.h5#entry/instrument/detector/data"),
            Some((
                "/dls/i22/data/pil-0001.h5".to_string(),
                "/entry/instrument/detector/data".to_string()
            ))
        );
        assert_eq!(parse_nxfile_uri("file:///a.h5#entry"), None);
        assert_eq!(parse_nxfile_uri("nxfile:///a.h5"), None);
        assert_eq!(parse_nxfile_uri("nxfile://#entry"), None);
    }

    #[test]
    fn test_relative_path() {
        let base = Path::new("/data/2024/scan");
        assert_eq!(
            relative_path(Path::new("/data/2024/scan/det/d1.h5"), Some(base)),
            PathBuf::from("det/d1.h5")
        );
        assert_eq!(
            relative_path(Path::new("/data/2024/other/d1.h5"), Some(base)),
            PathBuf::from("../other/d1.h5")
        );
        assert_eq!(
            relative_path(Path::new("/x/d1.h5"), None),
            PathBuf::from("/x/d1.h5")
        );
    }

    #[test]
    fn test_relative_path_resolves_relative_inputs() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            relative_path(Path::new("rel/d1.h5"), Some(&cwd)),
            PathBuf::from("rel/d1.h5")
        );
        assert_eq!(
            relative_path(Path::new("rel/d1.h5"), Some(&cwd.join("scan"))),
            PathBuf::from("../rel/d1.h5")
        );
        assert_eq!(
            relative_path(&cwd.join("det/d1.h5"), Some(Path::new("scan"))),
            PathBuf::from("../det/d1.h5")
        );
        assert_eq!(relative_path(Path::new("rel/d1.h5"), None), cwd.join("rel/d1.h5"));
    }

    #[test]
    fn test_shift_dimension_attribute() {
        let axis = shift_dimension_attribute("axis", &NdArray::scalar("1,2"), 2);
        assert_eq!(axis.first().and_then(Scalar::as_str), Some("3,4"));

        let label = shift_dimension_attribute("label", &NdArray::scalar(1i32), 1);
        assert_eq!(label.first().and_then(Scalar::as_f64), Some(2.0));

        let other = shift_dimension_attribute("units", &NdArray::scalar("1"), 2);
        assert_eq!(other.first().and_then(Scalar::as_str), Some("1"));
    }
}
