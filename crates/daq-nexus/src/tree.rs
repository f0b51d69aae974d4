//! In-memory description of the hierarchical file.
//!
//! A [`DeviceTree`] is what the adapter hands back to the file writer: a named
//! [`GroupNode`] holding [`DataNode`]s, child groups and external links, plus the
//! primary and axis fields used for default plotting.
//!
//! [`DataNode`] is a shared handle. Cloning it (or attaching it to a second
//! group) adds another reference to the same dataset, which is how collection
//! groups and legacy location-map paths link to data without copying it.

use crate::dataset::{LazyWriteableDataset, SliceND};
use crate::device::ScanRole;
use crate::error::{DatasetError, NexusError, Result};
use crate::value::{DType, NdArray, Scalar};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Datasets at or below this many elements are rendered with their values.
const DESCRIBE_MAX_VALUES: usize = 64;

// =============================================================================
// NX base classes
// =============================================================================

macro_rules! base_classes {
    ($($name:ident),* $(,)?) => {
        /// NeXus base classes used for groups.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum NexusBaseClass {
            $($name,)*
        }

        impl NexusBaseClass {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(NexusBaseClass::$name => stringify!($name),)*
                }
            }
        }

        impl FromStr for NexusBaseClass {
            type Err = NexusError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $(stringify!($name) => Ok(NexusBaseClass::$name),)*
                    other => Err(NexusError::Validation(format!(
                        "unknown NeXus base class '{}'",
                        other
                    ))),
                }
            }
        }
    };
}

base_classes!(
    NXaperture,
    NXattenuator,
    NXbeam,
    NXbeam_stop,
    NXbending_magnet,
    NXcollection,
    NXcrystal,
    NXdata,
    NXdetector,
    NXentry,
    NXenvironment,
    NXfilter,
    NXgrating,
    NXinsertion_device,
    NXinstrument,
    NXlog,
    NXmirror,
    NXmonitor,
    NXmonochromator,
    NXnote,
    NXparameters,
    NXpositioner,
    NXsample,
    NXsample_component,
    NXsensor,
    NXslit,
    NXsource,
    NXtransformations,
    NXuser,
);

impl fmt::Display for NexusBaseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for NexusBaseClass {
    type Error = NexusError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NexusBaseClass> for String {
    fn from(value: NexusBaseClass) -> Self {
        value.as_str().to_string()
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Ordered name/value attributes of a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, NdArray)>);

impl Attributes {
    /// Sets an attribute, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<NdArray>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&NdArray> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_json(&self) -> serde_json::Value {
        let map: Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

// =============================================================================
// Data nodes
// =============================================================================

#[derive(Debug)]
enum Payload {
    Fixed(NdArray),
    Lazy(Box<dyn LazyWriteableDataset>),
}

#[derive(Debug)]
struct DataNodeInner {
    payload: Payload,
    attributes: Attributes,
}

/// Shared handle to a dataset and its attributes.
#[derive(Debug, Clone)]
pub struct DataNode {
    inner: Arc<RwLock<DataNodeInner>>,
}

impl DataNode {
    /// A dataset holding one value for the whole scan.
    pub fn fixed(value: impl Into<NdArray>) -> Self {
        Self::with_payload(Payload::Fixed(value.into()))
    }

    /// A dataset written slice by slice during the scan.
    pub fn lazy(dataset: Box<dyn LazyWriteableDataset>) -> Self {
        Self::with_payload(Payload::Lazy(dataset))
    }

    fn with_payload(payload: Payload) -> Self {
        Self {
            inner: Arc::new(RwLock::new(DataNodeInner {
                payload,
                attributes: Attributes::default(),
            })),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.inner.read().payload, Payload::Lazy(_))
    }

    pub fn dtype(&self) -> DType {
        match &self.inner.read().payload {
            Payload::Fixed(value) => value.dtype(),
            Payload::Lazy(ds) => ds.dtype(),
        }
    }

    /// Current shape; lazy datasets grow as they are written.
    pub fn shape(&self) -> Vec<usize> {
        match &self.inner.read().payload {
            Payload::Fixed(value) => value.shape().to_vec(),
            Payload::Lazy(ds) => ds.shape(),
        }
    }

    /// Rank of the dataset, fixed at creation.
    pub fn rank(&self) -> usize {
        match &self.inner.read().payload {
            Payload::Fixed(value) => value.rank(),
            Payload::Lazy(ds) => ds.max_shape().len(),
        }
    }

    pub fn max_shape(&self) -> Option<Vec<Option<usize>>> {
        match &self.inner.read().payload {
            Payload::Fixed(_) => None,
            Payload::Lazy(ds) => Some(ds.max_shape().to_vec()),
        }
    }

    pub fn chunking(&self) -> Option<Vec<usize>> {
        match &self.inner.read().payload {
            Payload::Fixed(_) => None,
            Payload::Lazy(ds) => Some(ds.chunking().to_vec()),
        }
    }

    pub fn fill_value(&self) -> Option<Scalar> {
        match &self.inner.read().payload {
            Payload::Fixed(_) => None,
            Payload::Lazy(ds) => ds.fill_value().cloned(),
        }
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: impl Into<NdArray>) {
        self.inner.write().attributes.set(name, value);
    }

    pub fn attribute(&self, name: &str) -> Option<NdArray> {
        self.inner.read().attributes.get(name).cloned()
    }

    /// String value of an attribute, if it is a string.
    pub fn attribute_str(&self, name: &str) -> Option<String> {
        self.attribute(name)
            .and_then(|a| a.first().and_then(|s| s.as_str().map(str::to_string)))
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.inner.read().attributes.names()
    }

    /// Writes a slice of a lazy dataset.
    pub fn write_slice(&self, slice: &SliceND, data: &NdArray) -> Result<(), DatasetError> {
        match &mut self.inner.write().payload {
            Payload::Fixed(_) => Err(DatasetError::ReadOnly {
                name: "fixed".to_string(),
            }),
            Payload::Lazy(ds) => ds.set_slice(slice, data),
        }
    }

    /// Reads a slice of the dataset.
    pub fn read_slice(&self, slice: &SliceND) -> Result<NdArray, DatasetError> {
        match &self.inner.read().payload {
            Payload::Fixed(value) => {
                let all = SliceND::new(vec![0; value.rank()], value.shape().to_vec());
                if *slice == all {
                    Ok(value.clone())
                } else {
                    Err(DatasetError::OutOfBounds {
                        slice: slice.to_string(),
                        max_shape: format!("{:?}", value.shape()),
                    })
                }
            }
            Payload::Lazy(ds) => ds.get_slice(slice),
        }
    }

    /// Reads the whole dataset as currently written.
    pub fn read_all(&self) -> Result<NdArray, DatasetError> {
        let shape = self.shape();
        self.read_slice(&SliceND::new(vec![0; shape.len()], shape))
    }

    /// True if both handles refer to the same dataset.
    pub fn ptr_eq(&self, other: &DataNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn describe(&self) -> serde_json::Value {
        let guard = self.inner.read();
        let mut out = Map::new();
        match &guard.payload {
            Payload::Fixed(value) => {
                out.insert("dtype".into(), json!(value.dtype().name()));
                out.insert("shape".into(), json!(value.shape()));
                out.insert("value".into(), value.to_json());
            }
            Payload::Lazy(ds) => {
                let shape = ds.shape();
                out.insert("dtype".into(), json!(ds.dtype().name()));
                out.insert("shape".into(), json!(shape));
                out.insert("chunks".into(), json!(ds.chunking()));
                out.insert("lazy".into(), json!(true));
                let size: usize = shape.iter().product();
                if size <= DESCRIBE_MAX_VALUES {
                    let all = SliceND::new(vec![0; shape.len()], shape);
                    if let Ok(values) = ds.get_slice(&all) {
                        out.insert("value".into(), values.to_json());
                    }
                }
            }
        }
        if !guard.attributes.is_empty() {
            out.insert("attributes".into(), guard.attributes.to_json());
        }
        serde_json::Value::Object(out)
    }
}

// =============================================================================
// Groups and links
// =============================================================================

/// Link to a node in another file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicNode {
    /// File path, relative to the directory of the scan file when possible.
    pub file: String,
    /// Address of the node inside that file.
    pub path: String,
}

/// Child of a [`GroupNode`].
#[derive(Debug, Clone)]
pub enum Node {
    Group(GroupNode),
    Data(DataNode),
    Link(SymbolicNode),
}

/// A group with an NX class, attributes and ordered children.
#[derive(Debug, Clone)]
pub struct GroupNode {
    nx_class: NexusBaseClass,
    attributes: Attributes,
    children: Vec<(String, Node)>,
}

impl GroupNode {
    pub fn new(nx_class: NexusBaseClass) -> Self {
        Self {
            nx_class,
            attributes: Attributes::default(),
            children: Vec::new(),
        }
    }

    pub fn nx_class(&self) -> NexusBaseClass {
        self.nx_class
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<NdArray>) {
        self.attributes.set(name, value);
    }

    pub fn attribute(&self, name: &str) -> Option<&NdArray> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn put(&mut self, name: String, node: Node) {
        match self.children.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = node,
            None => self.children.push((name, node)),
        }
    }

    /// Adds (or replaces) a data node under `name`.
    pub fn add_data_node(&mut self, name: impl Into<String>, node: DataNode) {
        self.put(name.into(), Node::Data(node));
    }

    /// Adds (or replaces) a child group under `name`.
    pub fn add_group(&mut self, name: impl Into<String>, group: GroupNode) {
        self.put(name.into(), Node::Group(group));
    }

    pub fn add_link(&mut self, name: impl Into<String>, link: SymbolicNode) {
        self.put(name.into(), Node::Link(link));
    }

    /// Adds a fixed dataset and returns its handle.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<NdArray>) -> DataNode {
        let node = DataNode::fixed(value);
        self.add_data_node(name, node.clone());
        node
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    pub fn data_node(&self, name: &str) -> Option<DataNode> {
        match self.child(name) {
            Some(Node::Data(d)) => Some(d.clone()),
            _ => None,
        }
    }

    pub fn group(&self, name: &str) -> Option<&GroupNode> {
        match self.child(name) {
            Some(Node::Group(g)) => Some(g),
            _ => None,
        }
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut GroupNode> {
        match self.children.iter_mut().find(|(n, _)| n == name) {
            Some((_, Node::Group(g))) => Some(g),
            _ => None,
        }
    }

    pub fn link(&self, name: &str) -> Option<&SymbolicNode> {
        match self.child(name) {
            Some(Node::Link(l)) => Some(l),
            _ => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Node> {
        let pos = self.children.iter().position(|(n, _)| n == name)?;
        Some(self.children.remove(pos).1)
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Names of the data nodes directly in this group.
    pub fn data_node_names(&self) -> Vec<String> {
        self.children
            .iter()
            .filter(|(_, c)| matches!(c, Node::Data(_)))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Follows a `/` separated path of group names (class suffixes ignored)
    /// to a data node.
    pub fn find_data_node(&self, path: &str) -> Option<DataNode> {
        let parts: Vec<&str> = path
            .split('/')
            .filter(|p| !p.is_empty())
            .map(|p| p.split(':').next().unwrap_or(p))
            .collect();
        let (leaf, groups) = parts.split_last()?;
        let mut current = self;
        for name in groups {
            current = current.group(name)?;
        }
        current.data_node(leaf)
    }

    /// Walks `path`'s group segments from this group, creating missing groups
    /// and checking the class of existing ones. Returns the parent group of
    /// the path's leaf.
    pub fn ensure_groups(&mut self, path: &NodePath, device: &str) -> Result<&mut GroupNode> {
        let mut current = self;
        for segment in path.groups() {
            current = current.ensure_child_group(segment, device, path)?;
        }
        Ok(current)
    }

    fn ensure_child_group(
        &mut self,
        segment: &PathSegment,
        device: &str,
        path: &NodePath,
    ) -> Result<&mut GroupNode> {
        let index = match self.children.iter().position(|(n, _)| *n == segment.name) {
            Some(i) => i,
            None => {
                let class = segment.nx_class.unwrap_or(NexusBaseClass::NXcollection);
                self.children
                    .push((segment.name.clone(), Node::Group(GroupNode::new(class))));
                self.children.len() - 1
            }
        };
        match &mut self.children[index].1 {
            Node::Group(group) => match segment.nx_class {
                Some(expected) if expected != group.nx_class => Err(NexusError::ClassMismatch {
                    device: device.to_string(),
                    path: path.to_string(),
                    group: segment.name.clone(),
                    expected: expected.to_string(),
                    actual: group.nx_class.to_string(),
                }),
                _ => Ok(group),
            },
            _ => Err(NexusError::NotAGroup {
                device: device.to_string(),
                path: path.to_string(),
                node: segment.name.clone(),
            }),
        }
    }

    /// JSON rendering of the group for inspection.
    pub fn describe(&self) -> serde_json::Value {
        let mut children = Map::new();
        for (name, child) in &self.children {
            let value = match child {
                Node::Group(g) => g.describe(),
                Node::Data(d) => d.describe(),
                Node::Link(l) => json!({ "link": { "file": l.file, "path": l.path } }),
            };
            children.insert(name.clone(), value);
        }
        let mut out = Map::new();
        out.insert("class".into(), json!(self.nx_class.as_str()));
        if !self.attributes.is_empty() {
            out.insert("attributes".into(), self.attributes.to_json());
        }
        out.insert("children".into(), serde_json::Value::Object(children));
        serde_json::Value::Object(out)
    }
}

// =============================================================================
// Paths
// =============================================================================

/// One group segment of a [`NodePath`]: `name` or `name:NXclass`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub nx_class: Option<NexusBaseClass>,
}

/// A path like `instrument:NXinstrument/sample_x:NXpositioner/value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    text: String,
    groups: Vec<PathSegment>,
    leaf: String,
}

impl NodePath {
    pub fn groups(&self) -> &[PathSegment] {
        &self.groups
    }

    pub fn leaf(&self) -> &str {
        &self.leaf
    }
}

impl FromStr for NodePath {
    type Err = NexusError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| NexusError::InvalidPath {
            path: s.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = s.trim().trim_start_matches('/').split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path segment"));
        }
        let (leaf, groups) = parts.split_last().ok_or_else(|| invalid("empty path"))?;
        if leaf.contains(':') {
            return Err(invalid("the final segment names a dataset and cannot carry a class"));
        }
        let groups = groups
            .iter()
            .map(|part| match part.split_once(':') {
                Some((name, class)) if !name.is_empty() => Ok(PathSegment {
                    name: name.to_string(),
                    nx_class: Some(
                        class
                            .parse()
                            .map_err(|_| invalid(&format!("unknown class '{}'", class)))?,
                    ),
                }),
                Some(_) => Err(invalid("group segment without a name")),
                None => Ok(PathSegment {
                    name: part.to_string(),
                    nx_class: None,
                }),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            text: s.to_string(),
            groups,
            leaf: leaf.to_string(),
        })
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// =============================================================================
// Device trees
// =============================================================================

/// The tree built for one device (or one axis of a device) for a scan.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    name: String,
    device_name: String,
    scan_role: ScanRole,
    group: GroupNode,
    primary_field: Option<String>,
    additional_primary_fields: Vec<String>,
    axis_fields: Vec<String>,
    category: Option<String>,
    collection_name: Option<String>,
    external_files: BTreeSet<String>,
    external_dataset_ranks: BTreeMap<String, usize>,
}

impl DeviceTree {
    pub fn new(
        name: impl Into<String>,
        device_name: impl Into<String>,
        scan_role: ScanRole,
        group: GroupNode,
    ) -> Self {
        Self {
            name: name.into(),
            device_name: device_name.into(),
            scan_role,
            group,
            primary_field: None,
            additional_primary_fields: Vec::new(),
            axis_fields: Vec::new(),
            category: None,
            collection_name: None,
            external_files: BTreeSet::new(),
            external_dataset_ranks: BTreeMap::new(),
        }
    }

    pub fn with_primary_field(mut self, field: Option<String>) -> Self {
        self.primary_field = field;
        self
    }

    /// Further fields an `NXdata` group is made for, after the primary one.
    pub fn with_additional_primary_fields(mut self, fields: Vec<String>) -> Self {
        self.additional_primary_fields = fields;
        self
    }

    /// Files outside the scan file that the tree links to, relative to the
    /// scan file's directory.
    pub fn with_external_files(mut self, files: BTreeSet<String>) -> Self {
        self.external_files = files;
        self
    }

    /// Full rank (scan rank included) of fields that are external links.
    pub fn with_external_dataset_ranks(mut self, ranks: BTreeMap<String, usize>) -> Self {
        self.external_dataset_ranks = ranks;
        self
    }

    pub fn with_axis_fields(mut self, fields: Vec<String>) -> Self {
        self.axis_fields = fields;
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_collection_name(mut self, name: Option<String>) -> Self {
        self.collection_name = name;
        self
    }

    /// Name of the node in the file.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn scan_role(&self) -> ScanRole {
        self.scan_role
    }

    pub fn group(&self) -> &GroupNode {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut GroupNode {
        &mut self.group
    }

    pub fn into_group(self) -> GroupNode {
        self.group
    }

    pub fn primary_field(&self) -> Option<&str> {
        self.primary_field.as_deref()
    }

    /// Fields after the primary one that get their own `NXdata` group.
    pub fn additional_primary_fields(&self) -> &[String] {
        &self.additional_primary_fields
    }

    pub fn axis_fields(&self) -> &[String] {
        &self.axis_fields
    }

    /// Files outside the scan file the tree links to.
    pub fn external_files(&self) -> &BTreeSet<String> {
        &self.external_files
    }

    /// Rank of an externally linked field, if it is one.
    pub fn external_dataset_rank(&self, field: &str) -> Option<usize> {
        self.external_dataset_ranks.get(field).copied()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn collection_name(&self) -> Option<&str> {
        self.collection_name.as_deref()
    }

    /// JSON rendering including the plotting hints.
    pub fn describe(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "device": self.device_name,
            "scan_role": self.scan_role.to_string(),
            "primary_field": self.primary_field,
            "additional_primary_fields": self.additional_primary_fields,
            "axis_fields": self.axis_fields,
            "external_files": self.external_files,
            "external_dataset_ranks": self.external_dataset_ranks,
            "category": self.category,
            "collection_name": self.collection_name,
            "node": self.group.describe(),
        })
    }
}
