//! Readout descriptions produced by detectors that describe their own output.
//!
//! A detector that writes bulk data to its own files (or wants a custom layout)
//! hands back a tree of [`ReadoutNode`]s at every point: groups, inline data,
//! attributes and links into external files. The first readout shapes the
//! device tree; later readouts only carry the point-dependent data.

use crate::tree::NexusBaseClass;
use crate::value::NdArray;

/// What a readout node describes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadoutKind {
    Group {
        nx_class: NexusBaseClass,
    },
    Data {
        value: NdArray,
        /// Marks the dataset a plot of the detector should show.
        is_detector_entry: bool,
        /// Chunk shape of the per-point part, if the detector knows better.
        chunk_dimensions: Option<Vec<usize>>,
    },
    Attribute {
        value: NdArray,
    },
    /// Link into a file the detector wrote, as `nxfile://<path>#<address>`.
    ExternalLink {
        uri: String,
        /// Rank of the linked dataset at a single point.
        rank: Option<usize>,
        is_detector_entry: bool,
    },
}

/// One node of a detector readout description.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutNode {
    pub name: String,
    pub kind: ReadoutKind,
    pub point_dependent: bool,
    pub children: Vec<ReadoutNode>,
}

impl ReadoutNode {
    fn with_kind(name: impl Into<String>, kind: ReadoutKind) -> Self {
        Self {
            name: name.into(),
            kind,
            point_dependent: false,
            children: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>, nx_class: NexusBaseClass) -> Self {
        Self::with_kind(name, ReadoutKind::Group { nx_class })
    }

    pub fn data(name: impl Into<String>, value: impl Into<NdArray>) -> Self {
        Self::with_kind(
            name,
            ReadoutKind::Data {
                value: value.into(),
                is_detector_entry: false,
                chunk_dimensions: None,
            },
        )
    }

    pub fn attribute(name: impl Into<String>, value: impl Into<NdArray>) -> Self {
        Self::with_kind(
            name,
            ReadoutKind::Attribute {
                value: value.into(),
            },
        )
    }

    pub fn external_link(name: impl Into<String>, uri: impl Into<String>, rank: Option<usize>) -> Self {
        let mut node = Self::with_kind(
            name,
            ReadoutKind::ExternalLink {
                uri: uri.into(),
                rank,
                is_detector_entry: false,
            },
        );
        node.point_dependent = true;
        node
    }

    pub fn point_dependent(mut self, yes: bool) -> Self {
        self.point_dependent = yes;
        self
    }

    pub fn detector_entry(mut self, yes: bool) -> Self {
        match &mut self.kind {
            ReadoutKind::Data {
                is_detector_entry, ..
            }
            | ReadoutKind::ExternalLink {
                is_detector_entry, ..
            } => *is_detector_entry = yes,
            ReadoutKind::Group { .. } | ReadoutKind::Attribute { .. } => {}
        }
        self
    }

    pub fn chunk_dimensions(mut self, chunks: Vec<usize>) -> Self {
        if let ReadoutKind::Data {
            chunk_dimensions, ..
        } = &mut self.kind
        {
            *chunk_dimensions = Some(chunks);
        }
        self
    }

    pub fn child(mut self, child: ReadoutNode) -> Self {
        self.children.push(child);
        self
    }

    /// Whether this node or anything beneath it changes per point.
    pub fn is_point_dependent(&self) -> bool {
        self.point_dependent || self.children.iter().any(ReadoutNode::is_point_dependent)
    }

    pub fn find(&self, name: &str) -> Option<&ReadoutNode> {
        self.children.iter().find(|c| c.name == name)
    }
}
