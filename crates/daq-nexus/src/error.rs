//! Error types for the NeXus device adapter layer.
//!
//! Every failure carries the device it came from plus whatever else is needed to
//! act on it without re-running the scan: the field name, the offending value and
//! its type, the shape or slice involved.
//!
//! ## Error Classes
//!
//! Errors fall into the classes an acquisition engine cares about when deciding
//! whether to keep going:
//!
//! - **Recoverable per device**: position unreadable, field missing, device name
//!   unresolved. Logged, the device or field is skipped and the scan continues.
//! - **Build fatal**: a dataset cannot be made from a value, or required field path
//!   configuration is missing. Aborts the tree of that one device.
//! - **Write fatal**: slice or shape mismatch during a per-point write. Aborts that
//!   write only.
//! - **Structural fatal**: an existing group has a different NX class than the
//!   location map declares. Aborts the legacy link pass for that device.
//! - **Configuration**: the configuration itself could not be loaded or validated.
//!
//! None of these abort the scan engine by themselves; propagation is the engine's call.

use thiserror::Error;

/// Convenience alias for results using [`NexusError`].
pub type Result<T, E = NexusError> = std::result::Result<T, E>;

/// Coarse classification of a [`NexusError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    RecoverablePerDevice,
    BuildFatal,
    WriteFatal,
    StructuralFatal,
    Configuration,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorClass::RecoverablePerDevice => "recoverable",
            ErrorClass::BuildFatal => "build",
            ErrorClass::WriteFatal => "write",
            ErrorClass::StructuralFatal => "structural",
            ErrorClass::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

/// Error reported by a device when it is asked for its current value.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct DeviceError {
    pub message: String,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised by a lazy dataset implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    /// The slice reaches past a bounded maximum dimension.
    #[error("slice {slice} exceeds max shape {max_shape}")]
    OutOfBounds { slice: String, max_shape: String },

    /// The slice rank does not match the dataset rank.
    #[error("slice rank {slice_rank} does not match dataset rank {rank}")]
    RankMismatch { slice_rank: usize, rank: usize },

    /// The number of supplied elements differs from the slice size.
    #[error("data of shape {data_shape} does not fit slice of shape {slice_shape}")]
    SizeMismatch {
        data_shape: String,
        slice_shape: String,
    },

    /// The dataset holds a fixed value and cannot be sliced into.
    #[error("dataset '{name}' holds a fixed value and cannot be written per point")]
    ReadOnly { name: String },

    /// An element could not be converted to the dataset's type.
    #[error("cannot store {value} ({value_type}) in a dataset of type {dtype}")]
    TypeMismatch {
        value: String,
        value_type: String,
        dtype: String,
    },
}

/// Primary error type for the adapter layer.
#[derive(Error, Debug)]
pub enum NexusError {
    /// The device could not report its current value.
    #[error("Could not get position of device '{device}': {message}")]
    PositionUnavailable { device: String, message: String },

    /// A named field has no value in the device position.
    #[error("Field '{field}' of device '{device}' has no value")]
    FieldMissing { device: String, field: String },

    /// A device name could not be resolved to a device.
    #[error("Device '{device}' could not be resolved")]
    UnresolvedDevice { device: String },

    /// A dataset could not be built from a field value.
    #[error(
        "Cannot create dataset for field '{field}' of device '{device}' from value {value} ({value_type}): {reason}"
    )]
    DatasetBuild {
        device: String,
        field: String,
        value: String,
        value_type: String,
        reason: String,
    },

    /// Declarative field paths are configured but omit a field.
    #[error("No field path configured for field '{field}' of device '{device}'")]
    MissingFieldPath { device: String, field: String },

    /// The device configuration is unusable for building a tree.
    #[error("Invalid configuration for device '{device}': {message}")]
    InvalidDeviceConfig { device: String, message: String },

    /// A position has fewer elements than the device has fields.
    #[error(
        "Position of device '{device}' must have at least {expected} elements, but it has {actual}"
    )]
    PositionLength {
        device: String,
        expected: usize,
        actual: usize,
    },

    /// A slice write into a dataset failed.
    #[error("Cannot write slice {slice} of '{dataset}' for device '{device}': {source}")]
    SliceWrite {
        device: String,
        dataset: String,
        slice: String,
        #[source]
        source: DatasetError,
    },

    /// A per-point value could not be matched to the tree built for it.
    #[error("Cannot write value {value} for device '{device}': {reason}")]
    WriteValue {
        device: String,
        value: String,
        reason: String,
    },

    /// A write arrived without a tree having been built for the scan.
    #[error("No tree has been built for device '{device}' in this scan")]
    NoActiveScan { device: String },

    /// An existing group has a different NX class than the path declares.
    #[error(
        "Group '{group}' on path '{path}' for device '{device}' has class {actual}, expected {expected}"
    )]
    ClassMismatch {
        device: String,
        path: String,
        group: String,
        expected: String,
        actual: String,
    },

    /// A path segment names a node that is not a group.
    #[error("Node '{node}' on path '{path}' for device '{device}' is not a group")]
    NotAGroup {
        device: String,
        path: String,
        node: String,
    },

    /// A path string could not be parsed.
    #[error("Invalid node path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration failed semantic validation.
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

impl From<figment::Error> for NexusError {
    fn from(err: figment::Error) -> Self {
        NexusError::Config(Box::new(err))
    }
}

impl NexusError {
    /// Returns the class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            NexusError::PositionUnavailable { .. }
            | NexusError::FieldMissing { .. }
            | NexusError::UnresolvedDevice { .. } => ErrorClass::RecoverablePerDevice,
            NexusError::DatasetBuild { .. }
            | NexusError::MissingFieldPath { .. }
            | NexusError::InvalidDeviceConfig { .. } => ErrorClass::BuildFatal,
            NexusError::PositionLength { .. }
            | NexusError::SliceWrite { .. }
            | NexusError::WriteValue { .. }
            | NexusError::NoActiveScan { .. } => ErrorClass::WriteFatal,
            NexusError::ClassMismatch { .. }
            | NexusError::NotAGroup { .. }
            | NexusError::InvalidPath { .. } => ErrorClass::StructuralFatal,
            NexusError::Config(_) | NexusError::Validation(_) => ErrorClass::Configuration,
        }
    }

    /// Whether the device (or field) can simply be skipped.
    pub fn can_recover(&self) -> bool {
        self.class() == ErrorClass::RecoverablePerDevice
    }

    /// Name of the device the error concerns, when there is one.
    pub fn device(&self) -> Option<&str> {
        match self {
            NexusError::PositionUnavailable { device, .. }
            | NexusError::FieldMissing { device, .. }
            | NexusError::UnresolvedDevice { device }
            | NexusError::DatasetBuild { device, .. }
            | NexusError::MissingFieldPath { device, .. }
            | NexusError::InvalidDeviceConfig { device, .. }
            | NexusError::PositionLength { device, .. }
            | NexusError::SliceWrite { device, .. }
            | NexusError::WriteValue { device, .. }
            | NexusError::NoActiveScan { device }
            | NexusError::ClassMismatch { device, .. }
            | NexusError::NotAGroup { device, .. } => Some(device),
            NexusError::InvalidPath { .. } | NexusError::Config(_) | NexusError::Validation(_) => {
                None
            }
        }
    }
}
