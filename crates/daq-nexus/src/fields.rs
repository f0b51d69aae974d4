//! Field model of a device: input names followed by extra names.
//!
//! The order here is the order of the entries in the device's normalised
//! position and is used everywhere a field is looked up by index.

use crate::device::Device;
use crate::error::{NexusError, Result};
use crate::value::Value;

/// Whether a field is settable or a read-only companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Input,
    Extra,
}

/// Ordered fields of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldModel {
    device: String,
    input_names: Vec<String>,
    extra_names: Vec<String>,
    formats: Vec<String>,
}

impl FieldModel {
    pub fn new(device: impl Into<String>, input_names: Vec<String>, extra_names: Vec<String>) -> Self {
        Self {
            device: device.into(),
            input_names,
            extra_names,
            formats: Vec::new(),
        }
    }

    pub fn with_formats(mut self, formats: Vec<String>) -> Self {
        self.formats = formats;
        self
    }

    pub fn from_device(device: &dyn Device) -> Self {
        Self::new(device.name(), device.input_names(), device.extra_names())
            .with_formats(device.output_formats())
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn extra_names(&self) -> &[String] {
        &self.extra_names
    }

    /// All field names, inputs first.
    pub fn names(&self) -> Vec<String> {
        self.input_names
            .iter()
            .chain(&self.extra_names)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.input_names.len() + self.extra_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.input_names
            .iter()
            .chain(&self.extra_names)
            .nth(index)
            .map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.input_names
            .iter()
            .chain(&self.extra_names)
            .position(|n| n == name)
    }

    pub fn kind(&self, index: usize) -> FieldKind {
        if index < self.input_names.len() {
            FieldKind::Input
        } else {
            FieldKind::Extra
        }
    }

    pub fn format(&self, index: usize) -> Option<&str> {
        self.formats.get(index).map(String::as_str)
    }

    /// Fields without a declared format count as numeric.
    pub fn is_numeric(&self, index: usize) -> bool {
        self.format(index).map_or(true, is_numeric_format)
    }

    pub fn decimals(&self, index: usize) -> Option<u32> {
        self.format(index).and_then(decimals_from_format)
    }

    /// `<device>.<field>`
    pub fn local_name(&self, field: &str) -> String {
        format!("{}.{}", self.device, field)
    }

    /// Splits a position into one value per field.
    pub fn normalise(&self, value: &Value) -> Result<Vec<Value>> {
        value
            .to_field_values()
            .ok_or_else(|| NexusError::PositionUnavailable {
                device: self.device.clone(),
                message: "position is null".to_string(),
            })
    }

    /// Reads and normalises the device's current position.
    pub fn read_position(&self, device: &dyn Device) -> Result<Vec<Value>> {
        let value = device
            .position()
            .map_err(|e| NexusError::PositionUnavailable {
                device: self.device.clone(),
                message: e.to_string(),
            })?;
        self.normalise(&value)
    }
}

/// A format is numeric unless its conversion is a string conversion.
pub fn is_numeric_format(format: &str) -> bool {
    !matches!(format.trim().chars().last(), Some('s' | 'S'))
}

/// Digits after the decimal point in a format like `%8.3f`.
pub fn decimals_from_format(format: &str) -> Option<u32> {
    if !is_numeric_format(format) {
        return None;
    }
    let spec = &format[format.rfind('%')?..];
    let (_, after_dot) = spec.split_once('.')?;
    let digits: String = after_dot.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> FieldModel {
        FieldModel::new(
            "stage",
            vec!["x".into(), "y".into()],
            vec!["status".into()],
        )
        .with_formats(vec!["%5.3f".into(), "%.1f".into(), "%s".into()])
    }

    #[test]
    fn test_field_order_inputs_then_extras() {
        let m = model();
        assert_eq!(m.names(), vec!["x", "y", "status"]);
        assert_eq!(m.index_of("status"), Some(2));
        assert_eq!(m.kind(1), FieldKind::Input);
        assert_eq!(m.kind(2), FieldKind::Extra);
        assert_eq!(m.local_name("y"), "stage.y");
    }

    #[test]
    fn test_format_classification() {
        assert!(is_numeric_format("%5.3f"));
        assert!(is_numeric_format("%d"));
        assert!(!is_numeric_format("%s"));
        assert!(!is_numeric_format("%10s "));
        let m = model();
        assert!(m.is_numeric(0));
        assert!(!m.is_numeric(2));
        assert!(FieldModel::new("d", vec!["v".into()], vec![]).is_numeric(0));
    }

    #[test]
    fn test_decimals() {
        assert_eq!(decimals_from_format("%5.3f"), Some(3));
        assert_eq!(decimals_from_format("%.10g"), Some(10));
        assert_eq!(decimals_from_format("%d"), None);
        assert_eq!(decimals_from_format("%5.2s"), None);
        assert_eq!(model().decimals(1), Some(1));
    }

    #[test]
    fn test_normalise_null_is_recoverable() {
        let err = model().normalise(&Value::Null).unwrap_err();
        assert!(err.can_recover());
    }
}
