//! Choosing the primary field of a multi-field device.
//!
//! The fallbacks run in a fixed order and downstream consumers rely on the
//! choice being stable:
//!
//! 1. a single field is primary;
//! 2. with no numeric field, the first field is primary;
//! 3. with one numeric field, it is primary;
//! 4. otherwise the numeric field covering the largest range over the scan's
//!    planned positions wins, ties going to the earlier field.

use crate::error::{NexusError, Result};
use crate::fields::FieldModel;
use crate::scan::ScanObject;
use crate::value::Value;

/// Index of the primary field, or `None` for a device without fields.
///
/// Fails when an implicit scan object's start and stop (or step) have
/// different lengths.
pub fn select_primary_index(
    fields: &FieldModel,
    scan_object: Option<&ScanObject>,
) -> Result<Option<usize>> {
    if fields.is_empty() {
        return Ok(None);
    }
    if fields.len() == 1 {
        return Ok(Some(0));
    }
    let numeric: Vec<usize> = (0..fields.len()).filter(|&i| fields.is_numeric(i)).collect();
    let index = match numeric.as_slice() {
        [] => 0,
        [only] => *only,
        [first, ..] => {
            let ranges = match scan_object {
                Some(obj) => field_ranges(fields.device(), obj)?,
                None => None,
            };
            match ranges {
                Some(ranges) => largest_range(&numeric, &ranges),
                None => *first,
            }
        }
    };
    Ok(Some(index))
}

/// Name of the primary field.
pub fn select_primary_field(
    fields: &FieldModel,
    scan_object: Option<&ScanObject>,
) -> Result<Option<String>> {
    Ok(select_primary_index(fields, scan_object)?.and_then(|i| fields.name(i).map(str::to_string)))
}

fn largest_range(candidates: &[usize], ranges: &[f64]) -> usize {
    let mut best = candidates[0];
    let mut best_range = f64::NEG_INFINITY;
    for &i in candidates {
        let range = ranges.get(i).copied().unwrap_or(0.0);
        if range > best_range {
            best = i;
            best_range = range;
        }
    }
    best
}

fn as_doubles(value: &Value) -> Option<Vec<f64>> {
    value
        .to_field_values()?
        .iter()
        .map(|v| match v {
            Value::Scalar(s) => s.as_f64(),
            _ => None,
        })
        .collect()
}

/// Absolute range of each field over the planned positions.
///
/// `None` when the scan object does not say enough to compare fields.
fn field_ranges(device: &str, scan_object: &ScanObject) -> Result<Option<Vec<f64>>> {
    match scan_object {
        ScanObject::Explicit(points) => {
            let mut points = points.iter().filter_map(as_doubles);
            let Some(first) = points.next() else {
                return Ok(None);
            };
            let mut min = first.clone();
            let mut max = first;
            for point in points {
                for (i, v) in point.iter().enumerate().take(min.len()) {
                    min[i] = min[i].min(*v);
                    max[i] = max[i].max(*v);
                }
            }
            Ok(Some(min.iter().zip(&max).map(|(a, b)| (b - a).abs()).collect()))
        }
        ScanObject::Implicit { start, stop, step } => {
            // Needs a start plus a stop or, failing that, a step. The step is
            // compared against the start the same way a stop would be.
            let Some(start) = start.as_ref().and_then(as_doubles) else {
                return Ok(None);
            };
            let (other, label) = match (stop, step) {
                (Some(stop), _) => (stop, "stop"),
                (None, Some(step)) => (step, "step"),
                (None, None) => return Ok(None),
            };
            let Some(other) = as_doubles(other) else {
                return Ok(None);
            };
            if start.len() != other.len() {
                return Err(NexusError::InvalidDeviceConfig {
                    device: device.to_string(),
                    message: format!(
                        "start and {} of the scan object have different lengths ({} and {})",
                        label,
                        start.len(),
                        other.len()
                    ),
                });
            }
            Ok(Some(start.iter().zip(&other).map(|(a, b)| (b - a).abs()).collect()))
        }
    }
}
