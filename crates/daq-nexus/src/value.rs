//! Device values and the arrays they are stored as.
//!
//! A device reports its current position as a [`Value`]: a single scalar, a
//! primitive array, or a list of per-field values. Before anything is written
//! the value is normalised into one entry per field (see
//! [`Value::to_field_values`]), and each entry is turned into an [`NdArray`]
//! with a concrete [`DType`].

use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
}

impl DType {
    /// Nominal element size in bytes, used for chunk estimation.
    ///
    /// Strings have no fixed width; they count as a pointer-sized element.
    pub fn item_bytes(self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 | DType::String => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Int8
                | DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::UInt8
                | DType::UInt16
                | DType::UInt32
                | DType::UInt64
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_float() || self.is_integer()
    }

    fn is_unsigned(self) -> bool {
        matches!(
            self,
            DType::UInt8 | DType::UInt16 | DType::UInt32 | DType::UInt64
        )
    }

    /// Fill value for unwritten cells: `float_fill` for floats, zero for
    /// integers, none for booleans and strings.
    pub fn fill_value(self, float_fill: f64) -> Option<Scalar> {
        match self {
            DType::Float64 => Some(Scalar::Float64(float_fill)),
            DType::Float32 => Some(Scalar::Float32(float_fill as f32)),
            DType::Bool | DType::String => None,
            int => Scalar::Int64(0).cast(int),
        }
    }

    /// Common type two element types can both be stored as, if any.
    pub fn promote(self, other: DType) -> Option<DType> {
        if self == other {
            return Some(self);
        }
        if self == DType::String || other == DType::String {
            return None;
        }
        if self == DType::Bool {
            return Some(other);
        }
        if other == DType::Bool {
            return Some(self);
        }
        if self.is_float() || other.is_float() {
            return Some(DType::Float64);
        }
        if self.is_unsigned() && other.is_unsigned() {
            return Some(if self.item_bytes() >= other.item_bytes() {
                self
            } else {
                other
            });
        }
        Some(DType::Int64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::String => "string",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Str(String),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::Int8(_) => DType::Int8,
            Scalar::Int16(_) => DType::Int16,
            Scalar::Int32(_) => DType::Int32,
            Scalar::Int64(_) => DType::Int64,
            Scalar::UInt8(_) => DType::UInt8,
            Scalar::UInt16(_) => DType::UInt16,
            Scalar::UInt32(_) => DType::UInt32,
            Scalar::UInt64(_) => DType::UInt64,
            Scalar::Float32(_) => DType::Float32,
            Scalar::Float64(_) => DType::Float64,
            Scalar::Str(_) => DType::String,
        }
    }

    /// Numeric value as `f64`; booleans count as 0 or 1, strings have none.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            Scalar::Int8(v) => Some(f64::from(v)),
            Scalar::Int16(v) => Some(f64::from(v)),
            Scalar::Int32(v) => Some(f64::from(v)),
            Scalar::Int64(v) => Some(v as f64),
            Scalar::UInt8(v) => Some(f64::from(v)),
            Scalar::UInt16(v) => Some(f64::from(v)),
            Scalar::UInt32(v) => Some(f64::from(v)),
            Scalar::UInt64(v) => Some(v as f64),
            Scalar::Float32(v) => Some(f64::from(v)),
            Scalar::Float64(v) => Some(v),
            Scalar::Str(_) => None,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match *self {
            Scalar::Bool(b) => Some(i128::from(b)),
            Scalar::Int8(v) => Some(i128::from(v)),
            Scalar::Int16(v) => Some(i128::from(v)),
            Scalar::Int32(v) => Some(i128::from(v)),
            Scalar::Int64(v) => Some(i128::from(v)),
            Scalar::UInt8(v) => Some(i128::from(v)),
            Scalar::UInt16(v) => Some(i128::from(v)),
            Scalar::UInt32(v) => Some(i128::from(v)),
            Scalar::UInt64(v) => Some(i128::from(v)),
            Scalar::Float32(v) => float_to_i128(f64::from(v)),
            Scalar::Float64(v) => float_to_i128(v),
            Scalar::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to another element type.
    ///
    /// Numbers convert between each other (floats truncate towards zero when
    /// stored as integers, out-of-range values fail); strings only convert to
    /// strings.
    pub fn cast(&self, dtype: DType) -> Option<Scalar> {
        if self.dtype() == dtype {
            return Some(self.clone());
        }
        if dtype == DType::String || self.dtype() == DType::String {
            return None;
        }
        match dtype {
            DType::Float64 => self.as_f64().map(Scalar::Float64),
            DType::Float32 => self.as_f64().map(|v| Scalar::Float32(v as f32)),
            DType::Bool => self.as_f64().map(|v| Scalar::Bool(v != 0.0)),
            DType::Int8 => self.as_i128().and_then(|v| i8::try_from(v).ok()).map(Scalar::Int8),
            DType::Int16 => self
                .as_i128()
                .and_then(|v| i16::try_from(v).ok())
                .map(Scalar::Int16),
            DType::Int32 => self
                .as_i128()
                .and_then(|v| i32::try_from(v).ok())
                .map(Scalar::Int32),
            DType::Int64 => self
                .as_i128()
                .and_then(|v| i64::try_from(v).ok())
                .map(Scalar::Int64),
            DType::UInt8 => self.as_i128().and_then(|v| u8::try_from(v).ok()).map(Scalar::UInt8),
            DType::UInt16 => self
                .as_i128()
                .and_then(|v| u16::try_from(v).ok())
                .map(Scalar::UInt16),
            DType::UInt32 => self
                .as_i128()
                .and_then(|v| u32::try_from(v).ok())
                .map(Scalar::UInt32),
            DType::UInt64 => self
                .as_i128()
                .and_then(|v| u64::try_from(v).ok())
                .map(Scalar::UInt64),
            DType::String => None,
        }
    }

    /// True for floating point NaN values.
    pub fn is_nan(&self) -> bool {
        match *self {
            Scalar::Float32(v) => v.is_nan(),
            Scalar::Float64(v) => v.is_nan(),
            _ => false,
        }
    }
}

fn float_to_i128(v: f64) -> Option<i128> {
    if v.is_finite() && v.abs() < 1e38 {
        Some(v.trunc() as i128)
    } else {
        None
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int8(v) => write!(f, "{}", v),
            Scalar::Int16(v) => write!(f, "{}", v),
            Scalar::Int32(v) => write!(f, "{}", v),
            Scalar::Int64(v) => write!(f, "{}", v),
            Scalar::UInt8(v) => write!(f, "{}", v),
            Scalar::UInt16(v) => write!(f, "{}", v),
            Scalar::UInt32(v) => write!(f, "{}", v),
            Scalar::UInt64(v) => write!(f, "{}", v),
            Scalar::Float32(v) => write!(f, "{}", v),
            Scalar::Float64(v) => write!(f, "{}", v),
            Scalar::Str(v) => write!(f, "\"{}\"", v),
        }
    }
}

macro_rules! impl_from_primitive {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Scalar {
                fn from(v: $t) -> Self {
                    Scalar::$variant(v)
                }
            }

            impl From<$t> for NdArray {
                fn from(v: $t) -> Self {
                    NdArray::scalar(v)
                }
            }

            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Scalar(Scalar::$variant(v))
                }
            }
        )*
    };
}

impl_from_primitive!(
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => Str,
);

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<&str> for NdArray {
    fn from(v: &str) -> Self {
        NdArray::scalar(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(Scalar::from(v))
    }
}

impl From<Scalar> for NdArray {
    fn from(v: Scalar) -> Self {
        NdArray::scalar(v)
    }
}

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Value::Scalar(v)
    }
}

/// Number of elements in an array of the given shape.
pub fn shape_size(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Formats a shape as `[a, b, c]`.
pub fn shape_text(shape: &[usize]) -> String {
    format!("{:?}", shape)
}

/// A typed n-dimensional array. Rank 0 holds exactly one element.
///
/// Every element has the array's [`DType`]; constructors convert elements
/// on the way in.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    dtype: DType,
    data: ArrayD<Scalar>,
}

impl NdArray {
    /// Rank-0 array holding one value.
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        let value = value.into();
        Self {
            dtype: value.dtype(),
            data: ArrayD::from_elem(IxDyn(&[]), value),
        }
    }

    /// Builds an array, checking the element count and converting every
    /// element to `dtype`. Elements are taken in row-major order.
    pub fn new(dtype: DType, shape: Vec<usize>, data: Vec<Scalar>) -> Result<Self, String> {
        if shape_size(&shape) != data.len() {
            return Err(format!(
                "{} elements do not fill shape {}",
                data.len(),
                shape_text(&shape)
            ));
        }
        let data = data
            .into_iter()
            .map(|s| {
                s.cast(dtype)
                    .ok_or_else(|| format!("{} cannot be stored as {}", s, dtype))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let data = ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| e.to_string())?;
        Ok(Self { dtype, data })
    }

    /// Wraps an array whose elements are already of type `dtype`.
    pub(crate) fn from_array(dtype: DType, data: ArrayD<Scalar>) -> Self {
        Self { dtype, data }
    }

    /// One-dimensional array; the element type is the common type of all items.
    pub fn vector<T: Into<Scalar>>(values: impl IntoIterator<Item = T>) -> Result<Self, String> {
        let data: Vec<Scalar> = values.into_iter().map(Into::into).collect();
        let dtype = common_dtype(data.iter().map(Scalar::dtype))?;
        let len = data.len();
        Self::new(dtype, vec![len], data)
    }

    /// Array of the given shape where every element is `value`.
    pub fn full(shape: Vec<usize>, value: Scalar) -> Self {
        Self {
            dtype: value.dtype(),
            data: ArrayD::from_elem(IxDyn(&shape), value),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn rank(&self) -> usize {
        self.data.ndim()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Elements in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &Scalar> + '_ {
        self.data.iter()
    }

    /// Copy of the elements in row-major order.
    pub fn to_vec(&self) -> Vec<Scalar> {
        self.data.iter().cloned().collect()
    }

    /// Borrowed view of the underlying array.
    pub fn view(&self) -> ArrayViewD<'_, Scalar> {
        self.data.view()
    }

    pub fn is_scalar(&self) -> bool {
        self.data.ndim() == 0
    }

    /// Element at an n-dimensional index.
    pub fn get(&self, index: &[usize]) -> Option<&Scalar> {
        self.data.get(index)
    }

    pub fn first(&self) -> Option<&Scalar> {
        self.data.iter().next()
    }

    /// Converts every element to `dtype`, failing if any element cannot be.
    pub fn cast(&self, dtype: DType) -> Option<NdArray> {
        if dtype == self.dtype {
            return Some(self.clone());
        }
        let data = self
            .data
            .iter()
            .map(|s| s.cast(dtype))
            .collect::<Option<Vec<_>>>()?;
        let data = ArrayD::from_shape_vec(self.data.raw_dim(), data).ok()?;
        Some(Self { dtype, data })
    }

    /// Same elements, new shape with the same element count.
    pub fn reshape(&self, shape: Vec<usize>) -> Option<NdArray> {
        let data = ArrayD::from_shape_vec(IxDyn(&shape), self.to_vec()).ok()?;
        Some(Self {
            dtype: self.dtype,
            data,
        })
    }

    /// The `i`th sub-array along the first axis.
    pub fn sub_array(&self, i: usize) -> Option<NdArray> {
        let &first = self.shape().first()?;
        if i >= first {
            return None;
        }
        Some(Self {
            dtype: self.dtype,
            data: self.data.index_axis(Axis(0), i).to_owned(),
        })
    }

    /// Nested JSON rendering of the array contents.
    pub fn to_json(&self) -> serde_json::Value {
        fn nest(view: ArrayViewD<'_, Scalar>) -> serde_json::Value {
            if view.ndim() == 0 {
                return view
                    .iter()
                    .next()
                    .and_then(|s| serde_json::to_value(s).ok())
                    .unwrap_or(serde_json::Value::Null);
            }
            serde_json::Value::Array(view.outer_iter().map(nest).collect())
        }
        nest(self.data.view())
    }
}

fn common_dtype(dtypes: impl IntoIterator<Item = DType>) -> Result<DType, String> {
    let mut iter = dtypes.into_iter();
    let Some(mut acc) = iter.next() else {
        return Ok(DType::Float64);
    };
    for dt in iter {
        acc = acc
            .promote(dt)
            .ok_or_else(|| format!("cannot mix {} and {} elements", acc, dt))?;
    }
    Ok(acc)
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// The current value of a device, as it reports it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// A single element.
    Scalar(Scalar),
    /// A primitive array.
    Array(NdArray),
    /// An object array or list, one entry per field.
    List(Vec<Value>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Scalar(s) => s.dtype().name(),
            Value::Array(_) => "array",
            Value::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Splits the value into one entry per field.
    ///
    /// A scalar becomes a single entry; a one-dimensional array yields one entry
    /// per element; a higher-rank array is split along its first axis; a list
    /// is taken as-is. Returns `None` for [`Value::Null`].
    pub fn to_field_values(&self) -> Option<Vec<Value>> {
        match self {
            Value::Null => None,
            Value::Scalar(_) => Some(vec![self.clone()]),
            Value::Array(arr) => match arr.rank() {
                0 => Some(arr.first().cloned().map(Value::Scalar).into_iter().collect()),
                1 => Some(arr.iter().cloned().map(Value::Scalar).collect()),
                _ => Some(
                    (0..arr.shape()[0])
                        .filter_map(|i| arr.sub_array(i))
                        .map(Value::Array)
                        .collect(),
                ),
            },
            Value::List(items) => Some(items.clone()),
        }
    }

    /// Converts a single field value into an array.
    ///
    /// Lists collapse into a rectangular array when every entry has the same
    /// shape and compatible element types.
    pub fn to_ndarray(&self) -> Result<NdArray, String> {
        match self {
            Value::Null => Err("value is null".to_string()),
            Value::Scalar(s) => Ok(NdArray::scalar(s.clone())),
            Value::Array(arr) => Ok(arr.clone()),
            Value::List(items) => {
                let parts = items
                    .iter()
                    .map(Value::to_ndarray)
                    .collect::<Result<Vec<_>, _>>()?;
                let inner_shape = parts.first().map(|p| p.shape().to_vec()).unwrap_or_default();
                if parts.iter().any(|p| p.shape() != inner_shape.as_slice()) {
                    return Err("ragged list".to_string());
                }
                if parts.is_empty() {
                    return NdArray::new(DType::Float64, vec![0], Vec::new());
                }
                let dtype = common_dtype(parts.iter().map(NdArray::dtype))?;
                let parts = parts
                    .iter()
                    .map(|p| {
                        p.cast(dtype)
                            .ok_or_else(|| format!("{} cannot be stored as {}", p, dtype))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let views: Vec<_> = parts.iter().map(NdArray::view).collect();
                let data = ndarray::stack(Axis(0), &views).map_err(|e| e.to_string())?;
                Ok(NdArray::from_array(dtype, data))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Scalar(s) => write!(f, "{}", s),
            Value::Array(a) => write!(f, "{}", a),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<NdArray> for Value {
    fn from(v: NdArray) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        let data = Array1::from_vec(v.into_iter().map(Scalar::Float64).collect());
        Value::Array(NdArray::from_array(DType::Float64, data.into_dyn()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_values() {
        assert!(DType::Float64.fill_value(f64::NAN).is_some_and(|s| s.is_nan()));
        assert_eq!(DType::Int32.fill_value(f64::NAN), Some(Scalar::Int32(0)));
        assert_eq!(DType::UInt16.fill_value(f64::NAN), Some(Scalar::UInt16(0)));
        assert_eq!(DType::String.fill_value(f64::NAN), None);
        assert_eq!(DType::Float64.fill_value(-1.0), Some(Scalar::Float64(-1.0)));
    }

    #[test]
    fn test_scalar_cast() {
        assert_eq!(Scalar::Int32(3).cast(DType::Float64), Some(Scalar::Float64(3.0)));
        assert_eq!(Scalar::Float64(2.7).cast(DType::Int32), Some(Scalar::Int32(2)));
        assert_eq!(Scalar::Int64(300).cast(DType::UInt8), None);
        assert_eq!(Scalar::Float64(f64::NAN).cast(DType::Int64), None);
        assert_eq!(Scalar::from("x").cast(DType::Float64), None);
        assert_eq!(Scalar::Float64(1.0).cast(DType::String), None);
    }

    #[test]
    fn test_normalise_scalar() {
        let fields = Value::from(1.5).to_field_values().unwrap();
        assert_eq!(fields, vec![Value::from(1.5)]);
    }

    #[test]
    fn test_normalise_primitive_array() {
        let fields = Value::from(vec![1.0, 2.0, 3.0]).to_field_values().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[2], Value::from(3.0));
    }

    #[test]
    fn test_normalise_list_and_null() {
        let v = Value::List(vec![Value::from(1.0), Value::from("open"), Value::Null]);
        let fields = v.to_field_values().unwrap();
        assert_eq!(fields.len(), 3);
        assert!(fields[2].is_null());
        assert!(Value::Null.to_field_values().is_none());
    }

    #[test]
    fn test_normalise_2d_array_splits_first_axis() {
        let arr = NdArray::new(
            DType::Int32,
            vec![2, 3],
            (0..6).map(Scalar::Int32).collect(),
        )
        .unwrap();
        let fields = Value::Array(arr).to_field_values().unwrap();
        assert_eq!(fields.len(), 2);
        let second = fields[1].to_ndarray().unwrap();
        assert_eq!(second.shape(), &[3]);
        assert_eq!(second.get(&[0]), Some(&Scalar::Int32(3)));
    }

    #[test]
    fn test_list_to_ndarray() {
        let v = Value::List(vec![Value::from(1i32), Value::from(2.5)]);
        let arr = v.to_ndarray().unwrap();
        assert_eq!(arr.dtype(), DType::Float64);
        assert_eq!(arr.shape(), &[2]);

        let ragged = Value::List(vec![Value::from(vec![1.0, 2.0]), Value::from(3.0)]);
        assert!(ragged.to_ndarray().is_err());

        let mixed = Value::List(vec![Value::from("a"), Value::from(1.0)]);
        assert!(mixed.to_ndarray().is_err());
    }

    #[test]
    fn test_ndarray_indexing() {
        let arr = NdArray::new(
            DType::Float64,
            vec![2, 2],
            vec![1.0.into(), 2.0.into(), 3.0.into(), 4.0.into()],
        )
        .unwrap();
        assert_eq!(arr.get(&[1, 0]), Some(&Scalar::Float64(3.0)));
        assert_eq!(arr.get(&[2, 0]), None);
        assert_eq!(arr.to_json(), serde_json::json!([[1.0, 2.0], [3.0, 4.0]]));
        assert!(NdArray::new(DType::Float64, vec![3], vec![1.0.into()]).is_err());
    }

    #[test]
    fn test_list_of_arrays_stacks_along_new_axis() {
        let v = Value::List(vec![
            Value::from(vec![1.0, 2.0]),
            Value::Array(NdArray::vector([3i32, 4]).unwrap()),
        ]);
        let arr = v.to_ndarray().unwrap();
        assert_eq!(arr.shape(), &[2, 2]);
        assert_eq!(arr.get(&[1, 1]), Some(&Scalar::Float64(4.0)));
        assert_eq!(arr.sub_array(0).unwrap().to_vec(), vec![Scalar::Float64(1.0), Scalar::Float64(2.0)]);
        assert_eq!(Value::List(vec![]).to_ndarray().unwrap().shape(), &[0]);
    }
}
