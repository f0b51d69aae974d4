//! Lazily written, growable datasets.
//!
//! Per-point data is written one slice at a time into a dataset whose outer
//! dimensions follow the scan and whose inner dimensions follow the value of a
//! single point. The adapter layer only talks to the [`LazyWriteableDataset`]
//! trait; the file backend supplies the implementation through a
//! [`DatasetFactory`]. [`MemoryDatasetFactory`] keeps everything in memory and
//! is what tests and the simulator use.
//!
//! # Example
//!
//! ```rust,ignore
//! let spec = LazyDatasetSpec::new("value", DType::Float64, 1)
//!     .expected_shape(vec![10])
//!     .fill_value(DType::Float64.fill_value(f64::NAN));
//! let mut dataset = MemoryDatasetFactory.create(spec);
//! dataset.set_slice(&SliceND::new(vec![3], vec![4]), &NdArray::scalar(1.5))?;
//! ```

use crate::error::DatasetError;
use crate::value::{shape_size, shape_text, DType, NdArray, Scalar};
use ndarray::{ArrayD, IxDyn, SliceInfoElem};
use std::fmt;

// =============================================================================
// Chunking
// =============================================================================

/// Target size of a single chunk in bytes (1 MiB).
pub const CHUNK_TARGET_BYTES: usize = 1 << 20;

/// Estimates a chunk shape for a dataset.
///
/// Starts from the whole expected shape and halves the leftmost dimension that
/// is not fixed until the chunk fits [`CHUNK_TARGET_BYTES`]. Scan dimensions
/// come first, so small per-point payloads keep many points per chunk while
/// large frames end up one per chunk. `fixed` gives dimensions that must keep
/// a caller supplied size; `max_shape` caps bounded dimensions.
pub fn estimate_chunking(
    expected_shape: &[usize],
    item_bytes: usize,
    fixed: &[Option<usize>],
    max_shape: &[Option<usize>],
) -> Vec<usize> {
    let mut chunk: Vec<usize> = expected_shape
        .iter()
        .enumerate()
        .map(|(i, &dim)| {
            let size = fixed.get(i).copied().flatten().unwrap_or(dim).max(1);
            match max_shape.get(i).copied().flatten() {
                Some(max) if max > 0 => size.min(max),
                _ => size,
            }
        })
        .collect();

    let item_bytes = item_bytes.max(1);
    loop {
        let bytes = shape_size(&chunk).saturating_mul(item_bytes);
        if bytes <= CHUNK_TARGET_BYTES {
            break;
        }
        let reducible = (0..chunk.len())
            .find(|&i| chunk[i] > 1 && fixed.get(i).copied().flatten().is_none());
        match reducible {
            Some(i) => chunk[i] = chunk[i].div_ceil(2),
            None => break,
        }
    }
    chunk
}

// =============================================================================
// Slices
// =============================================================================

/// A hyperslab: `[start, stop)` along each dimension, step 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceND {
    start: Vec<usize>,
    stop: Vec<usize>,
}

impl SliceND {
    pub fn new(start: Vec<usize>, stop: Vec<usize>) -> Self {
        Self { start, stop }
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn stop(&self) -> &[usize] {
        &self.stop
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(a, b)| b.saturating_sub(*a))
            .collect()
    }

    /// The slice as ndarray slicing arguments.
    pub fn to_slice_info(&self) -> Vec<SliceInfoElem> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(&a, &b)| SliceInfoElem::from(a..b.max(a)))
            .collect()
    }
}

impl fmt::Display for SliceND {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (a, b)) in self.start.iter().zip(&self.stop).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", a, b)?;
        }
        f.write_str("]")
    }
}

// =============================================================================
// Dataset trait
// =============================================================================

/// Everything needed to create a lazy dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct LazyDatasetSpec {
    pub name: String,
    pub dtype: DType,
    /// Maximum extent per dimension; `None` is unlimited.
    pub max_shape: Vec<Option<usize>>,
    /// Expected final shape, used for chunk estimation.
    pub expected_shape: Vec<usize>,
    /// Explicit chunk shape; estimated from `expected_shape` when absent.
    pub chunks: Option<Vec<usize>>,
    pub fill_value: Option<Scalar>,
}

impl LazyDatasetSpec {
    /// Spec for a dataset of the given rank with every dimension unlimited.
    pub fn new(name: impl Into<String>, dtype: DType, rank: usize) -> Self {
        Self {
            name: name.into(),
            dtype,
            max_shape: vec![None; rank],
            expected_shape: vec![1; rank],
            chunks: None,
            fill_value: None,
        }
    }

    pub fn max_shape(mut self, max_shape: Vec<Option<usize>>) -> Self {
        self.max_shape = max_shape;
        self
    }

    pub fn expected_shape(mut self, shape: Vec<usize>) -> Self {
        self.expected_shape = shape;
        self
    }

    pub fn chunks(mut self, chunks: Vec<usize>) -> Self {
        self.chunks = Some(chunks);
        self
    }

    pub fn fill_value(mut self, fill: Option<Scalar>) -> Self {
        self.fill_value = fill;
        self
    }

    /// Chunk shape to use: explicit if set, otherwise estimated.
    pub fn resolved_chunks(&self) -> Vec<usize> {
        self.chunks.clone().unwrap_or_else(|| {
            estimate_chunking(
                &self.expected_shape,
                self.dtype.item_bytes(),
                &[],
                &self.max_shape,
            )
        })
    }
}

/// A growable dataset written slice by slice.
pub trait LazyWriteableDataset: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn dtype(&self) -> DType;

    /// Current extent, grown by writes.
    fn shape(&self) -> Vec<usize>;

    fn max_shape(&self) -> &[Option<usize>];

    fn chunking(&self) -> &[usize];

    fn fill_value(&self) -> Option<&Scalar>;

    /// Writes `data` into `slice`, growing the dataset as needed.
    ///
    /// `data` must hold exactly as many elements as the slice; its own shape
    /// may differ (a scalar fills a one-element slice).
    fn set_slice(&mut self, slice: &SliceND, data: &NdArray) -> Result<(), DatasetError>;

    /// Reads `slice`; unwritten cells come back as the fill value.
    fn get_slice(&self, slice: &SliceND) -> Result<NdArray, DatasetError>;
}

/// Creates lazy datasets for a file backend.
pub trait DatasetFactory: Send + Sync + fmt::Debug {
    fn create(&self, spec: LazyDatasetSpec) -> Box<dyn LazyWriteableDataset>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// Factory for [`MemoryLazyDataset`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDatasetFactory;

impl DatasetFactory for MemoryDatasetFactory {
    fn create(&self, spec: LazyDatasetSpec) -> Box<dyn LazyWriteableDataset> {
        Box::new(MemoryLazyDataset::new(spec))
    }
}

/// Dense in-memory dataset.
///
/// Storage is allocated ahead of the written extent and doubles along a
/// dimension when a write reaches past it, so a scan growing one point at a
/// time does not copy on every write.
#[derive(Debug, Clone)]
pub struct MemoryLazyDataset {
    name: String,
    dtype: DType,
    shape: Vec<usize>,
    max_shape: Vec<Option<usize>>,
    chunks: Vec<usize>,
    fill_value: Option<Scalar>,
    data: ArrayD<Scalar>,
}

impl MemoryLazyDataset {
    pub fn new(spec: LazyDatasetSpec) -> Self {
        let chunks = spec.resolved_chunks();
        let shape = vec![0; spec.max_shape.len()];
        let empty = empty_cell(spec.dtype, spec.fill_value.as_ref());
        Self {
            data: ArrayD::from_elem(IxDyn(&shape), empty),
            shape,
            name: spec.name,
            dtype: spec.dtype,
            max_shape: spec.max_shape,
            chunks,
            fill_value: spec.fill_value,
        }
    }

    fn check_rank(&self, slice: &SliceND) -> Result<(), DatasetError> {
        if slice.rank() != self.max_shape.len() {
            return Err(DatasetError::RankMismatch {
                slice_rank: slice.rank(),
                rank: self.max_shape.len(),
            });
        }
        Ok(())
    }

    fn max_shape_text(&self) -> String {
        let dims: Vec<String> = self
            .max_shape
            .iter()
            .map(|d| d.map_or_else(|| "unlimited".to_string(), |d| d.to_string()))
            .collect();
        format!("[{}]", dims.join(", "))
    }

    /// Makes the storage at least `stop` in every dimension.
    fn reserve(&mut self, stop: &[usize]) {
        let capacity = self.data.shape().to_vec();
        if stop.iter().zip(&capacity).all(|(s, c)| s <= c) {
            return;
        }
        let grown: Vec<usize> = stop
            .iter()
            .zip(&capacity)
            .zip(&self.max_shape)
            .map(|((&s, &c), max)| {
                if s <= c {
                    return c;
                }
                let doubled = s.max(c.saturating_mul(2));
                max.map_or(doubled, |m| doubled.min(m))
            })
            .collect();
        let empty = empty_cell(self.dtype, self.fill_value.as_ref());
        let mut data = ArrayD::from_elem(IxDyn(&grown), empty);
        let old: Vec<SliceInfoElem> = capacity.iter().map(|&c| SliceInfoElem::from(0..c)).collect();
        data.slice_mut(&old[..]).assign(&self.data);
        self.data = data;
    }
}

/// What an unwritten cell reads as.
fn empty_cell(dtype: DType, fill_value: Option<&Scalar>) -> Scalar {
    match fill_value {
        Some(fill) => fill.clone(),
        None if dtype == DType::String => Scalar::Str(String::new()),
        None => Scalar::Int64(0).cast(dtype).unwrap_or(Scalar::Bool(false)),
    }
}

impl LazyWriteableDataset for MemoryLazyDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn max_shape(&self) -> &[Option<usize>] {
        &self.max_shape
    }

    fn chunking(&self) -> &[usize] {
        &self.chunks
    }

    fn fill_value(&self) -> Option<&Scalar> {
        self.fill_value.as_ref()
    }

    fn set_slice(&mut self, slice: &SliceND, data: &NdArray) -> Result<(), DatasetError> {
        self.check_rank(slice)?;
        let exceeds = slice
            .stop()
            .iter()
            .zip(&self.max_shape)
            .any(|(stop, max)| max.is_some_and(|m| *stop > m));
        if exceeds {
            return Err(DatasetError::OutOfBounds {
                slice: slice.to_string(),
                max_shape: self.max_shape_text(),
            });
        }
        let slice_shape = slice.shape();
        if shape_size(&slice_shape) != data.size() {
            return Err(DatasetError::SizeMismatch {
                data_shape: shape_text(data.shape()),
                slice_shape: shape_text(&slice_shape),
            });
        }
        // Convert everything before touching the storage so a bad element
        // leaves the dataset as it was.
        let converted = data
            .iter()
            .map(|s| {
                s.cast(self.dtype).ok_or_else(|| DatasetError::TypeMismatch {
                    value: s.to_string(),
                    value_type: s.dtype().to_string(),
                    dtype: self.dtype.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let block = ArrayD::from_shape_vec(IxDyn(&slice_shape), converted).map_err(|_| {
            DatasetError::SizeMismatch {
                data_shape: shape_text(data.shape()),
                slice_shape: shape_text(&slice_shape),
            }
        })?;

        self.reserve(slice.stop());
        self.data.slice_mut(&slice.to_slice_info()[..]).assign(&block);
        for (dim, stop) in self.shape.iter_mut().zip(slice.stop()) {
            *dim = (*dim).max(*stop);
        }
        Ok(())
    }

    fn get_slice(&self, slice: &SliceND) -> Result<NdArray, DatasetError> {
        self.check_rank(slice)?;
        let beyond = slice
            .stop()
            .iter()
            .zip(&self.shape)
            .any(|(stop, dim)| stop > dim);
        if beyond {
            return Err(DatasetError::OutOfBounds {
                slice: slice.to_string(),
                max_shape: shape_text(&self.shape),
            });
        }
        let view = self.data.slice(&slice.to_slice_info()[..]);
        Ok(NdArray::from_array(self.dtype, view.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking_small_payload_keeps_whole_scan() {
        let chunks = estimate_chunking(&[100, 10], 8, &[], &[]);
        assert_eq!(chunks, vec![100, 10]);
    }

    #[test]
    fn test_chunking_large_frames_split_scan_dimension_first() {
        let chunks = estimate_chunking(&[50, 512, 512], 4, &[], &[]);
        assert_eq!(chunks, vec![1, 512, 512]);
        assert!(shape_size(&chunks) * 4 <= CHUNK_TARGET_BYTES);
    }

    #[test]
    fn test_chunking_respects_fixed_and_max() {
        let chunks = estimate_chunking(&[1000, 4096], 8, &[None, Some(4096)], &[None, None]);
        assert_eq!(chunks[1], 4096);
        assert!(chunks[0] * 4096 * 8 <= CHUNK_TARGET_BYTES);

        let capped = estimate_chunking(&[10], 8, &[], &[Some(3)]);
        assert_eq!(capped, vec![3]);
    }

    #[test]
    fn test_slice_display_and_shape() {
        let slice = SliceND::new(vec![1, 0], vec![3, 2]);
        assert_eq!(slice.to_string(), "[1:3, 0:2]");
        assert_eq!(slice.shape(), vec![2, 2]);
        assert_eq!(slice.to_slice_info().len(), 2);
        assert!(SliceND::new(vec![], vec![]).to_slice_info().is_empty());
    }

    #[test]
    fn test_memory_dataset_grows_and_fills() {
        let spec = LazyDatasetSpec::new("value", DType::Float64, 1)
            .fill_value(DType::Float64.fill_value(f64::NAN));
        let mut ds = MemoryDatasetFactory.create(spec);
        ds.set_slice(&SliceND::new(vec![2], vec![3]), &NdArray::scalar(4.0))
            .unwrap();
        assert_eq!(ds.shape(), vec![3]);

        let read = ds.get_slice(&SliceND::new(vec![0], vec![3])).unwrap();
        assert!(read.get(&[0]).is_some_and(Scalar::is_nan));
        assert_eq!(read.get(&[2]), Some(&Scalar::Float64(4.0)));
    }

    #[test]
    fn test_memory_dataset_holds_image_frames() {
        let spec = LazyDatasetSpec::new("data", DType::UInt16, 3)
            .max_shape(vec![None, Some(128), Some(128)])
            .expected_shape(vec![20, 128, 128]);
        let mut ds = MemoryLazyDataset::new(spec);
        for point in 0..20usize {
            let frame = NdArray::full(vec![128, 128], Scalar::UInt16(point as u16));
            ds.set_slice(&SliceND::new(vec![point, 0, 0], vec![point + 1, 128, 128]), &frame)
                .unwrap();
        }
        assert_eq!(ds.shape(), vec![20, 128, 128]);

        let read = ds
            .get_slice(&SliceND::new(vec![7, 100, 0], vec![9, 102, 128]))
            .unwrap();
        assert_eq!(read.shape(), &[2, 2, 128]);
        assert_eq!(read.get(&[0, 1, 127]), Some(&Scalar::UInt16(7)));
        assert_eq!(read.get(&[1, 0, 0]), Some(&Scalar::UInt16(8)));

        let err = ds.get_slice(&SliceND::new(vec![20, 0, 0], vec![21, 1, 1])).unwrap_err();
        assert!(matches!(err, DatasetError::OutOfBounds { .. }));
    }

    #[test]
    fn test_memory_dataset_reads_unwritten_gap_as_fill() {
        let spec = LazyDatasetSpec::new("value", DType::Int32, 2);
        let mut ds = MemoryLazyDataset::new(spec);
        ds.set_slice(&SliceND::new(vec![0, 0], vec![1, 2]), &NdArray::vector([1i32, 2]).unwrap())
            .unwrap();
        ds.set_slice(&SliceND::new(vec![3, 1], vec![4, 2]), &NdArray::scalar(9i32))
            .unwrap();
        assert_eq!(ds.shape(), vec![4, 2]);
        let all = ds.get_slice(&SliceND::new(vec![0, 0], vec![4, 2])).unwrap();
        assert_eq!(
            all.to_vec(),
            [1, 2, 0, 0, 0, 0, 0, 9].map(Scalar::Int32).to_vec()
        );
    }

    #[test]
    fn test_memory_dataset_rejects_bad_writes() {
        let spec = LazyDatasetSpec::new("data", DType::Int32, 2).max_shape(vec![Some(2), None]);
        let mut ds = MemoryLazyDataset::new(spec);

        let err = ds
            .set_slice(&SliceND::new(vec![2, 0], vec![3, 1]), &NdArray::scalar(1i32))
            .unwrap_err();
        assert!(matches!(err, DatasetError::OutOfBounds { .. }));

        let err = ds
            .set_slice(&SliceND::new(vec![0, 0], vec![1, 2]), &NdArray::scalar(1i32))
            .unwrap_err();
        assert!(matches!(err, DatasetError::SizeMismatch { .. }));

        let err = ds
            .set_slice(&SliceND::new(vec![0, 0], vec![1, 1]), &NdArray::scalar("x"))
            .unwrap_err();
        assert!(matches!(err, DatasetError::TypeMismatch { .. }));
        assert_eq!(ds.shape(), vec![0, 0]);
    }
}
