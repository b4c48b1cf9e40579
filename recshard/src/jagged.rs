//! Variable-length groups of values over a single flat buffer.

use std::sync::Arc;

use crate::dense::DenseMatrix;
use crate::device::Device;
use crate::error::{Error, Result};

/// A batch of variable-length groups stored as one flat `values` buffer
/// plus per-group `lengths`, with group boundaries (`offsets`) derived at
/// construction: `offsets[0] = 0`, `offsets[i + 1] = offsets[i] + lengths[i]`.
///
/// Buffers are `Arc`-shared so clones and device re-tags are cheap (shared
/// backing). Instances are immutable; every transformation returns a new
/// value and leaves the original intact.
#[derive(Debug, Clone, PartialEq)]
pub struct JaggedSequence<T> {
    values: Arc<Vec<T>>,
    lengths: Arc<Vec<usize>>,
    offsets: Arc<Vec<usize>>,
    device: Device,
}

impl<T: Copy> JaggedSequence<T> {
    /// Build from flat values and per-group lengths.
    ///
    /// Zero-length groups are legal: they contribute nothing to `values`
    /// but keep their slot.
    ///
    /// # Errors
    /// Returns `Error::Shape` if the lengths do not sum to `values.len()`.
    pub fn from_lengths(values: Vec<T>, lengths: Vec<usize>) -> Result<Self> {
        let total: usize = lengths.iter().sum();
        if total != values.len() {
            return Err(Error::Shape(format!(
                "lengths sum to {total} but values holds {} elements",
                values.len()
            )));
        }
        Ok(Self::from_validated(values, lengths, Device::Host))
    }

    /// Build from flat values and group boundary offsets, deriving lengths
    /// (`lengths[i] = offsets[i + 1] - offsets[i]`).
    ///
    /// `offsets` must start at 0, be non-decreasing, and end at
    /// `values.len()`; the result has `offsets.len() - 1` groups.
    ///
    /// # Errors
    /// Returns `Error::Shape` if the offsets violate any of the above.
    pub fn from_offsets(values: Vec<T>, offsets: Vec<usize>) -> Result<Self> {
        match offsets.first() {
            None => return Err(Error::Shape("offsets must not be empty".to_string())),
            Some(&first) if first != 0 => {
                return Err(Error::Shape(format!("offsets must start at 0, got {first}")));
            }
            Some(_) => {}
        }
        if let Some(w) = offsets.windows(2).find(|w| w[1] < w[0]) {
            return Err(Error::Shape(format!(
                "offsets must be non-decreasing, got {} after {}",
                w[1], w[0]
            )));
        }
        let last = offsets[offsets.len() - 1];
        if last != values.len() {
            return Err(Error::Shape(format!(
                "offsets end at {last} but values holds {} elements",
                values.len()
            )));
        }
        let lengths: Vec<usize> = offsets.windows(2).map(|w| w[1] - w[0]).collect();
        Ok(Self {
            values: Arc::new(values),
            lengths: Arc::new(lengths),
            offsets: Arc::new(offsets),
            device: Device::Host,
        })
    }

    /// Construct from buffers whose geometry has already been checked.
    pub(crate) fn from_validated(values: Vec<T>, lengths: Vec<usize>, device: Device) -> Self {
        let offsets = offsets_from_lengths(&lengths);
        Self {
            values: Arc::new(values),
            lengths: Arc::new(lengths),
            offsets: Arc::new(offsets),
            device,
        }
    }

    /// Flat concatenated values across all groups.
    #[must_use]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Per-group element counts.
    #[must_use]
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Group boundaries: group `i` spans `values[offsets[i]..offsets[i + 1]]`.
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.lengths.len()
    }

    /// Total number of stored values across all groups.
    #[must_use]
    pub fn total_values(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Group `i` as a slice of the flat buffer.
    ///
    /// # Panics
    /// Panics if `i >= num_groups()`.
    #[must_use]
    pub fn group(&self, i: usize) -> &[T] {
        assert!(
            i < self.num_groups(),
            "group {i} out of range for {} groups",
            self.num_groups()
        );
        &self.values[self.offsets[i]..self.offsets[i + 1]]
    }

    /// Iterate the groups as slices, one per length entry.
    ///
    /// The iterator is a fresh pass over the same buffers each time it is
    /// requested; nothing is consumed.
    pub fn groups(&self) -> impl ExactSizeIterator<Item = &[T]> + '_ {
        self.offsets.windows(2).map(|w| &self.values[w[0]..w[1]])
    }

    /// Pad or truncate every group to `width`, producing a
    /// `(num_groups, width)` matrix.
    ///
    /// Groups longer than `width` lose their tail; shorter groups are
    /// right-padded with `pad`. The view is lossy: original lengths cannot
    /// be recovered from it.
    #[must_use]
    pub fn to_padded(&self, width: usize, pad: T) -> DenseMatrix<T> {
        let mut out = DenseMatrix::filled(self.num_groups(), width, pad);
        for (i, group) in self.groups().enumerate() {
            let take = group.len().min(width);
            out.row_mut(i)[..take].copy_from_slice(&group[..take]);
        }
        out
    }

    /// Re-tag the sequence onto `device`, leaving the original valid.
    ///
    /// Buffers are shared with the original; every domain is process memory
    /// here, and an execution backend owns any actual transfer.
    #[must_use]
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            values: Arc::clone(&self.values),
            lengths: Arc::clone(&self.lengths),
            offsets: Arc::clone(&self.offsets),
            device,
        }
    }
}

/// Derive group boundaries from lengths: a running sum starting at 0.
pub(crate) fn offsets_from_lengths(lengths: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(lengths.len() + 1);
    let mut acc = 0;
    offsets.push(0);
    for &len in lengths {
        acc += len;
        offsets.push(acc);
    }
    offsets
}
