//! Materialized embedding tables and pooled lookup routing.

use std::sync::Arc;

use crate::dense::DenseMatrix;
use crate::device::Device;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::keyed::KeyedJaggedCollection;
use crate::table::{EmbeddingTableSpec, Pooling, TableSet};

/// One materialized table: `capacity * width` rows stored as raw bytes in
/// the spec's dtype.
///
/// Uses `Arc<Vec<u8>>` so clones and device re-tags are cheap (shared
/// backing). Rows are widened to f32 when read.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    spec: EmbeddingTableSpec,
    data: Arc<Vec<u8>>,
    device: Device,
}

impl EmbeddingTable {
    /// Zero-initialized storage for `spec`.
    #[must_use]
    pub fn zeros(spec: &EmbeddingTableSpec, device: Device) -> Self {
        Self {
            spec: spec.clone(),
            data: Arc::new(vec![0u8; spec.size_in_bytes()]),
            device,
        }
    }

    /// Encode row-major f32 weights into the spec's dtype.
    ///
    /// # Errors
    /// Returns `Error::Shape` if `rows.len() != capacity * width`.
    pub fn from_f32(spec: &EmbeddingTableSpec, device: Device, rows: &[f32]) -> Result<Self> {
        let numel = spec.capacity * spec.width;
        if rows.len() != numel {
            return Err(Error::Shape(format!(
                "table '{}' expects {numel} values ({} x {}), got {}",
                spec.name,
                spec.capacity,
                spec.width,
                rows.len()
            )));
        }
        let data = match spec.dtype {
            DType::F32 => bytemuck::cast_slice(rows).to_vec(),
            DType::F16 => {
                let halves: Vec<half::f16> =
                    rows.iter().map(|&v| half::f16::from_f32(v)).collect();
                bytemuck::cast_slice(&halves).to_vec()
            }
            DType::BF16 => {
                let halves: Vec<half::bf16> =
                    rows.iter().map(|&v| half::bf16::from_f32(v)).collect();
                bytemuck::cast_slice(&halves).to_vec()
            }
        };
        Ok(Self {
            spec: spec.clone(),
            data: Arc::new(data),
            device,
        })
    }

    #[must_use]
    pub fn spec(&self) -> &EmbeddingTableSpec {
        &self.spec
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Raw table storage.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Row `row` widened to f32.
    ///
    /// # Panics
    /// Panics if `row >= capacity`.
    #[must_use]
    pub fn row_f32(&self, row: usize) -> Vec<f32> {
        assert!(
            row < self.spec.capacity,
            "row {row} out of range for capacity {}",
            self.spec.capacity
        );
        let bytes = self.row_bytes(row);
        match self.spec.dtype {
            DType::F32 => bytemuck::cast_slice::<u8, f32>(bytes).to_vec(),
            DType::F16 => {
                let halves: &[half::f16] = bytemuck::cast_slice(bytes);
                halves.iter().map(|v| v.to_f32()).collect()
            }
            DType::BF16 => {
                let halves: &[half::bf16] = bytemuck::cast_slice(bytes);
                halves.iter().map(|v| v.to_f32()).collect()
            }
        }
    }

    fn row_bytes(&self, row: usize) -> &[u8] {
        let stride = self.spec.width * self.spec.dtype.size_in_bytes();
        &self.data[row * stride..(row + 1) * stride]
    }

    /// Add row `row` element-wise into `acc`, widening to f32.
    fn accumulate_row(&self, row: usize, acc: &mut [f32]) {
        let bytes = self.row_bytes(row);
        match self.spec.dtype {
            DType::F32 => {
                let row: &[f32] = bytemuck::cast_slice(bytes);
                for (a, v) in acc.iter_mut().zip(row) {
                    *a += v;
                }
            }
            DType::F16 => {
                let row: &[half::f16] = bytemuck::cast_slice(bytes);
                for (a, v) in acc.iter_mut().zip(row) {
                    *a += v.to_f32();
                }
            }
            DType::BF16 => {
                let row: &[half::bf16] = bytemuck::cast_slice(bytes);
                for (a, v) in acc.iter_mut().zip(row) {
                    *a += v.to_f32();
                }
            }
        }
    }
}

/// A set of materialized tables addressable by name, with pooled lookup.
///
/// Construction is two-phase: a [`TableSet`] carries the pure structure, and
/// [`materialize`](Self::materialize) (or [`zeros`](Self::zeros)) performs
/// the allocation step against a concrete device.
#[derive(Debug, Clone)]
pub struct EmbeddingCollection {
    set: TableSet,
    /// parallel to `set.tables()`
    tables: Vec<EmbeddingTable>,
    device: Device,
}

impl EmbeddingCollection {
    /// Allocate storage for every table in `set`, initializing each from
    /// `init` (row-major f32, `capacity * width` values per table).
    ///
    /// # Errors
    /// Returns `Error::Shape` if `init` produces a buffer of the wrong size
    /// for some table.
    pub fn materialize<F>(set: &TableSet, device: Device, mut init: F) -> Result<Self>
    where
        F: FnMut(&EmbeddingTableSpec) -> Vec<f32>,
    {
        let mut tables = Vec::with_capacity(set.len());
        for spec in set.tables() {
            let rows = init(spec);
            tables.push(EmbeddingTable::from_f32(spec, device, &rows)?);
        }
        Ok(Self {
            set: set.clone(),
            tables,
            device,
        })
    }

    /// Zero-initialized storage for every table in `set`.
    #[must_use]
    pub fn zeros(set: &TableSet, device: Device) -> Self {
        let tables = set
            .tables()
            .iter()
            .map(|spec| EmbeddingTable::zeros(spec, device))
            .collect();
        Self {
            set: set.clone(),
            tables,
            device,
        }
    }

    #[must_use]
    pub fn set(&self) -> &TableSet {
        &self.set
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// The materialized table named `name`.
    ///
    /// # Errors
    /// Returns `Error::MissingKey` if no such table exists.
    pub fn table(&self, name: &str) -> Result<&EmbeddingTable> {
        self.tables
            .iter()
            .find(|t| t.spec().name == name)
            .ok_or_else(|| Error::MissingKey(name.to_string()))
    }

    /// Route a batch through every table and pool per batch element.
    ///
    /// For each table in declaration order, the batch is restricted to the
    /// table's features (via [`KeyedJaggedCollection::select`]) and each
    /// batch element's ids, across all of those features, index rows that
    /// are reduced to one `width`-wide vector: `Sum` adds them, `Mean`
    /// additionally divides by the number of rows gathered. A batch element
    /// with no ids pools to the zero vector; it never fails and never
    /// produces NaN.
    ///
    /// Returns one `(table name, (batch_size, width) matrix)` pair per
    /// table, in declaration order.
    ///
    /// # Errors
    /// - `Error::MissingKey` if a table's feature is absent from `batch`.
    /// - `Error::IndexOutOfRange` if an id is `>= capacity`.
    pub fn forward(
        &self,
        batch: &KeyedJaggedCollection<u64>,
    ) -> Result<Vec<(String, DenseMatrix<f32>)>> {
        let mut outputs = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let spec = table.spec();
            let features: Vec<&str> = spec.feature_names.iter().map(String::as_str).collect();
            let sub = batch.select(&features)?;

            let mut pooled = DenseMatrix::filled(sub.batch_size(), spec.width, 0.0f32);
            for b in 0..sub.batch_size() {
                let acc = pooled.row_mut(b);
                let mut gathered = 0usize;
                for k in 0..sub.num_keys() {
                    for &id in sub.group_at(k, b) {
                        let row = usize::try_from(id).unwrap_or(usize::MAX);
                        if row >= spec.capacity {
                            return Err(Error::IndexOutOfRange {
                                table: spec.name.clone(),
                                index: id,
                                capacity: spec.capacity,
                            });
                        }
                        table.accumulate_row(row, acc);
                        gathered += 1;
                    }
                }
                if spec.pooling == Pooling::Mean && gathered > 0 {
                    let inv = 1.0 / gathered as f32;
                    for v in acc.iter_mut() {
                        *v *= inv;
                    }
                }
            }
            outputs.push((spec.name.clone(), pooled));
        }
        Ok(outputs)
    }
}
