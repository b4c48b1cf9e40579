//! Sharding plans: per-table placements, validation, and persistence.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::table::{EmbeddingTableSpec, TableSet};
use crate::topology::Topology;

/// How a table's rows and columns are distributed across devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingStrategy {
    /// The whole table on a single device.
    TableWise,
    /// Capacity split across all devices; each shard holds a row range at
    /// full width.
    RowWise,
    /// Width split across all devices; each shard holds a column range over
    /// all rows. Requires the width to divide evenly by the world size.
    ColumnWise,
}

impl fmt::Display for ShardingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableWise => write!(f, "table_wise"),
            Self::RowWise => write!(f, "row_wise"),
            Self::ColumnWise => write!(f, "column_wise"),
        }
    }
}

/// One device's slice of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// Owning device ordinal (`0..world_size`).
    pub device: usize,
    /// First row of the slice.
    pub row_start: usize,
    /// Rows in the slice.
    pub num_rows: usize,
    /// First column of the slice.
    pub col_start: usize,
    /// Columns in the slice.
    pub num_cols: usize,
    /// Bytes the slice occupies on its device.
    pub size_in_bytes: usize,
}

/// A table's chosen strategy and its shards in device order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePlacement {
    pub strategy: ShardingStrategy,
    pub shards: Vec<Shard>,
}

/// A complete assignment of every table in a set to devices.
///
/// Tables are keyed in a `BTreeMap` so the serialized form is canonical:
/// plans compare equal exactly when their JSON is byte-identical, which is
/// what lets every process in a group derive the plan independently and
/// agree without communicating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingPlan {
    pub tables: BTreeMap<String, TablePlacement>,
}

impl ShardingPlan {
    /// Placement for `table`, if planned.
    #[must_use]
    pub fn placement(&self, table: &str) -> Option<&TablePlacement> {
        self.tables.get(table)
    }

    /// Number of planned tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total bytes assigned to each device, indexed by ordinal.
    ///
    /// This is the memory report a caller compares against the topology's
    /// per-device budget; the planner itself never rejects a plan for
    /// oversubscribing.
    #[must_use]
    pub fn device_memory_bytes(&self, world_size: usize) -> Vec<usize> {
        let mut totals = vec![0usize; world_size];
        for placement in self.tables.values() {
            for shard in &placement.shards {
                if let Some(total) = totals.get_mut(shard.device) {
                    *total += shard.size_in_bytes;
                }
            }
        }
        totals
    }

    /// Check that this plan exactly covers `set` on `topology`.
    ///
    /// Verifies one placement per table with no strays, every device within
    /// `0..world_size`, shards that tile the table according to the
    /// strategy, and recorded byte sizes consistent with each spec's dtype.
    ///
    /// # Errors
    /// Returns `Error::Planning` describing the first violation found.
    pub fn validate(&self, set: &TableSet, topology: &Topology) -> Result<()> {
        for spec in set.tables() {
            let Some(placement) = self.tables.get(&spec.name) else {
                return Err(Error::Planning(format!(
                    "no placement for table '{}'",
                    spec.name
                )));
            };
            validate_placement(spec, placement, topology.world_size())?;
        }
        for name in self.tables.keys() {
            if set.table(name).is_none() {
                return Err(Error::Planning(format!(
                    "placement for unknown table '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Serialize as pretty JSON with a stable key order.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a plan from JSON.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a plan from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write the plan to a JSON file.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

fn validate_placement(
    spec: &EmbeddingTableSpec,
    placement: &TablePlacement,
    world_size: usize,
) -> Result<()> {
    for shard in &placement.shards {
        if shard.device >= world_size {
            return Err(Error::Planning(format!(
                "table '{}' places a shard on device {} outside 0..{world_size}",
                spec.name, shard.device
            )));
        }
        let implied = shard.num_rows * shard.num_cols * spec.dtype.size_in_bytes();
        if shard.size_in_bytes != implied {
            return Err(Error::Planning(format!(
                "shard of '{}' records {} bytes, geometry implies {implied}",
                spec.name, shard.size_in_bytes
            )));
        }
    }

    match placement.strategy {
        ShardingStrategy::TableWise => {
            let [shard] = placement.shards.as_slice() else {
                return Err(Error::Planning(format!(
                    "table-wise placement for '{}' must have exactly one shard, got {}",
                    spec.name,
                    placement.shards.len()
                )));
            };
            if shard.row_start != 0
                || shard.num_rows != spec.capacity
                || shard.col_start != 0
                || shard.num_cols != spec.width
            {
                return Err(Error::Planning(format!(
                    "table-wise shard of '{}' must cover the whole table",
                    spec.name
                )));
            }
        }
        ShardingStrategy::RowWise => {
            if placement.shards.len() != world_size {
                return Err(Error::Planning(format!(
                    "row-wise placement for '{}' needs one shard per device ({world_size}), got {}",
                    spec.name,
                    placement.shards.len()
                )));
            }
            let mut next_row = 0;
            for (rank, shard) in placement.shards.iter().enumerate() {
                if shard.device != rank
                    || shard.row_start != next_row
                    || shard.col_start != 0
                    || shard.num_cols != spec.width
                {
                    return Err(Error::Planning(format!(
                        "row-wise shards of '{}' must tile rows in device order at full width",
                        spec.name
                    )));
                }
                next_row += shard.num_rows;
            }
            if next_row != spec.capacity {
                return Err(Error::Planning(format!(
                    "row-wise shards of '{}' cover {next_row} rows, table has {}",
                    spec.name, spec.capacity
                )));
            }
        }
        ShardingStrategy::ColumnWise => {
            if placement.shards.len() != world_size {
                return Err(Error::Planning(format!(
                    "column-wise placement for '{}' needs one shard per device ({world_size}), got {}",
                    spec.name,
                    placement.shards.len()
                )));
            }
            let mut next_col = 0;
            for (rank, shard) in placement.shards.iter().enumerate() {
                if shard.device != rank
                    || shard.col_start != next_col
                    || shard.row_start != 0
                    || shard.num_rows != spec.capacity
                {
                    return Err(Error::Planning(format!(
                        "column-wise shards of '{}' must tile columns in device order over all rows",
                        spec.name
                    )));
                }
                next_col += shard.num_cols;
            }
            if next_col != spec.width {
                return Err(Error::Planning(format!(
                    "column-wise shards of '{}' cover {next_col} columns, table has {}",
                    spec.name, spec.width
                )));
            }
        }
    }
    Ok(())
}
