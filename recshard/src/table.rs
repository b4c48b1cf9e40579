//! Embedding table declarations and feature routing.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{Error, Result};

/// How a batch element's gathered rows are reduced to one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    /// Element-wise sum over the gathered rows.
    Sum,
    /// Sum divided by the number of gathered rows; an empty group pools to
    /// the zero vector rather than dividing by zero.
    Mean,
}

/// Declarative description of one embedding table.
///
/// Pure structure: declaring a spec allocates nothing. Storage appears only
/// when the spec is materialized into an
/// [`EmbeddingCollection`](crate::lookup::EmbeddingCollection), and device
/// placement is decided separately by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingTableSpec {
    /// Unique table name.
    pub name: String,
    /// Number of rows (distinct embeddable ids).
    pub capacity: usize,
    /// Embedding dimension (row width).
    pub width: usize,
    /// Input feature names routed to this table. More than one feature may
    /// share a table; a feature may not appear under two tables.
    pub feature_names: Vec<String>,
    /// Reduction applied per batch element.
    pub pooling: Pooling,
    /// Element type of the stored rows.
    #[serde(default)]
    pub dtype: DType,
}

impl EmbeddingTableSpec {
    /// Estimated bytes needed to hold the full table.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.capacity * self.width * self.dtype.size_in_bytes()
    }
}

/// A validated set of table specs with unambiguous feature routing.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSet {
    tables: Vec<EmbeddingTableSpec>,
    /// feature name -> index into `tables`
    routing: BTreeMap<String, usize>,
}

impl TableSet {
    /// Validate a set of specs and index its feature routing.
    ///
    /// # Errors
    /// Returns `Error::Config` when a table name repeats, a feature routes
    /// to more than one table (or twice to the same one), a table routes no
    /// features, or a capacity/width is zero.
    pub fn new(tables: Vec<EmbeddingTableSpec>) -> Result<Self> {
        let mut routing: BTreeMap<String, usize> = BTreeMap::new();
        for (idx, table) in tables.iter().enumerate() {
            if table.capacity == 0 || table.width == 0 {
                return Err(Error::Config(format!(
                    "table '{}' must have nonzero capacity and width",
                    table.name
                )));
            }
            if table.feature_names.is_empty() {
                return Err(Error::Config(format!(
                    "table '{}' routes no features",
                    table.name
                )));
            }
            if tables[..idx].iter().any(|t| t.name == table.name) {
                return Err(Error::Config(format!(
                    "duplicate table name '{}'",
                    table.name
                )));
            }
            for feature in &table.feature_names {
                if let Some(&owner) = routing.get(feature) {
                    if owner == idx {
                        return Err(Error::Config(format!(
                            "feature '{feature}' listed twice by table '{}'",
                            table.name
                        )));
                    }
                    return Err(Error::Config(format!(
                        "feature '{feature}' routes to both '{}' and '{}'",
                        tables[owner].name, table.name
                    )));
                }
                routing.insert(feature.clone(), idx);
            }
        }
        Ok(Self { tables, routing })
    }

    /// Tables in declaration order.
    #[must_use]
    pub fn tables(&self) -> &[EmbeddingTableSpec] {
        &self.tables
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Look up a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&EmbeddingTableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// The table a feature routes to, if any.
    #[must_use]
    pub fn table_for_feature(&self, feature: &str) -> Option<&EmbeddingTableSpec> {
        self.routing.get(feature).map(|&idx| &self.tables[idx])
    }

    /// Estimated bytes across all tables.
    #[must_use]
    pub fn total_size_in_bytes(&self) -> usize {
        self.tables.iter().map(EmbeddingTableSpec::size_in_bytes).sum()
    }

    /// Parse a JSON array of table specs.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the specs fail
    /// validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let specs: Vec<EmbeddingTableSpec> = serde_json::from_str(json)?;
        Self::new(specs)
    }

    /// Load a JSON array of table specs from a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or the specs
    /// fail validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize the specs as pretty JSON (an array, in declaration order).
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.tables)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, capacity: usize, width: usize, features: &[&str]) -> EmbeddingTableSpec {
        EmbeddingTableSpec {
            name: name.to_string(),
            capacity,
            width,
            feature_names: features.iter().map(|f| (*f).to_string()).collect(),
            pooling: Pooling::Sum,
            dtype: DType::F32,
        }
    }

    #[test]
    fn test_size_in_bytes_follows_dtype() {
        let mut table = spec("t", 1000, 16, &["f"]);
        assert_eq!(table.size_in_bytes(), 1000 * 16 * 4);
        table.dtype = DType::F16;
        assert_eq!(table.size_in_bytes(), 1000 * 16 * 2);
    }

    #[test]
    fn test_set_routes_features() {
        let set = TableSet::new(vec![
            spec("users", 100, 8, &["viewed", "purchased"]),
            spec("cats", 50, 4, &["category"]),
        ])
        .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.table_for_feature("purchased").unwrap().name, "users");
        assert_eq!(set.table_for_feature("category").unwrap().name, "cats");
        assert!(set.table_for_feature("unknown").is_none());
        assert_eq!(set.table("cats").unwrap().width, 4);
        assert_eq!(set.total_size_in_bytes(), 100 * 8 * 4 + 50 * 4 * 4);
    }

    #[test]
    fn test_set_rejects_duplicate_table_name() {
        let err = TableSet::new(vec![spec("t", 1, 1, &["a"]), spec("t", 1, 1, &["b"])])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_set_rejects_ambiguous_feature() {
        let err = TableSet::new(vec![
            spec("t1", 1, 1, &["shared"]),
            spec("t2", 1, 1, &["shared"]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        // the message names both owners so the conflict is actionable
        let message = err.to_string();
        assert!(message.contains("t1") && message.contains("t2"), "{message}");
    }

    #[test]
    fn test_set_rejects_degenerate_specs() {
        assert!(TableSet::new(vec![spec("t", 0, 4, &["f"])]).is_err());
        assert!(TableSet::new(vec![spec("t", 4, 0, &["f"])]).is_err());
        assert!(TableSet::new(vec![spec("t", 4, 4, &[])]).is_err());
        assert!(TableSet::new(vec![spec("t", 4, 4, &["f", "f"])]).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let set = TableSet::new(vec![spec("users", 100, 8, &["viewed"])]).unwrap();
        let json = set.to_json().unwrap();
        let parsed = TableSet::from_json(&json).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_json_defaults_dtype() {
        let json = r#"[{
            "name": "users",
            "capacity": 100,
            "width": 8,
            "feature_names": ["viewed"],
            "pooling": "mean"
        }]"#;
        let set = TableSet::from_json(json).unwrap();
        assert_eq!(set.table("users").unwrap().dtype, DType::F32);
        assert_eq!(set.table("users").unwrap().pooling, Pooling::Mean);
    }
}
