//! Recshard: jagged feature batches and deterministic embedding sharding
//!
//! This crate provides the value objects a recommendation-model input
//! pipeline is built from: variable-length feature batches
//! ([`JaggedSequence`], [`KeyedJaggedCollection`]), declarative embedding
//! table specs with pooled lookup ([`TableSet`], [`EmbeddingCollection`]),
//! and a deterministic greedy planner that assigns tables to devices
//! ([`ShardingPlanner`]).
//!
//! Everything is a pure, synchronous transformation of immutable inputs.
//! Distributed communication, GPU execution, and autodiff live behind the
//! [`Device`] tag and the plan's device ordinals, in separate systems.

pub mod dense;
pub mod device;
pub mod dtype;
pub mod error;
pub mod jagged;
pub mod keyed;
pub mod lookup;
pub mod plan;
pub mod planner;
pub mod table;
pub mod topology;

pub use dense::DenseMatrix;
pub use device::Device;
pub use dtype::DType;
pub use error::{Error, Result};
pub use jagged::JaggedSequence;
pub use keyed::KeyedJaggedCollection;
pub use lookup::{EmbeddingCollection, EmbeddingTable};
pub use plan::{Shard, ShardingPlan, ShardingStrategy, TablePlacement};
pub use planner::{
    PlanConstraints, PlannerConfig, ShardingPlanner, DEFAULT_LARGE_TABLE_THRESHOLD,
};
pub use table::{EmbeddingTableSpec, Pooling, TableSet};
pub use topology::{ProcessEnv, Topology};
