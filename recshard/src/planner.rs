//! Greedy deterministic construction of sharding plans.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::plan::{Shard, ShardingPlan, ShardingStrategy, TablePlacement};
use crate::table::{EmbeddingTableSpec, TableSet};
use crate::topology::Topology;

/// Default footprint above which a table prefers row-wise sharding: 64 MiB.
pub const DEFAULT_LARGE_TABLE_THRESHOLD: usize = 64 * 1024 * 1024;

/// Tuning knobs for the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Tables whose estimated footprint exceeds this many bytes are split
    /// row-wise across the fleet (when more than one device exists) instead
    /// of being placed whole.
    pub large_table_threshold_bytes: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            large_table_threshold_bytes: DEFAULT_LARGE_TABLE_THRESHOLD,
        }
    }
}

/// Optional per-table allow-lists restricting which strategies the planner
/// may choose.
///
/// Tables without an entry may use any strategy. An entry with an empty
/// allow-list makes the table unplannable and fails at
/// [`ShardingPlanner::plan`] time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConstraints {
    tables: BTreeMap<String, Vec<ShardingStrategy>>,
}

impl PlanConstraints {
    /// No constraints: every table may use any strategy.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Restrict `table` to `strategies`, replacing any earlier entry.
    #[must_use]
    pub fn allow(mut self, table: impl Into<String>, strategies: &[ShardingStrategy]) -> Self {
        self.tables.insert(table.into(), strategies.to_vec());
        self
    }

    /// The allow-list for `table`, if one was set.
    #[must_use]
    pub fn allowed_for(&self, table: &str) -> Option<&[ShardingStrategy]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    fn permits(&self, table: &str, strategy: ShardingStrategy) -> bool {
        match self.tables.get(table) {
            Some(allowed) => allowed.contains(&strategy),
            None => true,
        }
    }

    /// Every constrained name must refer to a table in `set`; a typo here
    /// would otherwise silently leave a table unconstrained.
    fn check_targets(&self, set: &TableSet) -> Result<()> {
        for name in self.tables.keys() {
            if set.table(name).is_none() {
                return Err(Error::Config(format!(
                    "constraint targets unknown table '{name}'"
                )));
            }
        }
        Ok(())
    }
}

/// Assigns every table in a set to a strategy and device(s).
///
/// The planner is a pure function of `(topology, config, table set,
/// constraints)`: identical inputs produce byte-identical serialized plans,
/// so every process in a group can derive the plan independently and agree
/// without communicating.
///
/// Placement is greedy. Tables are visited from largest estimated footprint
/// to smallest (ties broken by name), and whole-table placements go to the
/// device with the least bytes assigned so far. Per-device budgets are
/// reported through [`ShardingPlan::device_memory_bytes`], not enforced.
#[derive(Debug, Clone)]
pub struct ShardingPlanner {
    topology: Topology,
    config: PlannerConfig,
}

impl ShardingPlanner {
    /// A planner for `topology` with the default configuration.
    #[must_use]
    pub fn new(topology: Topology) -> Self {
        Self::with_config(topology, PlannerConfig::default())
    }

    #[must_use]
    pub fn with_config(topology: Topology, config: PlannerConfig) -> Self {
        Self { topology, config }
    }

    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Build a plan covering every table in `set`.
    ///
    /// For each table the first candidate strategy that is both allowed and
    /// legal wins. Candidates are tried in order: row-wise when the table
    /// exceeds the large-table threshold on a multi-device fleet, then
    /// table-wise, then column-wise, then row-wise as the final fallback.
    /// Column-wise is legal only when the width divides evenly by the world
    /// size; the other strategies are always legal.
    ///
    /// # Errors
    /// - `Error::Config` if a constraint targets a table not in `set`.
    /// - `Error::Planning` if some table has no allowed legal strategy. No
    ///   partial plan is returned.
    pub fn plan(&self, set: &TableSet, constraints: &PlanConstraints) -> Result<ShardingPlan> {
        constraints.check_targets(set)?;

        let mut order: Vec<&EmbeddingTableSpec> = set.tables().iter().collect();
        order.sort_by(|a, b| {
            b.size_in_bytes()
                .cmp(&a.size_in_bytes())
                .then_with(|| a.name.cmp(&b.name))
        });

        let world_size = self.topology.world_size();
        let mut loads = vec![0usize; world_size];
        let mut tables = BTreeMap::new();

        for spec in order {
            let strategy = self.choose_strategy(spec, constraints)?;
            let placement = match strategy {
                ShardingStrategy::TableWise => place_table_wise(spec, &mut loads),
                ShardingStrategy::RowWise => place_row_wise(spec, &mut loads),
                ShardingStrategy::ColumnWise => place_column_wise(spec, &mut loads),
            };
            tables.insert(spec.name.clone(), placement);
        }

        Ok(ShardingPlan { tables })
    }

    fn choose_strategy(
        &self,
        spec: &EmbeddingTableSpec,
        constraints: &PlanConstraints,
    ) -> Result<ShardingStrategy> {
        let world_size = self.topology.world_size();
        let large = spec.size_in_bytes() > self.config.large_table_threshold_bytes;

        let mut candidates = Vec::with_capacity(4);
        if large && world_size > 1 {
            candidates.push(ShardingStrategy::RowWise);
        }
        candidates.push(ShardingStrategy::TableWise);
        candidates.push(ShardingStrategy::ColumnWise);
        if !candidates.contains(&ShardingStrategy::RowWise) {
            candidates.push(ShardingStrategy::RowWise);
        }

        for strategy in candidates {
            if !constraints.permits(&spec.name, strategy) {
                continue;
            }
            let legal = match strategy {
                ShardingStrategy::ColumnWise => spec.width % world_size == 0,
                ShardingStrategy::TableWise | ShardingStrategy::RowWise => true,
            };
            if legal {
                return Ok(strategy);
            }
        }

        Err(Error::Planning(format!(
            "no allowed legal strategy for table '{}' (width {}, world_size {world_size})",
            spec.name, spec.width
        )))
    }
}

fn least_loaded(loads: &[usize]) -> usize {
    loads
        .iter()
        .enumerate()
        .min_by_key(|&(device, &load)| (load, device))
        .map_or(0, |(device, _)| device)
}

fn place_table_wise(spec: &EmbeddingTableSpec, loads: &mut [usize]) -> TablePlacement {
    let device = least_loaded(loads);
    let size = spec.size_in_bytes();
    loads[device] += size;
    TablePlacement {
        strategy: ShardingStrategy::TableWise,
        shards: vec![Shard {
            device,
            row_start: 0,
            num_rows: spec.capacity,
            col_start: 0,
            num_cols: spec.width,
            size_in_bytes: size,
        }],
    }
}

fn place_row_wise(spec: &EmbeddingTableSpec, loads: &mut [usize]) -> TablePlacement {
    let world_size = loads.len();
    let base = spec.capacity / world_size;
    let remainder = spec.capacity % world_size;
    let mut shards = Vec::with_capacity(world_size);
    let mut row = 0;
    for (device, load) in loads.iter_mut().enumerate() {
        // earlier ranks absorb the remainder, one extra row each
        let num_rows = base + usize::from(device < remainder);
        let size = num_rows * spec.width * spec.dtype.size_in_bytes();
        shards.push(Shard {
            device,
            row_start: row,
            num_rows,
            col_start: 0,
            num_cols: spec.width,
            size_in_bytes: size,
        });
        row += num_rows;
        *load += size;
    }
    TablePlacement {
        strategy: ShardingStrategy::RowWise,
        shards,
    }
}

fn place_column_wise(spec: &EmbeddingTableSpec, loads: &mut [usize]) -> TablePlacement {
    let world_size = loads.len();
    let num_cols = spec.width / world_size;
    let mut shards = Vec::with_capacity(world_size);
    for (device, load) in loads.iter_mut().enumerate() {
        let size = spec.capacity * num_cols * spec.dtype.size_in_bytes();
        shards.push(Shard {
            device,
            row_start: 0,
            num_rows: spec.capacity,
            col_start: device * num_cols,
            num_cols,
            size_in_bytes: size,
        });
        *load += size;
    }
    TablePlacement {
        strategy: ShardingStrategy::ColumnWise,
        shards,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::table::Pooling;

    fn spec(name: &str, capacity: usize, width: usize) -> EmbeddingTableSpec {
        EmbeddingTableSpec {
            name: name.to_string(),
            capacity,
            width,
            feature_names: vec![format!("{name}_ids")],
            pooling: Pooling::Sum,
            dtype: DType::F32,
        }
    }

    fn planner(world_size: usize) -> ShardingPlanner {
        ShardingPlanner::new(Topology::new(world_size, 8 << 30).unwrap())
    }

    #[test]
    fn large_table_splits_row_wise_small_goes_table_wise() {
        // 1M x 128 x 4B = 512 MiB (over the threshold), 10k x 32 x 4B = 1.25 MiB
        let set = TableSet::new(vec![
            spec("products", 1_000_000, 128),
            spec("categories", 10_000, 32),
        ])
        .unwrap();
        let plan = planner(4).plan(&set, &PlanConstraints::none()).unwrap();

        let products = plan.placement("products").unwrap();
        assert_eq!(products.strategy, ShardingStrategy::RowWise);
        assert_eq!(products.shards.len(), 4);
        for shard in &products.shards {
            assert_eq!(shard.num_rows, 250_000);
            assert_eq!(shard.num_cols, 128);
        }

        let categories = plan.placement("categories").unwrap();
        assert_eq!(categories.strategy, ShardingStrategy::TableWise);
        assert_eq!(categories.shards.len(), 1);
        assert!(categories.shards[0].device < 4);

        plan.validate(&set, planner(4).topology()).unwrap();
    }

    #[test]
    fn plan_is_deterministic() {
        let set = TableSet::new(vec![
            spec("a", 500_000, 64),
            spec("b", 500_000, 64),
            spec("c", 300, 16),
            spec("d", 300, 16),
        ])
        .unwrap();
        let constraints = PlanConstraints::none().allow("c", &[ShardingStrategy::TableWise]);

        let first = planner(4).plan(&set, &constraints).unwrap();
        let second = planner(4).plan(&set, &constraints).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn equal_footprints_visit_in_name_order() {
        // identical sizes; "a" must be placed before "b", so with two devices
        // "a" lands on device 0 and "b" on device 1
        let set = TableSet::new(vec![spec("b", 100, 8), spec("a", 100, 8)]).unwrap();
        let plan = planner(2).plan(&set, &PlanConstraints::none()).unwrap();
        assert_eq!(plan.placement("a").unwrap().shards[0].device, 0);
        assert_eq!(plan.placement("b").unwrap().shards[0].device, 1);
    }

    #[test]
    fn table_wise_balances_by_cumulative_bytes() {
        // big claims device 0; the two smaller tables then avoid it
        let set = TableSet::new(vec![
            spec("big", 10_000, 16),
            spec("mid", 1_000, 16),
            spec("small", 100, 16),
        ])
        .unwrap();
        let plan = planner(2).plan(&set, &PlanConstraints::none()).unwrap();

        assert_eq!(plan.placement("big").unwrap().shards[0].device, 0);
        assert_eq!(plan.placement("mid").unwrap().shards[0].device, 1);
        assert_eq!(plan.placement("small").unwrap().shards[0].device, 1);
    }

    #[test]
    fn row_wise_spreads_remainder_to_early_ranks() {
        let set = TableSet::new(vec![spec("t", 10, 4)]).unwrap();
        let constraints = PlanConstraints::none().allow("t", &[ShardingStrategy::RowWise]);
        let plan = planner(3).plan(&set, &constraints).unwrap();

        let shards = &plan.placement("t").unwrap().shards;
        let rows: Vec<usize> = shards.iter().map(|s| s.num_rows).collect();
        assert_eq!(rows, vec![4, 3, 3]);
        assert_eq!(shards[0].row_start, 0);
        assert_eq!(shards[1].row_start, 4);
        assert_eq!(shards[2].row_start, 7);
    }

    #[test]
    fn row_wise_degenerates_on_single_device() {
        let set = TableSet::new(vec![spec("t", 10, 4)]).unwrap();
        let constraints = PlanConstraints::none().allow("t", &[ShardingStrategy::RowWise]);
        let plan = planner(1).plan(&set, &constraints).unwrap();

        let placement = plan.placement("t").unwrap();
        assert_eq!(placement.strategy, ShardingStrategy::RowWise);
        assert_eq!(placement.shards.len(), 1);
        assert_eq!(placement.shards[0].num_rows, 10);
    }

    #[test]
    fn column_wise_when_allowed_and_divisible() {
        let set = TableSet::new(vec![spec("t", 100, 12)]).unwrap();
        let constraints = PlanConstraints::none().allow("t", &[ShardingStrategy::ColumnWise]);
        let plan = planner(4).plan(&set, &constraints).unwrap();

        let placement = plan.placement("t").unwrap();
        assert_eq!(placement.strategy, ShardingStrategy::ColumnWise);
        let cols: Vec<(usize, usize)> = placement
            .shards
            .iter()
            .map(|s| (s.col_start, s.num_cols))
            .collect();
        assert_eq!(cols, vec![(0, 3), (3, 3), (6, 3), (9, 3)]);
    }

    #[test]
    fn column_wise_indivisible_width_fails() {
        let set = TableSet::new(vec![spec("t", 100, 10)]).unwrap();
        let constraints = PlanConstraints::none().allow("t", &[ShardingStrategy::ColumnWise]);
        let err = planner(4).plan(&set, &constraints).unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }

    #[test]
    fn empty_allow_list_fails() {
        let set = TableSet::new(vec![spec("t", 100, 8)]).unwrap();
        let constraints = PlanConstraints::none().allow("t", &[]);
        let err = planner(2).plan(&set, &constraints).unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }

    #[test]
    fn constraint_overrides_threshold_preference() {
        // small table forced row-wise shards anyway
        let set = TableSet::new(vec![spec("t", 100, 8)]).unwrap();
        let constraints = PlanConstraints::none().allow("t", &[ShardingStrategy::RowWise]);
        let plan = planner(4).plan(&set, &constraints).unwrap();
        assert_eq!(
            plan.placement("t").unwrap().strategy,
            ShardingStrategy::RowWise
        );
    }

    #[test]
    fn large_table_on_single_device_stays_table_wise() {
        let set = TableSet::new(vec![spec("huge", 1_000_000, 128)]).unwrap();
        let plan = planner(1).plan(&set, &PlanConstraints::none()).unwrap();
        assert_eq!(
            plan.placement("huge").unwrap().strategy,
            ShardingStrategy::TableWise
        );
    }

    #[test]
    fn threshold_is_configurable() {
        let topology = Topology::new(2, 8 << 30).unwrap();
        let eager = ShardingPlanner::with_config(
            topology,
            PlannerConfig {
                large_table_threshold_bytes: 1024,
            },
        );
        // 100 x 8 x 4B = 3200 bytes, over the lowered threshold
        let set = TableSet::new(vec![spec("t", 100, 8)]).unwrap();
        let plan = eager.plan(&set, &PlanConstraints::none()).unwrap();
        assert_eq!(
            plan.placement("t").unwrap().strategy,
            ShardingStrategy::RowWise
        );
    }

    #[test]
    fn unknown_constraint_target_fails() {
        let set = TableSet::new(vec![spec("t", 100, 8)]).unwrap();
        let constraints = PlanConstraints::none().allow("typo", &[ShardingStrategy::TableWise]);
        let err = planner(2).plan(&set, &constraints).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn every_plan_passes_validation() {
        let topology = Topology::new(3, 8 << 30).unwrap();
        let set = TableSet::new(vec![
            spec("users", 2_000_000, 96),
            spec("items", 50_000, 64),
            spec("tags", 777, 9),
        ])
        .unwrap();
        // items is 64 wide, not divisible by 3, so the row-wise fallback wins
        let constraints = PlanConstraints::none().allow(
            "items",
            &[ShardingStrategy::ColumnWise, ShardingStrategy::RowWise],
        );
        let plan = ShardingPlanner::new(topology).plan(&set, &constraints).unwrap();
        plan.validate(&set, &topology).unwrap();

        let totals = plan.device_memory_bytes(3);
        assert_eq!(totals.iter().sum::<usize>(), set.total_size_in_bytes());
    }
}
