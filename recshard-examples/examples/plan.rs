//! Sharding plan construction example
//!
//! Builds (or loads) a set of embedding table specs, plans their placement
//! across a device fleet, and prints the per-table placements and the
//! per-device memory report.
//!
//! Usage:
//!   cargo run --example plan -- --devices 4
//!   cargo run --example plan -- --tables tables.json --devices 8 --out plan.json

use clap::Parser;

use recshard::{
    DType, EmbeddingTableSpec, PlanConstraints, PlannerConfig, Pooling, Result, ShardingPlanner,
    TableSet, Topology,
};

/// Plan embedding table placement across a device fleet
#[derive(Parser)]
#[command(name = "plan")]
struct Cli {
    /// Path to a JSON array of table specs (default: a built-in demo set)
    #[arg(short, long)]
    tables: Option<String>,

    /// Number of devices in the fleet
    #[arg(short, long, default_value_t = 4)]
    devices: usize,

    /// Per-device memory budget in GiB (reported against, not enforced)
    #[arg(long, default_value_t = 16)]
    memory_gib: usize,

    /// Large-table threshold in MiB; bigger tables prefer row-wise shards
    #[arg(long, default_value_t = 64)]
    threshold_mib: usize,

    /// Write the plan as JSON to this path
    #[arg(short, long)]
    out: Option<String>,
}

fn demo_tables() -> Result<TableSet> {
    TableSet::new(vec![
        EmbeddingTableSpec {
            name: "products".to_string(),
            capacity: 1_000_000,
            width: 128,
            feature_names: vec!["viewed".to_string(), "purchased".to_string()],
            pooling: Pooling::Sum,
            dtype: DType::F32,
        },
        EmbeddingTableSpec {
            name: "users".to_string(),
            capacity: 250_000,
            width: 64,
            feature_names: vec!["user_id".to_string()],
            pooling: Pooling::Sum,
            dtype: DType::F16,
        },
        EmbeddingTableSpec {
            name: "categories".to_string(),
            capacity: 10_000,
            width: 32,
            feature_names: vec!["category".to_string()],
            pooling: Pooling::Mean,
            dtype: DType::F32,
        },
    ])
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let set = match &cli.tables {
        Some(path) => TableSet::from_file(path)?,
        None => demo_tables()?,
    };
    let topology = Topology::new(cli.devices, cli.memory_gib << 30)?;
    let planner = ShardingPlanner::with_config(
        topology,
        PlannerConfig {
            large_table_threshold_bytes: cli.threshold_mib << 20,
        },
    );

    let plan = planner.plan(&set, &PlanConstraints::none())?;
    plan.validate(&set, &topology)?;

    println!(
        "Planned {} tables across {} devices",
        plan.len(),
        topology.world_size()
    );
    for spec in set.tables() {
        let placement = plan.placement(&spec.name).expect("validated plan");
        println!(
            "  {} ({} x {}, {:.1} MiB): {}",
            spec.name,
            spec.capacity,
            spec.width,
            spec.size_in_bytes() as f64 / (1024.0 * 1024.0),
            placement.strategy,
        );
        for shard in &placement.shards {
            println!(
                "    device {}: rows {}..{}, cols {}..{} ({:.1} MiB)",
                shard.device,
                shard.row_start,
                shard.row_start + shard.num_rows,
                shard.col_start,
                shard.col_start + shard.num_cols,
                shard.size_in_bytes as f64 / (1024.0 * 1024.0),
            );
        }
    }

    println!("Per-device memory:");
    let budget = topology.per_device_memory();
    for (device, bytes) in plan
        .device_memory_bytes(topology.world_size())
        .iter()
        .enumerate()
    {
        println!(
            "  device {device}: {:.1} MiB ({:.1}% of budget)",
            *bytes as f64 / (1024.0 * 1024.0),
            *bytes as f64 * 100.0 / budget as f64,
        );
    }

    if let Some(path) = &cli.out {
        plan.to_file(path)?;
        println!("Plan written to {path}");
    }

    Ok(())
}
