//! Embedding lookup routing example
//!
//! Generates a seeded keyed batch, materializes a small set of embedding
//! tables with random weights, and routes the batch through pooled lookup,
//! printing output shapes and a sample row per table.
//!
//! Usage:
//!   cargo run --example route -- --batch-size 8 --seed 42

use clap::Parser;

use recshard::{
    DType, Device, EmbeddingCollection, EmbeddingTableSpec, Pooling, Result, TableSet,
};
use recshard_datagen::{BatchGenerator, GeneratorConfig};

/// Route a synthetic keyed batch through pooled embedding lookup
#[derive(Parser)]
#[command(name = "route")]
struct Cli {
    /// Batch size (groups per feature)
    #[arg(short, long, default_value_t = 8)]
    batch_size: usize,

    /// Largest group length
    #[arg(long, default_value_t = 10)]
    max_run: usize,

    /// RNG seed for the synthetic batch and weights
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let set = TableSet::new(vec![
        EmbeddingTableSpec {
            name: "products".to_string(),
            capacity: 10_000,
            width: 16,
            feature_names: vec!["viewed".to_string(), "purchased".to_string()],
            pooling: Pooling::Sum,
            dtype: DType::F32,
        },
        EmbeddingTableSpec {
            name: "categories".to_string(),
            capacity: 500,
            width: 8,
            feature_names: vec!["category".to_string()],
            pooling: Pooling::Mean,
            dtype: DType::F16,
        },
    ])?;

    // ids must stay within the smallest table's capacity
    let mut gen = BatchGenerator::new(GeneratorConfig {
        id_range: 500,
        min_run: 0,
        max_run: cli.max_run,
        batch_size: cli.batch_size,
        seed: cli.seed,
    });

    let batch = gen.keyed_batch(&["viewed", "purchased", "category"])?;
    println!(
        "Batch: {} features x {} elements, {} ids total",
        batch.num_keys(),
        batch.batch_size(),
        batch.total_values(),
    );
    for key in batch.keys() {
        println!("  {key}: lengths {:?}", batch.lengths_for(key)?);
    }

    let collection =
        EmbeddingCollection::materialize(&set, Device::Host, |spec| gen.table_weights(spec))?;

    let outputs = collection.forward(&batch)?;
    for (name, pooled) in &outputs {
        println!("{name}: pooled to ({}, {})", pooled.rows(), pooled.cols());
        let sample: Vec<String> = pooled
            .row(0)
            .iter()
            .take(4)
            .map(|v| format!("{v:+.4}"))
            .collect();
        println!("  element 0: [{}, ...]", sample.join(", "));
    }

    Ok(())
}
