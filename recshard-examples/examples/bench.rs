//! Minimal benchmark for pooled lookup throughput
//! Measures raw forward performance over a seeded synthetic batch.

use std::time::Instant;

use recshard::{DType, Device, EmbeddingCollection, EmbeddingTableSpec, Pooling, TableSet};
use recshard_datagen::{BatchGenerator, GeneratorConfig};

const WARMUP_STEPS: usize = 3;

fn main() -> recshard::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let batch_size: usize = args.get(1).map_or(Ok(256), |a| a.parse()).unwrap();
    let steps: usize = args.get(2).map_or(Ok(10), |a| a.parse()).unwrap();

    let set = TableSet::new(vec![
        EmbeddingTableSpec {
            name: "products".to_string(),
            capacity: 100_000,
            width: 64,
            feature_names: vec!["viewed".to_string(), "purchased".to_string()],
            pooling: Pooling::Sum,
            dtype: DType::F32,
        },
        EmbeddingTableSpec {
            name: "categories".to_string(),
            capacity: 1_000,
            width: 16,
            feature_names: vec!["category".to_string()],
            pooling: Pooling::Mean,
            dtype: DType::F32,
        },
    ])?;

    let mut gen = BatchGenerator::new(GeneratorConfig {
        id_range: 1_000,
        min_run: 1,
        max_run: 20,
        batch_size,
        seed: 42,
    });
    let batch = gen.keyed_batch(&["viewed", "purchased", "category"])?;
    let collection =
        EmbeddingCollection::materialize(&set, Device::Host, |spec| gen.table_weights(spec))?;

    eprintln!(
        "Batch: {} elements, {} ids; tables: {:.1} MiB",
        batch.batch_size(),
        batch.total_values(),
        set.total_size_in_bytes() as f64 / (1024.0 * 1024.0),
    );

    for _ in 0..WARMUP_STEPS {
        let _ = collection.forward(&batch)?;
    }

    let start = Instant::now();
    for _ in 0..steps {
        let _ = collection.forward(&batch)?;
    }
    let elapsed = start.elapsed();

    let avg_ms = elapsed.as_secs_f64() * 1000.0 / steps as f64;
    let rows_s = batch_size as f64 * steps as f64 / elapsed.as_secs_f64();
    println!("{steps} steps, avg {avg_ms:.2} ms/batch = {rows_s:.0} rows/s");

    Ok(())
}
