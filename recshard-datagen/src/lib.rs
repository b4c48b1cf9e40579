//! Seeded synthetic inputs for recshard examples, benchmarks, and tests.
//!
//! A [`BatchGenerator`] draws jagged feature batches and table weights from
//! a seeded RNG: the same [`GeneratorConfig`] always produces the same
//! sequence of batches, so test failures and benchmark numbers reproduce.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use recshard::{
    EmbeddingTableSpec, JaggedSequence, KeyedJaggedCollection, Result,
};

/// Shape of the synthetic data to draw.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Ids are drawn uniformly from `0..id_range`. Keep this at or below the
    /// capacity of the smallest table the batch will be routed through.
    pub id_range: u64,
    /// Smallest group length, inclusive.
    pub min_run: usize,
    /// Largest group length, inclusive.
    pub max_run: usize,
    /// Groups per feature.
    pub batch_size: usize,
    /// RNG seed; identical seeds reproduce identical batches.
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            id_range: 10_000,
            min_run: 1,
            max_run: 20,
            batch_size: 32,
            seed: 0,
        }
    }
}

/// Draws jagged batches and table weights from a seeded RNG.
pub struct BatchGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl BatchGenerator {
    /// A generator seeded from `config.seed`.
    ///
    /// # Panics
    /// Panics if `min_run > max_run` or `id_range` is 0; both make the
    /// configuration undrawable.
    #[must_use]
    pub fn new(config: GeneratorConfig) -> Self {
        assert!(
            config.min_run <= config.max_run,
            "min_run {} exceeds max_run {}",
            config.min_run,
            config.max_run
        );
        assert!(config.id_range > 0, "id_range must be at least 1");
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    #[must_use]
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Random per-group lengths, `batch_size` of them.
    pub fn lengths(&mut self) -> Vec<usize> {
        (0..self.config.batch_size)
            .map(|_| self.rng.gen_range(self.config.min_run..=self.config.max_run))
            .collect()
    }

    /// One feature's batch: random lengths filled with random ids.
    ///
    /// # Errors
    /// Construction cannot fail for generated buffers; the `Result` only
    /// carries the container's own validation.
    pub fn jagged_batch(&mut self) -> Result<JaggedSequence<u64>> {
        let lengths = self.lengths();
        let total: usize = lengths.iter().sum();
        let values: Vec<u64> = (0..total)
            .map(|_| self.rng.gen_range(0..self.config.id_range))
            .collect();
        JaggedSequence::from_lengths(values, lengths)
    }

    /// A keyed batch with one independently drawn sequence per feature.
    ///
    /// # Errors
    /// Returns `Error::DuplicateKey` if `features` repeats a name.
    pub fn keyed_batch(&mut self, features: &[&str]) -> Result<KeyedJaggedCollection<u64>> {
        let mut groups = Vec::with_capacity(features.len());
        for &feature in features {
            groups.push((feature.to_string(), self.jagged_batch()?));
        }
        KeyedJaggedCollection::from_groups(groups)
    }

    /// Row-major weights for `spec`, drawn uniformly from `[-0.05, 0.05)`.
    ///
    /// Suitable as the `init` closure of
    /// [`EmbeddingCollection::materialize`](recshard::EmbeddingCollection::materialize).
    pub fn table_weights(&mut self, spec: &EmbeddingTableSpec) -> Vec<f32> {
        (0..spec.capacity * spec.width)
            .map(|_| self.rng.gen_range(-0.05f32..0.05))
            .collect()
    }
}
