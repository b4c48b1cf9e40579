//! Named jagged sequences multiplexed into one flat buffer.

use std::sync::Arc;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::jagged::{offsets_from_lengths, JaggedSequence};

/// Multiple named jagged sequences sharing a batch size, stored key-major
/// then batch-minor: all of key 0's groups, then all of key 1's, and so on.
///
/// `lengths` holds `keys.len() * batch_size` entries; `offsets` is the
/// running sum over the multiplexed lengths, so the group for key `k` and
/// batch element `b` spans
/// `values[offsets[k * batch_size + b]..offsets[k * batch_size + b + 1]]`.
///
/// Like [`JaggedSequence`], instances are immutable and cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedJaggedCollection<T> {
    keys: Arc<Vec<String>>,
    values: Arc<Vec<T>>,
    lengths: Arc<Vec<usize>>,
    offsets: Arc<Vec<usize>>,
    batch_size: usize,
    device: Device,
}

impl<T: Copy> KeyedJaggedCollection<T> {
    /// Multiplex named sequences into one collection.
    ///
    /// Iteration order becomes key order and is significant: it is what
    /// [`to_groups`](Self::to_groups) inverts. All sequences must share a
    /// group count (the batch size) and a device.
    ///
    /// # Errors
    /// - `Error::DuplicateKey` if a key repeats.
    /// - `Error::Shape` if the sequences disagree on group count.
    /// - `Error::Config` if the sequences live on different devices.
    pub fn from_groups<K, I>(groups: I) -> Result<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, JaggedSequence<T>)>,
    {
        let mut keys: Vec<String> = Vec::new();
        let mut sequences: Vec<JaggedSequence<T>> = Vec::new();
        for (key, seq) in groups {
            let key = key.into();
            if keys.contains(&key) {
                return Err(Error::DuplicateKey(key));
            }
            keys.push(key);
            sequences.push(seq);
        }

        let batch_size = sequences.first().map_or(0, JaggedSequence::num_groups);
        let device = sequences.first().map_or(Device::Host, JaggedSequence::device);
        for (key, seq) in keys.iter().zip(&sequences) {
            if seq.num_groups() != batch_size {
                return Err(Error::Shape(format!(
                    "key '{key}' has {} groups, expected {batch_size}",
                    seq.num_groups()
                )));
            }
            if seq.device() != device {
                return Err(Error::Config(format!(
                    "key '{key}' lives on {}, expected {device}",
                    seq.device()
                )));
            }
        }

        let total: usize = sequences.iter().map(JaggedSequence::total_values).sum();
        let mut values = Vec::with_capacity(total);
        let mut lengths = Vec::with_capacity(keys.len() * batch_size);
        for seq in &sequences {
            values.extend_from_slice(seq.values());
            lengths.extend_from_slice(seq.lengths());
        }
        let offsets = offsets_from_lengths(&lengths);

        Ok(Self {
            keys: Arc::new(keys),
            values: Arc::new(values),
            lengths: Arc::new(lengths),
            offsets: Arc::new(offsets),
            batch_size,
            device,
        })
    }

    /// Build directly from flat key-major buffers.
    ///
    /// `lengths` must hold one entry per key and batch element, laid out
    /// key-major; the batch size is inferred as
    /// `lengths.len() / keys.len()`. A collection with no keys must have
    /// empty buffers and has batch size 0.
    ///
    /// # Errors
    /// - `Error::DuplicateKey` if a key repeats.
    /// - `Error::Shape` if `lengths.len()` is not a multiple of
    ///   `keys.len()`, or the lengths do not sum to `values.len()`.
    pub fn from_parts(keys: Vec<String>, values: Vec<T>, lengths: Vec<usize>) -> Result<Self> {
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                return Err(Error::DuplicateKey(key.clone()));
            }
        }

        let batch_size = if keys.is_empty() {
            if !values.is_empty() || !lengths.is_empty() {
                return Err(Error::Shape(
                    "a collection with no keys must have empty buffers".to_string(),
                ));
            }
            0
        } else {
            if lengths.len() % keys.len() != 0 {
                return Err(Error::Shape(format!(
                    "{} lengths cannot be divided among {} keys",
                    lengths.len(),
                    keys.len()
                )));
            }
            lengths.len() / keys.len()
        };

        let total: usize = lengths.iter().sum();
        if total != values.len() {
            return Err(Error::Shape(format!(
                "lengths sum to {total} but values holds {} elements",
                values.len()
            )));
        }

        let offsets = offsets_from_lengths(&lengths);
        Ok(Self {
            keys: Arc::new(keys),
            values: Arc::new(values),
            lengths: Arc::new(lengths),
            offsets: Arc::new(offsets),
            batch_size,
            device: Device::Host,
        })
    }

    /// Keys in collection order.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Flat multiplexed values.
    #[must_use]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Flat key-major lengths (`keys.len() * batch_size` entries).
    #[must_use]
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Running sum over the multiplexed lengths.
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Groups per key.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Total number of stored values across all keys and groups.
    #[must_use]
    pub fn total_values(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Whether the collection has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// The per-group lengths belonging to `key`.
    ///
    /// # Errors
    /// Returns `Error::MissingKey` if the key is absent.
    pub fn lengths_for(&self, key: &str) -> Result<&[usize]> {
        let k = self
            .position(key)
            .ok_or_else(|| Error::MissingKey(key.to_string()))?;
        Ok(&self.lengths[k * self.batch_size..(k + 1) * self.batch_size])
    }

    /// Values of key `k`'s group for batch element `b`.
    ///
    /// # Panics
    /// Panics if `k >= num_keys()` or `b >= batch_size()`.
    #[must_use]
    pub fn group_at(&self, k: usize, b: usize) -> &[T] {
        assert!(k < self.num_keys(), "key {k} out of range for {} keys", self.num_keys());
        assert!(b < self.batch_size, "batch element {b} out of range for batch {}", self.batch_size);
        let slot = k * self.batch_size + b;
        &self.values[self.offsets[slot]..self.offsets[slot + 1]]
    }

    /// Extract `key`'s sequence as a standalone [`JaggedSequence`].
    ///
    /// # Errors
    /// Returns `Error::MissingKey` if the key is absent.
    pub fn get(&self, key: &str) -> Result<JaggedSequence<T>> {
        let k = self
            .position(key)
            .ok_or_else(|| Error::MissingKey(key.to_string()))?;
        Ok(self.sequence_at(k))
    }

    fn sequence_at(&self, k: usize) -> JaggedSequence<T> {
        let lo = self.offsets[k * self.batch_size];
        let hi = self.offsets[(k + 1) * self.batch_size];
        let values = self.values[lo..hi].to_vec();
        let lengths = self.lengths[k * self.batch_size..(k + 1) * self.batch_size].to_vec();
        JaggedSequence::from_validated(values, lengths, self.device)
    }

    /// Demultiplex into one named sequence per key, in key order.
    ///
    /// Exact inverse of [`from_groups`](Self::from_groups): feeding the
    /// result back reproduces the collection.
    #[must_use]
    pub fn to_groups(&self) -> Vec<(String, JaggedSequence<T>)> {
        self.keys
            .iter()
            .enumerate()
            .map(|(k, key)| (key.clone(), self.sequence_at(k)))
            .collect()
    }

    /// Restrict the collection to `wanted` keys.
    ///
    /// The result preserves this collection's key order regardless of the
    /// order keys are requested in; selecting every key reproduces the
    /// collection. Selecting no keys yields the empty collection (batch
    /// size 0).
    ///
    /// # Errors
    /// Returns `Error::MissingKey` if any requested key is absent.
    pub fn select(&self, wanted: &[&str]) -> Result<Self> {
        for key in wanted {
            if !self.contains_key(key) {
                return Err(Error::MissingKey((*key).to_string()));
            }
        }

        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut lengths = Vec::new();
        for (k, key) in self.keys.iter().enumerate() {
            if !wanted.contains(&key.as_str()) {
                continue;
            }
            keys.push(key.clone());
            let lo = self.offsets[k * self.batch_size];
            let hi = self.offsets[(k + 1) * self.batch_size];
            values.extend_from_slice(&self.values[lo..hi]);
            lengths.extend_from_slice(&self.lengths[k * self.batch_size..(k + 1) * self.batch_size]);
        }

        let batch_size = if keys.is_empty() { 0 } else { self.batch_size };
        let offsets = offsets_from_lengths(&lengths);
        Ok(Self {
            keys: Arc::new(keys),
            values: Arc::new(values),
            lengths: Arc::new(lengths),
            offsets: Arc::new(offsets),
            batch_size,
            device: self.device,
        })
    }

    /// Re-tag the collection onto `device`, leaving the original valid.
    ///
    /// Buffers are shared with the original, as in
    /// [`JaggedSequence::to_device`].
    #[must_use]
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
            values: Arc::clone(&self.values),
            lengths: Arc::clone(&self.lengths),
            offsets: Arc::clone(&self.offsets),
            batch_size: self.batch_size,
            device,
        }
    }
}
