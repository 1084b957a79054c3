//! Scalable Bloom filter: an append-only approximate set of 32-byte keys
//! that grows by adding strata instead of rebuilding, backed by
//! `bloomfilter::Bloom` and persisted via `bincode` - the same
//! serialize-to-file shape `prospector-core-probabilistic::RichListFilter`
//! uses, generalized from fixed sharding to on-demand stratum growth.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bloomfilter::Bloom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ScanError;

/// Tightening ratio applied to each new stratum's false-positive rate, the
/// standard choice (Almeida et al.) for bounding the aggregate FP rate of a
/// scalable Bloom filter as it grows.
const TIGHTENING_RATIO: f64 = 0.9;
/// Each new stratum doubles the previous one's capacity.
const GROWTH_FACTOR: usize = 2;

#[derive(Serialize, Deserialize)]
struct Stratum {
    filter: Bloom<[u8; 32]>,
    capacity: usize,
    inserted: usize,
}

impl Stratum {
    fn new(capacity: usize, fp_rate: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            filter: Bloom::new_for_fp_rate(capacity, fp_rate),
            capacity,
            inserted: 0,
        }
    }

    fn saturated(&self) -> bool {
        self.inserted >= self.capacity
    }
}

/// A Bloom filter that scales past its initial expected capacity by
/// allocating additional strata, rather than rebuilding. `check` queries
/// every stratum; `add` inserts into the current (last) one, allocating a
/// new stratum first if it is saturated.
#[derive(Serialize, Deserialize)]
pub struct ScalableBloom {
    strata: Vec<Stratum>,
    base_fp_rate: f64,
}

impl ScalableBloom {
    /// A fresh filter tuned for `capacity` expected insertions at
    /// per-insert false-positive rate `fp_rate` (defaults: `N=1e8`,
    /// `p=5e-3`).
    pub fn new(capacity: usize, fp_rate: f64) -> Self {
        Self {
            strata: vec![Stratum::new(capacity, fp_rate)],
            base_fp_rate: fp_rate,
        }
    }

    /// Open the filter persisted at `path`, or create a fresh one if the
    /// file doesn't exist yet. Across runs the file may be reused.
    pub fn open(path: &Path, capacity: usize, fp_rate: f64) -> Result<Self, ScanError> {
        if path.exists() {
            let file = File::open(path).map_err(ScanError::BloomIo)?;
            let filter: Self = bincode::deserialize_from(BufReader::new(file))?;
            debug!(strata = filter.strata.len(), "loaded existing Bloom filter");
            Ok(filter)
        } else {
            Ok(Self::new(capacity, fp_rate))
        }
    }

    /// Flush every `add` made during the run to `path`. Within a single run
    /// this must reflect every `add` by the end of pass 1.
    pub fn save(&self, path: &Path) -> Result<(), ScanError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ScanError::BloomIo)?;
        }
        let file = File::create(path).map_err(ScanError::BloomIo)?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    /// May return false positives at rate <= `p` on keys never added; must
    /// return `true` for every key previously added.
    pub fn check(&self, key: &[u8; 32]) -> bool {
        self.strata.iter().any(|s| s.filter.check(key))
    }

    /// Insert `key`, allocating a new stratum first if the active one is
    /// saturated. Returns a success indicator; a `false` here is a filter
    /// anomaly and is logged but non-fatal - at worst it flags the `r` as a
    /// candidate later than it otherwise would.
    pub fn add(&mut self, key: &[u8; 32]) -> bool {
        if self.strata.last().map(Stratum::saturated).unwrap_or(true) {
            let next_capacity = self
                .strata
                .last()
                .map(|s| s.capacity * GROWTH_FACTOR)
                .unwrap_or(1);
            let next_fp_rate = self.base_fp_rate * TIGHTENING_RATIO.powi(self.strata.len() as i32);
            debug!(stratum = self.strata.len(), capacity = next_capacity, "scaling Bloom filter");
            self.strata.push(Stratum::new(next_capacity, next_fp_rate));
        }

        match self.strata.last_mut() {
            Some(stratum) => {
                stratum.filter.set(key);
                stratum.inserted += 1;
                true
            }
            None => {
                warn!("Bloom filter has no active stratum; insert dropped");
                false
            }
        }
    }

    pub fn strata_count(&self) -> usize {
        self.strata.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_inserted_keys() {
        let mut bloom = ScalableBloom::new(100, 0.01);
        let key = [7u8; 32];
        assert!(!bloom.check(&key));
        bloom.add(&key);
        assert!(bloom.check(&key));
    }

    #[test]
    fn scales_past_initial_capacity() {
        let mut bloom = ScalableBloom::new(4, 0.01);
        for i in 0..20u8 {
            let mut key = [0u8; 32];
            key[0] = i;
            bloom.add(&key);
        }
        assert!(bloom.strata_count() > 1);
        for i in 0..20u8 {
            let mut key = [0u8; 32];
            key[0] = i;
            assert!(bloom.check(&key));
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bloom.bin");

        let mut bloom = ScalableBloom::new(16, 0.01);
        bloom.add(&[1u8; 32]);
        bloom.save(&path).unwrap();

        let reloaded = ScalableBloom::open(&path, 16, 0.01).unwrap();
        assert!(reloaded.check(&[1u8; 32]));
        assert!(!reloaded.check(&[2u8; 32]));
    }
}
