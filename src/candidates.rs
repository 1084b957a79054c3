//! Candidate Set and Match Table: the two exact, in-memory structures the
//! two-pass algorithm hands off between passes.
//!
//! Grounded on the teacher's `cache.rs::RValueCache` lookup-then-insert
//! shape, with the LRU eviction (`lru::LruCache`, capacity-bounded) dropped
//! in favor of a plain non-evicting set - a candidate flagged in pass 1 must
//! never be forgotten before pass 2 runs. Keyed with `fnv` rather than the
//! default hasher: `r_hex` keys are short, already well-distributed hex
//! digests, exactly the shape FNV is suited to.

use fnv::{FnvHashMap, FnvHashSet};

use crate::types::SignatureRecord;

/// Set of canonical text `r`-values flagged as probable duplicates by pass
/// 1. Mutated only during pass 1; read-only during pass 2.
#[derive(Default)]
pub struct CandidateSet {
    keys: FnvHashSet<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, r_hex: String) {
        self.keys.insert(r_hex);
    }

    pub fn contains(&self, r_hex: &str) -> bool {
        self.keys.contains(r_hex)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Mapping from canonical `r`-value text to every occurrence seen carrying
/// it, in pass-2 arrival order. Populated only during pass 2.
#[derive(Default)]
pub struct MatchTable {
    rows: FnvHashMap<String, Vec<SignatureRecord>>,
}

impl MatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `rec.r_hex`. Safe to call repeatedly for the
    /// same `(height, tx_index, txin_index, data_index)` tuple only if the
    /// pipeline itself never re-emits it - the controller is responsible for
    /// that uniqueness guarantee.
    pub fn record(&mut self, rec: SignatureRecord) {
        self.rows.entry(rec.r_hex.clone()).or_default().push(rec);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Drop every entry whose occurrence list has length <= 1 - Bloom false
    /// positives from pass 1 that never recurred.
    pub fn into_finalized(self) -> FnvHashMap<String, Vec<SignatureRecord>> {
        self.rows.into_iter().filter(|(_, v)| v.len() > 1).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(r_hex: &str, height: i64) -> SignatureRecord {
        let mut bytes = [0u8; 32];
        bytes[31] = height as u8;
        SignatureRecord {
            r_bytes: bytes,
            r_hex: r_hex.to_string(),
            height,
            tx_index: 0,
            txin_index: 0,
            data_index: 0,
        }
    }

    #[test]
    fn drops_singleton_entries() {
        let mut table = MatchTable::new();
        table.record(record("aa", 1));
        table.record(record("bb", 2));
        table.record(record("bb", 3));

        let finalized = table.into_finalized();
        assert_eq!(finalized.len(), 1);
        assert!(finalized.contains_key("bb"));
        assert_eq!(finalized["bb"].len(), 2);
    }

    #[test]
    fn candidate_set_membership() {
        let mut set = CandidateSet::new();
        assert!(!set.contains("aa"));
        set.insert("aa".to_string());
        assert!(set.contains("aa"));
        assert_eq!(set.len(), 1);
    }
}
