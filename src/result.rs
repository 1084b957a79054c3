//! Result finalization - drop singleton entries and persist the surviving
//! duplicated-`r` groups to `blockchainr.json`.

use std::collections::BTreeMap;
use std::path::Path;

use num_bigint::BigUint;

use crate::candidates::MatchTable;
use crate::types::ResultOccurrence;

/// `r` (decimal string) -> every occurrence that carries it.
pub type ScanResult = BTreeMap<String, Vec<ResultOccurrence>>;

/// Drop entries whose occurrence list has length <= 1 - Bloom false
/// positives - and key the rest by decimal `r` (the in-memory tables use hex
/// internally for speed).
pub fn finalize(table: MatchTable) -> ScanResult {
    table
        .into_finalized()
        .into_iter()
        .map(|(r_hex, records)| {
            let r_decimal = decimal_from_hex(&r_hex);
            let occurrences = records.iter().map(ResultOccurrence::from).collect();
            (r_decimal, occurrences)
        })
        .collect()
}

fn decimal_from_hex(hex_str: &str) -> String {
    BigUint::from_bytes_be(&hex::decode(hex_str).unwrap_or_default()).to_str_radix(10)
}

/// Write the finalized result to `path` as pretty JSON (`blockchainr.json`
/// in the current working directory by default).
pub fn write_result(result: &ScanResult, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, result)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignatureRecord;

    fn record(height: i64) -> SignatureRecord {
        let mut r_bytes = [0u8; 32];
        r_bytes[31] = 1;
        SignatureRecord::new(r_bytes, height, 0, 0, 0)
    }

    #[test]
    fn drops_singletons_and_keys_by_decimal() {
        let mut table = MatchTable::new();
        table.record(record(1));
        table.record(record(2));
        let result = finalize(table);
        assert_eq!(result.len(), 1);
        assert_eq!(result.keys().next().unwrap(), "1");
        assert_eq!(result.values().next().unwrap().len(), 2);
    }

    #[test]
    fn empty_table_yields_empty_result() {
        let result = finalize(MatchTable::new());
        assert!(result.is_empty());
    }
}
