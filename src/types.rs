use serde::{Deserialize, Serialize};

/// One ECDSA signature occurrence found inside a transaction input's
/// signature script (or witness stack), tagged with the location that makes
/// it unique within the scanned range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    /// `r` as a fixed-width 32-byte big-endian value; the Bloom filter key.
    pub r_bytes: [u8; 32],
    /// Same `r` as lowercase hex text; the exact-set key. Derived from
    /// `r_bytes` so both forms stay in lockstep across passes.
    pub r_hex: String,
    pub height: i64,
    pub tx_index: u32,
    pub txin_index: u32,
    pub data_index: u32,
}

impl SignatureRecord {
    pub fn new(r_bytes: [u8; 32], height: i64, tx_index: u32, txin_index: u32, data_index: u32) -> Self {
        Self {
            r_hex: hex::encode(r_bytes),
            r_bytes,
            height,
            tx_index,
            txin_index,
            data_index,
        }
    }

    pub fn key(&self) -> (i64, u32, u32, u32) {
        (self.height, self.tx_index, self.txin_index, self.data_index)
    }
}

/// The JSON shape of one occurrence in the result document: `{H, Tx, TxIn, Data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultOccurrence {
    #[serde(rename = "H")]
    pub h: i64,
    #[serde(rename = "Tx")]
    pub tx: u32,
    #[serde(rename = "TxIn")]
    pub txin: u32,
    #[serde(rename = "Data")]
    pub data: u32,
}

impl From<&SignatureRecord> for ResultOccurrence {
    fn from(rec: &SignatureRecord) -> Self {
        Self {
            h: rec.height,
            tx: rec.tx_index,
            txin: rec.txin_index,
            data: rec.data_index,
        }
    }
}

/// Which pass of the two-pass algorithm a pipeline run is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Membership-only: populate the Bloom filter, flag candidates.
    First,
    /// Full re-traversal: record every occurrence of a candidate `r`.
    Second,
}

impl Pass {
    pub fn number(self) -> u32 {
        match self {
            Pass::First => 1,
            Pass::Second => 2,
        }
    }
}
