use std::path::PathBuf;

/// Which backend the block source reads from. Mirrors btcd's `--dbtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    LevelDb,
    Sqlite,
}

impl DbType {
    pub fn as_str(self) -> &'static str {
        match self {
            DbType::LevelDb => "leveldb",
            DbType::Sqlite => "sqlite",
        }
    }
}

impl std::str::FromStr for DbType {
    type Err = crate::error::ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leveldb" => Ok(DbType::LevelDb),
            "sqlite" => Ok(DbType::Sqlite),
            other => Err(crate::error::ScanError::UnsupportedDbType(other.to_string())),
        }
    }
}

/// Immutable run configuration, built once in `main` and threaded by
/// reference into the pipeline controller and every stage. No
/// process-wide mutable singleton exists besides the `tracing` logger sink.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub data_dir: PathBuf,
    pub db_type: DbType,
    pub cpu_profile: Option<PathBuf>,
    pub mem_profile: Option<PathBuf>,

    /// Workers per pool, per stage, per pass. The spec's default of 11 is a
    /// preserved off-by-one from the original `for i := 0; i <= 10`; any
    /// value >= 1 is correct.
    pub workers: usize,
    /// Progress report interval, in seconds.
    pub tick_secs: u64,
    /// Expected total signature count the Bloom filter is tuned for.
    pub bloom_capacity: usize,
    /// Target per-insert false-positive rate.
    pub bloom_fp_rate: f64,
    /// Path to the persisted Bloom filter.
    pub bloom_path: PathBuf,
    /// Path to the result document.
    pub result_path: PathBuf,
}

impl ScanConfig {
    /// `<dataDir>/mainnet/blocks_<dbType>[.db]`.
    pub fn block_store_path(&self) -> PathBuf {
        let mut name = format!("blocks_{}", self.db_type.as_str());
        if self.db_type == DbType::Sqlite {
            name.push_str(".db");
        }
        self.data_dir.join("mainnet").join(name)
    }
}
