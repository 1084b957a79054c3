use std::path::Path;
use std::sync::Arc;

use bitcoin::Block;
use parking_lot::Mutex;

use crate::config::{DbType, ScanConfig};
use crate::error::ScanError;

/// Block database contract. Given a height in `[0, tip())`, `fetch` returns
/// a fully materialized block. Errors at this layer are not retried: the
/// caller (a block-fetch worker) logs and terminates its own loop on the
/// first error, leaving other workers running - see `pipeline.rs`.
pub trait BlockSource: Send + Sync {
    /// The height above the newest known block. A scan range of
    /// `[0, tip())`; `tip() == 0` means an empty chain.
    fn tip(&self) -> Result<i64, ScanError>;

    /// Fetch and fully decode the block at `height`.
    fn fetch(&self, height: i64) -> Result<Block, ScanError>;
}

/// Opens the configured backend. Default `dbType` is `leveldb`; the file
/// lives at `<dataDir>/mainnet/blocks_<dbType>[.db]`.
pub fn open(config: &ScanConfig) -> Result<Arc<dyn BlockSource>, ScanError> {
    let path = config.block_store_path();
    match config.db_type {
        DbType::LevelDb => Ok(Arc::new(LevelDbBlockSource::open(&path)?)),
        DbType::Sqlite => Ok(Arc::new(SqliteBlockSource::open(&path)?)),
    }
}

const TIP_KEY: &[u8] = b"__blockchainr_tip";

fn block_key(height: i64) -> Vec<u8> {
    format!("block:{height:020}").into_bytes()
}

/// LevelDB-backed block store. Block bytes are consensus-encoded and stored
/// under a height key; the tip height lives under a sentinel key.
///
/// The btcd on-disk block index itself is out of scope - the database
/// engine is consumed as an opaque operation. This is a minimal KV store
/// that satisfies the `open/tip/fetch` contract, not a reimplementation of
/// btcd's internal format.
pub struct LevelDbBlockSource {
    db: Mutex<rusty_leveldb::DB>,
}

impl LevelDbBlockSource {
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ScanError::BloomIo)?;
        }
        let mut opts = rusty_leveldb::Options::default();
        opts.create_if_missing = true;
        let db = rusty_leveldb::DB::open(path.to_string_lossy().as_ref(), opts).map_err(|e| {
            ScanError::OpenBlockStore {
                path: path.display().to_string(),
                source: anyhow::anyhow!(e),
            }
        })?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Insert a block's raw bytes and advance the recorded tip if needed.
    /// Used by tests and by a loader tool that populates the store; the
    /// scanner itself only reads.
    pub fn put_block(&self, height: i64, block: &Block) -> Result<(), ScanError> {
        let bytes = bitcoin::consensus::serialize(block);
        let mut db = self.db.lock();
        db.put(&block_key(height), &bytes).map_err(|e| ScanError::OpenBlockStore {
            path: "leveldb".to_string(),
            source: anyhow::anyhow!(e),
        })?;
        let current_tip = db.get(TIP_KEY).and_then(|b| decode_i64(&b));
        if current_tip.map(|t| height + 1 > t).unwrap_or(true) {
            db.put(TIP_KEY, &encode_i64(height + 1)).map_err(|e| ScanError::OpenBlockStore {
                path: "leveldb".to_string(),
                source: anyhow::anyhow!(e),
            })?;
        }
        Ok(())
    }
}

impl BlockSource for LevelDbBlockSource {
    fn tip(&self) -> Result<i64, ScanError> {
        let mut db = self.db.lock();
        Ok(db.get(TIP_KEY).and_then(|b| decode_i64(&b)).unwrap_or(0))
    }

    fn fetch(&self, height: i64) -> Result<Block, ScanError> {
        let mut db = self.db.lock();
        let bytes = db
            .get(&block_key(height))
            .ok_or(ScanError::BlockNotFound { height })?;
        bitcoin::consensus::deserialize(&bytes).map_err(|source| ScanError::DecodeBlock { height, source })
    }
}

/// SQLite-backed block store, mirroring the teacher's `Database::open`
/// diagnostics (existence check, directory creation, pragma tuning) and its
/// `Mutex<Connection>` sharing pattern, generalized from signature rows to
/// raw block bytes keyed by height.
pub struct SqliteBlockSource {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteBlockSource {
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ScanError::BloomIo)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(|e| ScanError::OpenBlockStore {
            path: path.display().to_string(),
            source: anyhow::anyhow!(e),
        })?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                raw BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| ScanError::OpenBlockStore {
            path: path.display().to_string(),
            source: anyhow::anyhow!(e),
        })?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn put_block(&self, height: i64, block: &Block) -> Result<(), ScanError> {
        let bytes = bitcoin::consensus::serialize(block);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO blocks (height, raw) VALUES (?, ?)",
            rusqlite::params![height, bytes],
        )
        .map_err(|e| ScanError::OpenBlockStore { path: "sqlite".to_string(), source: anyhow::anyhow!(e) })?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('tip', ?1)
             ON CONFLICT(key) DO UPDATE SET value = MAX(value, excluded.value)",
            rusqlite::params![height + 1],
        )
        .map_err(|e| ScanError::OpenBlockStore { path: "sqlite".to_string(), source: anyhow::anyhow!(e) })?;
        Ok(())
    }
}

impl BlockSource for SqliteBlockSource {
    fn tip(&self) -> Result<i64, ScanError> {
        let conn = self.conn.lock();
        let tip: Option<i64> = conn
            .query_row("SELECT value FROM meta WHERE key = 'tip'", [], |row| row.get(0))
            .ok();
        Ok(tip.unwrap_or(0))
    }

    fn fetch(&self, height: i64) -> Result<Block, ScanError> {
        let conn = self.conn.lock();
        let bytes: Vec<u8> = conn
            .query_row("SELECT raw FROM blocks WHERE height = ?", [height], |row| row.get(0))
            .map_err(|_| ScanError::BlockNotFound { height })?;
        bitcoin::consensus::deserialize(&bytes).map_err(|source| ScanError::DecodeBlock { height, source })
    }
}

/// Simple `Vec`-backed test double. Used by the unit tests in
/// `pipeline.rs`/`extractor.rs` instead of a real on-disk store.
#[derive(Default)]
pub struct InMemoryBlockSource {
    blocks: Vec<Block>,
}

impl InMemoryBlockSource {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }
}

impl BlockSource for InMemoryBlockSource {
    fn tip(&self) -> Result<i64, ScanError> {
        Ok(self.blocks.len() as i64)
    }

    fn fetch(&self, height: i64) -> Result<Block, ScanError> {
        self.blocks
            .get(height as usize)
            .cloned()
            .ok_or(ScanError::BlockNotFound { height })
    }
}

fn encode_i64(v: i64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn decode_i64(bytes: &[u8]) -> Option<i64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(i64::from_be_bytes(arr))
}
