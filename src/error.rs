use thiserror::Error;

/// Fatal-configuration and per-block failure modes enumerable at a module
/// boundary. Internal to `block_source` and `bloom`; callers convert to
/// `anyhow::Error` with `?` the same way the rest of the crate does.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("failed to open block store at {path}: {source}")]
    OpenBlockStore {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("block at height {height} not found")]
    BlockNotFound { height: i64 },

    #[error("failed to decode block at height {height}: {source}")]
    DecodeBlock {
        height: i64,
        #[source]
        source: bitcoin::consensus::encode::Error,
    },

    #[error("Bloom filter I/O error: {0}")]
    BloomIo(#[from] std::io::Error),

    #[error("Bloom filter serialization error: {0}")]
    BloomSerialization(#[from] Box<bincode::ErrorKind>),

    #[error("unsupported database type: {0}")]
    UnsupportedDbType(String),
}
