use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, Level};

mod block_source;
mod bloom;
mod candidates;
mod config;
mod error;
mod extractor;
mod pipeline;
mod profiling;
mod result;
mod stats;
mod types;

use config::{DbType, ScanConfig};
use pipeline::PipelineController;
use profiling::CpuProfiler;

/// `--memprofile` only records anything if allocations route through this
/// allocator; enabled by building with `--features dhat-heap`.
#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

#[derive(Parser, Debug)]
#[command(name = "blockchainr")]
#[command(about = "Scans a local Bitcoin blockchain for ECDSA r-value reuse")]
struct Cli {
    /// Directory holding the btcd-style block database.
    #[arg(long, default_value = "./btcd-data")]
    datadir: PathBuf,

    /// Block database backend: "leveldb" or "sqlite".
    #[arg(long, default_value = "leveldb")]
    dbtype: String,

    /// Write a CPU profile (pprof protobuf) to this path.
    #[arg(long)]
    cpuprofile: Option<PathBuf>,

    /// Write a heap profile (dhat JSON) per pass, suffixed with the pass number.
    #[arg(long)]
    memprofile: Option<PathBuf>,

    /// Workers per stage, per pass.
    #[arg(long, default_value = "11")]
    workers: usize,

    /// Progress report interval, in seconds.
    #[arg(long, default_value = "10")]
    tick_secs: u64,

    /// Expected total signature count the Bloom filter is tuned for.
    #[arg(long, default_value = "100000000")]
    bloom_capacity: usize,

    /// Target per-insert Bloom filter false-positive rate.
    #[arg(long, default_value = "0.005")]
    bloom_fp_rate: f64,

    /// Path to the persisted scalable Bloom filter.
    #[arg(long, default_value = "blockchainr_bloom.bin")]
    bloom_path: PathBuf,

    /// Path to the result document.
    #[arg(long, default_value = "blockchainr.json")]
    result_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    info!("starting blockchainr");
    info!(?cli, "configuration");

    let db_type = DbType::from_str(&cli.dbtype)?;
    let config = ScanConfig {
        data_dir: cli.datadir,
        db_type,
        cpu_profile: cli.cpuprofile,
        mem_profile: cli.memprofile,
        workers: cli.workers.max(1),
        tick_secs: cli.tick_secs,
        bloom_capacity: cli.bloom_capacity,
        bloom_fp_rate: cli.bloom_fp_rate,
        bloom_path: cli.bloom_path,
        result_path: cli.result_path,
    };

    let cpu_profiler = CpuProfiler::start(config.cpu_profile.as_deref())?;

    let source = match block_source::open(&config) {
        Ok(source) => source,
        Err(err) => {
            error!(error = %err, "failed to open block store");
            return Err(err.into());
        }
    };

    let controller = PipelineController::new(source, config.clone());
    let scan_result = match controller.run().await {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "scan failed");
            return Err(err);
        }
    };

    if let Err(err) = result::write_result(&scan_result, &config.result_path) {
        error!(error = %err, "failed to write result document");
        return Err(err);
    }

    cpu_profiler.stop()?;

    info!(
        matches = scan_result.len(),
        path = %config.result_path.display(),
        "blockchainr completed"
    );
    Ok(())
}
