//! Pipeline controller: orchestrates the two-pass scan.
//!
//! Grounded on the teacher's `main.rs::orchestrate` for the overall
//! checkpoint-then-process shape, generalized from a single sequential
//! per-block loop to the three-stage fan-out a single pass now runs: a
//! height emitter, a pool of block-fetch workers, a pool of signature-extract
//! workers, and one sequential consumer applying the pass's Bloom/candidate
//! logic. A stage's sender side is dropped automatically once every task
//! holding a clone of it returns, and the receiving end observes `None`
//! once the last clone is gone.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::Block;
use futures::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block_source::BlockSource;
use crate::bloom::ScalableBloom;
use crate::candidates::{CandidateSet, MatchTable};
use crate::config::ScanConfig;
use crate::extractor::extract_signatures;
use crate::profiling::HeapProfiler;
use crate::result::{finalize, ScanResult};
use crate::stats::RuntimeStats;
use crate::types::{Pass, SignatureRecord};

const HEIGHT_CHANNEL_CAPACITY: usize = 256;
const BLOCK_CHANNEL_CAPACITY: usize = 1024;
const SIGNATURE_CHANNEL_CAPACITY: usize = 1024;

/// Drives both passes of the two-pass algorithm over a `BlockSource`,
/// returning the finalized (singleton-free) result.
pub struct PipelineController {
    source: Arc<dyn BlockSource>,
    config: ScanConfig,
}

impl PipelineController {
    pub fn new(source: Arc<dyn BlockSource>, config: ScanConfig) -> Self {
        Self { source, config }
    }

    pub async fn run(&self) -> anyhow::Result<ScanResult> {
        let tip = self.source.tip()?;
        let mut bloom = ScalableBloom::open(
            &self.config.bloom_path,
            self.config.bloom_capacity,
            self.config.bloom_fp_rate,
        )?;
        let mut candidates = CandidateSet::new();
        let mut matches = MatchTable::new();
        let mut heap_profiler = HeapProfiler::new(self.config.mem_profile.clone());

        for pass in [Pass::First, Pass::Second] {
            heap_profiler.begin_pass(pass.number());
            let interrupted = self
                .run_pass(pass, tip, &mut bloom, &mut candidates, &mut matches)
                .await?;
            heap_profiler.end_pass(pass.number());

            if pass == Pass::First {
                // Must reflect every `add` by the end of pass 1.
                bloom.save(&self.config.bloom_path)?;
            }

            if interrupted {
                info!(pass = pass.number(), "scan interrupted; returning partial results");
                break;
            }
        }

        Ok(finalize(matches))
    }

    /// Runs one pass end to end: spins up the three-stage pipeline, drains
    /// its signature stream against the pass's logic, and tears the stage
    /// pools down. Returns `true` if the pass was cut short by an interrupt.
    async fn run_pass(
        &self,
        pass: Pass,
        tip: i64,
        bloom: &mut ScalableBloom,
        candidates: &mut CandidateSet,
        matches: &mut MatchTable,
    ) -> anyhow::Result<bool> {
        let cancel = CancellationToken::new();
        let mut stats = RuntimeStats::start(pass, tip);

        let (height_tx, height_rx) = mpsc::channel::<i64>(HEIGHT_CHANNEL_CAPACITY);
        let height_rx = Arc::new(AsyncMutex::new(height_rx));
        tokio::spawn(run_height_emitter(tip, height_tx, cancel.clone()));

        let (block_tx, block_rx) = mpsc::channel::<(i64, Block)>(BLOCK_CHANNEL_CAPACITY);
        let block_rx = Arc::new(AsyncMutex::new(block_rx));
        let mut fetch_handles = Vec::with_capacity(self.config.workers);
        for _ in 0..self.config.workers {
            let source = Arc::clone(&self.source);
            let height_rx = Arc::clone(&height_rx);
            let block_tx = block_tx.clone();
            let cancel = cancel.clone();
            fetch_handles.push(tokio::spawn(run_fetch_worker(source, height_rx, block_tx, cancel)));
        }
        drop(block_tx);

        let (sig_tx, sig_rx) = mpsc::channel::<SignatureRecord>(SIGNATURE_CHANNEL_CAPACITY);
        let mut extract_handles = Vec::with_capacity(self.config.workers);
        for _ in 0..self.config.workers {
            let block_rx = Arc::clone(&block_rx);
            let sig_tx = sig_tx.clone();
            let cancel = cancel.clone();
            extract_handles.push(tokio::spawn(run_extract_worker(block_rx, sig_tx, cancel)));
        }
        drop(sig_tx);

        let mut sig_stream = ReceiverStream::new(sig_rx);
        let mut ticker = time::interval(Duration::from_secs(self.config.tick_secs.max(1)));
        ticker.tick().await; // the first tick fires immediately; skip it

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigusr1 = signal(SignalKind::user_defined1())?;

        let mut interrupted = false;
        loop {
            tokio::select! {
                maybe_rec = sig_stream.next() => {
                    let Some(rec) = maybe_rec else { break };
                    stats.record_signature(rec.height);
                    apply_record(pass, rec, bloom, candidates, matches);
                    stats.set_match_count(matches.len());
                }
                _ = ticker.tick() => {
                    stats.report();
                }
                _ = sigusr1.recv() => {
                    stats.report();
                }
                _ = sigint.recv() => {
                    warn!(pass = pass.number(), "received SIGINT; stopping pass early");
                    cancel.cancel();
                    interrupted = true;
                    break;
                }
                _ = sigterm.recv() => {
                    warn!(pass = pass.number(), "received SIGTERM; stopping pass early");
                    cancel.cancel();
                    interrupted = true;
                    break;
                }
            }
        }

        for handle in fetch_handles.into_iter().chain(extract_handles) {
            let _ = handle.await;
        }

        stats.finish_pass();
        Ok(interrupted)
    }
}

/// The step-specific half of the two-pass algorithm's per-record logic.
fn apply_record(
    pass: Pass,
    rec: SignatureRecord,
    bloom: &mut ScalableBloom,
    candidates: &mut CandidateSet,
    matches: &mut MatchTable,
) {
    match pass {
        Pass::First => {
            if bloom.check(&rec.r_bytes) {
                candidates.insert(rec.r_hex.clone());
            } else {
                bloom.add(&rec.r_bytes);
            }
        }
        Pass::Second => {
            if candidates.contains(&rec.r_hex) {
                matches.record(rec);
            }
        }
    }
}

async fn run_height_emitter(tip: i64, height_tx: mpsc::Sender<i64>, cancel: CancellationToken) {
    for height in 0..tip {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = height_tx.send(height) => {
                if res.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_fetch_worker(
    source: Arc<dyn BlockSource>,
    height_rx: Arc<AsyncMutex<mpsc::Receiver<i64>>>,
    block_tx: mpsc::Sender<(i64, Block)>,
    cancel: CancellationToken,
) {
    loop {
        let height = tokio::select! {
            _ = cancel.cancelled() => None,
            height = async {
                let mut rx = height_rx.lock().await;
                rx.recv().await
            } => height,
        };
        let Some(height) = height else { break };

        match source.fetch(height) {
            Ok(block) => {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => false,
                    res = block_tx.send((height, block)) => res.is_ok(),
                };
                if !sent {
                    break;
                }
            }
            // A per-block fetch error ends this worker's loop entirely; the
            // other workers in the pool keep running.
            Err(err) => {
                warn!(height, error = %err, "block fetch failed; worker exiting");
                break;
            }
        }
    }
}

async fn run_extract_worker(
    block_rx: Arc<AsyncMutex<mpsc::Receiver<(i64, Block)>>>,
    sig_tx: mpsc::Sender<SignatureRecord>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => None,
            item = async {
                let mut rx = block_rx.lock().await;
                rx.recv().await
            } => item,
        };
        let Some((height, block)) = item else { break };

        for rec in extract_signatures(height, &block) {
            let sent = tokio::select! {
                _ = cancel.cancelled() => false,
                res = sig_tx.send(rec) => res.is_ok(),
            };
            if !sent {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_source::InMemoryBlockSource;
    use bitcoin::absolute::LockTime;
    use bitcoin::blockdata::block::{Header, Version as BlockVersion};
    use bitcoin::hash_types::TxMerkleNode;
    use bitcoin::pow::CompactTarget;
    use bitcoin::script::{Builder, PushBytesBuf};
    use bitcoin::{OutPoint, Script, Sequence, Transaction, TxIn, TxOut, Witness};
    use k256::ecdsa::{signature::Signer, Signature as K256Signature, SigningKey};
    use k256::FieldBytes;

    fn signing_key(byte: u8) -> SigningKey {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        bytes[0] = 1;
        SigningKey::from_bytes(&FieldBytes::from(bytes)).expect("valid scalar")
    }

    fn der_signature_script(sig: &K256Signature) -> bitcoin::ScriptBuf {
        let mut der = sig.to_der().as_bytes().to_vec();
        der.push(0x01);
        let push = PushBytesBuf::try_from(der).unwrap();
        Builder::new().push_slice(push).into_script()
    }

    fn coinbase_tx() -> Transaction {
        Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Script::builder().into_script(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![],
        }
    }

    fn spending_tx(script_sig: bitcoin::ScriptBuf) -> Transaction {
        Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: bitcoin::Txid::from_raw_hash(bitcoin::hashes::Hash::all_zeros()),
                    vout: 0,
                },
                script_sig,
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: bitcoin::Amount::from_sat(1000),
                script_pubkey: Script::builder().into_script(),
            }],
        }
    }

    fn block_with(txdata: Vec<Transaction>) -> Block {
        Block {
            header: Header {
                version: BlockVersion::ONE,
                prev_blockhash: bitcoin::BlockHash::from_raw_hash(bitcoin::hashes::Hash::all_zeros()),
                merkle_root: TxMerkleNode::from_raw_hash(bitcoin::hashes::Hash::all_zeros()),
                time: 0,
                bits: CompactTarget::from_consensus(0),
                nonce: 0,
            },
            txdata,
        }
    }

    fn test_config(dir: &tempfile::TempDir) -> ScanConfig {
        ScanConfig {
            data_dir: dir.path().to_path_buf(),
            db_type: crate::config::DbType::LevelDb,
            cpu_profile: None,
            mem_profile: None,
            workers: 2,
            tick_secs: 3600,
            bloom_capacity: 64,
            bloom_fp_rate: 0.01,
            bloom_path: dir.path().join("bloom.bin"),
            result_path: dir.path().join("result.json"),
        }
    }

    #[tokio::test]
    async fn empty_chain_yields_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let source: Arc<dyn BlockSource> = Arc::new(InMemoryBlockSource::new(vec![]));
        let controller = PipelineController::new(source, test_config(&dir));
        let result = controller.run().await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn coinbase_only_yields_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let source: Arc<dyn BlockSource> =
            Arc::new(InMemoryBlockSource::new(vec![block_with(vec![coinbase_tx()])]));
        let controller = PipelineController::new(source, test_config(&dir));
        let result = controller.run().await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn repeated_r_across_blocks_surfaces_as_one_key() {
        let key = signing_key(9);
        let sig: K256Signature = key.sign(b"first");
        let tx_a = spending_tx(der_signature_script(&sig));
        let tx_b = spending_tx(der_signature_script(&sig));

        let dir = tempfile::tempdir().unwrap();
        let blocks = vec![
            block_with(vec![coinbase_tx(), tx_a]),
            block_with(vec![coinbase_tx(), tx_b]),
        ];
        let source: Arc<dyn BlockSource> = Arc::new(InMemoryBlockSource::new(blocks));
        let controller = PipelineController::new(source, test_config(&dir));
        let result = controller.run().await.unwrap();

        assert_eq!(result.len(), 1);
        let occurrences = result.values().next().unwrap();
        assert_eq!(occurrences.len(), 2);
    }

    #[tokio::test]
    async fn distinct_signatures_do_not_collide() {
        let tx_a = spending_tx(der_signature_script(&signing_key(1).sign(b"a")));
        let tx_b = spending_tx(der_signature_script(&signing_key(2).sign(b"b")));

        let dir = tempfile::tempdir().unwrap();
        let blocks = vec![block_with(vec![coinbase_tx(), tx_a, tx_b])];
        let source: Arc<dyn BlockSource> = Arc::new(InMemoryBlockSource::new(blocks));
        let controller = PipelineController::new(source, test_config(&dir));
        let result = controller.run().await.unwrap();

        assert!(result.is_empty());
    }
}
