//! Signature extractor: a pure function over a decoded `Block` that yields
//! every ECDSA signature found in non-coinbase transaction inputs.
//!
//! Grounded on the teacher's `parser.rs::extract_signature_from_input` (DER
//! parsing via `k256`, scanning `scriptSig` pushes and witness items as
//! signature candidates), stripped of the z-value/prevout machinery that
//! only key recovery needs.

use bitcoin::blockdata::script::Instruction;
use bitcoin::{Block, TxIn};
use k256::ecdsa::Signature as K256Signature;

use crate::types::SignatureRecord;

/// Extract every signature occurrence from every non-coinbase input of
/// every transaction in `block`, in `(tx_index, txin_index, data_index)`
/// order.
pub fn extract_signatures(height: i64, block: &Block) -> Vec<SignatureRecord> {
    let mut out = Vec::new();

    for (tx_index, tx) in block.txdata.iter().enumerate() {
        if tx.is_coinbase() {
            continue;
        }

        for (txin_index, input) in tx.input.iter().enumerate() {
            for (data_index, candidate) in push_data_candidates(input).into_iter().enumerate() {
                if let Some(r_bytes) = parse_signature_r(candidate) {
                    out.push(SignatureRecord::new(
                        r_bytes,
                        height,
                        tx_index as u32,
                        txin_index as u32,
                        data_index as u32,
                    ));
                }
            }
        }
    }

    out
}

/// Every pushed-data item a signature could plausibly live in: the
/// `scriptSig`'s push operands, in script order, followed by the witness
/// stack's items, so that signatures carried in segwit inputs aren't
/// silently invisible to the scanner. Failure to parse the script yields an
/// empty list for that input rather than aborting the block.
fn push_data_candidates(input: &TxIn) -> Vec<&[u8]> {
    let mut items = Vec::new();

    for instruction in input.script_sig.instructions() {
        if let Ok(Instruction::PushBytes(bytes)) = instruction {
            items.push(bytes.as_bytes());
        }
    }

    for witness_item in input.witness.iter() {
        items.push(witness_item);
    }

    items
}

/// Attempt to parse `candidate` as a DER-encoded ECDSA signature over
/// secp256k1, returning its `r` component canonicalized to 32 big-endian
/// bytes on success. Input scripts append a one-byte sighash type after the
/// DER signature, so both the raw bytes and the bytes with that trailing
/// byte stripped are tried.
fn parse_signature_r(candidate: &[u8]) -> Option<[u8; 32]> {
    if let Ok(sig) = K256Signature::from_der(candidate) {
        return Some(r_bytes_of(&sig));
    }
    if candidate.len() > 1 {
        if let Ok(sig) = K256Signature::from_der(&candidate[..candidate.len() - 1]) {
            return Some(r_bytes_of(&sig));
        }
    }
    None
}

fn r_bytes_of(sig: &K256Signature) -> [u8; 32] {
    let bytes = sig.to_bytes();
    let mut r = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::blockdata::block::{Header, Version as BlockVersion};
    use bitcoin::hash_types::TxMerkleNode;
    use bitcoin::pow::CompactTarget;
    use bitcoin::script::{Builder, PushBytesBuf};
    use bitcoin::{OutPoint, Script, Sequence, Transaction, TxOut, Witness};
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
        der.push(0x01); // SIGHASH_ALL
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

    #[test]
    fn skips_coinbase_input() {
        let block = block_with(vec![coinbase_tx()]);
        let records = extract_signatures(1, &block);
        assert!(records.is_empty());
    }

    #[test]
    fn finds_signature_in_script_sig() {
        let key = signing_key(7);
        let sig: K256Signature = key.sign(b"message");
        let tx = spending_tx(der_signature_script(&sig));
        let block = block_with(vec![coinbase_tx(), tx]);

        let records = extract_signatures(10, &block);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tx_index, 1);
        assert_eq!(records[0].txin_index, 0);
        assert_eq!(records[0].height, 10);
    }

    #[test]
    fn empty_script_yields_no_records() {
        let tx = spending_tx(Script::builder().into_script());
        let block = block_with(vec![coinbase_tx(), tx]);
        assert!(extract_signatures(1, &block).is_empty());
    }
}
