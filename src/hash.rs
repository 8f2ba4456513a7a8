//! Canonical serialization and hashing
//!
//! Every hashed structure is encoded as little-endian fixed-width integers and
//! u32-length-prefixed byte strings / sequences, then digested with SHA-256.

use crate::types::*;
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> Hash {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(data));
    hash
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn write_u64(bytes: &mut Vec<u8>, value: u64) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(bytes: &mut Vec<u8>, value: &[u8]) {
    write_u32(bytes, value.len() as u32);
    bytes.extend_from_slice(value);
}

fn write_len(bytes: &mut Vec<u8>, len: usize) {
    write_u32(bytes, len as u32);
}

pub fn serialize_out_point(out_point: &OutPoint, bytes: &mut Vec<u8>) {
    bytes.extend_from_slice(&out_point.tx_hash);
    write_u32(bytes, out_point.index);
}

pub fn serialize_script(script: &Script, bytes: &mut Vec<u8>) {
    bytes.extend_from_slice(&script.code_hash);
    write_len(bytes, script.args.len());
    for arg in &script.args {
        write_bytes(bytes, arg);
    }
}

pub fn serialize_cell_output(output: &CellOutput, bytes: &mut Vec<u8>) {
    write_u64(bytes, output.capacity);
    write_bytes(bytes, &output.data);
    serialize_script(&output.lock, bytes);
    match &output.type_ {
        Some(type_) => {
            bytes.push(1);
            serialize_script(type_, bytes);
        }
        None => bytes.push(0),
    }
}

/// Transaction without witnesses: the domain of `Transaction::hash`.
pub fn serialize_raw_transaction(tx: &Transaction, bytes: &mut Vec<u8>) {
    write_u32(bytes, tx.version);

    write_len(bytes, tx.deps.len());
    for dep in &tx.deps {
        serialize_out_point(dep, bytes);
    }

    write_len(bytes, tx.inputs.len());
    for input in &tx.inputs {
        serialize_out_point(&input.previous_output, bytes);
        write_u64(bytes, input.since);
    }

    write_len(bytes, tx.outputs.len());
    for output in &tx.outputs {
        serialize_cell_output(output, bytes);
    }
}

pub fn serialize_transaction(tx: &Transaction, bytes: &mut Vec<u8>) {
    serialize_raw_transaction(tx, bytes);
    write_len(bytes, tx.witnesses.len());
    for witness in &tx.witnesses {
        write_len(bytes, witness.len());
        for item in witness {
            write_bytes(bytes, item);
        }
    }
}

pub fn serialize_header(header: &Header, bytes: &mut Vec<u8>) {
    write_u32(bytes, header.version);
    bytes.extend_from_slice(&header.parent_hash);
    write_u64(bytes, header.timestamp);
    write_u64(bytes, header.number);
    bytes.extend_from_slice(&header.transactions_root);
    bytes.extend_from_slice(&header.witnesses_root);
    bytes.extend_from_slice(&header.proposals_hash);
    bytes.extend_from_slice(&header.uncles_hash);
    write_u32(bytes, header.uncles_count);
    write_u64(bytes, header.epoch);
    write_u64(bytes, header.difficulty);
    write_u64(bytes, header.seal.nonce);
    write_bytes(bytes, &header.seal.proof);
}

/// Merkle root over a list of leaf hashes; zero for an empty list.
///
/// Pairs are hashed level by level; an odd last node is paired with itself.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0; 32];
    }

    let mut hashes = leaves.to_vec();
    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity((hashes.len() + 1) / 2);
        for chunk in hashes.chunks(2) {
            let right = chunk.get(1).unwrap_or(&chunk[0]);
            let mut combined = Vec::with_capacity(64);
            combined.extend_from_slice(&chunk[0]);
            combined.extend_from_slice(right);
            next_level.push(sha256(&combined));
        }
        hashes = next_level;
    }

    hashes[0]
}

pub fn transactions_root(transactions: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
    merkle_root(&hashes)
}

pub fn witnesses_root(transactions: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(Transaction::witness_hash).collect();
    merkle_root(&hashes)
}

pub fn proposals_hash(proposals: &[ProposalShortId]) -> Hash {
    if proposals.is_empty() {
        return [0; 32];
    }
    let bytes: Vec<u8> = proposals.iter().flat_map(|id| id.0).collect();
    sha256(&bytes)
}

pub fn uncles_hash(uncles: &[UncleBlock]) -> Hash {
    if uncles.is_empty() {
        return [0; 32];
    }
    let bytes: Vec<u8> = uncles.iter().flat_map(|uncle| uncle.header.hash()).collect();
    sha256(&bytes)
}
