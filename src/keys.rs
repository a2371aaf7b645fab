//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Block numbers are big-endian so RocksDB's lexicographic order is
//! numeric order.

use alloy_primitives::B256;
use anyhow::{bail, Result};

/// Meta ID of the singleton ingestion state.
pub const META_INGESTION_STATE: u8 = 0x01;

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
/// Total length: 2 bytes
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}

/// Encode a block backup key.
///
/// Format: byte 'B' (0x42) + block_hash (32 bytes)
/// Total length: 33 bytes
pub fn encode_backup_key(block_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'B');
    key.extend_from_slice(block_hash.as_slice());
    key
}

/// Encode a backup index key.
///
/// Format: byte 'N' (0x4E) + block_number (8 bytes, big-endian) + block_hash (32 bytes)
/// Total length: 41 bytes
pub fn encode_backup_index_key(block_number: u64, block_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(b'N');
    key.extend_from_slice(&block_number.to_be_bytes());
    key.extend_from_slice(block_hash.as_slice());
    key
}

/// Smallest index key at `block_number`.
pub fn backup_index_lower_bound(block_number: u64) -> Vec<u8> {
    encode_backup_index_key(block_number, B256::ZERO)
}

/// Largest index key at `block_number`.
pub fn backup_index_upper_bound(block_number: u64) -> Vec<u8> {
    encode_backup_index_key(block_number, B256::repeat_byte(0xff))
}

/// Decode a backup index key into (block_number, block_hash).
pub fn decode_backup_index_key(key: &[u8]) -> Result<(u64, B256)> {
    if key.len() != 41 || key[0] != b'N' {
        bail!("Invalid backup index key (len {})", key.len());
    }
    let mut number = [0u8; 8];
    number.copy_from_slice(&key[1..9]);
    Ok((u64::from_be_bytes(number), B256::from_slice(&key[9..41])))
}
