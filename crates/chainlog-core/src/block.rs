use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{DIFFICULTY_BITS, GENESIS_DATA};
use crate::error::ChainError;
use crate::pow;

/// An immutable ledger record: an opaque payload, a hash link to its
/// predecessor, and the proof-of-work that admitted it. No field is mutated
/// after mining.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub timestamp: i64,
    pub data: Vec<u8>,
    /// Empty exactly for the genesis block.
    pub prev_hash: Vec<u8>,
    pub hash: Vec<u8>,
    pub nonce: u64,
}

impl Block {
    /// Mine a new block carrying `data` on top of `prev_hash`. CPU-bound in
    /// proportion to the difficulty; performs no I/O.
    pub fn mine(data: Vec<u8>, prev_hash: Vec<u8>) -> Result<Self, ChainError> {
        let mut block = Block {
            timestamp: unix_now(),
            data,
            prev_hash,
            hash: Vec::new(),
            nonce: 0,
        };
        let (nonce, hash) = pow::mine(&block)?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// The unique first block of a chain: fixed marker payload, empty
    /// predecessor link.
    pub fn genesis() -> Result<Self, ChainError> {
        Self::mine(GENESIS_DATA.to_vec(), Vec::new())
    }

    /// Canonical byte encoding hashed during mining and validation, an exact
    /// concatenation with no delimiters:
    /// `prev_hash || data || BE64(timestamp) || BE64(difficulty) || BE64(nonce)`.
    pub fn pow_bytes(&self, nonce: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.prev_hash.len() + self.data.len() + 24);
        bytes.extend_from_slice(&self.prev_hash);
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&(DIFFICULTY_BITS as u64).to_be_bytes());
        bytes.extend_from_slice(&nonce.to_be_bytes());
        bytes
    }

    /// Persisted form of the block.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChainError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a persisted block. Malformed input is a `ChainError::Decode`;
    /// defaults are never substituted.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs() as i64
}
