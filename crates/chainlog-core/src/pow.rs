use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::block::Block;
use crate::constants::{DIFFICULTY_BITS, HASH_SIZE, MAX_NONCE};
use crate::error::ChainError;

/// The 32-byte big-endian representation of `2^(256 - bits)`. A digest is
/// admissible iff it is strictly below this value; for equal-length byte
/// arrays that is a plain lexicographic comparison.
fn target(bits: u32) -> [u8; HASH_SIZE] {
    debug_assert!(bits >= 1 && bits < 256);
    let mut t = [0u8; HASH_SIZE];
    t[((bits - 1) / 8) as usize] = 1u8 << ((256 - bits) % 8);
    t
}

fn digest(block: &Block, nonce: u64) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(block.pow_bytes(nonce));
    hasher.finalize().into()
}

fn meets_target(hash: &[u8; HASH_SIZE], target: &[u8; HASH_SIZE]) -> bool {
    hash[..] < target[..]
}

/// Sequential nonce search: start at 0, increment by 1, stop at the first
/// nonce whose digest falls strictly below the target. Exhausting the
/// domain is the defined failure `ChainError::NonceSpaceExhausted`, never a
/// silent wraparound.
pub fn mine(block: &Block) -> Result<(u64, Vec<u8>), ChainError> {
    let target = target(DIFFICULTY_BITS);
    for nonce in 0..MAX_NONCE {
        let hash = digest(block, nonce);
        if meets_target(&hash, &target) {
            debug!(nonce, hash = %hex::encode(hash), "mined block");
            return Ok((nonce, hash.to_vec()));
        }
    }
    Err(ChainError::NonceSpaceExhausted)
}

/// Parallel variant of [`mine`]: rayon workers split the nonce domain and
/// share the found signal. `find_first` respects range order, so the winning
/// nonce is identical to the sequential search.
pub fn mine_parallel(block: &Block) -> Result<(u64, Vec<u8>), ChainError> {
    let target = target(DIFFICULTY_BITS);
    let nonce = (0..MAX_NONCE)
        .into_par_iter()
        .find_first(|nonce| meets_target(&digest(block, *nonce), &target))
        .ok_or(ChainError::NonceSpaceExhausted)?;
    Ok((nonce, digest(block, nonce).to_vec()))
}

/// Recompute the digest at the block's recorded nonce and compare it against
/// the target. Pure; safe to call repeatedly and from concurrent readers.
pub fn validate(block: &Block) -> bool {
    meets_target(&digest(block, block.nonce), &target(DIFFICULTY_BITS))
}
