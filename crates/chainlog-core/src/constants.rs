pub const HASH_SIZE: usize = 32;

/// Required leading zero bits in a valid block hash. Fixed at build time,
/// not runtime-configurable.
pub const DIFFICULTY_BITS: u32 = 16;

/// Nonce search domain upper bound. The canonical encoding stores the nonce
/// as a two's-complement BE64, which caps it at the positive i64 range.
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// Payload of the first block in every chain.
pub const GENESIS_DATA: &[u8] = b"Genesis Block";

/// Reserved store key holding the current tip hash. Three bytes, so it can
/// never collide with a 32-byte block hash key.
pub const KEY_TIP: &[u8] = b"tip";
