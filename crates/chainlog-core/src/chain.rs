use std::sync::Arc;

use tracing::info;

use crate::block::Block;
use crate::constants::KEY_TIP;
use crate::error::{ChainError, StoreError};
use crate::pow;

/// Read operations available inside any transaction. Exact-key lookup is
/// the only capability the ledger assumes.
pub trait StoreRead {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Write operations available inside a write transaction.
pub trait StoreWrite: StoreRead {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
}

/// Transactional persistence contract the ledger is written against.
///
/// Lives here so storage backends can depend on the core types without a
/// dependency cycle. `read_txn` must present one consistent snapshot for the
/// whole closure; `write_txn` must commit all-or-nothing. The closures are
/// `Fn`, not `FnOnce`: a backend may re-run them after an internal conflict
/// retry.
pub trait BlockStore: Send + Sync {
    fn read_txn<T, F>(&self, f: F) -> Result<T, ChainError>
    where
        F: Fn(&dyn StoreRead) -> Result<T, ChainError>;

    fn write_txn<T, F>(&self, f: F) -> Result<T, ChainError>
    where
        F: Fn(&mut dyn StoreWrite) -> Result<T, ChainError>;

    /// Release the handle. Closing twice is `StoreError::Closed`, as is any
    /// operation after close.
    fn close(&self) -> Result<(), StoreError>;
}

/// Persistent append-only ledger: a store handle plus the hash of the
/// newest block.
///
/// Mutating operations take `&mut self`; the single-writer discipline is
/// enforced at compile time rather than by an internal lock.
pub struct Blockchain<S: BlockStore> {
    store: Arc<S>,
    tip: Vec<u8>,
}

impl<S: BlockStore> Blockchain<S> {
    /// Open an existing ledger or initialize a fresh one. When the store
    /// holds no tip record, a genesis block is mined and persisted together
    /// with the tip key in a single transaction.
    pub fn open(store: S) -> Result<Self, ChainError> {
        let store = Arc::new(store);
        let tip = match store.read_txn(|view| Ok(view.get(KEY_TIP)?))? {
            Some(tip) => tip,
            None => {
                // Mined outside the write transaction; the transaction only
                // persists the result.
                let genesis = Block::genesis()?;
                let bytes = genesis.to_bytes()?;
                info!(hash = %hex::encode(&genesis.hash), "minting genesis block");
                store.write_txn(|txn| {
                    if let Some(existing) = txn.get(KEY_TIP)? {
                        return Ok(existing);
                    }
                    txn.put(&genesis.hash, &bytes)?;
                    txn.put(KEY_TIP, &genesis.hash)?;
                    Ok(genesis.hash.clone())
                })?
            }
        };
        Ok(Self { store, tip })
    }

    /// Mine a block carrying `data` and append it. The tip is read in its
    /// own read transaction, mining runs outside any transaction, and only
    /// the block + tip write commits atomically.
    pub fn append(&mut self, data: impl Into<Vec<u8>>) -> Result<Block, ChainError> {
        let prev = self
            .store
            .read_txn(|view| Ok(view.get(KEY_TIP)?))?
            .ok_or(ChainError::MissingTip)?;
        let block = Block::mine(data.into(), prev)?;
        let bytes = block.to_bytes()?;
        self.store.write_txn(|txn| {
            txn.put(&block.hash, &bytes)?;
            txn.put(KEY_TIP, &block.hash)?;
            Ok(())
        })?;
        self.tip = block.hash.clone();
        info!(hash = %hex::encode(&self.tip), nonce = block.nonce, "block appended");
        Ok(block)
    }

    /// Hash of the newest block.
    pub fn tip(&self) -> &[u8] {
        &self.tip
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Cursor over the chain from the current tip back to genesis.
    pub fn iterator(&self) -> ChainIterator<S> {
        ChainIterator {
            store: Arc::clone(&self.store),
            cursor: self.tip.clone(),
            state: IterState::Active,
        }
    }

    /// Audit the whole chain inside one consistent snapshot: every block
    /// must carry valid proof-of-work, every non-genesis predecessor must
    /// resolve to a stored entry, and no block may reference itself.
    /// Violations are `Ok(false)`; storage and decode faults are errors.
    /// The audit never attempts repair.
    pub fn is_valid(&self) -> Result<bool, ChainError> {
        self.store.read_txn(|view| {
            let mut cursor = match view.get(KEY_TIP)? {
                Some(tip) => tip,
                None => return Err(ChainError::MissingTip),
            };
            loop {
                let bytes = match view.get(&cursor)? {
                    Some(bytes) => bytes,
                    None => return Ok(false),
                };
                let block = Block::from_bytes(&bytes)?;
                if !pow::validate(&block) {
                    return Ok(false);
                }
                if block.prev_hash.is_empty() {
                    return Ok(true);
                }
                if view.get(&block.prev_hash)?.is_none() {
                    return Ok(false);
                }
                // Degenerate malformed entry: a block naming itself as its
                // own predecessor would traverse forever.
                if block.hash == block.prev_hash {
                    return Ok(false);
                }
                cursor = block.prev_hash;
            }
        })
    }

    /// Number of blocks from tip to genesis inclusive, counted inside one
    /// snapshot. Genesis counts as 1.
    pub fn height(&self) -> Result<u64, ChainError> {
        self.store.read_txn(|view| {
            let mut cursor = view.get(KEY_TIP)?.ok_or(ChainError::MissingTip)?;
            let mut count = 0u64;
            loop {
                let bytes = view
                    .get(&cursor)?
                    .ok_or_else(|| ChainError::MissingPredecessor(hex::encode(&cursor)))?;
                let block = Block::from_bytes(&bytes)?;
                count += 1;
                if block.prev_hash.is_empty() {
                    return Ok(count);
                }
                cursor = block.prev_hash;
            }
        })
    }

    /// Release the store handle. A second close is a defined error.
    pub fn close(&self) -> Result<(), ChainError> {
        Ok(self.store.close()?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IterState {
    Active,
    Exhausted,
}

/// Cursor walking the chain strictly newest-to-oldest. Each step runs its
/// own read transaction; use [`Blockchain::is_valid`] or
/// [`Blockchain::height`] when the whole traversal must observe a single
/// snapshot.
pub struct ChainIterator<S: BlockStore> {
    store: Arc<S>,
    cursor: Vec<u8>,
    state: IterState,
}

impl<S: BlockStore> ChainIterator<S> {
    /// Fetch the block at the cursor and step to its predecessor. A cursor
    /// that does not resolve is `ChainError::MissingPredecessor` — fatal to
    /// the traversal, not the process. Once the genesis block has been
    /// returned the iterator is exhausted and further calls are
    /// `ChainError::Exhausted`.
    pub fn next_block(&mut self) -> Result<Block, ChainError> {
        if self.state == IterState::Exhausted {
            return Err(ChainError::Exhausted);
        }
        let cursor = self.cursor.clone();
        let bytes = self
            .store
            .read_txn(|view| Ok(view.get(&cursor)?))?
            .ok_or_else(|| ChainError::MissingPredecessor(hex::encode(&cursor)))?;
        let block = Block::from_bytes(&bytes)?;
        if block.prev_hash.is_empty() {
            self.state = IterState::Exhausted;
        } else {
            self.cursor = block.prev_hash.clone();
        }
        Ok(block)
    }
}

impl<S: BlockStore> Iterator for ChainIterator<S> {
    type Item = Result<Block, ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            IterState::Exhausted => None,
            IterState::Active => Some(self.next_block()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{GENESIS_DATA, HASH_SIZE};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory stand-in for a storage backend. One mutex gives every
    /// transaction a consistent view; writes land in a scratch copy swapped
    /// in on success so a failed closure leaves nothing behind.
    #[derive(Default)]
    struct MemStore {
        map: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
        closed: AtomicBool,
    }

    struct MemView<'a> {
        map: &'a HashMap<Vec<u8>, Vec<u8>>,
    }

    struct MemTxn<'a> {
        map: &'a mut HashMap<Vec<u8>, Vec<u8>>,
    }

    impl StoreRead for MemView<'_> {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(self.map.get(key).cloned())
        }
    }

    impl StoreRead for MemTxn<'_> {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(self.map.get(key).cloned())
        }
    }

    impl StoreWrite for MemTxn<'_> {
        fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
            self.map.insert(key.to_vec(), value.to_vec());
            Ok(())
        }
    }

    impl MemStore {
        fn guard(&self) -> Result<(), StoreError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(StoreError::Closed);
            }
            Ok(())
        }
    }

    impl BlockStore for MemStore {
        fn read_txn<T, F>(&self, f: F) -> Result<T, ChainError>
        where
            F: Fn(&dyn StoreRead) -> Result<T, ChainError>,
        {
            self.guard()?;
            let map = self.map.lock().unwrap();
            f(&MemView { map: &*map })
        }

        fn write_txn<T, F>(&self, f: F) -> Result<T, ChainError>
        where
            F: Fn(&mut dyn StoreWrite) -> Result<T, ChainError>,
        {
            self.guard()?;
            let mut map = self.map.lock().unwrap();
            let mut scratch = map.clone();
            let out = f(&mut MemTxn { map: &mut scratch })?;
            *map = scratch;
            Ok(out)
        }

        fn close(&self) -> Result<(), StoreError> {
            if self.closed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Closed);
            }
            Ok(())
        }
    }

    fn fresh_chain() -> Blockchain<MemStore> {
        Blockchain::open(MemStore::default()).unwrap()
    }

    #[test]
    fn open_mints_genesis() {
        let chain = fresh_chain();
        assert_eq!(chain.height().unwrap(), 1);
        assert!(chain.is_valid().unwrap());
        let genesis = chain.iterator().next_block().unwrap();
        assert!(genesis.prev_hash.is_empty());
        assert_eq!(genesis.data, GENESIS_DATA);
        assert_eq!(genesis.hash, chain.tip());
    }

    #[test]
    fn append_grows_chain_and_links_blocks() {
        let mut chain = fresh_chain();
        for payload in [b"a".as_slice(), b"b", b"c"] {
            chain.append(payload.to_vec()).unwrap();
        }
        assert_eq!(chain.height().unwrap(), 4);
        assert!(chain.is_valid().unwrap());

        let blocks: Vec<Block> = chain.iterator().map(|b| b.unwrap()).collect();
        let payloads: Vec<&[u8]> = blocks.iter().map(|b| b.data.as_slice()).collect();
        assert_eq!(payloads, [b"c".as_slice(), b"b", b"a", GENESIS_DATA]);
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, pair[1].hash);
        }
    }

    #[test]
    fn iterator_terminates_at_genesis_then_errors() {
        let mut chain = fresh_chain();
        chain.append(b"a".to_vec()).unwrap();

        let mut it = chain.iterator();
        it.next_block().unwrap();
        let genesis = it.next_block().unwrap();
        assert!(genesis.prev_hash.is_empty());
        assert!(matches!(it.next_block(), Err(ChainError::Exhausted)));
        // The std iterator contract ends with None instead.
        assert!(it.next().is_none());
    }

    #[test]
    fn tampered_stored_block_fails_audit() {
        let mut chain = fresh_chain();
        let block = chain.append(b"honest".to_vec()).unwrap();
        assert!(chain.is_valid().unwrap());

        let mut forged = block.clone();
        forged.data = b"forged".to_vec();
        let bytes = forged.to_bytes().unwrap();
        chain
            .store()
            .write_txn(|txn| Ok(txn.put(&forged.hash, &bytes)?))
            .unwrap();
        assert!(!chain.is_valid().unwrap());
    }

    #[test]
    fn dangling_predecessor_fails_audit_and_traversal() {
        let chain = fresh_chain();
        let orphan = Block::mine(b"orphan".to_vec(), vec![9u8; HASH_SIZE]).unwrap();
        let bytes = orphan.to_bytes().unwrap();
        chain
            .store()
            .write_txn(|txn| {
                txn.put(&orphan.hash, &bytes)?;
                txn.put(KEY_TIP, &orphan.hash)?;
                Ok(())
            })
            .unwrap();

        assert!(!chain.is_valid().unwrap());
        let mut it = ChainIterator {
            store: Arc::clone(chain.store()),
            cursor: orphan.hash.clone(),
            state: IterState::Active,
        };
        it.next_block().unwrap();
        assert!(matches!(
            it.next_block(),
            Err(ChainError::MissingPredecessor(_))
        ));
    }

    #[test]
    fn self_referencing_block_fails_audit() {
        let chain = fresh_chain();
        let key = vec![5u8; HASH_SIZE];
        // The recorded hash is not part of the hashed material, so a block
        // can carry valid proof-of-work while naming itself as predecessor.
        let mut block = Block::mine(b"loop".to_vec(), key.clone()).unwrap();
        block.hash = key.clone();
        assert!(pow::validate(&block));

        let bytes = block.to_bytes().unwrap();
        chain
            .store()
            .write_txn(|txn| {
                txn.put(&key, &bytes)?;
                txn.put(KEY_TIP, &key)?;
                Ok(())
            })
            .unwrap();
        assert!(!chain.is_valid().unwrap());
    }

    #[test]
    fn corrupt_record_is_a_decode_error_not_a_verdict() {
        let mut chain = fresh_chain();
        let block = chain.append(b"a".to_vec()).unwrap();
        chain
            .store()
            .write_txn(|txn| Ok(txn.put(&block.hash, &[0xde, 0xad])?))
            .unwrap();
        assert!(matches!(chain.is_valid(), Err(ChainError::Decode(_))));
    }

    #[test]
    fn close_twice_is_an_error() {
        let chain = fresh_chain();
        chain.close().unwrap();
        assert!(matches!(
            chain.close(),
            Err(ChainError::Storage(StoreError::Closed))
        ));
    }

    #[test]
    fn operations_after_close_fail() {
        let mut chain = fresh_chain();
        chain.close().unwrap();
        assert!(matches!(
            chain.append(b"late".to_vec()),
            Err(ChainError::Storage(StoreError::Closed))
        ));
        assert!(matches!(
            chain.height(),
            Err(ChainError::Storage(StoreError::Closed))
        ));
    }
}
