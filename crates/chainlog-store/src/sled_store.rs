use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chainlog_core::chain::{BlockStore, StoreRead, StoreWrite};
use chainlog_core::error::{ChainError, StoreError};
use sled::transaction::{
  ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError,
};
use sled::Db;
use tracing::info;

const TREE_BLOCKS: &str = "blocks";

/// Sled-backed block store: one tree keyed by block hash, with the reserved
/// tip key living in the same tree. Tree-level transactions give the
/// all-or-nothing commit and snapshot isolation the contract requires.
pub struct SledStore {
  db: Db,
  blocks: sled::Tree,
  closed: AtomicBool,
}

impl SledStore {
  /// Open the backing files at `path`, creating them if absent.
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
    let db = sled::open(path).map_err(StoreError::backend)?;
    let blocks = db.open_tree(TREE_BLOCKS).map_err(StoreError::backend)?;
    info!("block store opened");
    Ok(Self {
      db,
      blocks,
      closed: AtomicBool::new(false),
    })
  }

  /// Wipe every record, including the tip. The next ledger open mints a
  /// fresh genesis.
  pub fn clear(&self) -> Result<(), StoreError> {
    self.guard()?;
    self.blocks.clear().map_err(StoreError::backend)?;
    self.db.flush().map_err(StoreError::backend)?;
    Ok(())
  }

  fn guard(&self) -> Result<(), StoreError> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(StoreError::Closed);
    }
    Ok(())
  }
}

struct SledTxn<'a> {
  tree: &'a TransactionalTree,
}

fn txn_err(err: UnabortableTransactionError) -> StoreError {
  match err {
    UnabortableTransactionError::Conflict => StoreError::Conflict,
    UnabortableTransactionError::Storage(e) => StoreError::backend(e),
  }
}

impl StoreRead for SledTxn<'_> {
  fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
    let value = self.tree.get(key).map_err(txn_err)?;
    Ok(value.map(|ivec| ivec.to_vec()))
  }
}

impl StoreWrite for SledTxn<'_> {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
    self.tree.insert(key, value).map_err(txn_err)?;
    Ok(())
  }
}

/// Adapt a chain-level closure result to sled's retry protocol: an inner
/// conflict becomes a sled conflict so the transaction retries, anything
/// else aborts and carries the error out.
fn adapt<T>(result: Result<T, ChainError>) -> Result<T, ConflictableTransactionError<ChainError>> {
  match result {
    Ok(value) => Ok(value),
    Err(ChainError::Storage(StoreError::Conflict)) => Err(ConflictableTransactionError::Conflict),
    Err(err) => Err(ConflictableTransactionError::Abort(err)),
  }
}

fn unwrap_txn<T>(result: Result<T, TransactionError<ChainError>>) -> Result<T, ChainError> {
  match result {
    Ok(value) => Ok(value),
    Err(TransactionError::Abort(err)) => Err(err),
    Err(TransactionError::Storage(err)) => Err(ChainError::Storage(StoreError::backend(err))),
  }
}

impl BlockStore for SledStore {
  fn read_txn<T, F>(&self, f: F) -> Result<T, ChainError>
  where
    F: Fn(&dyn StoreRead) -> Result<T, ChainError>,
  {
    self.guard()?;
    unwrap_txn(self.blocks.transaction(|tree| adapt(f(&SledTxn { tree }))))
  }

  fn write_txn<T, F>(&self, f: F) -> Result<T, ChainError>
  where
    F: Fn(&mut dyn StoreWrite) -> Result<T, ChainError>,
  {
    self.guard()?;
    let out = unwrap_txn(self.blocks.transaction(|tree| {
      let mut txn = SledTxn { tree };
      adapt(f(&mut txn))
    }))?;
    // The tip update must survive a crash immediately after commit.
    self
      .db
      .flush()
      .map_err(|e| ChainError::Storage(StoreError::backend(e)))?;
    Ok(out)
  }

  fn close(&self) -> Result<(), StoreError> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Err(StoreError::Closed);
    }
    self.db.flush().map_err(StoreError::backend)?;
    Ok(())
  }
}
