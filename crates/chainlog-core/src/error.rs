use thiserror::Error;

/// Failures surfaced by a [`crate::chain::BlockStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The handle was already released; re-closing or operating on a closed
    /// store reports this rather than panicking.
    #[error("store is closed")]
    Closed,

    /// Internal retry signal for transactional backends. Callers outside an
    /// adapter should never observe it.
    #[error("transaction conflict")]
    Conflict,

    #[error("backend failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Errors produced by ledger operations. Validation outcomes are ordinary
/// boolean results, never errors.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("malformed block record: {0}")]
    Decode(#[from] bincode::Error),

    /// A traversal cursor did not resolve to a stored block.
    #[error("missing predecessor {0}")]
    MissingPredecessor(String),

    /// The reserved tip record vanished from an initialized ledger.
    #[error("ledger tip record missing")]
    MissingTip,

    /// `next_block` was called after the genesis block was already returned.
    #[error("iterator exhausted, genesis already returned")]
    Exhausted,

    /// The whole nonce domain was searched without meeting the target.
    #[error("nonce space exhausted without meeting the target")]
    NonceSpaceExhausted,
}
