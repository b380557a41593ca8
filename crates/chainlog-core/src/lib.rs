pub mod block;
pub mod chain;
pub mod constants;
pub mod error;
pub mod pow;

pub use block::Block;
pub use chain::{BlockStore, Blockchain, ChainIterator, StoreRead, StoreWrite};
pub use error::{ChainError, StoreError};
