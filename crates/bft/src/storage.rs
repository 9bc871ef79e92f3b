//! Chain storage contract and an in-memory implementation.

use favo_types::{Block, BlockNumber, Hash, Header};
use parking_lot::RwLock;
use thiserror::Error;

/// Read-only header access used by consensus.
pub trait BlockchainBackend: Send + Sync {
    /// Header at `number`, or `None` if the backend does not have it (yet).
    fn header_by_number(&self, number: BlockNumber) -> Option<Header>;

    /// Number of the highest stored block, `None` for an empty chain.
    fn latest_number(&self) -> Option<BlockNumber>;
}

/// Append-only block store.
pub trait ChainStore: BlockchainBackend {
    /// Append a finalized block. Blocks must arrive in order and link to the head.
    fn append(&self, block: Block) -> Result<(), StoreError>;

    fn block_by_number(&self, number: BlockNumber) -> Option<Block>;
}

/// Append rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("expected block {expected}, got {got}")]
    NotSequential { expected: BlockNumber, got: BlockNumber },

    #[error("block {number} does not extend head {head:?}")]
    ParentMismatch { number: BlockNumber, head: Hash },
}

/// Thread-safe in-memory chain.
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    blocks: RwLock<Vec<Block>>,
}

impl MemoryChainStore {
    /// Store seeded with a genesis block.
    pub fn with_genesis(genesis: Block) -> Self {
        Self {
            blocks: RwLock::new(vec![genesis]),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    pub fn head(&self) -> Option<Block> {
        self.blocks.read().last().cloned()
    }

    /// Overwrite a stored header in place. Test hook for corrupting chain data.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn replace_header(&self, header: Header) {
        let mut blocks = self.blocks.write();
        if let Some(block) = blocks.get_mut(header.number as usize) {
            block.header = header;
        }
    }
}

impl BlockchainBackend for MemoryChainStore {
    fn header_by_number(&self, number: BlockNumber) -> Option<Header> {
        self.blocks
            .read()
            .get(number as usize)
            .map(|b| b.header.clone())
    }

    fn latest_number(&self) -> Option<BlockNumber> {
        self.blocks.read().last().map(|b| b.number())
    }
}

impl ChainStore for MemoryChainStore {
    fn append(&self, block: Block) -> Result<(), StoreError> {
        let mut blocks = self.blocks.write();
        let expected = blocks.len() as BlockNumber;
        if block.number() != expected {
            return Err(StoreError::NotSequential {
                expected,
                got: block.number(),
            });
        }
        if let Some(head) = blocks.last() {
            if block.header.parent_hash != head.hash() {
                return Err(StoreError::ParentMismatch {
                    number: block.number(),
                    head: head.hash(),
                });
            }
        }
        blocks.push(block);
        Ok(())
    }

    fn block_by_number(&self, number: BlockNumber) -> Option<Block> {
        self.blocks.read().get(number as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use favo_types::test_utils::test_block;

    #[test]
    fn test_append_requires_sequence() {
        let store = MemoryChainStore::default();
        assert_eq!(
            store.append(test_block(1)),
            Err(StoreError::NotSequential {
                expected: 0,
                got: 1
            })
        );
        assert!(store.append(test_block(0)).is_ok());
        assert_eq!(store.latest_number(), Some(0));
    }

    #[test]
    fn test_append_requires_parent_link() {
        let store = MemoryChainStore::with_genesis(test_block(0));
        // test_block(1) has a synthetic parent hash.
        assert!(matches!(
            store.append(test_block(1)),
            Err(StoreError::ParentMismatch { number: 1, .. })
        ));
        assert!(store.header_by_number(1).is_none());
    }
}
