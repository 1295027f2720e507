//! Persistence collaborator for the block store.
//!
//! The store treats persistence as an ordered key-value collection keyed by
//! block id. Writes are mirrored after the in-memory state has already been
//! updated, so a failure here never rolls the tree back on its own.

use crate::core::{Block, BlockId, BlockPatch};
use std::collections::BTreeMap;
use std::io;

#[cfg(feature = "storage")]
mod snapshot;

#[cfg(feature = "storage")]
pub use snapshot::{SnapshotCollection, SnapshotStorage};

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("block not found: {0}")]
    NotFound(BlockId),
    #[error("collection unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt storage: {0}")]
    Corrupt(&'static str),
    #[error("missing storage")]
    Missing,
    #[error("serialization error")]
    Serialization,
}

impl CollectionError {
    /// Whether repeating the same write may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectionError::Unavailable(_) | CollectionError::Io(_)
        )
    }
}

pub trait BlockCollection {
    fn get_all(&self) -> Result<Vec<Block>, CollectionError>;

    fn add(&mut self, block: &Block) -> Result<(), CollectionError>;

    fn bulk_add(&mut self, blocks: &[Block]) -> Result<(), CollectionError> {
        for block in blocks {
            self.add(block)?;
        }
        Ok(())
    }

    fn update(&mut self, id: BlockId, patch: &BlockPatch) -> Result<(), CollectionError>;

    fn delete(&mut self, id: BlockId) -> Result<(), CollectionError>;

    /// Children of `parent` sorted by `order`.
    fn by_parent(&self, parent: Option<BlockId>) -> Result<Vec<Block>, CollectionError> {
        let mut blocks: Vec<Block> = self
            .get_all()?
            .into_iter()
            .filter(|block| block.parent_id == parent)
            .collect();
        blocks.sort_by_key(|block| block.order);
        Ok(blocks)
    }
}

impl<C: BlockCollection + ?Sized> BlockCollection for Box<C> {
    fn get_all(&self) -> Result<Vec<Block>, CollectionError> {
        (**self).get_all()
    }

    fn add(&mut self, block: &Block) -> Result<(), CollectionError> {
        (**self).add(block)
    }

    fn bulk_add(&mut self, blocks: &[Block]) -> Result<(), CollectionError> {
        (**self).bulk_add(blocks)
    }

    fn update(&mut self, id: BlockId, patch: &BlockPatch) -> Result<(), CollectionError> {
        (**self).update(id, patch)
    }

    fn delete(&mut self, id: BlockId) -> Result<(), CollectionError> {
        (**self).delete(id)
    }

    fn by_parent(&self, parent: Option<BlockId>) -> Result<Vec<Block>, CollectionError> {
        (**self).by_parent(parent)
    }
}

/// Collection held entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryCollection {
    blocks: BTreeMap<BlockId, Block>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        Self {
            blocks: blocks.into_iter().map(|block| (block.id, block)).collect(),
        }
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockCollection for MemoryCollection {
    fn get_all(&self) -> Result<Vec<Block>, CollectionError> {
        Ok(self.blocks.values().cloned().collect())
    }

    fn add(&mut self, block: &Block) -> Result<(), CollectionError> {
        self.blocks.insert(block.id, block.clone());
        Ok(())
    }

    fn update(&mut self, id: BlockId, patch: &BlockPatch) -> Result<(), CollectionError> {
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or(CollectionError::NotFound(id))?;
        block.apply_patch(patch);
        Ok(())
    }

    fn delete(&mut self, id: BlockId) -> Result<(), CollectionError> {
        self.blocks.remove(&id);
        Ok(())
    }
}
