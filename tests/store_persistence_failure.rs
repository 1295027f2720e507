use md_blocks::{
    Block, BlockCollection, BlockId, BlockPatch, BlockStore, CollectionError, MemoryCollection,
    Mutation, StoreConfig, StoreError, Template,
};
use std::cell::Cell;

/// Memory collection whose next `failures` writes are refused.
#[derive(Debug, Default)]
struct Flaky {
    inner: MemoryCollection,
    failures: Cell<u32>,
}

impl Flaky {
    fn fail_next(&self, writes: u32) {
        self.failures.set(writes);
    }

    fn trip(&self) -> Result<(), CollectionError> {
        let left = self.failures.get();
        if left > 0 {
            self.failures.set(left - 1);
            return Err(CollectionError::Unavailable("disk offline".to_string()));
        }
        Ok(())
    }
}

impl BlockCollection for Flaky {
    fn get_all(&self) -> Result<Vec<Block>, CollectionError> {
        self.inner.get_all()
    }

    fn add(&mut self, block: &Block) -> Result<(), CollectionError> {
        self.trip()?;
        self.inner.add(block)
    }

    fn bulk_add(&mut self, blocks: &[Block]) -> Result<(), CollectionError> {
        self.trip()?;
        self.inner.bulk_add(blocks)
    }

    fn update(&mut self, id: BlockId, patch: &BlockPatch) -> Result<(), CollectionError> {
        self.trip()?;
        self.inner.update(id, patch)
    }

    fn delete(&mut self, id: BlockId) -> Result<(), CollectionError> {
        self.trip()?;
        self.inner.delete(id)
    }
}

fn create(store: &mut BlockStore<Flaky>, after: Option<BlockId>, content: &str) -> BlockId {
    store
        .create_with(None, after, &Template::default(), content)
        .unwrap()
        .created_id()
        .unwrap()
}

fn sorted(mut blocks: Vec<Block>) -> Vec<Block> {
    blocks.sort_by_key(|block| block.id);
    blocks
}

fn assert_converged(store: &BlockStore<Flaky>) {
    let in_memory = store
        .blocks_in_order()
        .into_iter()
        .map(|(block, _)| block.clone())
        .collect();
    assert_eq!(store.pending_writes(), 0);
    assert_eq!(
        sorted(store.collection().get_all().unwrap()),
        sorted(in_memory)
    );
}

fn two_blocks() -> (BlockStore<Flaky>, BlockId, BlockId) {
    let mut store = BlockStore::new(Flaky::default(), StoreConfig::default());
    let a = create(&mut store, None, "a");
    let b = create(&mut store, Some(a), "b");
    (store, a, b)
}

#[test]
fn test_failed_create_keeps_memory_and_retry_converges() {
    let (mut store, _, b) = two_blocks();

    store.collection().fail_next(1);
    let err = store
        .create_with(None, Some(b), &Template::default(), "c")
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::Persistence {
            mutation: Mutation::Create,
            ..
        }
    ));
    assert!(err.is_retryable());
    let created = err.effect().created_id().unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(store.content(created), Some("c"));
    assert_eq!(store.collection().get_all().unwrap().len(), 2);
    assert!(store.pending_writes() > 0);

    store.retry_persistence().unwrap();
    assert_converged(&store);
}

#[test]
fn test_next_mutation_drains_queued_writes_first() {
    let (mut store, _, b) = two_blocks();

    store.collection().fail_next(1);
    let created = store
        .create_with(None, Some(b), &Template::default(), "c")
        .unwrap_err()
        .effect()
        .created_id()
        .unwrap();

    store
        .update(created, &BlockPatch::content("c, edited"))
        .unwrap();
    let stored = store
        .collection()
        .get_all()
        .unwrap()
        .into_iter()
        .find(|block| block.id == created)
        .unwrap();
    assert_eq!(stored.content, "c, edited");
    assert_converged(&store);
}

#[test]
fn test_queued_writes_replay_in_order_after_several_failures() {
    let (mut store, a, b) = two_blocks();

    store.collection().fail_next(3);
    let c = store
        .create_with(None, Some(b), &Template::default(), "c")
        .unwrap_err()
        .effect()
        .created_id()
        .unwrap();
    assert!(store.update(a, &BlockPatch::content("a, edited")).is_err());
    let err = store.delete(b).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Persistence {
            mutation: Mutation::Delete,
            ..
        }
    ));
    assert!(err.effect().removed.contains(&b));

    assert_eq!(store.content(a), Some("a, edited"));
    assert!(!store.contains(b));
    assert!(store.contains(c));
    assert_eq!(store.collection().get_all().unwrap().len(), 2);

    store.retry_persistence().unwrap();
    assert_converged(&store);
    assert!(
        store
            .collection()
            .get_all()
            .unwrap()
            .iter()
            .all(|block| block.id != b)
    );
}

#[test]
fn test_retry_while_collection_still_fails_keeps_queue() {
    let (mut store, a, _) = two_blocks();

    store.collection().fail_next(2);
    assert!(store.update(a, &BlockPatch::content("a2")).is_err());
    let queued = store.pending_writes();

    let err = store.retry_persistence().unwrap_err();
    assert!(matches!(
        err,
        StoreError::Persistence {
            mutation: Mutation::Retry,
            ..
        }
    ));
    assert_eq!(store.pending_writes(), queued);

    store.retry_persistence().unwrap();
    assert_converged(&store);
}
