//! Canonical in-memory block tree and its mutation primitives.
//!
//! Blocks are kept in a flat arena keyed by id with a derived child index. Every
//! mutation runs to completion against the arena before returning, then mirrors
//! its writes to the [`BlockCollection`]. A persistence failure is reported as
//! [`StoreError::Persistence`] carrying the already-applied [`Effect`]; the
//! in-memory tree is not rolled back.
//!
//! Operations that name a missing block, or that hit a tree boundary (indenting
//! a first child, outdenting a root block, dropping onto another parent), are
//! no-ops that return an empty [`Effect`].

use crate::core::tree::{ChildIndex, TreeNode};
use crate::core::{Block, BlockId, BlockPatch, BlockType, Properties, Template, Variant, props};
use crate::paste::{self, PasteBatch, PasteConfig, PasteOutcome};
use crate::reorder::{self, DropPosition, OrderPatch};
use crate::storage::{BlockCollection, CollectionError, MemoryCollection};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// When false, deleting the last remaining blocks blanks the final block
    /// instead of removing it.
    pub allow_empty_document: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            allow_empty_document: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Load,
    Create,
    Update,
    Delete,
    Indent,
    Outdent,
    Reorder,
    InsertBatch,
    /// Replay of writes left queued by earlier failures.
    Retry,
}

/// Ids touched by one mutation, so dependent views can invalidate.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Effect {
    pub created: Vec<BlockId>,
    pub updated: BTreeSet<BlockId>,
    pub removed: BTreeSet<BlockId>,
}

impl Effect {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn created_id(&self) -> Option<BlockId> {
        self.created.first().copied()
    }

    fn touch(&mut self, id: BlockId) {
        if !self.created.contains(&id) {
            self.updated.insert(id);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persistence failed during {mutation:?}: {source}")]
    Persistence {
        mutation: Mutation,
        effect: Effect,
        #[source]
        source: CollectionError,
    },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Persistence { source, .. } => source.is_retryable(),
        }
    }

    /// The in-memory changes that were applied before persistence failed.
    pub fn effect(&self) -> &Effect {
        match self {
            StoreError::Persistence { effect, .. } => effect,
        }
    }
}

/// Result of [`BlockStore::paste`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pasted {
    /// Nothing to insert.
    Nothing,
    /// Single-line payload for the caller to insert at the caret.
    Inline(String),
    /// New blocks were inserted after the trigger block.
    Blocks(Effect),
}

#[derive(Debug, Clone)]
enum Write {
    Add(Block),
    BulkAdd(Vec<Block>),
    Update(BlockId, BlockPatch),
    Delete(BlockId),
}

#[derive(Debug, Clone)]
struct Slot {
    block: Block,
    seq: u64,
}

#[derive(Debug)]
pub struct BlockStore<C = MemoryCollection> {
    slots: HashMap<BlockId, Slot>,
    index: ChildIndex,
    next_seq: u64,
    collection: C,
    /// Writes not yet accepted by the collection, oldest first.
    pending: VecDeque<Write>,
    config: StoreConfig,
}

impl BlockStore<MemoryCollection> {
    pub fn in_memory() -> Self {
        Self::new(MemoryCollection::new(), StoreConfig::default())
    }
}

impl<C: BlockCollection> BlockStore<C> {
    /// Creates an empty store in front of `collection` without reading it.
    pub fn new(collection: C, config: StoreConfig) -> Self {
        Self {
            slots: HashMap::new(),
            index: ChildIndex::default(),
            next_seq: 0,
            collection,
            pending: VecDeque::new(),
            config,
        }
    }

    /// Rebuilds the tree from everything the collection holds.
    ///
    /// Blocks that cannot be reached from the document root (orphans, cycles)
    /// are left out of the tree. Tied sibling orders are renumbered and the
    /// renumbering is written back.
    pub fn load(collection: C, config: StoreConfig) -> Result<Self, StoreError> {
        let blocks = collection
            .get_all()
            .map_err(|source| StoreError::Persistence {
                mutation: Mutation::Load,
                effect: Effect::default(),
                source,
            })?;

        let mut store = Self::new(collection, config);
        for block in blocks {
            store.insert_slot(block);
        }
        store.reindex();

        let reachable: HashSet<BlockId> = store.index.walk().into_iter().map(|(id, _)| id).collect();
        let total = store.slots.len();
        store.slots.retain(|id, _| reachable.contains(id));
        if store.slots.len() != total {
            warn!(
                dropped = total - store.slots.len(),
                "ignoring blocks unreachable from the document root"
            );
            store.reindex();
        }

        let mut effect = Effect::default();
        let mut writes = Vec::new();
        let parents: Vec<Option<BlockId>> = std::iter::once(None)
            .chain(store.slots.keys().copied().map(Some))
            .collect();
        for parent in parents {
            store.normalize(parent, &mut effect, &mut writes);
        }
        store.mirror(Mutation::Load, effect, writes)?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.slots.get(&id).map(|slot| &slot.block)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn content(&self, id: BlockId) -> Option<&str> {
        self.get(id).map(|block| block.content.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn child_ids(&self, parent: Option<BlockId>) -> &[BlockId] {
        self.index.children(parent)
    }

    pub fn children(&self, parent: Option<BlockId>) -> Vec<&Block> {
        self.index
            .children(parent)
            .iter()
            .filter_map(|id| self.get(*id))
            .collect()
    }

    pub fn roots(&self) -> Vec<&Block> {
        self.children(None)
    }

    /// Every block depth first in rendering order, paired with its depth.
    pub fn blocks_in_order(&self) -> Vec<(&Block, usize)> {
        self.index
            .walk()
            .into_iter()
            .filter_map(|(id, depth)| self.get(id).map(|block| (block, depth)))
            .collect()
    }

    /// `id` and every descendant, depth first. Empty when `id` is unknown.
    pub fn subtree_ids(&self, id: BlockId) -> Vec<BlockId> {
        if !self.contains(id) {
            return Vec::new();
        }
        self.index.subtree(id)
    }

    pub fn tree(&self) -> Vec<TreeNode> {
        self.index
            .children(None)
            .iter()
            .filter_map(|id| self.node(*id, false))
            .collect()
    }

    pub fn subtree(&self, id: BlockId) -> Option<TreeNode> {
        self.node(id, false)
    }

    /// Subtree as it renders: children of collapsed blocks are left out.
    pub fn rendered_subtree(&self, id: BlockId) -> Option<TreeNode> {
        self.node(id, true)
    }

    fn node(&self, id: BlockId, prune_collapsed: bool) -> Option<TreeNode> {
        let block = self.get(id)?.clone();
        let children = if prune_collapsed && block.is_collapsed() {
            Vec::new()
        } else {
            self.index
                .children(Some(id))
                .iter()
                .filter_map(|child| self.node(*child, prune_collapsed))
                .collect()
        };
        Some(TreeNode { block, children })
    }

    /// Parent chain of `id`, nearest first, ending at a root-level block.
    pub fn ancestors(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|block| block.parent_id);
        while let Some(parent) = current {
            if out.len() > self.slots.len() {
                break;
            }
            out.push(parent);
            current = self.get(parent).and_then(|block| block.parent_id);
        }
        out
    }

    pub fn is_descendant(&self, id: BlockId, ancestor: BlockId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// The lecture container holding `id` (or `id` itself when it is one).
    /// `None` means the document root is the nearest container.
    pub fn nearest_container(&self, id: BlockId) -> Option<BlockId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|candidate| self.get(*candidate).is_some_and(Block::is_container))
    }

    /// Creates a block under `parent`.
    ///
    /// With `after`, the new block inherits its shape from that block (see
    /// [`Block::successor_template`]) and lands directly after it, every later
    /// sibling moving up by one. Without `after`, a plain text block is
    /// appended as the last child.
    pub fn create(
        &mut self,
        parent: Option<BlockId>,
        after: Option<BlockId>,
    ) -> Result<Effect, StoreError> {
        let template = match after {
            Some(after) => match self.get(after) {
                Some(block) => block.successor_template(),
                None => return Ok(Effect::default()),
            },
            None => Template::default(),
        };
        self.create_with(parent, after, &template, "")
    }

    /// Creates a block with an explicit template and initial content.
    pub fn create_with(
        &mut self,
        parent: Option<BlockId>,
        after: Option<BlockId>,
        template: &Template,
        content: &str,
    ) -> Result<Effect, StoreError> {
        if parent.is_some_and(|parent| !self.contains(parent)) {
            return Ok(Effect::default());
        }
        let position = match after {
            Some(after) => match self.index.position(parent, after) {
                Some(position) => Some(position),
                None => {
                    debug!(%after, "create target is not a child of the requested parent");
                    return Ok(Effect::default());
                }
            },
            None => None,
        };

        let mut effect = Effect::default();
        let mut writes = Vec::new();
        let planned = self.plan_orders(parent, &mut effect, &mut writes, |siblings| {
            match position {
                Some(position) => reorder::shift_after(siblings, Some(position), 1),
                None => reorder::append_order(siblings, 1).map(|order| (order, Vec::new())),
            }
        });
        let Some((order, shifts)) = planned else {
            return self.mirror(Mutation::Create, effect, writes);
        };

        let mut block = template.instantiate(parent, order);
        block.content = content.to_string();
        effect.created.push(block.id);
        self.apply_orders(&shifts, &mut effect, &mut writes);
        writes.push(Write::Add(block.clone()));
        self.insert_slot(block);
        self.reindex();
        self.normalize(parent, &mut effect, &mut writes);
        self.mirror(Mutation::Create, effect, writes)
    }

    /// Merges `patch` into the block.
    ///
    /// Content-only patches never touch `order` or `parent_id`. A patch that
    /// would move the block under itself or one of its descendants, or under a
    /// missing parent, is rejected as a no-op.
    pub fn update(&mut self, id: BlockId, patch: &BlockPatch) -> Result<Effect, StoreError> {
        let Some(block) = self.get(id) else {
            return Ok(Effect::default());
        };
        if patch.is_empty() {
            return Ok(Effect::default());
        }
        let old_parent = block.parent_id;
        let new_parent = patch.parent_id.unwrap_or(old_parent);
        if let Some(target) = new_parent
            && (target == id || !self.contains(target) || self.is_descendant(target, id))
        {
            debug!(%id, %target, "rejecting reparent that would break the tree");
            return Ok(Effect::default());
        }

        let mut effect = Effect::default();
        let mut writes = Vec::new();
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.block.apply_patch(patch);
        }
        effect.touch(id);
        writes.push(Write::Update(id, patch.clone()));

        if patch.is_structural() {
            self.reindex();
            self.normalize(old_parent, &mut effect, &mut writes);
            if new_parent != old_parent {
                self.normalize(new_parent, &mut effect, &mut writes);
            }
        }
        self.mirror(Mutation::Update, effect, writes)
    }

    /// Slash-command conversion: changes type and variant, keeps content.
    pub fn convert(
        &mut self,
        id: BlockId,
        block_type: BlockType,
        variant: Option<Variant>,
    ) -> Result<Effect, StoreError> {
        let Some(block) = self.get(id) else {
            return Ok(Effect::default());
        };
        let mut properties = Properties::new();
        if block_type == BlockType::Task && block.block_type != BlockType::Task {
            properties.insert(props::CHECKED.to_string(), false.into());
        }
        let patch = BlockPatch {
            block_type: Some(block_type),
            variant: Some(variant),
            properties: (!properties.is_empty()).then_some(properties),
            ..BlockPatch::default()
        };
        self.update(id, &patch)
    }

    pub fn set_collapsed(&mut self, id: BlockId, collapsed: bool) -> Result<Effect, StoreError> {
        self.update(id, &BlockPatch::property(props::COLLAPSED, collapsed))
    }

    /// Deletes the block and its whole subtree.
    ///
    /// When the document would end up empty and empty documents are not
    /// allowed, the block is blanked to an empty text block instead and only
    /// its descendants are removed.
    pub fn delete(&mut self, id: BlockId) -> Result<Effect, StoreError> {
        let Some(block) = self.get(id) else {
            return Ok(Effect::default());
        };
        let parent = block.parent_id;
        let doomed = self.index.subtree(id);
        let keep_blank = !self.config.allow_empty_document && doomed.len() == self.slots.len();

        let mut effect = Effect::default();
        let mut writes = Vec::new();
        let removed = if keep_blank { &doomed[1..] } else { &doomed[..] };
        for doomed_id in removed.iter().rev() {
            self.slots.remove(doomed_id);
            effect.removed.insert(*doomed_id);
            writes.push(Write::Delete(*doomed_id));
        }

        if keep_blank {
            let patch = self.blank_patch(id);
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.block.apply_patch(&patch);
            }
            effect.touch(id);
            writes.push(Write::Update(id, patch));
        }

        self.reindex();
        self.normalize(parent, &mut effect, &mut writes);
        self.mirror(Mutation::Delete, effect, writes)
    }

    fn blank_patch(&self, id: BlockId) -> BlockPatch {
        let cleared: Properties = self
            .get(id)
            .map(|block| {
                block
                    .properties
                    .keys()
                    .map(|key| (key.clone(), serde_json::Value::Null))
                    .collect()
            })
            .unwrap_or_default();
        BlockPatch {
            content: Some(String::new()),
            block_type: Some(BlockType::Text),
            variant: Some(None),
            properties: (!cleared.is_empty()).then_some(cleared),
            ..BlockPatch::default()
        }
    }

    /// Makes the block the last child of its preceding sibling.
    pub fn indent(&mut self, id: BlockId) -> Result<Effect, StoreError> {
        let Some(block) = self.get(id) else {
            return Ok(Effect::default());
        };
        let parent = block.parent_id;
        let Some(position) = self.index.position(parent, id) else {
            return Ok(Effect::default());
        };
        if position == 0 {
            return Ok(Effect::default());
        }
        let new_parent = self.index.children(parent)[position - 1];

        let mut effect = Effect::default();
        let mut writes = Vec::new();
        let Some(order) = self.plan_orders(Some(new_parent), &mut effect, &mut writes, |siblings| {
            reorder::append_order(siblings, 1)
        }) else {
            return self.mirror(Mutation::Indent, effect, writes);
        };
        self.place(id, Some(new_parent), order, &mut effect, &mut writes);
        self.reindex();
        self.normalize(parent, &mut effect, &mut writes);
        self.mirror(Mutation::Indent, effect, writes)
    }

    /// Moves the block up one level, directly after its former parent.
    pub fn outdent(&mut self, id: BlockId) -> Result<Effect, StoreError> {
        let Some(parent) = self.get(id).and_then(|block| block.parent_id) else {
            return Ok(Effect::default());
        };
        let Some(grandparent) = self.get(parent).map(|block| block.parent_id) else {
            return Ok(Effect::default());
        };
        let Some(parent_position) = self.index.position(grandparent, parent) else {
            return Ok(Effect::default());
        };
        let mut effect = Effect::default();
        let mut writes = Vec::new();
        let Some((order, shifts)) = self.plan_orders(grandparent, &mut effect, &mut writes, |siblings| {
            reorder::shift_after(siblings, Some(parent_position), 1)
        }) else {
            return self.mirror(Mutation::Outdent, effect, writes);
        };
        self.apply_orders(&shifts, &mut effect, &mut writes);
        self.place(id, grandparent, order, &mut effect, &mut writes);
        self.reindex();
        self.normalize(Some(parent), &mut effect, &mut writes);
        self.normalize(grandparent, &mut effect, &mut writes);
        self.mirror(Mutation::Outdent, effect, writes)
    }

    /// Moves the block to `target_index` among its current siblings.
    pub fn reorder_within_parent(
        &mut self,
        id: BlockId,
        target_index: usize,
    ) -> Result<Effect, StoreError> {
        let Some(block) = self.get(id) else {
            return Ok(Effect::default());
        };
        let parent = block.parent_id;
        let Some(from) = self.index.position(parent, id) else {
            return Ok(Effect::default());
        };
        let patches = reorder::move_within(&self.sibling_orders(parent), from, target_index);
        if patches.is_empty() {
            return Ok(Effect::default());
        }

        let mut effect = Effect::default();
        let mut writes = Vec::new();
        self.apply_orders(&patches, &mut effect, &mut writes);
        self.reindex();
        self.mirror(Mutation::Reorder, effect, writes)
    }

    /// Drag-and-drop: places `dragged` before or after `target`.
    ///
    /// Only same-parent drops are honoured; any other target is a no-op.
    pub fn move_relative(
        &mut self,
        dragged: BlockId,
        target: BlockId,
        position: DropPosition,
    ) -> Result<Effect, StoreError> {
        let (Some(dragged_block), Some(target_block)) = (self.get(dragged), self.get(target))
        else {
            return Ok(Effect::default());
        };
        if dragged == target {
            return Ok(Effect::default());
        }
        let parent = dragged_block.parent_id;
        if !reorder::is_valid_drop(parent, target_block.parent_id) {
            debug!(%dragged, %target, "rejecting cross-parent drop");
            return Ok(Effect::default());
        }
        let (Some(from), Some(to)) = (
            self.index.position(parent, dragged),
            self.index.position(parent, target),
        ) else {
            return Ok(Effect::default());
        };
        self.reorder_within_parent(dragged, reorder::drop_index(from, to, position))
    }

    /// Inserts an imported batch as one atomic step.
    ///
    /// The batch's top-level blocks land directly after `after` (or at the end
    /// of the batch parent's children when `after` is `None`); later siblings
    /// shift up by the number of top-level blocks.
    pub fn insert_batch(
        &mut self,
        after: Option<BlockId>,
        batch: PasteBatch,
    ) -> Result<Effect, StoreError> {
        let parent = batch.parent;
        if batch.blocks.is_empty() || parent.is_some_and(|parent| !self.contains(parent)) {
            return Ok(Effect::default());
        }
        let count = batch.top_level_count();
        let position = match after {
            Some(after) => match self.index.position(parent, after) {
                Some(position) => Some(position),
                None => return Ok(Effect::default()),
            },
            None => None,
        };

        let mut effect = Effect::default();
        let mut writes = Vec::new();
        let planned = self.plan_orders(parent, &mut effect, &mut writes, |siblings| {
            match position {
                Some(position) => reorder::shift_after(siblings, Some(position), count),
                None => reorder::append_order(siblings, count).map(|start| (start, Vec::new())),
            }
        });
        let Some((start, shifts)) = planned else {
            return self.mirror(Mutation::InsertBatch, effect, writes);
        };
        let mut blocks = batch.blocks;
        for block in &mut blocks {
            if block.parent_id == parent {
                block.order = start + (block.order - batch.start_order);
            }
            effect.created.push(block.id);
        }
        self.apply_orders(&shifts, &mut effect, &mut writes);
        writes.push(Write::BulkAdd(blocks.clone()));
        for block in blocks {
            self.insert_slot(block);
        }
        self.reindex();
        self.normalize(parent, &mut effect, &mut writes);
        self.mirror(Mutation::InsertBatch, effect, writes)
    }

    /// Imports pasted text after `trigger`, among the trigger's siblings.
    pub fn paste(
        &mut self,
        trigger: BlockId,
        text: &str,
        config: &PasteConfig,
    ) -> Result<Pasted, StoreError> {
        let Some(block) = self.get(trigger) else {
            return Ok(Pasted::Nothing);
        };
        // insert_batch renumbers the batch to land after the trigger.
        match paste::import(text, block.parent_id, 0, config) {
            PasteOutcome::Empty => Ok(Pasted::Nothing),
            PasteOutcome::Inline(text) => Ok(Pasted::Inline(text)),
            PasteOutcome::Blocks(batch) => self.insert_batch(Some(trigger), batch).map(Pasted::Blocks),
        }
    }

    fn insert_slot(&mut self, block: Block) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(block.id, Slot { block, seq });
    }

    fn reindex(&mut self) {
        self.index = ChildIndex::build(self.slots.values().map(|slot| (&slot.block, slot.seq)));
    }

    fn sibling_orders(&self, parent: Option<BlockId>) -> Vec<(BlockId, u32)> {
        self.index
            .children(parent)
            .iter()
            .filter_map(|id| self.get(*id).map(|block| (*id, block.order)))
            .collect()
    }

    /// Plans new order values among the children of `parent`. When `plan`
    /// runs out of `u32` room, the siblings are renumbered densely and the
    /// plan is tried once more.
    fn plan_orders<T>(
        &mut self,
        parent: Option<BlockId>,
        effect: &mut Effect,
        writes: &mut Vec<Write>,
        plan: impl Fn(&[(BlockId, u32)]) -> Option<T>,
    ) -> Option<T> {
        let siblings = self.sibling_orders(parent);
        if let Some(planned) = plan(&siblings) {
            return Some(planned);
        }
        debug!(?parent, "sibling orders exhausted, renumbering");
        let patches = reorder::renumber(&siblings);
        self.apply_orders(&patches, effect, writes);
        self.reindex();
        plan(&self.sibling_orders(parent))
    }

    fn place(
        &mut self,
        id: BlockId,
        parent: Option<BlockId>,
        order: u32,
        effect: &mut Effect,
        writes: &mut Vec<Write>,
    ) {
        let patch = BlockPatch::placement(parent, order);
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.block.apply_patch(&patch);
        }
        effect.touch(id);
        writes.push(Write::Update(id, patch));
    }

    fn apply_orders(&mut self, patches: &[OrderPatch], effect: &mut Effect, writes: &mut Vec<Write>) {
        for patch in patches {
            if let Some(slot) = self.slots.get_mut(&patch.id) {
                slot.block.order = patch.order;
                effect.touch(patch.id);
                writes.push(Write::Update(patch.id, BlockPatch::order(patch.order)));
            }
        }
    }

    /// Renumbers the children of `parent` if any two compare equal.
    fn normalize(&mut self, parent: Option<BlockId>, effect: &mut Effect, writes: &mut Vec<Write>) {
        let siblings = self.sibling_orders(parent);
        if reorder::is_strictly_increasing(&siblings) {
            return;
        }
        let patches = reorder::renumber(&siblings);
        self.apply_orders(&patches, effect, writes);
        self.reindex();
    }

    /// Queues `writes` behind anything left over from earlier failures and
    /// sends the queue to the collection in order.
    fn mirror(
        &mut self,
        mutation: Mutation,
        effect: Effect,
        writes: Vec<Write>,
    ) -> Result<Effect, StoreError> {
        self.pending.extend(writes);
        match self.flush_pending() {
            Ok(()) => Ok(effect),
            Err(source) => {
                warn!(
                    ?mutation,
                    pending = self.pending.len(),
                    error = %source,
                    "persistence write failed, keeping in-memory state"
                );
                Err(StoreError::Persistence {
                    mutation,
                    effect,
                    source,
                })
            }
        }
    }

    /// Stops at the first failure, leaving the failed write at the head.
    fn flush_pending(&mut self) -> Result<(), CollectionError> {
        while let Some(write) = self.pending.front() {
            let result = match write {
                Write::Add(block) => self.collection.add(block),
                Write::BulkAdd(blocks) => self.collection.bulk_add(blocks),
                Write::Update(id, patch) => self.collection.update(*id, patch),
                Write::Delete(id) => self.collection.delete(*id),
            };
            result?;
            self.pending.pop_front();
        }
        Ok(())
    }

    /// Writes that failed to reach the collection and are waiting for a retry.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Replays queued writes. Every mutation does this first on its own, so
    /// calling it is only needed to converge without making a further edit.
    pub fn retry_persistence(&mut self) -> Result<(), StoreError> {
        self.mirror(Mutation::Retry, Effect::default(), Vec::new())
            .map(|_| ())
    }
}
