//! Derived child index and tree-shaped read views.
//!
//! Blocks live in a flat arena keyed by id. The child index maps each parent
//! (`None` for the document root) to its children sorted by `order`, with ties
//! broken by insertion sequence. It is rebuilt from scratch whenever the tree
//! shape changes.

use super::{Block, BlockId};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChildIndex {
    children: HashMap<Option<BlockId>, Vec<BlockId>>,
}

impl ChildIndex {
    /// Builds the index from `(block, insertion sequence)` pairs.
    pub fn build<'a>(entries: impl IntoIterator<Item = (&'a Block, u64)>) -> Self {
        let mut grouped: HashMap<Option<BlockId>, Vec<(u32, u64, BlockId)>> = HashMap::new();
        for (block, seq) in entries {
            grouped
                .entry(block.parent_id)
                .or_default()
                .push((block.order, seq, block.id));
        }

        let children = grouped
            .into_iter()
            .map(|(parent, mut siblings)| {
                siblings.sort_unstable();
                (parent, siblings.into_iter().map(|(_, _, id)| id).collect())
            })
            .collect();
        Self { children }
    }

    pub fn children(&self, parent: Option<BlockId>) -> &[BlockId] {
        self.children
            .get(&parent)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Position of `id` among the children of `parent`.
    pub fn position(&self, parent: Option<BlockId>, id: BlockId) -> Option<usize> {
        self.children(parent).iter().position(|child| *child == id)
    }

    /// `id` followed by every descendant, depth first in sibling order.
    pub fn subtree(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(Some(current)).iter().rev().copied());
        }
        out
    }

    /// Every block reachable from the root, depth first, paired with its depth.
    pub fn walk(&self) -> Vec<(BlockId, usize)> {
        let mut out = Vec::new();
        let mut stack: Vec<(BlockId, usize)> =
            self.children(None).iter().rev().map(|id| (*id, 0)).collect();
        while let Some((current, depth)) = stack.pop() {
            out.push((current, depth));
            stack.extend(
                self.children(Some(current))
                    .iter()
                    .rev()
                    .map(|child| (*child, depth + 1)),
            );
        }
        out
    }
}

/// Nested read view of a block and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub block: Block,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, including the node itself.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TreeNode::len).sum::<usize>()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TreeNode::depth)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn block(id: u128, parent: Option<u128>, order: u32) -> Block {
        let mut block = Block::text(parent.map(Uuid::from_u128), order, "");
        block.id = Uuid::from_u128(id);
        block
    }

    #[test]
    fn test_ties_break_by_insertion_sequence() {
        let a = block(1, None, 0);
        let b = block(2, None, 0);
        let c = block(3, None, 1);
        let index = ChildIndex::build([(&c, 0), (&b, 2), (&a, 1)]);
        assert_eq!(
            index.children(None),
            &[Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)]
        );
    }

    #[test]
    fn test_subtree_and_walk_are_depth_first() {
        let a = block(1, None, 0);
        let a1 = block(2, Some(1), 0);
        let a2 = block(3, Some(1), 1);
        let a1x = block(4, Some(2), 0);
        let b = block(5, None, 1);
        let index = ChildIndex::build([(&a, 0), (&a1, 1), (&a2, 2), (&a1x, 3), (&b, 4)]);

        let ids: Vec<u128> = index
            .subtree(Uuid::from_u128(1))
            .into_iter()
            .map(|id| id.as_u128())
            .collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);

        let walked: Vec<(u128, usize)> = index
            .walk()
            .into_iter()
            .map(|(id, depth)| (id.as_u128(), depth))
            .collect();
        assert_eq!(walked, vec![(1, 0), (2, 1), (4, 2), (3, 1), (5, 0)]);
        assert!(index.children(Some(Uuid::from_u128(99))).is_empty());
    }
}
