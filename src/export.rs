//! Outline export: the block tree rendered back to the marker text the paste
//! importer reads, two spaces per level.

use crate::core::{Block, BlockId, BlockType, Variant};
use crate::storage::BlockCollection;
use crate::store::BlockStore;

/// Marker-prefixed text for a single block, without indentation.
pub fn line_for(block: &Block) -> String {
    let marker = match (block.block_type, block.variant) {
        (BlockType::PageBreak, _) => return "---".to_string(),
        (BlockType::Task, _) if block.is_checked() => "[x] ",
        (BlockType::Task, _) => "[ ] ",
        (BlockType::Text, Some(Variant::Heading1)) => "# ",
        (BlockType::Text, Some(Variant::Heading2)) => "## ",
        (BlockType::Text, Some(Variant::Bullet)) => "- ",
        (BlockType::Text, Some(Variant::MainPoint)) => "* ",
        _ => "",
    };
    format!("{marker}{}", block.content)
}

pub fn to_outline<C: BlockCollection>(store: &BlockStore<C>) -> String {
    render(store.blocks_in_order().into_iter())
}

/// Outline of one section: the container and its descendants, or the whole
/// document when `container` is `None`.
pub fn section_outline<C: BlockCollection>(
    store: &BlockStore<C>,
    container: Option<BlockId>,
) -> String {
    let Some(container) = container else {
        return to_outline(store);
    };
    let base = store.ancestors(container).len();
    let depth_of = |id: BlockId| store.ancestors(id).len() - base;
    render(
        store
            .subtree_ids(container)
            .into_iter()
            .filter_map(|id| store.get(id).map(|block| (block, depth_of(id)))),
    )
}

fn render<'a>(rows: impl Iterator<Item = (&'a Block, usize)>) -> String {
    let mut out = String::new();
    for (block, depth) in rows {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&line_for(block));
        out.push('\n');
    }
    out
}
