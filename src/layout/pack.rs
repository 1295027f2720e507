use crate::core::BlockId;
use serde::{Deserialize, Serialize};

use super::LayoutConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    Block,
    Heading,
    PageBreak,
}

/// A top-level block with its measured height (subtree included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutItem {
    pub id: BlockId,
    pub height: f64,
    pub kind: ItemKind,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Page {
    pub blocks: Vec<BlockId>,
    pub used: f64,
}

impl Page {
    fn push(&mut self, item: &LayoutItem) {
        self.blocks.push(item.id);
        self.used += item.height;
    }
}

/// Greedy single pass over `items`.
///
/// Page breaks close the current page and never produce an empty page. A
/// heading that would be stranded at the foot of a page, with no room for the
/// next non-break item (its height capped at one page), starts a new page.
/// Items taller than a page sit alone on their own page.
pub fn pack(items: &[LayoutItem], config: &LayoutConfig) -> Vec<Page> {
    let budget = config.page_height;
    let mut pages = Vec::new();
    let mut current = Page::default();

    for (index, item) in items.iter().enumerate() {
        if item.kind == ItemKind::PageBreak {
            close(&mut pages, &mut current);
            continue;
        }
        if !current.blocks.is_empty() {
            let mut needed = item.height;
            if item.kind == ItemKind::Heading && config.keep_heading_with_next {
                needed += look_ahead(&items[index + 1..]).map_or(0.0, |h| h.min(budget));
            }
            if needed > budget - current.used {
                close(&mut pages, &mut current);
            }
        }
        current.push(item);
    }
    close(&mut pages, &mut current);
    pages
}

fn look_ahead(rest: &[LayoutItem]) -> Option<f64> {
    rest.iter()
        .find(|item| item.kind != ItemKind::PageBreak)
        .map(|item| item.height)
}

fn close(pages: &mut Vec<Page>, current: &mut Page) {
    if !current.blocks.is_empty() {
        pages.push(std::mem::take(current));
    }
}

/// Degraded layout: pages split only at explicit breaks, heights ignored.
pub fn split_at_breaks(items: &[LayoutItem]) -> Vec<Page> {
    items
        .split(|item| item.kind == ItemKind::PageBreak)
        .filter(|run| !run.is_empty())
        .map(|run| Page {
            blocks: run.iter().map(|item| item.id).collect(),
            used: 0.0,
        })
        .collect()
}
