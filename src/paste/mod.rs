//! Indentation-aware paste importer.
//!
//! Pasting runs in two stages. [`parse_lines`] turns raw text into a flat list
//! of [`PasteLine`]s (indent level, implied type, stripped content), and
//! [`assemble`] nests that list into new blocks using a level stack. Rich
//! sources only need to produce the same flat list to reuse [`assemble`].

use crate::core::{Block, BlockId, BlockType, Properties, Template, Variant, props};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PasteConfig {
    /// Columns a tab expands to before the indent level is derived.
    pub tab_width: usize,
    /// When set, `* ` marks a main point instead of a bullet.
    pub distinguish_main_point: bool,
}

impl Default for PasteConfig {
    fn default() -> Self {
        Self {
            tab_width: 2,
            distinguish_main_point: false,
        }
    }
}

/// One non-blank pasted line, indentation already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct PasteLine {
    pub content: String,
    pub block_type: BlockType,
    pub variant: Option<Variant>,
    pub properties: Properties,
    pub indent: usize,
}

impl PasteLine {
    pub fn plain(content: impl Into<String>, indent: usize) -> Self {
        Self {
            content: content.into(),
            block_type: BlockType::Text,
            variant: None,
            properties: Properties::new(),
            indent,
        }
    }

    fn template(&self) -> Template {
        Template {
            block_type: self.block_type,
            variant: self.variant,
            properties: self.properties.clone(),
        }
    }
}

/// New blocks ready for a single atomic insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PasteBatch {
    pub parent: Option<BlockId>,
    /// Order of the first top-level block.
    pub start_order: u32,
    /// First order value left free after the batch's top-level blocks.
    pub next_order: u32,
    /// Blocks in document order; parents always precede their children.
    pub blocks: Vec<Block>,
}

impl PasteBatch {
    pub fn top_level_count(&self) -> u32 {
        self.next_order - self.start_order
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PasteOutcome {
    /// Blank payload, nothing to do.
    Empty,
    /// Single line without a newline, inserted at the caret as text.
    Inline(String),
    Blocks(PasteBatch),
}

/// Imports `text` as children of `parent`, numbering top-level blocks from
/// `start_order`.
pub fn import(
    text: &str,
    parent: Option<BlockId>,
    start_order: u32,
    config: &PasteConfig,
) -> PasteOutcome {
    if text.trim().is_empty() {
        return PasteOutcome::Empty;
    }
    if !text.contains('\n') {
        return PasteOutcome::Inline(text.to_string());
    }
    let lines = parse_lines(text, config);
    if lines.is_empty() {
        return PasteOutcome::Empty;
    }
    PasteOutcome::Blocks(assemble(parent, start_order, &lines))
}

/// Splits `text` into lines, derives indent levels and strips markers.
///
/// Blank lines are skipped, and levels are shifted so the shallowest line sits
/// at level zero.
pub fn parse_lines(text: &str, config: &PasteConfig) -> Vec<PasteLine> {
    let mut lines: Vec<PasteLine> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_line(line, config))
        .collect();

    if let Some(min) = lines.iter().map(|line| line.indent).min() {
        for line in &mut lines {
            line.indent -= min;
        }
    }
    lines
}

fn parse_line(line: &str, config: &PasteConfig) -> PasteLine {
    let mut columns = 0;
    let mut body = line;
    for (offset, ch) in line.char_indices() {
        match ch {
            '\t' => columns += config.tab_width,
            ch if ch.is_whitespace() => columns += 1,
            _ => {
                body = &line[offset..];
                break;
            }
        }
    }

    let mut parsed = strip_marker(body.trim_end(), config);
    parsed.indent = columns / 2;
    parsed
}

fn strip_marker(body: &str, config: &PasteConfig) -> PasteLine {
    if body == "---" {
        let mut line = PasteLine::plain("", 0);
        line.block_type = BlockType::PageBreak;
        return line;
    }

    let task_body = body.strip_prefix("- ").unwrap_or(body);
    for (marker, checked) in [("[ ] ", false), ("[] ", false), ("[x] ", true), ("[X] ", true)] {
        if let Some(rest) = task_body.strip_prefix(marker) {
            let mut line = PasteLine::plain(rest, 0);
            line.block_type = BlockType::Task;
            line.properties
                .insert(props::CHECKED.to_string(), checked.into());
            return line;
        }
    }

    let star_variant = if config.distinguish_main_point {
        Variant::MainPoint
    } else {
        Variant::Bullet
    };
    let markers = [
        ("## ", Variant::Heading2),
        ("# ", Variant::Heading1),
        ("- ", Variant::Bullet),
        ("* ", star_variant),
    ];
    for (marker, variant) in markers {
        if let Some(rest) = body.strip_prefix(marker) {
            let mut line = PasteLine::plain(rest, 0);
            line.variant = Some(variant);
            return line;
        }
    }
    PasteLine::plain(body, 0)
}

/// Nests `lines` under `parent` using a stack of `(level, id)`.
///
/// The stack is popped while its top sits at the same or a deeper level than
/// the current line; whatever remains on top becomes the line's parent.
pub fn assemble(parent: Option<BlockId>, start_order: u32, lines: &[PasteLine]) -> PasteBatch {
    let mut blocks = Vec::with_capacity(lines.len());
    let mut stack: Vec<(usize, BlockId)> = Vec::new();
    let mut next_child: HashMap<BlockId, u32> = HashMap::new();
    let mut next_top = start_order;

    for line in lines {
        while stack.last().is_some_and(|(level, _)| *level >= line.indent) {
            stack.pop();
        }
        let (block_parent, order) = match stack.last() {
            Some((_, id)) => {
                let slot = next_child.entry(*id).or_insert(0);
                let order = *slot;
                *slot += 1;
                (Some(*id), order)
            }
            None => {
                let order = next_top;
                next_top += 1;
                (parent, order)
            }
        };

        let mut block = line.template().instantiate(block_parent, order);
        block.content.clone_from(&line.content);
        stack.push((line.indent, block.id));
        blocks.push(block);
    }

    PasteBatch {
        parent,
        start_order,
        next_order: next_top,
        blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(text: &str) -> PasteBatch {
        match import(text, None, 0, &PasteConfig::default()) {
            PasteOutcome::Blocks(batch) => batch,
            other => panic!("expected blocks, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_bullets() {
        let parent = uuid::Uuid::from_u128(1);
        let PasteOutcome::Blocks(batch) =
            import("- a\n  - b\n- c", Some(parent), 0, &PasteConfig::default())
        else {
            panic!("expected blocks");
        };
        let [a, b, c] = batch.blocks.as_slice() else {
            panic!("expected three blocks");
        };
        assert_eq!((a.content.as_str(), a.parent_id, a.order), ("a", Some(parent), 0));
        assert_eq!((b.content.as_str(), b.parent_id, b.order), ("b", Some(a.id), 0));
        assert_eq!((c.content.as_str(), c.parent_id, c.order), ("c", Some(parent), 1));
        assert!(batch.blocks.iter().all(|block| block.variant == Some(Variant::Bullet)));
        assert_eq!(batch.next_order, 2);
    }

    #[test]
    fn test_blank_and_inline_payloads() {
        let config = PasteConfig::default();
        assert_eq!(import("  \n\t\n", None, 0, &config), PasteOutcome::Empty);
        assert_eq!(
            import("just words", None, 0, &config),
            PasteOutcome::Inline("just words".into())
        );
    }

    #[test]
    fn test_global_indent_and_tabs_normalize() {
        let lines = parse_lines("    a\n\t    b\n    c\n", &PasteConfig::default());
        let levels: Vec<usize> = lines.iter().map(|line| line.indent).collect();
        assert_eq!(levels, vec![0, 1, 0]);

        let wide = PasteConfig {
            tab_width: 4,
            ..PasteConfig::default()
        };
        let lines = parse_lines("a\n\tb\n", &wide);
        assert_eq!(lines[1].indent, 2);
    }

    #[test]
    fn test_markers() {
        let blocks = batch("# Title\n## Sub\n[ ] todo\n[x] done\n- [ ] listed\n* star\nplain\n---\n").blocks;
        assert_eq!(blocks[0].variant, Some(Variant::Heading1));
        assert_eq!(blocks[1].variant, Some(Variant::Heading2));
        assert_eq!(blocks[2].block_type, BlockType::Task);
        assert!(!blocks[2].is_checked());
        assert!(blocks[3].is_checked());
        assert_eq!(blocks[4].block_type, BlockType::Task);
        assert_eq!(blocks[4].content, "listed");
        assert_eq!(blocks[5].variant, Some(Variant::Bullet));
        assert_eq!(blocks[6].variant, None);
        assert_eq!(blocks[6].content, "plain");
        assert!(blocks[7].is_page_break());

        let config = PasteConfig {
            distinguish_main_point: true,
            ..PasteConfig::default()
        };
        let lines = parse_lines("* key idea\n", &config);
        assert_eq!(lines[0].variant, Some(Variant::MainPoint));
    }

    #[test]
    fn test_deep_jump_attaches_to_nearest_shallower_line() {
        let blocks = batch("a\n      deep\n  mid\nb").blocks;
        assert_eq!(blocks[1].parent_id, Some(blocks[0].id));
        assert_eq!(blocks[2].parent_id, Some(blocks[0].id));
        assert_eq!(blocks[2].order, 1);
        assert_eq!(blocks[3].parent_id, None);
        assert_eq!(blocks[3].order, 1);
    }
}
