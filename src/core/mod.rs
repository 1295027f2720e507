//! Block data model for the outline editor.
//!
//! This module provides the building blocks every other module works with:
//!
//! - [`Block`] - The atomic document unit, a node in the block tree
//! - [`BlockType`] and [`Variant`] - Closed discriminators for rendering
//! - [`BlockPatch`] - Partial update merged into an existing block
//! - [`tree`] - Derived child index and nested tree views

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub mod tree;

pub type BlockId = Uuid;

/// Free-form structured payload for type-specific data.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Property keys the engine itself reads or writes.
pub mod props {
    pub const CHECKED: &str = "checked";
    pub const COLLAPSED: &str = "collapsed";
    pub const DUE_DATE: &str = "due_date";
    pub const LECTURE_NUMBER: &str = "lecture_number";
    pub const LECTURE_DATE: &str = "lecture_date";
    pub const CITATION: &str = "citation";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockType {
    Text,
    Task,
    Image,
    PdfHighlight,
    PageBreak,
    LectureContainer,
    Subpage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    Heading1,
    Heading2,
    Bullet,
    MainPoint,
}

impl Variant {
    pub fn is_heading(self) -> bool {
        matches!(self, Variant::Heading1 | Variant::Heading2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub parent_id: Option<BlockId>,
    pub order: u32,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub content: String,
    #[serde(default)]
    pub variant: Option<Variant>,
    #[serde(default)]
    pub properties: Properties,
}

impl Block {
    pub fn new(block_type: BlockType, parent_id: Option<BlockId>, order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            order,
            block_type,
            content: String::new(),
            variant: None,
            properties: Properties::new(),
        }
    }

    pub fn text(parent_id: Option<BlockId>, order: u32, content: impl Into<String>) -> Self {
        let mut block = Self::new(BlockType::Text, parent_id, order);
        block.content = content.into();
        block
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = Some(variant);
        self
    }

    pub fn is_heading(&self) -> bool {
        self.block_type == BlockType::Text && self.variant.is_some_and(Variant::is_heading)
    }

    pub fn is_page_break(&self) -> bool {
        self.block_type == BlockType::PageBreak
    }

    pub fn is_container(&self) -> bool {
        self.block_type == BlockType::LectureContainer
    }

    pub fn is_checked(&self) -> bool {
        self.flag(props::CHECKED)
    }

    pub fn is_collapsed(&self) -> bool {
        self.flag(props::COLLAPSED)
    }

    fn flag(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Shape of the block created when the user splits out of this one.
    ///
    /// A task is followed by an unchecked task, a bullet or main point keeps
    /// its variant, and everything else (headings included) reverts to plain
    /// text.
    pub fn successor_template(&self) -> Template {
        match (self.block_type, self.variant) {
            (BlockType::Task, _) => Template::task(false),
            (BlockType::Text, Some(variant @ (Variant::Bullet | Variant::MainPoint))) => {
                Template {
                    block_type: BlockType::Text,
                    variant: Some(variant),
                    properties: Properties::new(),
                }
            }
            _ => Template::default(),
        }
    }

    /// Merges a partial update into this block.
    pub fn apply_patch(&mut self, patch: &BlockPatch) {
        if let Some(content) = &patch.content {
            self.content.clone_from(content);
        }
        if let Some(block_type) = patch.block_type {
            self.block_type = block_type;
        }
        if let Some(variant) = patch.variant {
            self.variant = variant;
        }
        if let Some(properties) = &patch.properties {
            for (key, value) in properties {
                if value.is_null() {
                    self.properties.remove(key);
                } else {
                    self.properties.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(parent_id) = patch.parent_id {
            self.parent_id = parent_id;
        }
        if let Some(order) = patch.order {
            self.order = order;
        }
    }
}

/// Type, variant and properties stamped onto a freshly created block.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub block_type: BlockType,
    pub variant: Option<Variant>,
    pub properties: Properties,
}

impl Template {
    pub fn task(checked: bool) -> Self {
        let mut properties = Properties::new();
        properties.insert(props::CHECKED.to_string(), checked.into());
        Self {
            block_type: BlockType::Task,
            variant: None,
            properties,
        }
    }

    pub fn variant(variant: Variant) -> Self {
        Self {
            block_type: BlockType::Text,
            variant: Some(variant),
            properties: Properties::new(),
        }
    }

    pub fn instantiate(&self, parent_id: Option<BlockId>, order: u32) -> Block {
        let mut block = Block::new(self.block_type, parent_id, order);
        block.variant = self.variant;
        block.properties = self.properties.clone();
        block
    }
}

impl Default for Template {
    fn default() -> Self {
        Self {
            block_type: BlockType::Text,
            variant: None,
            properties: Properties::new(),
        }
    }
}

/// Partial update for a block. `None` leaves a field untouched.
///
/// `variant` and `parent_id` are doubly optional so a patch can clear them.
/// A property whose value is JSON `null` is removed.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Option<Variant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<BlockId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

impl BlockPatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn order(order: u32) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }

    pub fn placement(parent_id: Option<BlockId>, order: u32) -> Self {
        Self {
            parent_id: Some(parent_id),
            order: Some(order),
            ..Self::default()
        }
    }

    pub fn property(key: &str, value: impl Into<serde_json::Value>) -> Self {
        let mut properties = Properties::new();
        properties.insert(key.to_string(), value.into());
        Self {
            properties: Some(properties),
            ..Self::default()
        }
    }

    /// True when the patch moves the block or changes its rank.
    pub fn is_structural(&self) -> bool {
        self.parent_id.is_some() || self.order.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_inheritance() {
        let task = Template::task(true).instantiate(None, 0);
        let next = task.successor_template();
        assert_eq!(next.block_type, BlockType::Task);
        assert_eq!(
            next.properties.get(props::CHECKED),
            Some(&serde_json::Value::Bool(false))
        );

        let bullet = Block::text(None, 0, "a").with_variant(Variant::Bullet);
        assert_eq!(bullet.successor_template().variant, Some(Variant::Bullet));

        let heading = Block::text(None, 0, "Title").with_variant(Variant::Heading1);
        assert_eq!(heading.successor_template(), Template::default());

        let image = Block::new(BlockType::Image, None, 0);
        assert_eq!(image.successor_template(), Template::default());
    }

    #[test]
    fn test_patch_merges_and_removes_properties() {
        let mut block = Block::text(None, 3, "before");
        block
            .properties
            .insert(props::COLLAPSED.to_string(), true.into());
        block
            .properties
            .insert(props::DUE_DATE.to_string(), "2024-01-01".into());

        let mut properties = Properties::new();
        properties.insert(props::COLLAPSED.to_string(), serde_json::Value::Null);
        properties.insert(props::CITATION.to_string(), "p. 4".into());
        let patch = BlockPatch {
            content: Some("after".into()),
            properties: Some(properties),
            ..BlockPatch::default()
        };
        assert!(!patch.is_structural());
        block.apply_patch(&patch);

        assert_eq!(block.content, "after");
        assert_eq!(block.order, 3);
        assert!(!block.is_collapsed());
        assert!(block.properties.contains_key(props::DUE_DATE));
        assert!(block.properties.contains_key(props::CITATION));
    }

    #[test]
    fn test_heading_detection_requires_text_type() {
        let heading = Block::text(None, 0, "H").with_variant(Variant::Heading2);
        assert!(heading.is_heading());
        let mut task = Template::task(false).instantiate(None, 0);
        task.variant = Some(Variant::Heading1);
        assert!(!task.is_heading());
    }

    #[test]
    fn test_block_serializes_type_field() {
        let block = Block::new(BlockType::LectureContainer, None, 0);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "lecture-container");
        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }
}
