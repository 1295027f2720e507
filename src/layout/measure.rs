use crate::core::tree::TreeNode;
use crate::core::{BlockId, BlockType};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, thiserror::Error)]
pub enum MeasureError {
    #[error("measurement surface unavailable")]
    Unavailable,
    #[error("invalid height {height} for block {id}")]
    InvalidHeight { id: BlockId, height: f64 },
    #[error("measurement failed for block {id}: {detail}")]
    Failed { id: BlockId, detail: String },
}

/// Measurement collaborator: rendered height of a block subtree.
pub trait Measure {
    fn measure(&self, node: &TreeNode) -> Result<f64, MeasureError>;
}

impl<F> Measure for F
where
    F: Fn(&TreeNode) -> Result<f64, MeasureError>,
{
    fn measure(&self, node: &TreeNode) -> Result<f64, MeasureError> {
        self(node)
    }
}

/// Text-metric estimate: wrapped grapheme rows times a line height.
#[derive(Debug, Clone, PartialEq)]
pub struct LineMeasure {
    pub line_height: f64,
    pub chars_per_line: usize,
    pub heading_scale: f64,
    pub media_height: f64,
}

impl Default for LineMeasure {
    fn default() -> Self {
        Self {
            line_height: 24.0,
            chars_per_line: 80,
            heading_scale: 1.5,
            media_height: 240.0,
        }
    }
}

impl LineMeasure {
    fn block_height(&self, node: &TreeNode) -> f64 {
        let block = &node.block;
        match block.block_type {
            BlockType::PageBreak => 0.0,
            BlockType::Image | BlockType::PdfHighlight => self.media_height,
            _ => {
                let graphemes = block.content.graphemes(true).count();
                let rows = graphemes.div_ceil(self.chars_per_line.max(1)).max(1);
                let height = rows as f64 * self.line_height;
                if block.is_heading() {
                    height * self.heading_scale
                } else {
                    height
                }
            }
        }
    }
}

impl Measure for LineMeasure {
    fn measure(&self, node: &TreeNode) -> Result<f64, MeasureError> {
        let own = self.block_height(node);
        node.children
            .iter()
            .try_fold(own, |total, child| Ok(total + self.measure(child)?))
    }
}

/// Rejects heights a layout could not place.
pub(crate) fn checked(id: BlockId, height: f64) -> Result<f64, MeasureError> {
    if height.is_finite() && height >= 0.0 {
        Ok(height)
    } else {
        Err(MeasureError::InvalidHeight { id, height })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Block, Variant};

    fn leaf(block: Block) -> TreeNode {
        TreeNode {
            block,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_line_measure_wraps_and_scales_headings() {
        let measure = LineMeasure::default();
        let short = leaf(Block::text(None, 0, "hello"));
        assert_eq!(measure.measure(&short).unwrap(), 24.0);

        let long = leaf(Block::text(None, 0, "x".repeat(161)));
        assert_eq!(measure.measure(&long).unwrap(), 72.0);

        let heading = leaf(Block::text(None, 0, "Title").with_variant(Variant::Heading1));
        assert_eq!(measure.measure(&heading).unwrap(), 36.0);
    }

    #[test]
    fn test_subtree_heights_add_up() {
        let parent = Block::text(None, 0, "parent");
        let node = TreeNode {
            children: vec![
                leaf(Block::text(Some(parent.id), 0, "a")),
                leaf(Block::new(BlockType::Image, Some(parent.id), 1)),
            ],
            block: parent,
        };
        assert_eq!(LineMeasure::default().measure(&node).unwrap(), 24.0 + 24.0 + 240.0);
    }

    #[test]
    fn test_checked_rejects_nan_and_negative() {
        let id = uuid::Uuid::from_u128(3);
        assert!(checked(id, f64::NAN).is_err());
        assert!(checked(id, -1.0).is_err());
        assert_eq!(checked(id, 12.5).unwrap(), 12.5);
    }
}
