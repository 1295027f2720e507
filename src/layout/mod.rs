//! Pagination engine.
//!
//! Top-level blocks are measured (their rendered subtree included) and packed
//! greedily onto fixed-height pages. A [`Paginator`] runs each pass through
//! `Idle -> Measuring -> Packing -> Committed`, can be suspended while the
//! caller is mid-edit, and discards passes superseded by a newer one.
//!
//! When measurement fails the pass still commits, with pages split only at
//! explicit page breaks, and the failure is reported as a [`LayoutError`].

mod measure;
mod pack;

pub use measure::{LineMeasure, Measure, MeasureError};
pub use pack::{ItemKind, LayoutItem, Page, pack, split_at_breaks};

use crate::core::{Block, BlockId};
use crate::storage::BlockCollection;
use crate::store::BlockStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub page_height: f64,
    pub keep_heading_with_next: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            page_height: 960.0,
            keep_heading_with_next: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("measurement failed, pages split at explicit breaks only: {0}")]
    Degraded(#[from] MeasureError),
}

impl LayoutError {
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub pages: Vec<Page>,
    /// Height was ignored for this layout.
    pub degraded: bool,
}

impl Layout {
    /// Page index holding each top-level block.
    pub fn assignments(&self) -> Vec<(BlockId, usize)> {
        self.pages
            .iter()
            .enumerate()
            .flat_map(|(page, contents)| contents.blocks.iter().map(move |id| (*id, page)))
            .collect()
    }
}

#[derive(Debug)]
pub struct LayoutReport {
    pub layout: Layout,
    pub error: Option<LayoutError>,
}

/// Items for one pass. On measurement failure `items` still carries every
/// top-level block (heights zeroed) so breaks can be honoured.
#[derive(Debug)]
pub struct Measured {
    pub items: Vec<LayoutItem>,
    pub error: Option<MeasureError>,
}

fn kind_of(block: &Block) -> ItemKind {
    if block.is_page_break() {
        ItemKind::PageBreak
    } else if block.is_heading() {
        ItemKind::Heading
    } else {
        ItemKind::Block
    }
}

/// Measures every top-level block. Collapsed blocks count only their own row.
pub fn measure_store<C, M>(store: &BlockStore<C>, measurer: &M) -> Measured
where
    C: BlockCollection,
    M: Measure + ?Sized,
{
    let mut items = Vec::new();
    for block in store.roots() {
        let kind = kind_of(block);
        let height = if kind == ItemKind::PageBreak {
            Ok(0.0)
        } else {
            match store.rendered_subtree(block.id) {
                Some(node) => measurer
                    .measure(&node)
                    .and_then(|height| measure::checked(block.id, height)),
                None => Ok(0.0),
            }
        };
        match height {
            Ok(height) => items.push(LayoutItem {
                id: block.id,
                height,
                kind,
            }),
            Err(error) => {
                let items = store
                    .roots()
                    .into_iter()
                    .map(|block| LayoutItem {
                        id: block.id,
                        height: 0.0,
                        kind: kind_of(block),
                    })
                    .collect();
                return Measured {
                    items,
                    error: Some(error),
                };
            }
        }
    }
    Measured { items, error: None }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Measuring,
    Packing,
    Committed,
}

/// Handle for one recompute pass; stale once a newer pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassTicket {
    generation: u64,
}

#[derive(Debug)]
pub struct Paginator {
    config: LayoutConfig,
    phase: Phase,
    suspended: bool,
    pending: bool,
    generation: u64,
    committed: Option<Layout>,
}

impl Paginator {
    pub fn new(config: LayoutConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            suspended: false,
            pending: false,
            generation: 0,
            committed: None,
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// A deferred pass is owed.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.committed.as_ref()
    }

    /// Defers recomputation until [`resume`](Self::resume).
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Lifts suspension. Returns true when a deferred pass is owed and should
    /// run now.
    pub fn resume(&mut self) -> bool {
        self.suspended = false;
        std::mem::take(&mut self.pending)
    }

    /// Supersedes any pass in flight.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        if self.suspended {
            self.pending = true;
        }
    }

    /// Starts a pass, or records a pending one while suspended.
    pub fn begin(&mut self) -> Option<PassTicket> {
        if self.suspended {
            self.pending = true;
            return None;
        }
        self.generation += 1;
        self.phase = Phase::Measuring;
        Some(PassTicket {
            generation: self.generation,
        })
    }

    /// Packs a measured pass. Returns `None` when `ticket` was superseded.
    pub fn complete(&mut self, ticket: PassTicket, measured: Measured) -> Option<LayoutReport> {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding superseded layout pass"
            );
            return None;
        }
        self.phase = Phase::Packing;
        let report = match measured.error {
            None => LayoutReport {
                layout: Layout {
                    pages: pack(&measured.items, &self.config),
                    degraded: false,
                },
                error: None,
            },
            Some(error) => {
                warn!(%error, "falling back to break-only pagination");
                LayoutReport {
                    layout: Layout {
                        pages: split_at_breaks(&measured.items),
                        degraded: true,
                    },
                    error: Some(LayoutError::Degraded(error)),
                }
            }
        };
        self.committed = Some(report.layout.clone());
        self.phase = Phase::Committed;
        Some(report)
    }

    /// Runs a full pass synchronously. `None` while suspended.
    pub fn recompute<C, M>(&mut self, store: &BlockStore<C>, measure: &M) -> Option<LayoutReport>
    where
        C: BlockCollection,
        M: Measure + ?Sized,
    {
        let ticket = self.begin()?;
        let measured = measure_store(store, measure);
        self.complete(ticket, measured)
    }
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::TreeNode;

    #[test]
    fn test_suspend_defers_until_resume() {
        let store = BlockStore::in_memory();
        let mut paginator = Paginator::default();
        paginator.suspend();
        assert!(paginator.recompute(&store, &LineMeasure::default()).is_none());
        assert!(paginator.is_pending());
        assert!(paginator.resume());
        assert!(!paginator.resume());
        let report = paginator.recompute(&store, &LineMeasure::default()).unwrap();
        assert!(report.layout.pages.is_empty());
        assert_eq!(paginator.phase(), Phase::Committed);
    }

    #[test]
    fn test_superseded_pass_is_discarded() {
        let store = BlockStore::in_memory();
        let mut paginator = Paginator::default();
        let stale = paginator.begin().unwrap();
        let fresh = paginator.begin().unwrap();
        let measure = LineMeasure::default();
        assert!(paginator.complete(stale, measure_store(&store, &measure)).is_none());
        assert!(paginator.complete(fresh, measure_store(&store, &measure)).is_some());
    }

    #[test]
    fn test_collapsed_block_measures_own_row_only() {
        let mut store = BlockStore::in_memory();
        let parent = store.create(None, None).unwrap().created_id().unwrap();
        store.create(Some(parent), None).unwrap();
        store.create(Some(parent), None).unwrap();

        let measure = |node: &TreeNode| Ok::<f64, MeasureError>(node.len() as f64 * 10.0);
        let open = measure_store(&store, &measure);
        assert_eq!(open.items[0].height, 30.0);

        store.set_collapsed(parent, true).unwrap();
        let collapsed = measure_store(&store, &measure);
        assert_eq!(collapsed.items[0].height, 10.0);
    }
}
