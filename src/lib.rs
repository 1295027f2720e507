//! md-blocks: block tree editing and pagination for outline documents.
//!
//! The crate holds a document as a flat arena of blocks linked by `parent_id`
//! and sibling `order`, and provides everything that edits and lays it out:
//!
//! - **Block store** - Tree-shaped read views and atomic mutations, mirrored to a persistence collection
//! - **Reorder engine** - Sibling renumbering, indent/outdent and same-parent drag reorder
//! - **Paste importer** - Indented marker text into a nested batch of new blocks
//! - **Pagination** - Greedy keep-with-next page packing with a break-only fallback
//! - **Advisory pipeline** - Debounced, latest-wins analyzer requests surfaced as suggestions
//!
//! # Quick Start
//!
//! ```rust
//! use md_blocks::{BlockStore, LineMeasure, Paginator, PasteConfig, Pasted};
//!
//! let mut store = BlockStore::in_memory();
//! let first = store.create(None, None).unwrap().created_id().unwrap();
//! let pasted = store
//!     .paste(first, "# Week 1\n- intro\n  - goals\n", &PasteConfig::default())
//!     .unwrap();
//! assert!(matches!(pasted, Pasted::Blocks(_)));
//!
//! let mut paginator = Paginator::default();
//! let report = paginator.recompute(&store, &LineMeasure::default()).unwrap();
//! assert_eq!(report.layout.pages.len(), 1);
//! ```
//!
//! # Features
//!
//! - `storage` - Crash-safe snapshot collection with rkyv serialization
//! - `cli` - The `md-blocks` command-line tool
//! - `dhat-heap` - Enables heap profiling with dhat

// Block data model and tree views
pub mod core;

// Sibling order planning
pub mod reorder;

// Persistence collaborator
pub mod storage;

// Canonical block tree
pub mod store;

// Paste import and outline export
pub mod export;
pub mod paste;

// Pagination engine
pub mod layout;

// Advisory suggestion pipeline
pub mod advisory;

pub mod config;

pub use crate::core::tree::{ChildIndex, TreeNode};
pub use crate::core::{Block, BlockId, BlockPatch, BlockType, Properties, Template, Variant, props};

pub use reorder::{DropPosition, OrderPatch};

pub use storage::{BlockCollection, CollectionError, MemoryCollection};

#[cfg(feature = "storage")]
pub use storage::{SnapshotCollection, SnapshotStorage};

pub use store::{BlockStore, Effect, Mutation, Pasted, StoreConfig, StoreError};

pub use paste::{PasteBatch, PasteConfig, PasteLine, PasteOutcome};

pub use layout::{
    ItemKind, Layout, LayoutConfig, LayoutError, LayoutItem, LayoutReport, LineMeasure, Measure,
    MeasureError, Page, Paginator, PassTicket, Phase,
};

pub use advisory::{
    AdvisoryConfig, AdvisoryError, AdvisoryEvent, AdvisoryHandle, AdvisoryService, Detection,
    DetectionKind, DetectionPipeline, RequestId, RuleAnalyzer, Suggestion, TextDiff, TextRange,
    TidyPipeline,
};

pub use config::{ConfigError, EngineConfig};
