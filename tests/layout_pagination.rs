use md_blocks::layout::{self, measure_store};
use md_blocks::{
    BlockId, BlockStore, BlockType, ItemKind, LayoutConfig, LayoutError, LayoutItem, MeasureError,
    Paginator, Phase, Template, TreeNode, Variant,
};
use md_blocks_naive_oracle::layout::{Item, pack as naive_pack};
use proptest::collection::vec;
use proptest::prelude::*;
mod proptest_config;

/// Heights are spelled out in block content; a subtree adds its children.
fn by_content(node: &TreeNode) -> Result<f64, MeasureError> {
    let own = if node.block.is_page_break() {
        0.0
    } else {
        node.block
            .content
            .parse::<f64>()
            .map_err(|_| MeasureError::Failed {
                id: node.block.id,
                detail: format!("cannot measure {:?}", node.block.content),
            })?
    };
    node.children
        .iter()
        .try_fold(own, |total, child| Ok(total + by_content(child)?))
}

fn add(store: &mut BlockStore, parent: Option<BlockId>, template: &Template, content: &str) -> BlockId {
    store
        .create_with(parent, None, template, content)
        .unwrap()
        .created_id()
        .unwrap()
}

fn text(store: &mut BlockStore, height: u32) -> BlockId {
    add(store, None, &Template::default(), &height.to_string())
}

fn heading(store: &mut BlockStore, height: u32) -> BlockId {
    add(store, None, &Template::variant(Variant::Heading1), &height.to_string())
}

fn page_break(store: &mut BlockStore) -> BlockId {
    let template = Template {
        block_type: BlockType::PageBreak,
        ..Template::default()
    };
    add(store, None, &template, "")
}

fn pages(paginator: &mut Paginator, store: &BlockStore) -> Vec<Vec<BlockId>> {
    let report = paginator.recompute(store, &by_content).unwrap();
    assert!(report.error.is_none());
    report
        .layout
        .pages
        .into_iter()
        .map(|page| page.blocks)
        .collect()
}

#[test]
fn test_half_page_blocks_pair_up() {
    let mut store = BlockStore::in_memory();
    let ids: Vec<BlockId> = (0..4).map(|_| text(&mut store, 480)).collect();
    let mut paginator = Paginator::default();
    assert_eq!(
        pages(&mut paginator, &store),
        vec![vec![ids[0], ids[1]], vec![ids[2], ids[3]]]
    );
    assert_eq!(paginator.phase(), Phase::Committed);
}

#[test]
fn test_heading_moves_with_its_content() {
    let mut store = BlockStore::in_memory();
    let a = text(&mut store, 400);
    let b = text(&mut store, 400);
    let h = heading(&mut store, 60);
    let c = text(&mut store, 300);

    let mut paginator = Paginator::default();
    assert_eq!(pages(&mut paginator, &store), vec![vec![a, b], vec![h, c]]);

    let mut loose = Paginator::new(LayoutConfig {
        keep_heading_with_next: false,
        ..LayoutConfig::default()
    });
    assert_eq!(pages(&mut loose, &store), vec![vec![a, b, h], vec![c]]);
}

#[test]
fn test_page_breaks_never_leave_empty_pages() {
    let mut store = BlockStore::in_memory();
    page_break(&mut store);
    let a = text(&mut store, 100);
    page_break(&mut store);
    page_break(&mut store);
    let b = text(&mut store, 100);
    page_break(&mut store);

    let mut paginator = Paginator::default();
    assert_eq!(pages(&mut paginator, &store), vec![vec![a], vec![b]]);
}

#[test]
fn test_oversized_block_gets_its_own_page() {
    let mut store = BlockStore::in_memory();
    let a = text(&mut store, 100);
    let tall = text(&mut store, 2000);
    let b = text(&mut store, 100);
    let mut paginator = Paginator::default();
    assert_eq!(pages(&mut paginator, &store), vec![vec![a], vec![tall], vec![b]]);
}

#[test]
fn test_collapsed_children_take_no_space() {
    let mut store = BlockStore::in_memory();
    let parent = text(&mut store, 100);
    add(&mut store, Some(parent), &Template::default(), "800");
    let next = text(&mut store, 100);

    let mut paginator = Paginator::default();
    assert_eq!(pages(&mut paginator, &store), vec![vec![parent], vec![next]]);

    store.set_collapsed(parent, true).unwrap();
    assert_eq!(pages(&mut paginator, &store), vec![vec![parent, next]]);
}

#[test]
fn test_recompute_is_idempotent() {
    let mut store = BlockStore::in_memory();
    for height in [300, 500, 200, 700, 100] {
        text(&mut store, height);
    }
    heading(&mut store, 50);
    text(&mut store, 900);

    let mut paginator = Paginator::default();
    let first = paginator.recompute(&store, &by_content).unwrap().layout;
    let second = paginator.recompute(&store, &by_content).unwrap().layout;
    assert_eq!(first, second);
    assert_eq!(paginator.layout(), Some(&second));
}

#[test]
fn test_measure_failure_degrades_to_break_only_layout() {
    let mut store = BlockStore::in_memory();
    let a = text(&mut store, 900);
    let broken = add(&mut store, None, &Template::default(), "not a height");
    page_break(&mut store);
    let b = text(&mut store, 900);

    let mut paginator = Paginator::default();
    let report = paginator.recompute(&store, &by_content).unwrap();
    assert!(report.layout.degraded);
    assert!(matches!(
        report.error,
        Some(LayoutError::Degraded(MeasureError::Failed { id, .. })) if id == broken
    ));
    let pages: Vec<Vec<BlockId>> = report.layout.pages.into_iter().map(|p| p.blocks).collect();
    assert_eq!(pages, vec![vec![a, broken], vec![b]]);
}

#[test]
fn test_negative_height_is_rejected() {
    let mut store = BlockStore::in_memory();
    add(&mut store, None, &Template::default(), "-5");
    let measured = measure_store(&store, &by_content);
    assert!(matches!(
        measured.error,
        Some(MeasureError::InvalidHeight { height, .. }) if height == -5.0
    ));
    assert_eq!(measured.items.len(), 1);
    assert_eq!(measured.items[0].height, 0.0);
}

#[test]
fn test_suspended_pass_is_deferred_until_resume() {
    let mut store = BlockStore::in_memory();
    text(&mut store, 100);
    let mut paginator = Paginator::default();

    paginator.suspend();
    assert!(paginator.recompute(&store, &by_content).is_none());
    assert!(paginator.is_pending());
    assert!(paginator.resume());
    assert!(!paginator.resume());
    assert!(paginator.recompute(&store, &by_content).is_some());
}

#[test]
fn test_superseded_pass_is_discarded() {
    let mut store = BlockStore::in_memory();
    text(&mut store, 100);
    let mut paginator = Paginator::default();

    let stale = paginator.begin().unwrap();
    let measured = measure_store(&store, &by_content);
    paginator.invalidate();
    assert!(paginator.complete(stale, measured).is_none());
    assert!(paginator.layout().is_none());

    let fresh = paginator.begin().unwrap();
    let measured = measure_store(&store, &by_content);
    assert_eq!(paginator.complete(fresh, measured).unwrap().layout.pages.len(), 1);
}

fn items() -> impl Strategy<Value = Vec<(u8, u16)>> {
    vec((0u8..6, 0u16..1200), 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(proptest_config::cases()))]
    #[test]
    fn differential_test_page_packing(entries in items(), keep in any::<bool>()) {
        let config = LayoutConfig { page_height: 960.0, keep_heading_with_next: keep };
        let mut real = Vec::new();
        let mut naive = Vec::new();
        for (n, (kind, height)) in entries.iter().enumerate() {
            let height = f64::from(*height);
            let (kind, item) = match kind {
                0 => (ItemKind::PageBreak, Item::Break),
                1 | 2 => (ItemKind::Heading, Item::Heading(height)),
                _ => (ItemKind::Block, Item::Block(height)),
            };
            let height = if kind == ItemKind::PageBreak { 0.0 } else { height };
            real.push(LayoutItem { id: uuid_for(n), height, kind });
            naive.push(item);
        }

        let packed: Vec<Vec<usize>> = layout::pack(&real, &config)
            .into_iter()
            .map(|page| page.blocks.iter().map(|id| id.as_u128() as usize).collect())
            .collect();
        prop_assert_eq!(packed, naive_pack(&naive, 960.0, keep));
    }

    #[test]
    fn prop_pages_respect_height_unless_single(entries in items()) {
        let items: Vec<LayoutItem> = entries
            .iter()
            .enumerate()
            .map(|(n, (kind, height))| LayoutItem {
                id: uuid_for(n),
                height: if *kind == 0 { 0.0 } else { f64::from(*height) },
                kind: if *kind == 0 { ItemKind::PageBreak } else { ItemKind::Block },
            })
            .collect();
        let pages = layout::pack(&items, &LayoutConfig::default());
        for page in &pages {
            prop_assert!(!page.blocks.is_empty());
            prop_assert!(page.used <= 960.0 || page.blocks.len() == 1);
        }
        let placed: usize = pages.iter().map(|page| page.blocks.len()).sum();
        prop_assert_eq!(placed, items.iter().filter(|item| item.kind != ItemKind::PageBreak).count());
    }
}

fn uuid_for(n: usize) -> BlockId {
    BlockId::from_u128(n as u128)
}
