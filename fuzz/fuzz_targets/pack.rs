#![no_main]

use libfuzzer_sys::fuzz_target;
use md_blocks::{ItemKind, LayoutConfig, LayoutItem, layout};
use uuid::Uuid;

fuzz_target!(|data: &[u8]| {
    let items: Vec<LayoutItem> = data
        .chunks(3)
        .enumerate()
        .map(|(n, chunk)| LayoutItem {
            id: Uuid::from_u128(n as u128),
            height: f64::from(u16::from_le_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)])),
            kind: match chunk.get(2).copied().unwrap_or(0) % 4 {
                0 => ItemKind::PageBreak,
                1 => ItemKind::Heading,
                _ => ItemKind::Block,
            },
        })
        .collect();
    let pages = layout::pack(&items, &LayoutConfig::default());
    let placed: usize = pages.iter().map(|page| page.blocks.len()).sum();
    let expected = items
        .iter()
        .filter(|item| item.kind != ItemKind::PageBreak)
        .count();
    assert_eq!(placed, expected);
    assert!(pages.iter().all(|page| !page.blocks.is_empty()));
});
