#![no_main]

use libfuzzer_sys::fuzz_target;
use md_blocks::{BlockId, BlockPatch, BlockStore, DropPosition};

fuzz_target!(|data: &[u8]| {
    let mut store = BlockStore::in_memory();
    for chunk in data.chunks(3) {
        let ids: Vec<BlockId> = store
            .blocks_in_order()
            .into_iter()
            .map(|(block, _)| block.id)
            .collect();
        let pick = |byte: u8| (!ids.is_empty()).then(|| ids[byte as usize % ids.len()]);
        let (op, a, b) = (chunk[0], chunk.get(1).copied().unwrap_or(0), chunk.get(2).copied().unwrap_or(0));
        let _ = match op % 7 {
            0 | 1 => store.create(pick(a), None),
            2 => pick(a).map_or(Ok(Default::default()), |id| store.delete(id)),
            3 => pick(a).map_or(Ok(Default::default()), |id| store.indent(id)),
            4 => pick(a).map_or(Ok(Default::default()), |id| store.outdent(id)),
            5 => match (pick(a), pick(b)) {
                (Some(dragged), Some(target)) => {
                    store.move_relative(dragged, target, DropPosition::After)
                }
                _ => Ok(Default::default()),
            },
            _ => pick(a).map_or(Ok(Default::default()), |id| {
                store.update(id, &BlockPatch::placement(pick(b), u32::from(b)))
            }),
        };
        assert_eq!(store.blocks_in_order().len(), store.len());
    }
});
