#![no_main]

use libfuzzer_sys::fuzz_target;
use md_blocks::paste::{self, PasteOutcome};
use md_blocks::{BlockStore, PasteConfig};

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let config = PasteConfig::default();
    if let PasteOutcome::Blocks(batch) = paste::import(&input, None, 0, &config) {
        let count = batch.blocks.len();
        let mut store = BlockStore::in_memory();
        store.insert_batch(None, batch).unwrap();
        assert_eq!(store.len(), count);
        let _ = md_blocks::export::to_outline(&store);
    }
});
