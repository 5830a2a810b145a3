#![no_main]

use libfuzzer_sys::fuzz_target;
use mkvdedup::container::ElementIter;
use mkvdedup::indexer::{Indexer, IndexerConfig, ParsePolicy};

fuzz_target!(|data: &[u8]| {
    // Walk arbitrary bytes as nested elements; errors are fine, panics are not
    let mut stack = vec![ElementIter::new(data)];
    while let Some(mut iter) = stack.pop() {
        if let Some(Ok(element)) = iter.next() {
            assert!(element.data_end as usize <= data.len());
            stack.push(iter);
            if stack.len() < 16 {
                stack.push(element.children(data));
            }
        }
    }

    // Both policies must terminate and keep chunks inside the input
    for policy in [ParsePolicy::Abort, ParsePolicy::Resync] {
        let chunks = match Indexer::new(IndexerConfig { policy }).index_bytes(data) {
            Ok(list) => list.chunks,
            Err(partial) => partial.chunks,
        };
        for chunk in chunks {
            assert!(chunk.end() <= data.len() as u64);
        }
    }
});
