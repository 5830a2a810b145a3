#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Loading must reject malformed files without panicking; anything it
    // accepts must satisfy the range lookup contract
    if let Ok((_, index)) = mkvdedup::dedup::format::read_index(data) {
        let size = index.logical_size();
        for offset in [0, size / 2, size.saturating_sub(1)] {
            let found = index.find_entries_for_range(offset, 4096);
            if offset < size {
                assert!(found.first().is_some_and(|e| e.contains(offset)));
            }
        }
    }
});
