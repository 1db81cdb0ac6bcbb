#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(s) = std::str::from_utf8(data) {
        // Split the input so both the filter and the body are fuzzed.
        let (filter, body) = s.split_once('\n').unwrap_or(("{}", s));
        if let Ok(spec) = docbridge::query::build_update(filter, body) {
            assert!(spec.upsert());
            assert!(spec.update.contains_key("$set"));
        }
    }
});
