#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(s) = std::str::from_utf8(data) {
        // Malformed filter text must come back as an error, never a panic.
        let _ = docbridge::query::parse_filter(s);
    }
});
