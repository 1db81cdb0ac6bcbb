#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(s) = std::str::from_utf8(data) {
        let Ok(query) = docbridge::query::parse_filter(s) else { return };
        if let Ok(filter) = docbridge::server::Filter::compile(&query) {
            // A few shapes to walk scalar, nested and array paths.
            let docs = [
                bson::doc! {"a": 1, "b": 2, "name": "x"},
                bson::doc! {"a": 10, "b": -5, "name": "y", "nested": {"z": 3}},
                bson::doc! {"active": true, "tags": ["p", "q"]},
            ];
            for d in &docs {
                let _ = filter.matches(d);
            }
            let _ = filter.equality_fields();
        }
    }
});
