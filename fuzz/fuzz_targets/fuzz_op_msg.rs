#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 65536 { return; }
    // Header and body decoding must reject garbage without panicking.
    if let Ok(header) = docbridge::wire::parse_header(data) {
        let _ = header.message_length;
    }
    if let Ok(msg) = docbridge::wire::decode_op_msg(data) {
        let _ = msg.into_command();
    }
});
