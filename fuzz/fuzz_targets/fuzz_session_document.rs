#![no_main]
use libfuzzer_sys::fuzz_target;
use sessionrelay::persistence::file::parse_session_document;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = parse_session_document(data) {
        // Anything that parses must serialize back out.
        let _ = serde_json::to_vec(&record).expect("parsed session must serialize");
    }
});
