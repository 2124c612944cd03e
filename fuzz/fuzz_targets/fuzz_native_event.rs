#![no_main]
use libfuzzer_sys::fuzz_target;
use sessionrelay::agent::NativeEvent;
use sessionrelay::events::{create_handler, Lane, SessionEventHub};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(event) = NativeEvent::from_json(&json) else {
        return;
    };
    let hub = Arc::new(SessionEventHub::new(4));
    let _sub = hub.subscribe("fuzz", &Lane::ALL);
    let dispatcher = create_handler("fuzz", hub);
    dispatcher.dispatch_event(&event);
});
