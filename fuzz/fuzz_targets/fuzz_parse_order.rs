#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use timeline::sequencer::parse_order;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    // Raw strings go through the numeric-string path - should not panic
    let _ = parse_order(&Value::String(text.to_string()));

    // Anything that parses as JSON is fed in as-is
    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        if let Ok(order) = parse_order(&value) {
            // Accepted values are integral, so they survive a string round-trip
            assert_eq!(parse_order(&Value::String(order.to_string())).ok(), Some(order));
        }
    }
});
