#![no_main]

use libfuzzer_sys::fuzz_target;

// The normalizer must never panic on arbitrary JSON, only return errors.
fuzz_target!(|data: &[u8]| {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = voltbridge::schema::normalize(&value);
    }
});
