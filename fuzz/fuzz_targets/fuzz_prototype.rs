#![no_main]

//! Fuzz target for prototype decoding
//!
//! Arbitrary bytes must either fail to decode or round-trip losslessly.

use blueprint_di::ServicePrototype;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(prototype) = ServicePrototype::from_json(text) else {
        return;
    };

    // Anything that decoded must encode stably and decode back equal
    let json = prototype.to_json().expect("decoded prototypes encode");
    let back = ServicePrototype::from_json(&json).expect("stable encoding decodes");
    assert_eq!(prototype, back);
    assert_eq!(json, back.to_json().unwrap());
});
