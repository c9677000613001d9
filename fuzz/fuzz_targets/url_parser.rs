#![no_main]

use libfuzzer_sys::fuzz_target;
use thumbforge_core::UrlParser;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes as request paths. Covers:
    // - malformed grammar and segment counts
    // - hostile size segments and filter tokens
    // - invalid UTF-8 (converted lossily)
    // - pathological alias suffixes
    let path = String::from_utf8_lossy(data);

    // The parser must never panic; only Ok or Err.
    let parser = UrlParser::default();
    if let Ok(plan) = parser.parse(&path) {
        // A successfully parsed plan must survive its own canonical form.
        let _ = parser.parse(&plan.canonical_url());
    }
});
