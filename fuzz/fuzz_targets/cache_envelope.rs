#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use thumbforge_server::envelope;

fuzz_target!(|data: &[u8]| {
    // The envelope decoder reads attacker-controlled cache files; it must
    // never panic on truncated or corrupt input.
    let raw = Bytes::copy_from_slice(data);
    if let Ok((content_type, payload)) = envelope::decode(&raw) {
        // Whatever decodes must re-encode to the identical buffer.
        assert_eq!(envelope::encode(&content_type, &payload), raw);
    }
});
