//! Fuzz target: `decode_record`
//!
//! Decodes arbitrary slot contents.  Whatever is accepted must be a sane
//! record that re-encodes into one storage block and decodes back to
//! itself.
//!
//! cargo fuzz run fuzz_persisted_record

#![no_main]

use hidrometro::config::STORE_BLOCK_SIZE;
use hidrometro::persistence::{decode_record, encode_record};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(rec) = decode_record(data) {
        assert!(rec.total_liters.is_finite() && rec.total_liters >= 0.0);

        let mut buf = [0u8; STORE_BLOCK_SIZE];
        let len = encode_record(&rec, &mut buf).expect("accepted record must re-encode");
        assert_eq!(decode_record(&buf[..len]), Some(rec));
    }
});
