//! Fuzzer for the zero-run packer.
//!
//! Two directions in one target:
//! - `unpack` over arbitrary bytes must never panic and never allocate past
//!   its clamp; on success, re-packing its output and unpacking again must
//!   reproduce it (unpack output is already 8-byte aligned, so the second
//!   trip is exact).
//! - `pack` over arbitrary bytes must always succeed within the clamp, and
//!   `unpack(pack(x))` must start with `x` and carry only zero padding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::{pack, unpack};

fuzz_target!(|data: &[u8]| {
    // Direction 1: hostile packed input.
    if let Ok(unpacked) = unpack(data) {
        assert_eq!(unpacked.len() % 8, 0, "unpack output is whole groups");
        let repacked = pack(&unpacked).expect("aligned data re-packs");
        let round = unpack(&repacked).expect("packer output unpacks");
        assert_eq!(round, unpacked, "aligned round-trip is identity");
    }

    // Direction 2: arbitrary plaintext.
    let packed = pack(data).expect("pack succeeds on sane sizes");
    let unpacked = unpack(&packed).expect("own output unpacks");
    assert_eq!(&unpacked[..data.len()], data, "prefix is the input");
    assert!(
        unpacked[data.len()..].iter().all(|&b| b == 0),
        "tail is zero padding only"
    );
});
