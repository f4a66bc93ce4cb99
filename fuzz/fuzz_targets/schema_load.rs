//! Fuzzer for the schema bundle loader.
//!
//! Bundles come from a trusted compiler in production, but the loader still
//! guarantees it never panics, never overflows an index, and either yields
//! a usable schema or a structured error. A loaded schema must survive its
//! own lookups.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::Schema;

fuzz_target!(|data: &[u8]| {
    let Ok(schema) = Schema::load(data) else {
        return;
    };

    // Whatever loaded must be internally consistent.
    for protocol in schema.protocols() {
        assert_eq!(
            schema.protocol_by_tag(protocol.tag).map(|p| p.name.as_str()),
            Some(protocol.name.as_str())
        );
        assert_eq!(
            schema.protocol_by_name(&protocol.name).map(|p| p.tag),
            Some(protocol.tag)
        );
    }
    for ty in schema.type_refs() {
        for field in &schema.type_def(ty).fields {
            assert_eq!(
                schema.type_def(ty).find_field(field.tag).map(|f| f.name.as_str()),
                Some(field.name.as_str())
            );
        }
    }
});
