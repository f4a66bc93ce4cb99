//! Compiled-bundle fixtures.
//!
//! The production schema bundle comes out of an external compiler; tests
//! have no compiler, so this module emits equivalent bytes directly. The
//! builder mirrors the compiler's encoding rules (slot records, skip slots,
//! inline meta integers) and the [`demo_bundle`] covers the package header
//! plus a small RPC surface.

/// A slot payload in a meta record.
pub enum Entry {
    /// Small inline integer
    Inline(i64),
    /// Length-prefixed data chunk
    Chunk(Vec<u8>),
}

/// Encode one record from `(tag, entry)` pairs sorted by tag.
///
/// # Panics
///
/// Panics if tags are not strictly increasing or a value does not fit its
/// slot; fixtures are static, so a panic is a bug in the fixture.
#[must_use]
pub fn record(entries: &[(u16, Entry)]) -> Vec<u8> {
    let mut slots: Vec<u16> = Vec::new();
    let mut data: Vec<u8> = Vec::new();
    let mut last: i64 = -1;

    for (tag, entry) in entries {
        let tag = i64::from(*tag);
        assert!(tag > last, "record entries must be sorted by tag");
        let skipped = tag - last - 1;
        if skipped > 0 {
            slots.push(u16::try_from((skipped - 1) * 2 + 1).expect("skip fits a slot"));
        }
        match entry {
            Entry::Inline(v) => {
                slots.push(u16::try_from((v + 1) * 2).expect("inline value fits a slot"));
            }
            Entry::Chunk(c) => {
                slots.push(0);
                data.extend_from_slice(
                    &u32::try_from(c.len()).expect("chunk fits u32").to_le_bytes(),
                );
                data.extend_from_slice(c);
            }
        }
        last = tag;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&u16::try_from(slots.len()).expect("slot count").to_le_bytes());
    for slot in slots {
        out.extend_from_slice(&slot.to_le_bytes());
    }
    out.extend_from_slice(&data);
    out
}

/// Concatenate length-prefixed elements into an array chunk.
#[must_use]
pub fn chunk_list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        out.extend_from_slice(&u32::try_from(item.len()).expect("chunk fits u32").to_le_bytes());
        out.extend_from_slice(item);
    }
    out
}

/// Builtin type codes.
pub mod builtin {
    /// Integer field code
    pub const INTEGER: i64 = 0;
    /// Boolean field code
    pub const BOOLEAN: i64 = 1;
    /// String field code
    pub const STRING: i64 = 2;
    /// Double field code
    pub const DOUBLE: i64 = 3;
}

/// A builtin (non-struct, non-array) field record.
#[must_use]
pub fn field(name: &str, tag: u16, code: i64) -> Vec<u8> {
    record(&[
        (0, Entry::Chunk(name.as_bytes().to_vec())),
        (1, Entry::Inline(code)),
        (3, Entry::Inline(i64::from(tag))),
    ])
}

/// A type record from its encoded fields.
#[must_use]
pub fn type_record(name: &str, fields: &[Vec<u8>]) -> Vec<u8> {
    record(&[
        (0, Entry::Chunk(name.as_bytes().to_vec())),
        (1, Entry::Chunk(chunk_list(fields))),
    ])
}

/// A protocol record.
#[must_use]
pub fn protocol_record(
    name: &str,
    tag: i64,
    request: Option<i64>,
    response: Option<i64>,
    confirm: bool,
) -> Vec<u8> {
    let mut entries = vec![
        (0u16, Entry::Chunk(name.as_bytes().to_vec())),
        (1, Entry::Inline(tag)),
    ];
    if let Some(index) = request {
        entries.push((2, Entry::Inline(index)));
    }
    if let Some(index) = response {
        entries.push((3, Entry::Inline(index)));
    }
    if confirm {
        entries.push((4, Entry::Inline(1)));
    }
    record(&entries)
}

/// Assemble encoded type and protocol records into a bundle.
#[must_use]
pub fn assemble(types: &[Vec<u8>], protocols: &[Vec<u8>]) -> Vec<u8> {
    record(&[
        (0, Entry::Chunk(chunk_list(types))),
        (1, Entry::Chunk(chunk_list(protocols))),
    ])
}

/// The bundle the end-to-end suite runs against:
///
/// ```text
/// base.package { type 0: integer; session 1: integer }
/// echo.req     { text 0: string }
/// echo.resp    { text 0: string }
/// score.req    { delta 0: integer }
/// protocol echo  1  (echo.req -> echo.resp)
/// protocol heartbeat 2  (confirm only)
/// protocol score 3  (score.req, no response)
/// ```
#[must_use]
pub fn demo_bundle() -> Vec<u8> {
    assemble(
        &[
            type_record(
                "base.package",
                &[
                    field("type", 0, builtin::INTEGER),
                    field("session", 1, builtin::INTEGER),
                ],
            ),
            type_record("echo.req", &[field("text", 0, builtin::STRING)]),
            type_record("echo.resp", &[field("text", 0, builtin::STRING)]),
            type_record("score.req", &[field("delta", 0, builtin::INTEGER)]),
        ],
        &[
            protocol_record("echo", 1, Some(1), Some(2), false),
            protocol_record("heartbeat", 2, None, None, true),
            protocol_record("score", 3, Some(3), None, false),
        ],
    )
}

#[cfg(test)]
mod tests {
    use tether_proto::Schema;

    use super::*;

    #[test]
    fn demo_bundle_loads() {
        let schema = Schema::load(&demo_bundle()).expect("demo bundle is well-formed");
        assert!(schema.type_by_name("base.package").is_some());
        assert_eq!(schema.protocol_by_name("echo").map(|p| p.tag), Some(1));
        assert!(schema.protocol_by_name("heartbeat").is_some_and(|p| p.confirm));
    }
}
