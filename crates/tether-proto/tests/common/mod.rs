//! Hand-rolled schema bundles for loader and codec tests.
//!
//! The production bundle comes out of the external schema compiler; tests
//! build equivalent bytes directly so every vector in this suite is
//! self-contained and the loader is exercised against known-good input.
#![allow(dead_code)] // each test binary uses a different subset

/// Builtin codes as the compiler emits them.
pub const BUILTIN_INTEGER: i64 = 0;
pub const BUILTIN_BOOLEAN: i64 = 1;
pub const BUILTIN_STRING: i64 = 2;
pub const BUILTIN_DOUBLE: i64 = 3;

#[derive(Clone)]
pub enum Entry {
    Inline(i64),
    Chunk(Vec<u8>),
}

/// Encode one record from `(tag, entry)` pairs sorted by tag, inserting
/// skip slots for gaps exactly as the compiler does.
pub fn record(entries: &[(u16, Entry)]) -> Vec<u8> {
    let mut slots: Vec<u16> = Vec::new();
    let mut data: Vec<u8> = Vec::new();
    let mut last: i64 = -1;

    for (tag, entry) in entries {
        let tag = i64::from(*tag);
        assert!(tag > last, "record entries must be sorted by tag");
        let skipped = tag - last - 1;
        if skipped > 0 {
            slots.push(u16::try_from((skipped - 1) * 2 + 1).unwrap());
        }
        match entry {
            Entry::Inline(v) => slots.push(u16::try_from((v + 1) * 2).unwrap()),
            Entry::Chunk(c) => {
                slots.push(0);
                data.extend_from_slice(&u32::try_from(c.len()).unwrap().to_le_bytes());
                data.extend_from_slice(c);
            }
        }
        last = tag;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&u16::try_from(slots.len()).unwrap().to_le_bytes());
    for slot in slots {
        out.extend_from_slice(&slot.to_le_bytes());
    }
    out.extend_from_slice(&data);
    out
}

/// Concatenate length-prefixed elements into an array chunk.
pub fn chunk_list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        out.extend_from_slice(&u32::try_from(item.len()).unwrap().to_le_bytes());
        out.extend_from_slice(item);
    }
    out
}

pub struct FieldSpec {
    pub name: &'static str,
    pub tag: u16,
    pub builtin: Option<i64>,
    pub type_or_extra: Option<i64>,
    pub array: bool,
}

impl FieldSpec {
    pub fn builtin(name: &'static str, tag: u16, code: i64) -> Self {
        Self { name, tag, builtin: Some(code), type_or_extra: None, array: false }
    }

    pub fn integer(name: &'static str, tag: u16) -> Self {
        Self::builtin(name, tag, BUILTIN_INTEGER)
    }

    pub fn decimal(name: &'static str, tag: u16, exponent: i64) -> Self {
        Self {
            name,
            tag,
            builtin: Some(BUILTIN_INTEGER),
            type_or_extra: Some(exponent),
            array: false,
        }
    }

    pub fn boolean(name: &'static str, tag: u16) -> Self {
        Self::builtin(name, tag, BUILTIN_BOOLEAN)
    }

    pub fn string(name: &'static str, tag: u16) -> Self {
        Self::builtin(name, tag, BUILTIN_STRING)
    }

    pub fn binary(name: &'static str, tag: u16) -> Self {
        Self {
            name,
            tag,
            builtin: Some(BUILTIN_STRING),
            type_or_extra: Some(1),
            array: false,
        }
    }

    pub fn double(name: &'static str, tag: u16) -> Self {
        Self::builtin(name, tag, BUILTIN_DOUBLE)
    }

    pub fn structure(name: &'static str, tag: u16, type_index: i64) -> Self {
        Self { name, tag, builtin: None, type_or_extra: Some(type_index), array: false }
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut entries = vec![(0u16, Entry::Chunk(self.name.as_bytes().to_vec()))];
        if let Some(code) = self.builtin {
            entries.push((1, Entry::Inline(code)));
        }
        if let Some(v) = self.type_or_extra {
            entries.push((2, Entry::Inline(v)));
        }
        entries.push((3, Entry::Inline(i64::from(self.tag))));
        if self.array {
            entries.push((4, Entry::Inline(1)));
        }
        record(&entries)
    }
}

pub struct TypeSpec {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl TypeSpec {
    pub fn encode(&self) -> Vec<u8> {
        let fields: Vec<Vec<u8>> = self.fields.iter().map(FieldSpec::encode).collect();
        record(&[
            (0, Entry::Chunk(self.name.as_bytes().to_vec())),
            (1, Entry::Chunk(chunk_list(&fields))),
        ])
    }
}

pub struct ProtocolSpec {
    pub name: &'static str,
    pub tag: i64,
    pub request: Option<i64>,
    pub response: Option<i64>,
    pub confirm: bool,
}

impl ProtocolSpec {
    pub fn encode(&self) -> Vec<u8> {
        let mut entries = vec![
            (0u16, Entry::Chunk(self.name.as_bytes().to_vec())),
            (1, Entry::Inline(self.tag)),
        ];
        if let Some(r) = self.request {
            entries.push((2, Entry::Inline(r)));
        }
        if let Some(r) = self.response {
            entries.push((3, Entry::Inline(r)));
        }
        if self.confirm {
            entries.push((4, Entry::Inline(1)));
        }
        record(&entries)
    }
}

/// Assemble a full bundle from encoded type and protocol records.
pub fn bundle(types: &[TypeSpec], protocols: &[ProtocolSpec]) -> Vec<u8> {
    let types: Vec<Vec<u8>> = types.iter().map(TypeSpec::encode).collect();
    let protocols: Vec<Vec<u8>> = protocols.iter().map(ProtocolSpec::encode).collect();
    record(&[
        (0, Entry::Chunk(chunk_list(&types))),
        (1, Entry::Chunk(chunk_list(&protocols))),
    ])
}

/// The `person` schema used across codec tests.
pub fn person_bundle() -> Vec<u8> {
    bundle(
        &[TypeSpec {
            name: "person",
            fields: vec![
                FieldSpec::string("name", 0),
                FieldSpec::integer("age", 1),
                FieldSpec::boolean("marital", 2),
                FieldSpec::structure("children", 3, 0).array(),
            ],
        }],
        &[],
    )
}
