//! Compiled schema bundles.
//!
//! A bundle is produced by the external schema compiler and is itself encoded
//! in the wire format it describes: an outer record with two array members
//! (`types`, `protocols`), each element a nested record. [`Schema::load`]
//! parses the blob into immutable type and protocol tables and builds the
//! name and tag lookups used by the codec and the session host.
//!
//! Validation is strict at the boundary: field tags must strictly increase,
//! meta-tags outside the defined set are rejected, and every type reference
//! must land inside the type table. A bundle that fails any of these checks
//! is unusable and the error says why.

use std::collections::HashMap;

use crate::errors::SchemaError;
use crate::wire::{self, ChunkIter, RawValue, WireError};

/// Builtin type codes as they appear in field meta-records.
const BUILTIN_INTEGER: i64 = 0;
const BUILTIN_BOOLEAN: i64 = 1;
const BUILTIN_STRING: i64 = 2;
const BUILTIN_DOUBLE: i64 = 3;

/// String subtype marker: raw bytes instead of UTF-8 text.
const STRING_BINARY: i64 = 1;

/// Field tags live below this bound so their inline slot form fits 16 bits.
const MAX_FIELD_TAG: i64 = 0x7fff;

/// Index of a type inside a [`Schema`]'s type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(pub(crate) usize);

/// Declared type of a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// 64-bit integer; `scale` is `10^n` for decimal fixed-point fields
    Integer {
        /// Decimal scale, `None` for plain integers
        scale: Option<u64>,
    },
    /// Boolean
    Boolean,
    /// IEEE-754 double
    Double,
    /// String
    String {
        /// Raw-bytes subtype instead of UTF-8 text
        binary: bool,
    },
    /// Nested struct
    Struct(TypeRef),
}

/// One field of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Wire tag
    pub tag: u16,
    /// Declared type
    pub kind: FieldKind,
    /// Whether the field is an array of `kind`
    pub array: bool,
    /// Main-index key tag for keyed arrays, carried but not interpreted
    pub key: Option<i64>,
}

/// One named type: an ordered field list plus the contiguity fast path.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Type name as declared in the schema source
    pub name: String,
    /// Fields sorted by strictly increasing tag
    pub fields: Vec<Field>,
    /// First tag when tags are contiguous; `None` forces binary search
    base: Option<u16>,
}

impl TypeDef {
    /// Find a field by wire tag.
    #[must_use]
    pub fn find_field(&self, tag: u16) -> Option<&Field> {
        match self.base {
            Some(base) => {
                let index = usize::from(tag.checked_sub(base)?);
                self.fields.get(index)
            }
            None => self
                .fields
                .binary_search_by_key(&tag, |f| f.tag)
                .ok()
                .map(|i| &self.fields[i]),
        }
    }
}

/// One protocol: a numeric tag with optional request/response types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    /// Protocol name
    pub name: String,
    /// Numeric tag carried in the package header
    pub tag: i64,
    /// Request body type
    pub request: Option<TypeRef>,
    /// Response body type
    pub response: Option<TypeRef>,
    /// Whether a bodyless acknowledgement is expected when `response` is absent
    pub confirm: bool,
}

/// An immutable, validated schema bundle.
#[derive(Debug, Clone)]
pub struct Schema {
    types: Vec<TypeDef>,
    protocols: Vec<Protocol>,
    types_by_name: HashMap<String, usize>,
    protocols_by_name: HashMap<String, usize>,
}

impl Schema {
    /// Parse a compiled bundle.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] for any structural violation; a rejected
    /// bundle leaves nothing half-loaded.
    pub fn load(bundle: &[u8]) -> Result<Self, SchemaError> {
        let chunks = read_plain_chunks(bundle, "bundle")?;
        let types_chunk = chunks.first().copied().unwrap_or(&[]);
        let protocols_chunk = chunks.get(1).copied().unwrap_or(&[]);

        // Pass 1: names and field-list chunks, so forward type references
        // resolve against the full table size.
        let mut names = Vec::new();
        let mut field_chunks = Vec::new();
        for element in ChunkIter::new(types_chunk) {
            let element = element.map_err(map_wire)?;
            let parts = read_plain_chunks(element, "type")?;
            let name_chunk = parts
                .first()
                .copied()
                .ok_or(SchemaError::MissingField { record: "type", what: "name" })?;
            names.push(chunk_to_string(name_chunk)?);
            field_chunks.push(parts.get(1).copied().unwrap_or(&[]));
        }
        let type_count = names.len();

        // Pass 2: field lists.
        let mut types = Vec::with_capacity(type_count);
        for (name, fields_chunk) in names.into_iter().zip(field_chunks) {
            let mut fields = Vec::new();
            let mut last_tag: i64 = -1;
            for element in ChunkIter::new(fields_chunk) {
                let element = element.map_err(map_wire)?;
                let field = import_field(element, type_count)?;
                if i64::from(field.tag) <= last_tag {
                    return Err(SchemaError::TagNotMonotonic {
                        type_name: name,
                        last: last_tag,
                        tag: i64::from(field.tag),
                    });
                }
                last_tag = i64::from(field.tag);
                fields.push(field);
            }
            let base = contiguous_base(&fields);
            types.push(TypeDef { name, fields, base });
        }

        let mut protocols = Vec::new();
        let mut last_tag: Option<i64> = None;
        for element in ChunkIter::new(protocols_chunk) {
            let element = element.map_err(map_wire)?;
            let protocol = import_protocol(element, type_count)?;
            if let Some(last) = last_tag {
                if protocol.tag <= last {
                    return Err(SchemaError::ProtocolOrder { last, tag: protocol.tag });
                }
            }
            last_tag = Some(protocol.tag);
            protocols.push(protocol);
        }

        let types_by_name =
            types.iter().enumerate().map(|(i, t)| (t.name.clone(), i)).collect();
        let protocols_by_name =
            protocols.iter().enumerate().map(|(i, p)| (p.name.clone(), i)).collect();

        Ok(Self { types, protocols, types_by_name, protocols_by_name })
    }

    /// Look up a type by name.
    #[must_use]
    pub fn type_by_name(&self, name: &str) -> Option<TypeRef> {
        self.types_by_name.get(name).copied().map(TypeRef)
    }

    /// The definition behind a [`TypeRef`].
    #[must_use]
    pub fn type_def(&self, ty: TypeRef) -> &TypeDef {
        &self.types[ty.0]
    }

    /// Look up a protocol by name.
    #[must_use]
    pub fn protocol_by_name(&self, name: &str) -> Option<&Protocol> {
        self.protocols_by_name.get(name).map(|&i| &self.protocols[i])
    }

    /// Look up a protocol by numeric tag.
    #[must_use]
    pub fn protocol_by_tag(&self, tag: i64) -> Option<&Protocol> {
        self.protocols
            .binary_search_by_key(&tag, |p| p.tag)
            .ok()
            .map(|i| &self.protocols[i])
    }

    /// All protocols, ordered by tag.
    pub fn protocols(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.iter()
    }

    /// Number of loaded types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// References to every loaded type, in bundle order.
    pub fn type_refs(&self) -> impl Iterator<Item = TypeRef> {
        (0..self.types.len()).map(TypeRef)
    }
}

fn map_wire(err: WireError) -> SchemaError {
    match err {
        WireError::Truncated { offset, needed } => SchemaError::Truncated { offset, needed },
        WireError::TagOverflow => {
            SchemaError::ValueOutOfRange { what: "record tag", value: i64::from(u16::MAX) }
        }
    }
}

/// Read a record whose slots must all be data pointers (the bundle outer
/// record and each type record). Any nonzero slot value is an error.
fn read_plain_chunks<'a>(
    data: &'a [u8],
    record: &'static str,
) -> Result<Vec<&'a [u8]>, SchemaError> {
    let count = usize::from(wire::read_u16_le(data, 0).map_err(map_wire)?);
    if count > 2 {
        return Err(SchemaError::TooManySlots { record, count, max: 2 });
    }
    for i in 0..count {
        let value = wire::read_u16_le(data, 2 + i * 2).map_err(map_wire)?;
        if value != 0 {
            return Err(SchemaError::OuterInlineValue { value });
        }
    }
    let mut chunks = Vec::with_capacity(count);
    let mut offset = 2 + count * 2;
    for _ in 0..count {
        let size = wire::read_u32_le(data, offset).map_err(map_wire)? as usize;
        let start = offset + 4;
        let end = start
            .checked_add(size)
            .filter(|&e| e <= data.len())
            .ok_or(SchemaError::Truncated { offset: start, needed: size })?;
        chunks.push(&data[start..end]);
        offset = end;
    }
    Ok(chunks)
}

fn chunk_to_string(chunk: &[u8]) -> Result<String, SchemaError> {
    String::from_utf8(chunk.to_vec()).map_err(|_| SchemaError::NameNotUtf8)
}

fn import_field(data: &[u8], type_count: usize) -> Result<Field, SchemaError> {
    let record = wire::read_record(data).map_err(map_wire)?;

    let mut name = None;
    let mut builtin = None;
    let mut type_or_extra = None;
    let mut tag = None;
    let mut array = false;
    let mut key = None;

    for (meta_tag, value) in record.entries {
        match (meta_tag, value) {
            (0, RawValue::Chunk(c)) => name = Some(chunk_to_string(c)?),
            (1, RawValue::Inline(v)) => builtin = Some(v),
            (2, RawValue::Inline(v)) => type_or_extra = Some(v),
            (3, RawValue::Inline(v)) => tag = Some(v),
            (4, RawValue::Inline(v)) => array = v != 0,
            (5, RawValue::Inline(v)) => key = Some(v),
            (t @ 0..=5, _) => {
                return Err(SchemaError::BadSlotForm { record: "field", tag: t })
            }
            (t, _) => return Err(SchemaError::UnknownMetaTag { tag: t }),
        }
    }

    let name = name.ok_or(SchemaError::MissingField { record: "field", what: "name" })?;
    let tag = tag.ok_or(SchemaError::MissingField { record: "field", what: "tag" })?;
    if !(0..MAX_FIELD_TAG).contains(&tag) {
        return Err(SchemaError::ValueOutOfRange { what: "field tag", value: tag });
    }

    let kind = match (builtin, type_or_extra) {
        (Some(BUILTIN_INTEGER), extra) => {
            let scale = match extra {
                None => None,
                Some(v) => Some(decimal_scale(v)?),
            };
            FieldKind::Integer { scale }
        }
        (Some(BUILTIN_BOOLEAN), None) => FieldKind::Boolean,
        (Some(BUILTIN_STRING), extra) => {
            FieldKind::String { binary: extra == Some(STRING_BINARY) }
        }
        (Some(BUILTIN_DOUBLE), None) => FieldKind::Double,
        (Some(BUILTIN_BOOLEAN | BUILTIN_DOUBLE), Some(_)) => {
            return Err(SchemaError::BadSlotForm { record: "field", tag: 2 })
        }
        (Some(code), _) => return Err(SchemaError::UnknownBuiltin { code }),
        (None, Some(index)) => {
            let index = usize::try_from(index).map_err(|_| SchemaError::ValueOutOfRange {
                what: "type index",
                value: index,
            })?;
            if index >= type_count {
                return Err(SchemaError::TypeIndexOutOfRange { index, count: type_count });
            }
            FieldKind::Struct(TypeRef(index))
        }
        (None, None) => {
            return Err(SchemaError::MissingField { record: "field", what: "type" })
        }
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let tag = tag as u16;
    Ok(Field { name, tag, kind, array, key })
}

fn decimal_scale(exponent: i64) -> Result<u64, SchemaError> {
    let exponent = u32::try_from(exponent)
        .map_err(|_| SchemaError::ValueOutOfRange { what: "decimal exponent", value: exponent })?;
    10u64.checked_pow(exponent).ok_or(SchemaError::ValueOutOfRange {
        what: "decimal exponent",
        value: i64::from(exponent),
    })
}

fn import_protocol(data: &[u8], type_count: usize) -> Result<Protocol, SchemaError> {
    let record = wire::read_record(data).map_err(map_wire)?;

    let mut name = None;
    let mut tag = None;
    let mut request = None;
    let mut response = None;
    let mut confirm = false;

    for (meta_tag, value) in record.entries {
        match (meta_tag, value) {
            (0, RawValue::Chunk(c)) => name = Some(chunk_to_string(c)?),
            (1, RawValue::Inline(v)) => tag = Some(v),
            (2, RawValue::Inline(v)) => request = Some(type_index(v, type_count)?),
            (3, RawValue::Inline(v)) => response = Some(type_index(v, type_count)?),
            (4, RawValue::Inline(v)) => confirm = v != 0,
            (t @ 0..=4, _) => {
                return Err(SchemaError::BadSlotForm { record: "protocol", tag: t })
            }
            (t, _) => return Err(SchemaError::UnknownMetaTag { tag: t }),
        }
    }

    let name = name.ok_or(SchemaError::MissingField { record: "protocol", what: "name" })?;
    let tag = tag.ok_or(SchemaError::MissingField { record: "protocol", what: "tag" })?;
    if tag < 0 {
        return Err(SchemaError::ValueOutOfRange { what: "protocol tag", value: tag });
    }

    Ok(Protocol { name, tag, request, response, confirm })
}

fn type_index(value: i64, type_count: usize) -> Result<TypeRef, SchemaError> {
    let index = usize::try_from(value)
        .map_err(|_| SchemaError::ValueOutOfRange { what: "type index", value })?;
    if index >= type_count {
        return Err(SchemaError::TypeIndexOutOfRange { index, count: type_count });
    }
    Ok(TypeRef(index))
}

fn contiguous_base(fields: &[Field]) -> Option<u16> {
    let first = fields.first()?.tag;
    let last = fields.last()?.tag;
    let span = usize::from(last - first) + 1;
    (span == fields.len()).then_some(first)
}
