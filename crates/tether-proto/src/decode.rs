//! Schema-driven decoding.
//!
//! The decoder walks the slot header and data region produced by
//! [`Schema::encode`] (or any conforming peer) and rebuilds a [`Value`].
//! Tags present on the wire but absent from the schema are skipped, data
//! chunk included, so a newer peer can add fields without breaking us.
//!
//! The top level tolerates trailing bytes past the last referenced chunk
//! (packed frames are zero-padded to 8-byte groups); nested struct chunks
//! are exact and any leftover is a size error.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::encode::MAX_DEPTH;
use crate::errors::{CodecError, Result};
use crate::schema::{Field, FieldKind, Schema, TypeRef};
use crate::value::Value;
use crate::wire::{self, ChunkIter, RawValue, WireError};

/// A decoded value plus how many input bytes the record occupied.
///
/// `used` lets a caller decode a header record and then hand the remainder
/// of the buffer to a second decode pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The decoded struct value
    pub value: Value,
    /// Bytes consumed from the input
    pub used: usize,
}

impl Schema {
    /// Decode `data` against type `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] on truncation, width or divisibility
    /// violations, or chunks that do not match their declared type.
    pub fn decode(&self, ty: TypeRef, data: &[u8]) -> Result<Decoded> {
        decode_struct(self, ty, data, 0, false)
    }

    /// Decode `data` against `ty` and report only the bytes consumed.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Schema::decode`].
    pub fn objlen(&self, ty: TypeRef, data: &[u8]) -> Result<usize> {
        Ok(self.decode(ty, data)?.used)
    }
}

fn decode_struct(
    schema: &Schema,
    ty: TypeRef,
    data: &[u8],
    depth: usize,
    exact: bool,
) -> Result<Decoded> {
    if depth >= MAX_DEPTH {
        return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
    }

    let record = wire::read_record(data).map_err(map_wire)?;
    let def = schema.type_def(ty);
    let mut members = BTreeMap::new();

    for (tag, raw) in record.entries {
        let Some(field) = def.find_field(tag) else {
            // Unknown tag: the chunk was already consumed by the walker.
            continue;
        };
        let value = decode_field(schema, field, raw, depth)?;
        members.insert(field.name.clone(), value);
    }

    if exact && record.used != data.len() {
        return Err(CodecError::SizeMismatch {
            field: def.name.clone(),
            len: data.len(),
            expected: "exact struct chunk",
        });
    }

    Ok(Decoded { value: Value::Struct(members), used: record.used })
}

fn decode_field(
    schema: &Schema,
    field: &Field,
    raw: RawValue<'_>,
    depth: usize,
) -> Result<Value> {
    if field.array {
        let RawValue::Chunk(chunk) = raw else {
            return Err(CodecError::UnexpectedInline { field: field.name.clone() });
        };
        return decode_array(schema, field, chunk, depth);
    }

    match (&field.kind, raw) {
        (FieldKind::Integer { scale }, RawValue::Inline(v)) => Ok(integer_value(v, *scale)),
        (FieldKind::Integer { scale }, RawValue::Chunk(c)) => {
            let raw = decode_integer_chunk(field, c)?;
            Ok(integer_value(raw, *scale))
        }
        (FieldKind::Boolean, RawValue::Inline(v)) => Ok(Value::Boolean(v != 0)),
        (FieldKind::Double, RawValue::Chunk(c)) => {
            let bytes: [u8; 8] = c.try_into().map_err(|_| CodecError::SizeMismatch {
                field: field.name.clone(),
                len: c.len(),
                expected: "8-byte double",
            })?;
            Ok(Value::Double(f64::from_le_bytes(bytes)))
        }
        (FieldKind::String { binary }, RawValue::Chunk(c)) => string_value(field, c, *binary),
        (FieldKind::Struct(sub), RawValue::Chunk(c)) => {
            Ok(decode_struct(schema, *sub, c, depth + 1, true)?.value)
        }
        (_, RawValue::Inline(_)) => {
            Err(CodecError::UnexpectedInline { field: field.name.clone() })
        }
        (FieldKind::Boolean, RawValue::Chunk(c)) => Err(CodecError::SizeMismatch {
            field: field.name.clone(),
            len: c.len(),
            expected: "inline boolean",
        }),
    }
}

fn decode_array(
    schema: &Schema,
    field: &Field,
    chunk: &[u8],
    depth: usize,
) -> Result<Value> {
    if chunk.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let items = match &field.kind {
        FieldKind::Integer { scale } => {
            let width = usize::from(chunk[0]);
            if width != 4 && width != 8 {
                return Err(CodecError::IntegerWidth { field: field.name.clone(), width });
            }
            let body = &chunk[1..];
            if body.len() % width != 0 {
                return Err(CodecError::ArrayNotDivisible {
                    field: field.name.clone(),
                    len: body.len(),
                    width,
                });
            }
            #[allow(clippy::cast_possible_wrap)]
            let elements: Vec<Value> = body
                .chunks_exact(width)
                .map(|element| {
                    let raw = if width == 4 {
                        i64::from(i32::from_le_bytes([
                            element[0], element[1], element[2], element[3],
                        ]))
                    } else {
                        u64::from_le_bytes([
                            element[0], element[1], element[2], element[3], element[4],
                            element[5], element[6], element[7],
                        ]) as i64
                    };
                    integer_value(raw, *scale)
                })
                .collect();
            elements
        }
        FieldKind::Boolean => chunk.iter().map(|&b| Value::Boolean(b != 0)).collect(),
        FieldKind::Double => {
            return Err(CodecError::DoubleArrayUnsupported { field: field.name.clone() })
        }
        FieldKind::String { binary } => {
            let mut items = Vec::new();
            for element in ChunkIter::new(chunk) {
                let element = element.map_err(map_wire)?;
                items.push(string_value(field, element, *binary)?);
            }
            items
        }
        FieldKind::Struct(sub) => {
            let mut items = Vec::new();
            for element in ChunkIter::new(chunk) {
                let element = element.map_err(map_wire)?;
                items.push(decode_struct(schema, *sub, element, depth + 1, true)?.value);
            }
            items
        }
    };

    Ok(Value::Array(items))
}

#[allow(clippy::cast_possible_wrap)]
fn decode_integer_chunk(field: &Field, chunk: &[u8]) -> Result<i64> {
    match chunk.len() {
        4 => Ok(i64::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))),
        8 => Ok(u64::from_le_bytes([
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ]) as i64),
        len => Err(CodecError::IntegerWidth { field: field.name.clone(), width: len }),
    }
}

fn integer_value(raw: i64, scale: Option<u64>) -> Value {
    match scale {
        None => Value::Integer(raw),
        #[allow(clippy::cast_precision_loss)]
        Some(s) => Value::Double(raw as f64 / s as f64),
    }
}

fn string_value(field: &Field, chunk: &[u8], binary: bool) -> Result<Value> {
    if binary {
        Ok(Value::Binary(Bytes::copy_from_slice(chunk)))
    } else {
        String::from_utf8(chunk.to_vec())
            .map(Value::String)
            .map_err(|_| CodecError::StringNotUtf8 { field: field.name.clone() })
    }
}

fn map_wire(err: WireError) -> CodecError {
    match err {
        WireError::Truncated { offset, needed } => CodecError::Truncated { offset, needed },
        WireError::TagOverflow => CodecError::TagOverflow,
    }
}
