//! Schema-driven encoding.
//!
//! A struct encodes to a slot header followed by a data region:
//!
//! ```text
//! u16 slot_count
//! slot_count x u16 slot
//! <chunks: u32 length + bytes, in slot order>
//! ```
//!
//! Small non-negative integers and booleans ride inline in their slot as
//! `(v + 1) * 2`; everything else becomes a chunk referenced by a zero slot.
//! Absent fields emit nothing; the gap is expressed by an odd skip slot
//! before the next present field.

use crate::errors::{CodecError, Result};
use crate::schema::{Field, FieldKind, Schema, TypeRef};
use crate::value::Value;

/// Recursion cap shared with the decoder.
pub(crate) const MAX_DEPTH: usize = 64;

/// Largest value the inline slot form can carry.
const INLINE_LIMIT: i64 = 0x7fff;

enum Encoded {
    Inline(u16),
    Chunk(Vec<u8>),
}

impl Schema {
    /// Encode `value` against type `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the value shape does not match the schema,
    /// a scaled decimal leaves the 64-bit range, or nesting exceeds the
    /// recursion cap.
    pub fn encode(&self, ty: TypeRef, value: &Value) -> Result<Vec<u8>> {
        encode_struct(self, ty, value, 0)
    }
}

fn encode_struct(schema: &Schema, ty: TypeRef, value: &Value, depth: usize) -> Result<Vec<u8>> {
    if depth >= MAX_DEPTH {
        return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
    }
    let Value::Struct(members) = value else {
        return Err(CodecError::TypeMismatch {
            field: schema.type_def(ty).name.clone(),
            expected: "struct",
            got: value.kind_name(),
        });
    };

    let mut slots: Vec<u16> = Vec::new();
    let mut data: Vec<u8> = Vec::new();
    let mut last_tag: i64 = -1;

    for field in &schema.type_def(ty).fields {
        let Some(member) = members.get(&field.name) else {
            continue;
        };
        let encoded = encode_field(schema, field, member, depth)?;

        let tag = i64::from(field.tag);
        let skipped = tag - last_tag - 1;
        if skipped > 0 {
            // odd slot: skip `skipped` tags before this field
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            slots.push(((skipped - 1) * 2 + 1) as u16);
        }
        match encoded {
            Encoded::Inline(slot) => slots.push(slot),
            Encoded::Chunk(chunk) => {
                slots.push(0);
                let len =
                    u32::try_from(chunk.len()).map_err(|_| CodecError::ChunkTooLarge)?;
                data.extend_from_slice(&len.to_le_bytes());
                data.extend_from_slice(&chunk);
            }
        }
        last_tag = tag;
    }

    let slot_count = u16::try_from(slots.len()).map_err(|_| CodecError::TooManySlots)?;
    let mut out = Vec::with_capacity(2 + slots.len() * 2 + data.len());
    out.extend_from_slice(&slot_count.to_le_bytes());
    for slot in slots {
        out.extend_from_slice(&slot.to_le_bytes());
    }
    out.extend_from_slice(&data);
    Ok(out)
}

fn encode_field(schema: &Schema, field: &Field, value: &Value, depth: usize) -> Result<Encoded> {
    if field.array {
        return encode_array(schema, field, value, depth);
    }
    match &field.kind {
        FieldKind::Integer { scale } => {
            let raw = integer_payload(field, value, *scale)?;
            Ok(encode_integer(raw))
        }
        FieldKind::Boolean => {
            let Value::Boolean(b) = value else {
                return Err(mismatch(field, "boolean", value));
            };
            Ok(Encoded::Inline((u16::from(*b) + 1) * 2))
        }
        FieldKind::Double => {
            let Value::Double(d) = value else {
                return Err(mismatch(field, "double", value));
            };
            Ok(Encoded::Chunk(d.to_le_bytes().to_vec()))
        }
        FieldKind::String { binary: false } => {
            let Value::String(s) = value else {
                return Err(mismatch(field, "string", value));
            };
            Ok(Encoded::Chunk(s.as_bytes().to_vec()))
        }
        FieldKind::String { binary: true } => {
            let Value::Binary(b) = value else {
                return Err(mismatch(field, "binary", value));
            };
            Ok(Encoded::Chunk(b.to_vec()))
        }
        FieldKind::Struct(sub) => {
            Ok(Encoded::Chunk(encode_struct(schema, *sub, value, depth + 1)?))
        }
    }
}

fn encode_array(
    schema: &Schema,
    field: &Field,
    value: &Value,
    depth: usize,
) -> Result<Encoded> {
    let Value::Array(items) = value else {
        return Err(mismatch(field, "array", value));
    };

    let chunk = match &field.kind {
        FieldKind::Integer { scale } => {
            let mut raws = Vec::with_capacity(items.len());
            for item in items {
                raws.push(integer_payload(field, item, *scale)?);
            }
            if raws.is_empty() {
                Vec::new()
            } else {
                // One width byte, then every element at that width. A single
                // out-of-range element widens the whole array to 8 bytes.
                let wide = raws
                    .iter()
                    .any(|&r| i32::try_from(r).is_err());
                let mut chunk = Vec::with_capacity(1 + raws.len() * if wide { 8 } else { 4 });
                chunk.push(if wide { 8 } else { 4 });
                for raw in raws {
                    if wide {
                        #[allow(clippy::cast_sign_loss)]
                        chunk.extend_from_slice(&(raw as u64).to_le_bytes());
                    } else {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        chunk.extend_from_slice(&(raw as i32 as u32).to_le_bytes());
                    }
                }
                chunk
            }
        }
        FieldKind::Boolean => {
            let mut chunk = Vec::with_capacity(items.len());
            for item in items {
                let Value::Boolean(b) = item else {
                    return Err(mismatch(field, "boolean", item));
                };
                chunk.push(u8::from(*b));
            }
            chunk
        }
        FieldKind::Double => {
            return Err(CodecError::DoubleArrayUnsupported { field: field.name.clone() })
        }
        FieldKind::String { binary } => {
            let mut chunk = Vec::new();
            for item in items {
                let bytes: &[u8] = match (binary, item) {
                    (false, Value::String(s)) => s.as_bytes(),
                    (true, Value::Binary(b)) => b,
                    (false, other) => return Err(mismatch(field, "string", other)),
                    (true, other) => return Err(mismatch(field, "binary", other)),
                };
                let len = u32::try_from(bytes.len()).map_err(|_| CodecError::ChunkTooLarge)?;
                chunk.extend_from_slice(&len.to_le_bytes());
                chunk.extend_from_slice(bytes);
            }
            chunk
        }
        FieldKind::Struct(sub) => {
            let mut chunk = Vec::new();
            for item in items {
                let encoded = encode_struct(schema, *sub, item, depth + 1)?;
                let len =
                    u32::try_from(encoded.len()).map_err(|_| CodecError::ChunkTooLarge)?;
                chunk.extend_from_slice(&len.to_le_bytes());
                chunk.extend_from_slice(&encoded);
            }
            chunk
        }
    };

    Ok(Encoded::Chunk(chunk))
}

/// Resolve the on-wire integer for a field, applying the decimal scale.
fn integer_payload(field: &Field, value: &Value, scale: Option<u64>) -> Result<i64> {
    match (scale, value) {
        (None, Value::Integer(v)) => Ok(*v),
        (Some(s), Value::Double(d)) => {
            #[allow(clippy::cast_precision_loss)]
            let scaled = (d * s as f64).round();
            if scaled.is_finite() && scaled >= i64::MIN as f64 && scaled <= i64::MAX as f64 {
                #[allow(clippy::cast_possible_truncation)]
                let raw = scaled as i64;
                Ok(raw)
            } else {
                Err(CodecError::IntegerOutOfRange { field: field.name.clone() })
            }
        }
        (Some(s), Value::Integer(v)) => {
            let s = i64::try_from(s)
                .map_err(|_| CodecError::IntegerOutOfRange { field: field.name.clone() })?;
            v.checked_mul(s)
                .ok_or_else(|| CodecError::IntegerOutOfRange { field: field.name.clone() })
        }
        (None, other) => Err(mismatch(field, "integer", other)),
        (Some(_), other) => Err(mismatch(field, "double", other)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode_integer(raw: i64) -> Encoded {
    if (0..INLINE_LIMIT).contains(&raw) {
        // (v + 1) * 2 stays within u16 because raw < 0x7fff
        Encoded::Inline(((raw + 1) * 2) as u16)
    } else if i32::try_from(raw).is_ok() {
        Encoded::Chunk((raw as i32 as u32).to_le_bytes().to_vec())
    } else {
        Encoded::Chunk((raw as u64).to_le_bytes().to_vec())
    }
}

fn mismatch(field: &Field, expected: &'static str, got: &Value) -> CodecError {
    CodecError::TypeMismatch {
        field: field.name.clone(),
        expected,
        got: got.kind_name(),
    }
}
