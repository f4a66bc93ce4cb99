//! Low-level record walking shared by the schema loader and the decoder.
//!
//! Every encoded record has the same outer shape:
//!
//! ```text
//! u16 slot_count
//! slot_count x u16 slot
//! <data region: length-prefixed chunks, consumed in slot order>
//! ```
//!
//! A slot is one of three forms:
//! - `0`: the field's payload is the next chunk in the data region
//! - even, nonzero: a small inline integer, `value/2 - 1`
//! - odd: a skip directive advancing the running tag by `1 + value/2`
//!   (the `1` being the per-slot increment every slot receives)

/// One resolved slot: the tag it landed on and its payload form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawValue<'a> {
    /// Small integer carried in the slot itself
    Inline(i64),
    /// Length-prefixed chunk from the data region
    Chunk(&'a [u8]),
}

/// A fully walked record.
#[derive(Debug)]
pub(crate) struct RawRecord<'a> {
    /// `(tag, payload)` per non-skip slot, in wire order
    pub entries: Vec<(u16, RawValue<'a>)>,
    /// Bytes consumed from the input, including every referenced chunk
    pub used: usize,
}

/// Walker failures, mapped to layer errors by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WireError {
    /// Input ended before a read completed
    Truncated { offset: usize, needed: usize },
    /// The running tag left the 16-bit range
    TagOverflow,
}

pub(crate) fn read_u16_le(data: &[u8], offset: usize) -> Result<u16, WireError> {
    match data.get(offset..offset + 2) {
        Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
        None => Err(WireError::Truncated { offset, needed: 2 }),
    }
}

pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> Result<u32, WireError> {
    match data.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(WireError::Truncated { offset, needed: 4 }),
    }
}

/// Walk one record, resolving skip slots and detaching data chunks.
///
/// Trailing bytes past the last referenced chunk are left untouched; `used`
/// reports how far the record actually reached so callers can locate what
/// follows it.
pub(crate) fn read_record(data: &[u8]) -> Result<RawRecord<'_>, WireError> {
    let slot_count = usize::from(read_u16_le(data, 0)?);
    let header_len = 2 + slot_count * 2;
    if data.len() < header_len {
        return Err(WireError::Truncated { offset: 2, needed: header_len - 2 });
    }

    let mut entries = Vec::with_capacity(slot_count);
    let mut chunk_off = header_len;
    let mut tag: i64 = -1;

    for i in 0..slot_count {
        tag += 1;
        let value = read_u16_le(data, 2 + i * 2)?;
        if value & 1 == 1 {
            tag += i64::from(value / 2);
            continue;
        }
        if tag > i64::from(u16::MAX) {
            return Err(WireError::TagOverflow);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let tag16 = tag as u16;

        if value == 0 {
            let size = read_u32_le(data, chunk_off)? as usize;
            let start = chunk_off + 4;
            let end = start.checked_add(size).ok_or(WireError::Truncated {
                offset: start,
                needed: size,
            })?;
            let chunk = data
                .get(start..end)
                .ok_or(WireError::Truncated { offset: start, needed: size })?;
            entries.push((tag16, RawValue::Chunk(chunk)));
            chunk_off = end;
        } else {
            entries.push((tag16, RawValue::Inline(i64::from(value / 2) - 1)));
        }
    }

    Ok(RawRecord { entries, used: chunk_off })
}

/// Iterate the length-prefixed elements of an array chunk.
pub(crate) struct ChunkIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ChunkIter<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Result<&'a [u8], WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset == self.data.len() {
            return None;
        }
        let size = match read_u32_le(self.data, self.offset) {
            Ok(s) => s as usize,
            Err(e) => return Some(Err(e)),
        };
        let start = self.offset + 4;
        let end = match start.checked_add(size) {
            Some(e) if e <= self.data.len() => e,
            _ => return Some(Err(WireError::Truncated { offset: start, needed: size })),
        };
        self.offset = end;
        Some(Ok(&self.data[start..end]))
    }
}
