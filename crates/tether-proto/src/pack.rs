//! Zero-run compression for the wire boundary.
//!
//! Schema-encoded records are sparse: slot headers and little-endian
//! integers carry long runs of zero bytes. The packer processes input in
//! 8-byte groups; each group emits a bitmap header naming its nonzero bytes,
//! followed by just those bytes. Groups with almost no zeros would expand
//! under that scheme, so consecutive incompressible groups collapse into a
//! literal run: `0xFF`, a group count minus one, then the groups verbatim.
//!
//! `unpack(pack(x))` reproduces `x` padded with zeros to the next 8-byte
//! boundary; record decoding is indifferent to the padding.

use crate::errors::{CodecError, Result};

/// Output clamp for both directions. A single frame never approaches this;
/// hitting it means the input is garbage or hostile.
pub const MAX_PACK_OUTPUT: usize = 1 << 30;

/// Literal runs cap out at this many 8-byte groups per `0xFF` escape.
const MAX_RUN_GROUPS: usize = 256;

/// Compress `src`.
///
/// # Errors
///
/// Returns [`CodecError::PackOverflow`] if the output would exceed
/// [`MAX_PACK_OUTPUT`].
pub fn pack(src: &[u8]) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::with_capacity(src.len() + src.len() / 8 + 2);
    // Offset in `out` of the current literal run's count byte, if a run is
    // open, plus the number of groups written into it.
    let mut run_groups: usize = 0;
    let mut run_count_at: usize = 0;

    let groups = src.len().div_ceil(8);
    for g in 0..groups {
        let start = g * 8;
        let take = (src.len() - start).min(8);
        let mut seg = [0u8; 8];
        seg[..take].copy_from_slice(&src[start..start + take]);

        let mut nonzero = seg.iter().filter(|&&b| b != 0).count();
        // A group with one or two zero bytes saves nothing worth breaking an
        // open run for; fold it in as a literal group.
        if (nonzero == 6 || nonzero == 7) && run_groups > 0 {
            nonzero = 8;
        }

        if nonzero == 8 {
            if run_groups == 0 {
                run_count_at = out.len() + 1;
                out.push(0xFF);
                out.push(0);
            }
            out.extend_from_slice(&seg);
            run_groups += 1;
            if run_groups == MAX_RUN_GROUPS {
                out[run_count_at] = (MAX_RUN_GROUPS - 1) as u8;
                run_groups = 0;
            }
        } else {
            if run_groups > 0 {
                #[allow(clippy::cast_possible_truncation)]
                {
                    out[run_count_at] = (run_groups - 1) as u8;
                }
                run_groups = 0;
            }
            let mut header = 0u8;
            let header_at = out.len();
            out.push(0);
            for (i, &byte) in seg.iter().enumerate() {
                if byte != 0 {
                    header |= 1 << i;
                    out.push(byte);
                }
            }
            out[header_at] = header;
        }

        if out.len() > MAX_PACK_OUTPUT {
            return Err(CodecError::PackOverflow { max: MAX_PACK_OUTPUT });
        }
    }

    if run_groups > 0 {
        #[allow(clippy::cast_possible_truncation)]
        {
            out[run_count_at] = (run_groups - 1) as u8;
        }
    }

    Ok(out)
}

/// Decompress `src`.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] when a header promises more bytes than
/// remain, or [`CodecError::PackOverflow`] past the output clamp.
pub fn unpack(src: &[u8]) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::with_capacity(src.len() * 2);
    let mut i = 0;

    while i < src.len() {
        let header = src[i];
        i += 1;
        if header == 0xFF {
            let count = *src
                .get(i)
                .ok_or(CodecError::Truncated { offset: i, needed: 1 })?;
            i += 1;
            let literal = (usize::from(count) + 1) * 8;
            let run = src
                .get(i..i + literal)
                .ok_or(CodecError::Truncated { offset: i, needed: literal })?;
            out.extend_from_slice(run);
            i += literal;
        } else {
            for bit in 0..8 {
                if header & (1 << bit) != 0 {
                    let byte = *src
                        .get(i)
                        .ok_or(CodecError::Truncated { offset: i, needed: 1 })?;
                    out.push(byte);
                    i += 1;
                } else {
                    out.push(0);
                }
            }
        }
        if out.len() > MAX_PACK_OUTPUT {
            return Err(CodecError::PackOverflow { max: MAX_PACK_OUTPUT });
        }
    }

    Ok(out)
}
