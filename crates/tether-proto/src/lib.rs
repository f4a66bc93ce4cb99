//! # Tether wire codec
//!
//! Schema-driven binary serialization for the tether client stack. A
//! precompiled schema bundle (produced by the external schema compiler) is
//! loaded into an immutable [`Schema`]; structured [`Value`]s are then
//! encoded and decoded against its types, and frames crossing the wire are
//! compacted with the zero-run [`pack`]/[`unpack`] pass.
//!
//! ## Layers
//!
//! - [`schema`]: bundle loader, type/protocol tables, lookups
//! - [`value`]: the dynamic value tree messages travel as
//! - encode/decode: slot-header record format, implemented on [`Schema`]
//! - [`pack`]: zero-run compression applied at the wire boundary
//!
//! The format is fixed by the peer: every byte position here is dictated by
//! the deployed server, so the encoder favors exactness over cleverness and
//! the decoder validates every length before it reads.
//!
//! ## Forward compatibility
//!
//! Decoding skips wire tags the local schema does not know, so a newer peer
//! can add fields freely. The reverse (a field the schema knows but the wire
//! omits) simply leaves the member absent from the decoded struct.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod pack;
pub mod schema;
pub mod value;

mod decode;
mod encode;
mod wire;

pub use decode::Decoded;
pub use errors::{CodecError, SchemaError};
pub use pack::{pack, unpack};
pub use schema::{Field, FieldKind, Protocol, Schema, TypeDef, TypeRef};
pub use value::{Fields, Value};

impl Schema {
    /// Encode then pack: the form data frames take on the wire.
    ///
    /// # Errors
    ///
    /// Any error from [`Schema::encode`] or [`pack`].
    pub fn pencode(&self, ty: TypeRef, value: &Value) -> Result<Vec<u8>, CodecError> {
        pack(&self.encode(ty, value)?)
    }

    /// Unpack then decode: the inverse of [`Schema::pencode`].
    ///
    /// # Errors
    ///
    /// Any error from [`unpack`] or [`Schema::decode`].
    pub fn pdecode(&self, ty: TypeRef, data: &[u8]) -> Result<Decoded, CodecError> {
        self.decode(ty, &unpack(data)?)
    }
}
