//! Error types for the wire codec.
//!
//! Schema loading and value encoding/decoding report through separate enums:
//! a bad bundle is a deployment problem (the session cannot start), while a
//! bad value or byte stream is a runtime problem the caller can handle per
//! message.

use thiserror::Error;

/// Errors reported while parsing a compiled schema bundle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Bundle ended before a length-prefixed region was complete
    #[error("bundle truncated: needed {needed} bytes at offset {offset}")]
    Truncated {
        /// Offset of the read that failed
        offset: usize,
        /// Bytes the read required
        needed: usize,
    },

    /// The outer group record carried an inline value where only data
    /// chunks are allowed
    #[error("unexpected inline value {value:#06x} in the outer record")]
    OuterInlineValue {
        /// The offending slot value
        value: u16,
    },

    /// A record carried more slots than its layout permits
    #[error("{record} record has {count} slots, at most {max} allowed")]
    TooManySlots {
        /// Which record kind was being parsed
        record: &'static str,
        /// Observed slot count
        count: usize,
        /// Permitted maximum
        max: usize,
    },

    /// A field meta-record used a tag the format does not define
    #[error("unknown field meta-tag {tag}")]
    UnknownMetaTag {
        /// The unrecognized meta-tag
        tag: u16,
    },

    /// A builtin type code outside the defined set
    #[error("unknown builtin type code {code}")]
    UnknownBuiltin {
        /// The unrecognized code
        code: i64,
    },

    /// Field tags within a type must strictly increase
    #[error("field tags must strictly increase in type {type_name:?}: {tag} after {last}")]
    TagNotMonotonic {
        /// Type being parsed
        type_name: String,
        /// Previous field tag
        last: i64,
        /// Offending field tag
        tag: i64,
    },

    /// A struct field or protocol referenced a type index past the table
    #[error("type index {index} out of range ({count} types)")]
    TypeIndexOutOfRange {
        /// The referenced index
        index: usize,
        /// Number of types in the bundle
        count: usize,
    },

    /// Protocols must be sorted by strictly increasing tag
    #[error("protocol tags must strictly increase: {tag} after {last}")]
    ProtocolOrder {
        /// Previous protocol tag
        last: i64,
        /// Offending protocol tag
        tag: i64,
    },

    /// A record was missing a required member
    #[error("{record} record is missing {what}")]
    MissingField {
        /// Which record kind was being parsed
        record: &'static str,
        /// What was absent
        what: &'static str,
    },

    /// A record member that must be a data chunk was inline, or vice versa
    #[error("{record} meta-tag {tag} has the wrong slot form")]
    BadSlotForm {
        /// Which record kind was being parsed
        record: &'static str,
        /// Meta-tag of the offending member
        tag: u16,
    },

    /// A name chunk was not valid UTF-8
    #[error("name is not valid UTF-8")]
    NameNotUtf8,

    /// A numeric member was out of its permitted range
    #[error("{what} {value} out of range")]
    ValueOutOfRange {
        /// What was being parsed
        what: &'static str,
        /// The offending value
        value: i64,
    },
}

/// Errors reported by the encoder, decoder, and packer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a read completed
    #[error("input truncated: needed {needed} bytes at offset {offset}")]
    Truncated {
        /// Offset of the read that failed
        offset: usize,
        /// Bytes the read required
        needed: usize,
    },

    /// Nesting exceeded the recursion cap
    #[error("struct nesting deeper than {max} levels")]
    DepthExceeded {
        /// The recursion cap
        max: usize,
    },

    /// The supplied value does not match the schema field type
    #[error("field {field:?} expects {expected}, got {got}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Schema-declared type
        expected: &'static str,
        /// What the caller supplied
        got: &'static str,
    },

    /// A scaled decimal overflowed the 64-bit integer range
    #[error("field {field:?} value does not fit a 64-bit integer")]
    IntegerOutOfRange {
        /// Field name
        field: String,
    },

    /// A decoded integer chunk had a width other than 4 or 8
    #[error("integer width {width} not 4 or 8 for field {field:?}")]
    IntegerWidth {
        /// Field name
        field: String,
        /// Observed byte width
        width: usize,
    },

    /// An integer array body was not divisible by its element width
    #[error("integer array length {len} not divisible by width {width} for field {field:?}")]
    ArrayNotDivisible {
        /// Field name
        field: String,
        /// Body length excluding the width byte
        len: usize,
        /// Element width
        width: usize,
    },

    /// A data chunk had the wrong size for its declared type
    #[error("field {field:?} chunk of {len} bytes does not match {expected}")]
    SizeMismatch {
        /// Field name
        field: String,
        /// Chunk length
        len: usize,
        /// What the type required
        expected: &'static str,
    },

    /// A field kind that only accepts data chunks arrived inline
    #[error("field {field:?} cannot be encoded inline")]
    UnexpectedInline {
        /// Field name
        field: String,
    },

    /// A string chunk declared as UTF-8 was not valid UTF-8
    #[error("field {field:?} is not valid UTF-8")]
    StringNotUtf8 {
        /// Field name
        field: String,
    },

    /// Arrays of double are not part of the wire format
    #[error("field {field:?}: arrays of double are not supported")]
    DoubleArrayUnsupported {
        /// Field name
        field: String,
    },

    /// A struct slot count exceeded the u16 header
    #[error("record has too many slots to encode")]
    TooManySlots,

    /// A data chunk exceeded the u32 length prefix
    #[error("data chunk too large to encode")]
    ChunkTooLarge,

    /// A running tag left the 16-bit range
    #[error("record tag out of range")]
    TagOverflow,

    /// Packer output exceeded the configured clamp
    #[error("packed output larger than {max} bytes")]
    PackOverflow {
        /// The clamp in bytes
        max: usize,
    },
}

/// Convenient result alias for codec operations.
pub type Result<T, E = CodecError> = std::result::Result<T, E>;
