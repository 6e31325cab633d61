//! Error types for the Weft codec

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of codec failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The byte stream is truncated or corrupt. Fatal to one decode call.
    MalformedStream,
    /// A schema or value does not fit the declared wire types. Programmer error.
    SchemaDefinition,
}

/// Codec error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes remain than a read requires
    #[error("end of stream: need {needed} bytes, have {have}")]
    EndOfStream { needed: usize, have: usize },

    /// Length varint still had its continuation bit set after five groups
    #[error("length prefix exceeds five groups")]
    UnterminatedLength,

    /// A length does not fit the target length type
    #[error("length overflow: {0}")]
    LengthOverflow(u64),

    /// String payload is not valid UTF-8
    #[error("invalid utf-8 in string payload")]
    InvalidUtf8,

    /// Date/time cannot be represented as ticks since 1970
    #[error("date/time out of range")]
    InvalidDateTime,

    /// No schema registered for a message type id
    #[error("unknown message schema: 0x{0:08x}")]
    UnknownSchema(u32),

    /// Two schemas registered under the same message type id
    #[error("duplicate message schema: 0x{0:08x}")]
    DuplicateSchema(u32),

    /// Value shape does not match the wire type it is encoded with
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Integer does not fit the declared enum width
    #[error("value {value} out of range for {width}")]
    ValueOutOfRange { value: i128, width: &'static str },

    /// Value is not one of a variant's alternatives
    #[error("value is not an alternative of this variant")]
    NotAnAlternative,

    /// Variant holds no value
    #[error("variant is empty")]
    VariantEmpty,

    /// Decoded discriminant has no matching alternative
    #[error("invalid variant discriminant {index} ({count} alternatives)")]
    InvalidDiscriminant { index: u8, count: usize },

    /// More alternatives than a one byte discriminant can address
    #[error("variant declares {0} alternatives (max 256)")]
    TooManyAlternatives(usize),

    /// Messages nested deeper than the codec accepts
    #[error("messages nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// All 65535 reference keys of a group are in use
    #[error("reference group exhausted")]
    GroupExhausted,

    /// Record does not carry one value per schema field
    #[error("record has {have} fields, schema 0x{uid:08x} declares {expected}")]
    FieldCount {
        uid: u32,
        expected: usize,
        have: usize,
    },

    /// Message carries a different type id than the one requested
    #[error("message type mismatch: expected 0x{expected:08x}, found 0x{found:08x}")]
    MessageMismatch { expected: u32, found: u32 },

    /// Schema has no field with this name
    #[error("unknown field: {0}")]
    UnknownField(String),
}

impl Error {
    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::EndOfStream { .. }
            | Error::UnterminatedLength
            | Error::LengthOverflow(_)
            | Error::InvalidUtf8
            | Error::InvalidDiscriminant { .. }
            | Error::NestingTooDeep(_) => ErrorCategory::MalformedStream,
            _ => ErrorCategory::SchemaDefinition,
        }
    }

    /// True for truncated or corrupt input
    pub fn is_malformed(&self) -> bool {
        self.category() == ErrorCategory::MalformedStream
    }
}
