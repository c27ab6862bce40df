//! Error types for oscroute

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed packet
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Pattern rejected at compile time
    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    /// Address format error
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Value cannot be represented on the wire
    #[error("encode error: {0}")]
    Encode(String),
}

/// Reasons a packet fails to decode
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before a field was complete
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Packet or element size is not a multiple of four
    #[error("misaligned length: {0} bytes is not a multiple of 4")]
    Misaligned(usize),

    /// String has no null terminator before the end of the buffer
    #[error("unterminated string")]
    UnterminatedString,

    /// String payload is not valid UTF-8
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Type tag string does not begin with ','
    #[error("type tag string must start with ',', got {0:?}")]
    MissingTypeTags(String),

    /// Unknown argument type tag
    #[error("unknown type tag: {0:?}")]
    UnknownTypeTag(char),

    /// Blob length prefix is negative
    #[error("negative blob length: {0}")]
    NegativeLength(i32),

    /// Address does not start with '/' or contains wildcard characters
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// Bytes left over after the last argument
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// Bundle element header or size is inconsistent
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// A bundle was found where a single message was expected
    #[error("expected a message, found a bundle")]
    UnexpectedBundle,

    /// Datagram larger than the receiver accepts
    #[error("packet of {size} bytes exceeds limit of {max}")]
    Oversized { size: usize, max: usize },

    /// Empty datagram or bundle element
    #[error("empty packet")]
    Empty,
}

/// Reasons a pattern fails to compile
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// Pattern string is empty
    #[error("empty pattern")]
    Empty,

    /// Pattern does not start with '/'
    #[error("pattern must start with '/': {0:?}")]
    MissingLeadingSlash(String),

    /// '[' without a matching ']'
    #[error("unclosed '[' at offset {0}")]
    UnclosedBracket(usize),

    /// '{' without a matching '}'
    #[error("unclosed '{{' at offset {0}")]
    UnclosedBrace(usize),

    /// ']' or '}' with no opener
    #[error("unexpected {ch:?} at offset {offset}")]
    Unexpected { ch: char, offset: usize },

    /// '[]' or '[!]'
    #[error("empty character class at offset {0}")]
    EmptyClass(usize),

    /// Range whose start is after its end
    #[error("invalid range {start:?}-{end:?}")]
    InvalidRange { start: char, end: char },
}
