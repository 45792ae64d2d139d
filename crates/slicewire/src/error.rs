//! Marshaling error type.

use slicewire_buffers::BufferError;
use thiserror::Error;

use crate::tag::TagFormat;
use crate::version::EncodingVersion;

/// Error type for every encode/decode operation.
///
/// All variants are terminal for the call that produced them; nothing is
/// retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarshalError {
    #[error("unmarshal out of bounds: {0}")]
    OutOfBounds(#[from] BufferError),
    #[error("negative size {0}")]
    NegativeSize(i32),
    #[error("sequence of {count} elements cannot fit in {remaining} remaining bytes")]
    InvalidSequenceSize { count: usize, remaining: usize },
    #[error("invalid encapsulation size {0}")]
    EncapsulationSize(i32),
    #[error("encapsulation bounds violated: expected end at {expected}, cursor at {actual}")]
    EncapsulationBounds { expected: usize, actual: usize },
    #[error("encapsulation stack misuse: {0}")]
    EncapsulationStack(&'static str),
    #[error("unsupported encoding version {0}")]
    UnsupportedEncoding(EncodingVersion),
    #[error("tagged member {tag}: expected format {expected:?}, found {actual:?}")]
    TagFormatMismatch {
        tag: i32,
        expected: TagFormat,
        actual: TagFormat,
    },
    #[error("no value factory for type `{type_id}`: {reason}")]
    NoValueFactory {
        type_id: String,
        reason: &'static str,
    },
    #[error("unknown exception type `{0}`")]
    UnknownUserException(String),
    #[error("indirection table: {0}")]
    IndirectionTable(&'static str),
    #[error("maximum class graph depth {max} exceeded")]
    ClassGraphDepthExceeded { max: usize },
    #[error("index {0} for class received, but no instance")]
    UnresolvedPatch(i32),
    #[error("invalid instance id {0}")]
    InvalidInstanceId(i32),
    #[error("invalid slice size {0}")]
    InvalidSliceSize(i32),
    #[error("invalid type id index {0}")]
    InvalidTypeIdIndex(usize),
    #[error("no active slice or instance")]
    NoActiveSlice,
    #[error("instance of type `{0}` produced no slices")]
    EmptyInstance(String),
    #[error("compression: {0}")]
    Compression(String),
}

pub type Result<T> = std::result::Result<T, MarshalError>;
