//! Versioned binary marshaling for RPC payloads.
//!
//! Values are written to an [`OutputStream`] and read back from an
//! [`InputStream`]. Both streams keep a stack of length-prefixed,
//! version-stamped encapsulations; the encoding of the innermost one picks
//! how class instances and exceptions are laid out:
//!
//! - 1.0 writes instance ids in place and the instances themselves in
//!   batches after the enclosing value ([`OutputStream::write_pending_values`]).
//! - 1.1 writes instances inline, supports tagged (optional) members and, in
//!   the [`FormatType::Sliced`] format, lets receivers skip and preserve
//!   slices of types they do not know.
//!
//! Types are instantiated through a shared [`FactoryRegistry`].
//!
//! # Example
//!
//! ```
//! use slicewire::{InputStream, OutputStream, ENCODING_1_1};
//!
//! let mut out = OutputStream::new();
//! out.start_encapsulation(ENCODING_1_1, None).unwrap();
//! out.write_string("hello");
//! out.write_tagged_i32(4, Some(42)).unwrap();
//! out.end_encapsulation().unwrap();
//!
//! let mut input = InputStream::new(out.finished());
//! input.start_encapsulation().unwrap();
//! assert_eq!(input.read_string().unwrap(), "hello");
//! assert_eq!(input.read_tagged_i32(2).unwrap(), None);
//! assert_eq!(input.read_tagged_i32(4).unwrap(), Some(42));
//! input.end_encapsulation().unwrap();
//! ```

mod compress;
mod config;
mod error;
mod input;
mod output;
mod registry;
mod slice;
mod tag;
mod value;
mod version;

pub use compress::{decompress_body, maybe_compress, Compressor};
pub use config::{CodecConfig, ConfigError};
pub use error::{MarshalError, Result};
pub use input::InputStream;
pub use output::OutputStream;
pub use registry::{CompactIdResolver, ExceptionFactory, FactoryRegistry, ValueFactory};
pub use slice::SliceFlags;
pub use tag::{read_size, read_tag_header, write_size, write_tag_header, TagFormat, TAGGED_END_MARKER};
pub use value::{
    value_ptr, HookResult, InstanceSlot, Patcher, SliceInfo, SlicedData, UnknownSlicedValue,
    UserException, Value, ValuePtr, ROOT_TYPE_ID,
};
pub use version::{EncodingVersion, FormatType, ENCODING_1_0, ENCODING_1_1};

pub use slicewire_buffers::{BufferError, Reader, Writer};
