//! Decoding side: [`InputStream`].
//!
//! The stream owns the bytes being decoded and a stack of read
//! encapsulations. The bottom of the stack is an implicit region spanning
//! the whole buffer and using the configured default encoding; every
//! explicit encapsulation pushes a frame carrying its own encoding and its
//! own decoder state, so nested encapsulations never share identity maps or
//! type-id tables.

mod current;
mod legacy;
mod patch;

use std::rc::Rc;
use std::sync::Arc;

use slicewire_buffers::{BufferError, Reader};
use tracing::debug;

use crate::config::CodecConfig;
use crate::error::{MarshalError, Result};
use crate::registry::FactoryRegistry;
use crate::slice::SliceFlags;
use crate::tag::{self, TagFormat};
use crate::value::{InstanceSlot, Patcher, SlicedData, UserException};
use crate::version::EncodingVersion;

use current::CurrentDecoder;
use legacy::LegacyDecoder;
use patch::PatchResolver;

/// Per-encapsulation decoding strategy.
pub(crate) enum Decoder {
    Legacy(LegacyDecoder),
    Current(CurrentDecoder),
}

impl Decoder {
    fn for_encoding(encoding: EncodingVersion) -> Self {
        if encoding.is_legacy() {
            Decoder::Legacy(LegacyDecoder::default())
        } else {
            Decoder::Current(CurrentDecoder::new())
        }
    }
}

pub(crate) struct ReadEncaps {
    start: usize,
    size: usize,
    encoding: EncodingVersion,
    decoder: Decoder,
    resolver: PatchResolver,
}

impl ReadEncaps {
    fn new(start: usize, size: usize, encoding: EncodingVersion, config: &CodecConfig) -> Self {
        Self {
            start,
            size,
            encoding,
            decoder: Decoder::for_encoding(encoding),
            resolver: PatchResolver::new(config.class_graph_depth_max),
        }
    }

    fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Decodes values from an owned byte buffer.
///
/// ```
/// use slicewire::{InputStream, OutputStream};
///
/// let mut out = OutputStream::new();
/// out.write_i32(7);
/// out.write_string("seven");
///
/// let mut input = InputStream::new(out.finished());
/// assert_eq!(input.read_i32().unwrap(), 7);
/// assert_eq!(input.read_string().unwrap(), "seven");
/// ```
pub struct InputStream {
    data: Vec<u8>,
    x: usize,
    config: CodecConfig,
    registry: Arc<FactoryRegistry>,
    base: ReadEncaps,
    nested: Vec<ReadEncaps>,
}

impl InputStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_options(data, CodecConfig::default(), FactoryRegistry::shared())
    }

    pub fn with_registry(data: Vec<u8>, registry: Arc<FactoryRegistry>) -> Self {
        Self::with_options(data, CodecConfig::default(), registry)
    }

    pub fn with_options(data: Vec<u8>, config: CodecConfig, registry: Arc<FactoryRegistry>) -> Self {
        let base = ReadEncaps::new(0, data.len(), config.default_encoding, &config);
        Self {
            data,
            x: 0,
            config,
            registry,
            base,
            nested: Vec::new(),
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        &self.registry
    }

    pub fn pos(&self) -> usize {
        self.x
    }

    pub fn set_pos(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(BufferError::EndOfBuffer.into());
        }
        self.x = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.x)
    }

    /// Encoding of the innermost open encapsulation.
    pub fn encoding(&self) -> EncodingVersion {
        self.top().encoding
    }

    fn top(&self) -> &ReadEncaps {
        self.nested.last().unwrap_or(&self.base)
    }

    fn top_mut(&mut self) -> &mut ReadEncaps {
        match self.nested.last_mut() {
            Some(encaps) => encaps,
            None => &mut self.base,
        }
    }

    fn is_legacy(&self) -> bool {
        matches!(self.top().decoder, Decoder::Legacy(_))
    }

    fn with_reader<T>(&mut self, f: impl FnOnce(&mut Reader<'_>) -> Result<T>) -> Result<T> {
        let mut r = Reader::from_slice(&self.data, self.x, self.data.len());
        let out = f(&mut r);
        self.x = r.x;
        out
    }

    // ------------------------------------------------------------ primitives

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.with_reader(|r| Ok(r.skip(n)?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.with_reader(|r| Ok(r.u8()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.with_reader(|r| Ok(r.i16()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.with_reader(|r| Ok(r.i32()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.with_reader(|r| Ok(r.i64()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.with_reader(|r| Ok(r.f32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.with_reader(|r| Ok(r.f64()?))
    }

    pub fn read_size(&mut self) -> Result<usize> {
        self.with_reader(tag::read_size)
    }

    /// Reads a sequence length and rejects it when `count * min_elem_size`
    /// cannot fit in the remaining bytes.
    pub fn read_and_check_seq_size(&mut self, min_elem_size: usize) -> Result<usize> {
        let count = self.read_size()?;
        let remaining = self.remaining();
        if count.saturating_mul(min_elem_size) > remaining {
            return Err(MarshalError::InvalidSequenceSize { count, remaining });
        }
        Ok(count)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_size()?;
        self.with_reader(|r| Ok(r.utf8(len)?.to_owned()))
    }

    /// Reads `n` raw bytes.
    pub fn read_blob(&mut self, n: usize) -> Result<Vec<u8>> {
        self.with_reader(|r| Ok(r.buf(n)?.to_vec()))
    }

    pub fn read_byte_seq(&mut self) -> Result<Vec<u8>> {
        let len = self.read_size()?;
        self.read_blob(len)
    }

    pub fn read_string_seq(&mut self) -> Result<Vec<String>> {
        self.read_seq(1, |input| input.read_string())
    }

    pub fn read_seq<T>(
        &mut self,
        min_elem_size: usize,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.read_and_check_seq_size(min_elem_size)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(read(self)?);
        }
        Ok(out)
    }

    /// Reads a dictionary into any collection of pairs.
    pub fn read_dict<K, V, C>(
        &mut self,
        min_entry_size: usize,
        mut read_key: impl FnMut(&mut Self) -> Result<K>,
        mut read_value: impl FnMut(&mut Self) -> Result<V>,
    ) -> Result<C>
    where
        C: FromIterator<(K, V)>,
    {
        let count = self.read_and_check_seq_size(min_entry_size)?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let k = read_key(self)?;
            let v = read_value(self)?;
            entries.push((k, v));
        }
        Ok(entries.into_iter().collect())
    }

    fn read_encoding(&mut self) -> Result<EncodingVersion> {
        let major = self.read_u8()?;
        let minor = self.read_u8()?;
        Ok(EncodingVersion::new(major, minor))
    }

    // ------------------------------------------------------- encapsulations

    /// Opens a nested encapsulation and returns its encoding.
    pub fn start_encapsulation(&mut self) -> Result<EncodingVersion> {
        let start = self.x;
        let size = self.read_encapsulation_header()?;
        let encoding = self.read_encoding()?;
        encoding.check_supported()?;
        let encaps = ReadEncaps::new(start, size, encoding, &self.config);
        self.nested.push(encaps);
        Ok(encoding)
    }

    /// Reads the 4-byte size and checks it against the remaining bytes.
    fn read_encapsulation_header(&mut self) -> Result<usize> {
        let size = self.read_i32()?;
        if size < 6 {
            return Err(MarshalError::EncapsulationSize(size));
        }
        if (size - 4) as usize > self.remaining() {
            return Err(BufferError::EndOfBuffer.into());
        }
        Ok(size as usize)
    }

    /// Closes the innermost encapsulation, requiring every byte of it to
    /// have been consumed.
    pub fn end_encapsulation(&mut self) -> Result<()> {
        if self.nested.is_empty() {
            return Err(MarshalError::EncapsulationStack("no open encapsulation"));
        }
        let legacy = self.top().encoding.is_legacy();
        if !legacy {
            self.skip_tagged_members()?;
        }
        let end = self.top().end();
        if self.x != end {
            // Old legacy peers append one spurious byte to some payloads.
            if !legacy || self.x + 1 != end {
                return Err(MarshalError::EncapsulationBounds {
                    expected: end,
                    actual: self.x,
                });
            }
            debug!(pos = self.x, "consuming trailing byte of legacy encapsulation");
            self.skip(1)?;
        }
        self.nested.pop();
        Ok(())
    }

    /// Skips an encapsulation without decoding it.
    pub fn skip_encapsulation(&mut self) -> Result<EncodingVersion> {
        let size = self.read_encapsulation_header()?;
        let encoding = self.read_encoding()?;
        self.skip(size - 6)?;
        Ok(encoding)
    }

    /// Returns an encapsulation verbatim (header included) for forwarding.
    pub fn read_encapsulation(&mut self) -> Result<(Vec<u8>, EncodingVersion)> {
        let start = self.x;
        let size = self.read_encapsulation_header()?;
        let encoding = self.read_encoding()?;
        self.x = start;
        let bytes = self.read_blob(size)?;
        Ok((bytes, encoding))
    }

    /// Skips an encapsulation expected to carry no required payload. Under
    /// the current encoding any tagged content is skipped silently.
    pub fn skip_empty_encapsulation(&mut self) -> Result<EncodingVersion> {
        let size = self.read_encapsulation_header()?;
        let encoding = self.read_encoding()?;
        encoding.check_supported()?;
        if encoding.is_legacy() {
            if size != 6 {
                return Err(MarshalError::EncapsulationSize(size as i32));
            }
        } else {
            self.skip(size - 6)?;
        }
        Ok(encoding)
    }

    /// Payload size of the innermost explicit encapsulation.
    pub fn encapsulation_size(&self) -> Result<usize> {
        match self.nested.last() {
            Some(encaps) => Ok(encaps.size - 6),
            None => Err(MarshalError::EncapsulationStack("no open encapsulation")),
        }
    }

    // ------------------------------------------------------- tagged members

    /// Positions the cursor on the value of tagged member `tag` if present.
    ///
    /// Lower tags are skipped, a higher tag is left in place for a later
    /// read, and a matching tag must carry `expected` as its format.
    pub fn read_tagged(&mut self, tag: i32, expected: TagFormat) -> Result<bool> {
        match self.find_tagged(tag)? {
            None => Ok(false),
            Some(actual) if actual == expected => Ok(true),
            Some(actual) => Err(MarshalError::TagFormatMismatch {
                tag,
                expected,
                actual,
            }),
        }
    }

    /// Like [`read_tagged`](Self::read_tagged) but accepts any fixed-width
    /// format, returning the one found.
    pub fn read_tagged_fixed(&mut self, tag: i32) -> Result<Option<TagFormat>> {
        match self.find_tagged(tag)? {
            None => Ok(None),
            Some(actual) if actual.is_fixed_width() => Ok(Some(actual)),
            Some(actual) => Err(MarshalError::TagFormatMismatch {
                tag,
                expected: TagFormat::F8,
                actual,
            }),
        }
    }

    fn find_tagged(&mut self, tag: i32) -> Result<Option<TagFormat>> {
        if self.is_legacy() {
            return Ok(None);
        }
        if let Some(flags) = self.current_slice_flags() {
            if !flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS) {
                return Ok(None);
            }
        }
        let end = self.top().end();
        loop {
            if self.x >= end {
                return Ok(None);
            }
            let save = self.x;
            match self.with_reader(tag::read_tag_header)? {
                None => {
                    self.x = save;
                    return Ok(None);
                }
                Some((found, _)) if found > tag => {
                    self.x = save;
                    return Ok(None);
                }
                Some((found, format)) if found < tag => self.skip_tagged(format)?,
                Some((_, format)) => return Ok(Some(format)),
            }
        }
    }

    fn skip_tagged(&mut self, format: TagFormat) -> Result<()> {
        match format {
            TagFormat::F1 | TagFormat::F2 | TagFormat::F4 | TagFormat::F8 => {
                self.skip(format.fixed_width().unwrap_or(0))
            }
            TagFormat::Size => self.read_size().map(|_| ()),
            TagFormat::VSize => {
                let n = self.read_size()?;
                self.skip(n)
            }
            TagFormat::FSize => {
                let n = self.read_i32()?;
                if n < 0 {
                    return Err(MarshalError::NegativeSize(n));
                }
                self.skip(n as usize)
            }
            TagFormat::Class => self.read_value(None),
        }
    }

    /// Skips every remaining tagged member up to (and including) the end
    /// marker, or up to the end of the current encapsulation.
    pub fn skip_tagged_members(&mut self) -> Result<()> {
        let end = self.top().end();
        while self.x < end {
            match self.with_reader(tag::read_tag_header)? {
                None => return Ok(()),
                Some((_, format)) => self.skip_tagged(format)?,
            }
        }
        Ok(())
    }

    pub fn read_tagged_bool(&mut self, tag: i32) -> Result<Option<bool>> {
        if self.read_tagged(tag, TagFormat::F1)? {
            return self.read_bool().map(Some);
        }
        Ok(None)
    }

    pub fn read_tagged_u8(&mut self, tag: i32) -> Result<Option<u8>> {
        if self.read_tagged(tag, TagFormat::F1)? {
            return self.read_u8().map(Some);
        }
        Ok(None)
    }

    pub fn read_tagged_i16(&mut self, tag: i32) -> Result<Option<i16>> {
        if self.read_tagged(tag, TagFormat::F2)? {
            return self.read_i16().map(Some);
        }
        Ok(None)
    }

    pub fn read_tagged_i32(&mut self, tag: i32) -> Result<Option<i32>> {
        if self.read_tagged(tag, TagFormat::F4)? {
            return self.read_i32().map(Some);
        }
        Ok(None)
    }

    pub fn read_tagged_i64(&mut self, tag: i32) -> Result<Option<i64>> {
        if self.read_tagged(tag, TagFormat::F8)? {
            return self.read_i64().map(Some);
        }
        Ok(None)
    }

    pub fn read_tagged_f64(&mut self, tag: i32) -> Result<Option<f64>> {
        if self.read_tagged(tag, TagFormat::F8)? {
            return self.read_f64().map(Some);
        }
        Ok(None)
    }

    pub fn read_tagged_size(&mut self, tag: i32) -> Result<Option<usize>> {
        if self.read_tagged(tag, TagFormat::Size)? {
            return self.read_size().map(Some);
        }
        Ok(None)
    }

    pub fn read_tagged_string(&mut self, tag: i32) -> Result<Option<String>> {
        if self.read_tagged(tag, TagFormat::VSize)? {
            return self.read_string().map(Some);
        }
        Ok(None)
    }

    pub fn read_tagged_byte_seq(&mut self, tag: i32) -> Result<Option<Vec<u8>>> {
        if self.read_tagged(tag, TagFormat::VSize)? {
            return self.read_byte_seq().map(Some);
        }
        Ok(None)
    }

    /// Reads a tagged class member into `slot`; returns whether it was
    /// present.
    pub fn read_tagged_value(&mut self, tag: i32, slot: &InstanceSlot) -> Result<bool> {
        if self.read_tagged(tag, TagFormat::Class)? {
            self.read_value(Some(slot.patcher()))?;
            return Ok(true);
        }
        Ok(false)
    }

    // ------------------------------------------------------------ instances

    /// Reads a class reference. `patcher` runs once the referenced instance
    /// is available, which may be after this call returns.
    pub fn read_value(&mut self, patcher: Option<Patcher>) -> Result<()> {
        if self.is_legacy() {
            self.read_value_legacy(patcher)
        } else {
            self.read_value_current(patcher)
        }
    }

    /// Reads a class reference into `slot`.
    pub fn read_value_into(&mut self, slot: &InstanceSlot) -> Result<()> {
        self.read_value(Some(slot.patcher()))
    }

    /// Reads the instances the legacy encoding marshals after the values
    /// that reference them. A no-op for the current encoding.
    pub fn read_pending_values(&mut self) -> Result<()> {
        if self.is_legacy() {
            self.read_pending_values_legacy()
        } else {
            Ok(())
        }
    }

    /// Decodes a user exception, instantiating the most derived type the
    /// registry knows.
    pub fn read_exception(&mut self) -> Result<Box<dyn UserException>> {
        if self.is_legacy() {
            self.read_exception_legacy()
        } else {
            self.read_exception_current()
        }
    }

    /// Reads the next slice header of the instance being decoded and
    /// returns its type-id.
    pub fn start_slice(&mut self) -> Result<String> {
        if self.is_legacy() {
            self.start_slice_legacy()
        } else {
            self.start_slice_current()
        }
    }

    pub fn end_slice(&mut self) -> Result<()> {
        if self.is_legacy() {
            Ok(())
        } else {
            self.end_slice_current()
        }
    }

    pub fn skip_slice(&mut self) -> Result<()> {
        if self.is_legacy() {
            self.skip_slice_legacy()
        } else {
            self.skip_slice_current()
        }
    }

    fn start_value(&mut self) -> Result<()> {
        if self.is_legacy() {
            self.start_value_legacy()
        } else {
            self.start_value_current()
        }
    }

    fn end_value(&mut self, preserve: bool) -> Result<Option<Rc<SlicedData>>> {
        if self.is_legacy() {
            self.end_value_legacy().map(|_| None)
        } else {
            self.end_value_current(preserve)
        }
    }

    fn resolver_mut(&mut self) -> &mut PatchResolver {
        &mut self.top_mut().resolver
    }
}
