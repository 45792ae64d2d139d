//! Encoding side: [`OutputStream`].

mod current;
mod legacy;

use std::collections::HashMap;

use slicewire_buffers::{BufferError, Writer};

use crate::config::CodecConfig;
use crate::error::{MarshalError, Result};
use crate::slice::SliceFlags;
use crate::tag::{self, TagFormat};
use crate::value::{UserException, ValuePtr};
use crate::version::{EncodingVersion, FormatType};

use current::CurrentEncoder;
use legacy::LegacyEncoder;

/// Per-encapsulation encoding strategy.
pub(crate) enum Encoder {
    Legacy(LegacyEncoder),
    Current(CurrentEncoder),
}

pub(crate) struct WriteEncaps {
    start: usize,
    encoding: EncodingVersion,
    format: FormatType,
    encoder: Encoder,
}

impl WriteEncaps {
    fn new(start: usize, encoding: EncodingVersion, format: FormatType) -> Self {
        let encoder = if encoding.is_legacy() {
            Encoder::Legacy(LegacyEncoder::default())
        } else {
            Encoder::Current(CurrentEncoder::new())
        };
        Self {
            start,
            encoding,
            format,
            encoder,
        }
    }
}

/// Assigns type-id table indices in first-seen order, starting at 1.
#[derive(Default)]
pub(crate) struct TypeIdTable {
    indices: HashMap<String, usize>,
}

impl TypeIdTable {
    /// Returns the existing index, or `None` after adding a new entry (the
    /// caller then writes the string itself).
    pub(crate) fn register(&mut self, type_id: &str) -> Option<usize> {
        if let Some(&index) = self.indices.get(type_id) {
            return Some(index);
        }
        let index = self.indices.len() + 1;
        self.indices.insert(type_id.to_owned(), index);
        None
    }
}

/// Encodes values into a growable buffer.
pub struct OutputStream {
    w: Writer,
    config: CodecConfig,
    base: WriteEncaps,
    nested: Vec<WriteEncaps>,
}

impl Default for OutputStream {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStream {
    pub fn new() -> Self {
        Self::with_config(CodecConfig::default())
    }

    pub fn with_config(config: CodecConfig) -> Self {
        let base = WriteEncaps::new(0, config.default_encoding, config.default_format);
        Self {
            w: Writer::new(),
            config,
            base,
            nested: Vec::new(),
        }
    }

    /// A stream whose implicit top-level region uses `encoding`.
    pub fn with_encoding(encoding: EncodingVersion) -> Self {
        let config = CodecConfig {
            default_encoding: encoding,
            ..CodecConfig::default()
        };
        Self::with_config(config)
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn pos(&self) -> usize {
        self.w.pos()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.w.as_slice()
    }

    pub fn finished(self) -> Vec<u8> {
        self.w.into_vec()
    }

    pub fn encoding(&self) -> EncodingVersion {
        self.top().encoding
    }

    pub fn format(&self) -> FormatType {
        self.top().format
    }

    fn top(&self) -> &WriteEncaps {
        self.nested.last().unwrap_or(&self.base)
    }

    fn top_mut(&mut self) -> &mut WriteEncaps {
        match self.nested.last_mut() {
            Some(encaps) => encaps,
            None => &mut self.base,
        }
    }

    fn is_legacy(&self) -> bool {
        matches!(self.top().encoder, Encoder::Legacy(_))
    }

    // ------------------------------------------------------------ primitives

    pub fn write_bool(&mut self, v: bool) {
        self.w.u8(v as u8);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.w.u8(v);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.w.i16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.w.i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.w.i64(v);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.w.f32(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.w.f64(v);
    }

    pub fn write_size(&mut self, v: usize) {
        tag::write_size(&mut self.w, v);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_size(s.len());
        self.w.utf8(s);
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.w.buf(bytes);
    }

    pub fn write_byte_seq(&mut self, bytes: &[u8]) {
        self.write_size(bytes.len());
        self.w.buf(bytes);
    }

    pub fn write_string_seq<S: AsRef<str>>(&mut self, items: &[S]) {
        self.write_size(items.len());
        for s in items {
            self.write_string(s.as_ref());
        }
    }

    pub fn write_seq<T>(
        &mut self,
        items: &[T],
        mut write: impl FnMut(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        self.write_size(items.len());
        for item in items {
            write(self, item)?;
        }
        Ok(())
    }

    pub fn write_dict<'a, K: 'a, V: 'a, I>(
        &mut self,
        entries: I,
        mut write_key: impl FnMut(&mut Self, &K) -> Result<()>,
        mut write_value: impl FnMut(&mut Self, &V) -> Result<()>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        I::IntoIter: ExactSizeIterator,
    {
        let entries = entries.into_iter();
        self.write_size(entries.len());
        for (k, v) in entries {
            write_key(self, k)?;
            write_value(self, v)?;
        }
        Ok(())
    }

    /// Reserves a 4-byte length and returns its position for
    /// [`end_size`](Self::end_size).
    pub fn start_size(&mut self) -> usize {
        let pos = self.w.pos();
        self.w.i32(0);
        pos
    }

    /// Back-patches the length reserved at `pos` with the number of bytes
    /// written since.
    pub fn end_size(&mut self, pos: usize) -> Result<()> {
        let len = self
            .w
            .pos()
            .checked_sub(pos)
            .and_then(|n| n.checked_sub(4))
            .and_then(|n| i32::try_from(n).ok())
            .ok_or(BufferError::Overflow)?;
        self.w.rewrite_i32_at(pos, len)?;
        Ok(())
    }

    // ------------------------------------------------------- encapsulations

    /// Opens a nested encapsulation. `format` defaults to the configured one.
    pub fn start_encapsulation(
        &mut self,
        encoding: EncodingVersion,
        format: Option<FormatType>,
    ) -> Result<()> {
        encoding.check_supported()?;
        let format = format.unwrap_or(self.config.default_format);
        let start = self.w.pos();
        self.nested.push(WriteEncaps::new(start, encoding, format));
        self.w.i32(0);
        self.w.u8(encoding.major);
        self.w.u8(encoding.minor);
        Ok(())
    }

    /// Closes the innermost encapsulation, back-patching its size.
    pub fn end_encapsulation(&mut self) -> Result<()> {
        let encaps = self
            .nested
            .pop()
            .ok_or(MarshalError::EncapsulationStack("no open encapsulation"))?;
        let size = self.w.pos() - encaps.start;
        self.w.rewrite_i32_at(encaps.start, size as i32)?;
        Ok(())
    }

    pub fn write_empty_encapsulation(&mut self, encoding: EncodingVersion) -> Result<()> {
        encoding.check_supported()?;
        self.w.i32(6);
        self.w.u8(encoding.major);
        self.w.u8(encoding.minor);
        Ok(())
    }

    /// Copies an already encoded encapsulation, header included.
    pub fn write_encapsulation(&mut self, raw: &[u8]) -> Result<()> {
        if raw.len() < 6 {
            return Err(MarshalError::EncapsulationSize(raw.len() as i32));
        }
        self.w.buf(raw);
        Ok(())
    }

    // ------------------------------------------------------- tagged members

    /// Writes a tagged member header. Returns `false` (writing nothing) when
    /// the active encoding has no tagged members; the caller must then skip
    /// the value too.
    pub fn write_tagged(&mut self, tag: i32, format: TagFormat) -> Result<bool> {
        if self.is_legacy() {
            return Ok(false);
        }
        tag::write_tag_header(&mut self.w, tag, format);
        self.mark_optional_members();
        Ok(true)
    }

    pub fn write_tagged_bool(&mut self, tag: i32, v: Option<bool>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::F1)? {
                self.write_bool(v);
            }
        }
        Ok(())
    }

    pub fn write_tagged_u8(&mut self, tag: i32, v: Option<u8>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::F1)? {
                self.write_u8(v);
            }
        }
        Ok(())
    }

    pub fn write_tagged_i16(&mut self, tag: i32, v: Option<i16>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::F2)? {
                self.write_i16(v);
            }
        }
        Ok(())
    }

    pub fn write_tagged_i32(&mut self, tag: i32, v: Option<i32>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::F4)? {
                self.write_i32(v);
            }
        }
        Ok(())
    }

    pub fn write_tagged_i64(&mut self, tag: i32, v: Option<i64>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::F8)? {
                self.write_i64(v);
            }
        }
        Ok(())
    }

    pub fn write_tagged_f64(&mut self, tag: i32, v: Option<f64>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::F8)? {
                self.write_f64(v);
            }
        }
        Ok(())
    }

    pub fn write_tagged_size(&mut self, tag: i32, v: Option<usize>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::Size)? {
                self.write_size(v);
            }
        }
        Ok(())
    }

    pub fn write_tagged_string(&mut self, tag: i32, v: Option<&str>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::VSize)? {
                self.write_string(v);
            }
        }
        Ok(())
    }

    pub fn write_tagged_byte_seq(&mut self, tag: i32, v: Option<&[u8]>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::VSize)? {
                self.write_byte_seq(v);
            }
        }
        Ok(())
    }

    /// Variable-size elements go behind a 4-byte length so readers that do
    /// not know the tag can skip them.
    pub fn write_tagged_string_seq<S: AsRef<str>>(&mut self, tag: i32, v: Option<&[S]>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::FSize)? {
                let pos = self.start_size();
                self.write_string_seq(v);
                self.end_size(pos)?;
            }
        }
        Ok(())
    }

    pub fn write_tagged_value(&mut self, tag: i32, v: Option<&ValuePtr>) -> Result<()> {
        if let Some(v) = v {
            if self.write_tagged(tag, TagFormat::Class)? {
                self.write_value(Some(v))?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------ instances

    /// Writes a class reference; `None` is the null reference.
    pub fn write_value(&mut self, v: Option<&ValuePtr>) -> Result<()> {
        if self.is_legacy() {
            self.write_value_legacy(v)
        } else {
            self.write_value_current(v)
        }
    }

    /// Writes the instances the legacy encoding defers to the end of the
    /// enclosing value. A no-op for the current encoding.
    pub fn write_pending_values(&mut self) -> Result<()> {
        if self.is_legacy() {
            self.write_pending_values_legacy()
        } else {
            Ok(())
        }
    }

    pub fn write_exception(&mut self, ex: &dyn UserException) -> Result<()> {
        if self.is_legacy() {
            self.write_exception_legacy(ex)
        } else {
            self.write_exception_current(ex)
        }
    }

    /// Opens the slice for one level of the instance being written.
    ///
    /// `compact_id` is -1 unless the type has a numeric id; `last` marks the
    /// least derived slice.
    pub fn start_slice(&mut self, type_id: &str, compact_id: i32, last: bool) -> Result<()> {
        if self.is_legacy() {
            self.start_slice_legacy(type_id)
        } else {
            self.start_slice_current(type_id, compact_id, last)
        }
    }

    pub fn end_slice(&mut self) -> Result<()> {
        if self.is_legacy() {
            self.end_slice_legacy()
        } else {
            self.end_slice_current()
        }
    }

    fn mark_optional_members(&mut self) {
        if let Encoder::Current(e) = &mut self.top_mut().encoder {
            e.add_slice_flags(SliceFlags::HAS_OPTIONAL_MEMBERS);
        }
    }

    fn pre_marshal(v: &ValuePtr) {
        // Already being written further up the stack when borrowed.
        if let Ok(mut v) = v.try_borrow_mut() {
            v.pre_marshal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{ENCODING_1_0, ENCODING_1_1};

    #[test]
    fn encapsulation_size_is_back_patched() {
        let mut out = OutputStream::new();
        out.start_encapsulation(ENCODING_1_1, None).unwrap();
        out.write_i32(-1);
        out.end_encapsulation().unwrap();
        assert_eq!(out.finished(), vec![10, 0, 0, 0, 1, 1, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn nested_encapsulations_use_their_own_encoding() {
        let mut out = OutputStream::new();
        out.start_encapsulation(ENCODING_1_1, None).unwrap();
        out.start_encapsulation(ENCODING_1_0, None).unwrap();
        assert_eq!(out.encoding(), ENCODING_1_0);
        // tagged members do not exist in 1.0
        assert!(!out.write_tagged(1, TagFormat::F4).unwrap());
        out.end_encapsulation().unwrap();
        assert_eq!(out.encoding(), ENCODING_1_1);
        assert!(out.write_tagged(1, TagFormat::F4).unwrap());
        out.write_i32(0);
        out.end_encapsulation().unwrap();
        assert!(out.end_encapsulation().is_err());
    }

    #[test]
    fn empty_encapsulation_is_six_bytes() {
        let mut out = OutputStream::new();
        out.write_empty_encapsulation(ENCODING_1_0).unwrap();
        assert_eq!(out.finished(), vec![6, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn raw_encapsulation_needs_a_header() {
        let mut out = OutputStream::new();
        assert_eq!(
            out.write_encapsulation(&[1, 0, 0]),
            Err(MarshalError::EncapsulationSize(3))
        );
    }

    #[test]
    fn fsize_length_excludes_itself() {
        let mut out = OutputStream::new();
        out.write_tagged_string_seq(2, Some(&["ab"][..])).unwrap();
        // header, i32 length 4, count 1, len 2, "ab"
        assert_eq!(
            out.finished(),
            vec![(2 << 3) | 6, 4, 0, 0, 0, 1, 2, b'a', b'b']
        );
    }

    #[test]
    fn end_size_rejects_a_position_past_the_end() {
        let mut out = OutputStream::new();
        out.write_u8(1);
        assert_eq!(
            out.end_size(1),
            Err(MarshalError::OutOfBounds(BufferError::Overflow))
        );
        let pos = out.start_size();
        assert_eq!(out.end_size(pos), Ok(()));
    }

    #[test]
    fn type_id_table_starts_at_one() {
        let mut t = TypeIdTable::default();
        assert_eq!(t.register("::A"), None);
        assert_eq!(t.register("::B"), None);
        assert_eq!(t.register("::A"), Some(1));
        assert_eq!(t.register("::B"), Some(2));
    }
}
