//! Size encoding and tagged-member control bytes.
//!
//! A size is one byte when it is at most 254; otherwise the marker byte
//! `0xFF` is followed by a 4-byte little-endian integer.
//!
//! A tagged member is preceded by a control byte whose low three bits are a
//! [`TagFormat`] and whose high five bits hold the tag. Tags of 30 and above
//! store 30 in the control byte and follow it with the real tag as a size.
//! The byte `0xFF` terminates a run of tagged members.

use slicewire_buffers::{Reader, Writer};

use crate::error::{MarshalError, Result};

/// Terminates the tagged members of a slice.
pub const TAGGED_END_MARKER: u8 = 0xFF;

const SIZE_MARKER: u8 = 0xFF;
const INLINE_TAG_LIMIT: i32 = 30;

/// Wire format of a tagged member, stored in the low three bits of its
/// control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagFormat {
    F1 = 0,
    F2 = 1,
    F4 = 2,
    F8 = 3,
    /// A variable-length count (see [`write_size`]).
    Size = 4,
    /// A size-prefixed blob.
    VSize = 5,
    /// A blob prefixed with a 4-byte length.
    FSize = 6,
    /// A nested class instance.
    Class = 7,
}

impl TagFormat {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => TagFormat::F1,
            1 => TagFormat::F2,
            2 => TagFormat::F4,
            3 => TagFormat::F8,
            4 => TagFormat::Size,
            5 => TagFormat::VSize,
            6 => TagFormat::FSize,
            _ => TagFormat::Class,
        }
    }

    pub fn is_fixed_width(&self) -> bool {
        matches!(
            self,
            TagFormat::F1 | TagFormat::F2 | TagFormat::F4 | TagFormat::F8
        )
    }

    /// Byte width of the fixed-width formats.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            TagFormat::F1 => Some(1),
            TagFormat::F2 => Some(2),
            TagFormat::F4 => Some(4),
            TagFormat::F8 => Some(8),
            _ => None,
        }
    }
}

/// Writes a non-negative size.
///
/// The wire holds at most `i32::MAX`. Larger values saturate to it, so the
/// peer sees a length longer than the data and fails the read.
pub fn write_size(w: &mut Writer, v: usize) {
    if v > 254 {
        w.u8(SIZE_MARKER);
        w.i32(i32::try_from(v).unwrap_or(i32::MAX));
    } else {
        w.u8(v as u8);
    }
}

/// Reads a size written by [`write_size`].
pub fn read_size(r: &mut Reader<'_>) -> Result<usize> {
    let b = r.u8()?;
    if b != SIZE_MARKER {
        return Ok(b as usize);
    }
    let v = r.i32()?;
    if v < 0 {
        return Err(MarshalError::NegativeSize(v));
    }
    Ok(v as usize)
}

/// Writes the control byte (and extended tag, if any) of a tagged member.
pub fn write_tag_header(w: &mut Writer, tag: i32, format: TagFormat) {
    let bits = format as u8;
    if tag < INLINE_TAG_LIMIT {
        w.u8(bits | ((tag as u8) << 3));
    } else {
        w.u8(bits | ((INLINE_TAG_LIMIT as u8) << 3));
        write_size(w, tag as usize);
    }
}

/// Reads a tagged member header. Returns `None` when the next byte is the
/// end marker; the marker itself is consumed.
pub fn read_tag_header(r: &mut Reader<'_>) -> Result<Option<(i32, TagFormat)>> {
    let v = r.u8()?;
    if v == TAGGED_END_MARKER {
        return Ok(None);
    }
    let format = TagFormat::from_bits(v);
    let mut tag = (v >> 3) as i32;
    if tag == INLINE_TAG_LIMIT {
        tag = read_size(r)? as i32;
    }
    Ok(Some((tag, format)))
}
