//! Slice header vocabulary shared by encoders and decoders.

use bitflags::bitflags;

/// Kind of instance whose slices are being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SliceType {
    #[default]
    None,
    Value,
    Exception,
}

bitflags! {
    /// Flag byte leading every slice of the current encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SliceFlags: u8 {
        const HAS_TYPE_ID_STRING = 1 << 0;
        const HAS_TYPE_ID_INDEX = 1 << 1;
        /// Both type-id bits set: the type-id is a compact numeric id.
        const HAS_TYPE_ID_COMPACT = (1 << 0) | (1 << 1);
        const HAS_OPTIONAL_MEMBERS = 1 << 2;
        const HAS_INDIRECTION_TABLE = 1 << 3;
        const HAS_SLICE_SIZE = 1 << 4;
        const IS_LAST_SLICE = 1 << 5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_bit_pattern_takes_precedence() {
        let compact = SliceFlags::from_bits_retain(0b11);
        assert!(compact.contains(SliceFlags::HAS_TYPE_ID_COMPACT));
        let index = SliceFlags::HAS_TYPE_ID_INDEX;
        assert!(!index.contains(SliceFlags::HAS_TYPE_ID_COMPACT));
        assert!(index.intersects(SliceFlags::HAS_TYPE_ID_COMPACT));
    }

    #[test]
    fn flag_values_match_wire_layout() {
        assert_eq!(SliceFlags::HAS_OPTIONAL_MEMBERS.bits(), 0x04);
        assert_eq!(SliceFlags::HAS_INDIRECTION_TABLE.bits(), 0x08);
        assert_eq!(SliceFlags::HAS_SLICE_SIZE.bits(), 0x10);
        assert_eq!(SliceFlags::IS_LAST_SLICE.bits(), 0x20);
    }
}
