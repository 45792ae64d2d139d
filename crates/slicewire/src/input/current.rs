//! Decoder for the 1.1 encoding.
//!
//! Instances are written inline the first time they are referenced and by
//! id afterwards. Inside a slice encoded with the sliced format, references
//! instead index the slice's indirection table, which is read when the
//! slice ends.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use super::{Decoder, InputStream};
use crate::error::{MarshalError, Result};
use crate::slice::{SliceFlags, SliceType};
use crate::value::{
    value_ptr, Patcher, SliceInfo, SlicedData, UnknownSlicedValue, UserException, ValuePtr,
};

/// A reference read inside a slice, waiting for the slice's table.
struct IndirectPatch {
    index: usize,
    patcher: Option<Patcher>,
}

/// Decoding state of one instance or exception in progress.
struct InstanceFrame {
    slice_type: SliceType,
    skip_first_slice: bool,
    slice_flags: SliceFlags,
    slice_size: i32,
    type_id: String,
    compact_id: i32,
    indirect_patches: Vec<IndirectPatch>,
    // Skipped slices and the instance ids of their indirection tables.
    slices: Vec<SliceInfo>,
    indirection_tables: Vec<Vec<i32>>,
}

impl InstanceFrame {
    fn new(slice_type: SliceType) -> Self {
        Self {
            slice_type,
            skip_first_slice: false,
            slice_flags: SliceFlags::empty(),
            slice_size: 0,
            type_id: String::new(),
            compact_id: -1,
            indirect_patches: Vec::new(),
            slices: Vec::new(),
            indirection_tables: Vec::new(),
        }
    }
}

pub(crate) struct CurrentDecoder {
    frames: Vec<InstanceFrame>,
    value_id_index: i32,
    type_ids: Vec<String>,
}

impl CurrentDecoder {
    pub(crate) fn new() -> Self {
        Self {
            frames: Vec::new(),
            // 0 is null and 1 announces an inline instance.
            value_id_index: 1,
            type_ids: Vec::new(),
        }
    }
}

impl InputStream {
    fn current_mut(&mut self) -> Result<&mut CurrentDecoder> {
        match &mut self.top_mut().decoder {
            Decoder::Current(d) => Ok(d),
            Decoder::Legacy(_) => Err(MarshalError::EncapsulationStack(
                "1.1 operation on a 1.0 encapsulation",
            )),
        }
    }

    fn frame_mut(&mut self) -> Result<&mut InstanceFrame> {
        self.current_mut()?
            .frames
            .last_mut()
            .ok_or(MarshalError::NoActiveSlice)
    }

    fn has_frame(&self) -> bool {
        match &self.top().decoder {
            Decoder::Current(d) => !d.frames.is_empty(),
            Decoder::Legacy(_) => false,
        }
    }

    /// Flags of the slice being read, if an instance is in progress.
    pub(super) fn current_slice_flags(&self) -> Option<SliceFlags> {
        match &self.top().decoder {
            Decoder::Current(d) => d.frames.last().map(|f| f.slice_flags),
            Decoder::Legacy(_) => None,
        }
    }

    pub(super) fn read_value_current(&mut self, patcher: Option<Patcher>) -> Result<()> {
        let index = self.read_size()? as i32;
        if index == 0 {
            if let Some(patcher) = patcher {
                patcher(None);
            }
            return Ok(());
        }
        if let Some(flags) = self.current_slice_flags() {
            if flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
                let frame = self.frame_mut()?;
                frame.indirect_patches.push(IndirectPatch {
                    index: (index - 1) as usize,
                    patcher,
                });
                return Ok(());
            }
        }
        self.read_instance_current(index, patcher).map(|_| ())
    }

    /// Reads the instance announced by `index` and returns its id.
    fn read_instance_current(&mut self, index: i32, patcher: Option<Patcher>) -> Result<i32> {
        if index <= 0 {
            return Err(MarshalError::InvalidInstanceId(index));
        }
        if index > 1 {
            self.add_patch_entry(index, patcher);
            return Ok(index);
        }

        let id = {
            let d = self.current_mut()?;
            d.frames.push(InstanceFrame::new(SliceType::Value));
            d.value_id_index += 1;
            d.value_id_index
        };
        self.read_slice_header_current()?;

        let mut most_derived = None;
        let value = loop {
            let created = self.instantiate_current()?;
            let frame = self.frame_mut()?;
            let type_id = if frame.type_id.is_empty() && frame.compact_id >= 0 {
                frame.compact_id.to_string()
            } else {
                frame.type_id.clone()
            };
            let derived = most_derived.get_or_insert_with(|| type_id.clone()).clone();
            if let Some(v) = created {
                break v;
            }
            if !self.config.slice_values {
                return Err(MarshalError::NoValueFactory {
                    type_id,
                    reason: "value slicing is disabled",
                });
            }
            self.skip_slice_current()?;
            if self.frame_mut()?.slice_flags.contains(SliceFlags::IS_LAST_SLICE) {
                debug!(type_id = %derived, "no slice known, keeping opaque instance");
                break value_ptr(UnknownSlicedValue::new(derived));
            }
            self.read_slice_header_current()?;
        };

        let prev = self.resolver_mut().enter_instance(id)?;
        self.unmarshal(id, value.clone())?;
        self.resolver_mut().leave_instance(prev);

        if !self.has_frame() {
            self.top().resolver.check_resolved()?;
        }
        if let Some(patcher) = patcher {
            patcher(Some(value));
        }
        Ok(id)
    }

    /// Asks the registry for an instance of the slice just read.
    fn instantiate_current(&mut self) -> Result<Option<ValuePtr>> {
        let frame = self.frame_mut()?;
        let compact_id = frame.compact_id;
        if compact_id < 0 {
            let type_id = frame.type_id.clone();
            if type_id.is_empty() {
                return Ok(None);
            }
            return Ok(self.registry.create_value(&type_id));
        }

        if let Some(type_id) = self.registry.resolve_compact_id(compact_id) {
            self.frame_mut()?.type_id = type_id.clone();
            if let Some(v) = self.registry.create_value(&type_id) {
                return Ok(Some(v));
            }
        }
        Ok(self
            .registry
            .lookup_compact(compact_id)
            .and_then(|factory| factory(&compact_id.to_string())))
    }

    pub(super) fn read_exception_current(&mut self) -> Result<Box<dyn UserException>> {
        self.current_mut()?
            .frames
            .push(InstanceFrame::new(SliceType::Exception));
        self.read_slice_header_current()?;
        let most_derived = self.frame_mut()?.type_id.clone();

        loop {
            let type_id = self.frame_mut()?.type_id.clone();
            if let Some(factory) = self.registry.lookup_exception(&type_id) {
                let mut ex = factory();
                self.frame_mut()?.skip_first_slice = true;
                ex.read_impl(self)?;
                self.current_mut()?.frames.pop();
                if !self.has_frame() {
                    self.top().resolver.check_resolved()?;
                }
                return Ok(ex);
            }
            self.skip_slice_current()?;
            if self.frame_mut()?.slice_flags.contains(SliceFlags::IS_LAST_SLICE) {
                return Err(MarshalError::UnknownUserException(most_derived));
            }
            self.read_slice_header_current()?;
        }
    }

    pub(super) fn start_value_current(&mut self) -> Result<()> {
        self.frame_mut()?.skip_first_slice = true;
        Ok(())
    }

    /// Pops the instance frame, turning skipped slices into [`SlicedData`]
    /// when the instance preserves them.
    pub(super) fn end_value_current(&mut self, preserve: bool) -> Result<Option<Rc<SlicedData>>> {
        let frame = self
            .current_mut()?
            .frames
            .pop()
            .ok_or(MarshalError::NoActiveSlice)?;
        if !preserve || frame.slices.is_empty() {
            return Ok(None);
        }
        for (info, table) in frame.slices.iter().zip(&frame.indirection_tables) {
            *info.instances.borrow_mut() = vec![None; table.len()];
            for (j, &id) in table.iter().enumerate() {
                let instances = info.instances.clone();
                self.add_patch_entry(
                    id,
                    Some(Box::new(move |v: Option<ValuePtr>| {
                        if let Some(slot) = instances.borrow_mut().get_mut(j) {
                            *slot = v;
                        }
                    })),
                );
            }
        }
        Ok(Some(Rc::new(SlicedData {
            slices: frame.slices,
        })))
    }

    pub(super) fn start_slice_current(&mut self) -> Result<String> {
        let frame = self.frame_mut()?;
        if frame.skip_first_slice {
            frame.skip_first_slice = false;
            return Ok(frame.type_id.clone());
        }
        self.read_slice_header_current()?;
        Ok(self.frame_mut()?.type_id.clone())
    }

    fn read_slice_header_current(&mut self) -> Result<()> {
        let flags = SliceFlags::from_bits_retain(self.read_u8()?);
        let slice_type = self.frame_mut()?.slice_type;
        let (type_id, compact_id) = if slice_type == SliceType::Value {
            if flags.contains(SliceFlags::HAS_TYPE_ID_COMPACT) {
                (String::new(), self.read_size()? as i32)
            } else if flags.intersects(SliceFlags::HAS_TYPE_ID_COMPACT) {
                let is_index = flags.contains(SliceFlags::HAS_TYPE_ID_INDEX);
                (self.read_type_id_current(is_index)?, -1)
            } else {
                // Compact format: only the most derived slice names its type.
                (String::new(), -1)
            }
        } else {
            (self.read_string()?, -1)
        };
        let slice_size = if flags.contains(SliceFlags::HAS_SLICE_SIZE) {
            let size = self.read_i32()?;
            if size < 4 {
                return Err(MarshalError::InvalidSliceSize(size));
            }
            size
        } else {
            0
        };
        let frame = self.frame_mut()?;
        frame.slice_flags = flags;
        frame.type_id = type_id;
        frame.compact_id = compact_id;
        frame.slice_size = slice_size;
        Ok(())
    }

    fn read_type_id_current(&mut self, is_index: bool) -> Result<String> {
        if is_index {
            let index = self.read_size()?;
            let d = self.current_mut()?;
            return index
                .checked_sub(1)
                .and_then(|i| d.type_ids.get(i))
                .cloned()
                .ok_or(MarshalError::InvalidTypeIdIndex(index));
        }
        let type_id = self.read_string()?;
        self.current_mut()?.type_ids.push(type_id.clone());
        Ok(type_id)
    }

    pub(super) fn end_slice_current(&mut self) -> Result<()> {
        let flags = self.frame_mut()?.slice_flags;
        if flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS) {
            self.skip_tagged_members()?;
        }
        if !flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
            return Ok(());
        }

        let table = self.read_indirection_table()?;
        if table.is_empty() {
            return Err(MarshalError::IndirectionTable("empty indirection table"));
        }
        let patches = std::mem::take(&mut self.frame_mut()?.indirect_patches);
        // Unread tagged members may hold the only references.
        if patches.is_empty() && !flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS) {
            return Err(MarshalError::IndirectionTable(
                "no references to indirection table",
            ));
        }
        for p in patches {
            let id = *table
                .get(p.index)
                .ok_or(MarshalError::IndirectionTable("indirection index out of range"))?;
            self.add_patch_entry(id, p.patcher);
        }
        Ok(())
    }

    fn read_indirection_table(&mut self) -> Result<Vec<i32>> {
        let n = self.read_and_check_seq_size(1)?;
        let mut table = Vec::with_capacity(n);
        for _ in 0..n {
            let index = self.read_size()? as i32;
            table.push(self.read_instance_current(index, None)?);
        }
        Ok(table)
    }

    /// Skips the slice just started, keeping its bytes and indirection table
    /// in the frame so the instance can be re-marshaled unchanged.
    pub(super) fn skip_slice_current(&mut self) -> Result<()> {
        let frame = self.frame_mut()?;
        let flags = frame.slice_flags;
        let slice_type = frame.slice_type;
        let slice_size = frame.slice_size;
        let type_id = frame.type_id.clone();
        let compact_id = frame.compact_id;
        debug!(%type_id, compact_id, slice_size, "skipping slice");

        let start = self.x;
        if flags.contains(SliceFlags::HAS_SLICE_SIZE) {
            self.skip((slice_size - 4) as usize)?;
        } else if slice_type == SliceType::Value {
            // Without a size the required members cannot be found, last
            // slice or not.
            return Err(MarshalError::NoValueFactory {
                type_id: if type_id.is_empty() {
                    compact_id.to_string()
                } else {
                    type_id
                },
                reason: "compact format prevents slicing",
            });
        } else {
            return Err(MarshalError::UnknownUserException(type_id));
        }

        let has_optional = flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS);
        // The end marker is re-written when the slice is re-emitted.
        let end = if has_optional && self.x > start {
            self.x - 1
        } else {
            self.x
        };
        let bytes = self.data[start..end].to_vec();

        let table = if flags.contains(SliceFlags::HAS_INDIRECTION_TABLE) {
            self.read_indirection_table()?
        } else {
            Vec::new()
        };

        let info = SliceInfo {
            type_id,
            compact_id,
            bytes,
            instances: Rc::new(RefCell::new(Vec::new())),
            has_optional_members: has_optional,
            is_last_slice: flags.contains(SliceFlags::IS_LAST_SLICE),
        };
        let frame = self.frame_mut()?;
        frame.slices.push(info);
        frame.indirection_tables.push(table);
        Ok(())
    }
}
