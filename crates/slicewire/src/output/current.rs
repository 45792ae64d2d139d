//! Encoder for the 1.1 encoding.

use std::collections::HashMap;

use super::{Encoder, OutputStream, TypeIdTable};
use crate::error::{MarshalError, Result};
use crate::slice::{SliceFlags, SliceType};
use crate::tag::TAGGED_END_MARKER;
use crate::value::{InstanceKey, SlicedData, UserException, ValuePtr};
use crate::version::FormatType;

struct WriteFrame {
    slice_type: SliceType,
    first_slice: bool,
    wrote_slice: bool,
    slice_flags: SliceFlags,
    slice_flags_pos: usize,
    /// Position just after the slice header (and size, when present).
    write_slice: usize,
    indirection_table: Vec<ValuePtr>,
    indirection_map: HashMap<InstanceKey, usize>,
}

impl WriteFrame {
    fn new(slice_type: SliceType) -> Self {
        Self {
            slice_type,
            first_slice: true,
            wrote_slice: false,
            slice_flags: SliceFlags::empty(),
            slice_flags_pos: 0,
            write_slice: 0,
            indirection_table: Vec::new(),
            indirection_map: HashMap::new(),
        }
    }

    /// Position of `v` in the indirection table, adding it if needed. 0 is
    /// null, so positions start at 1.
    fn indirection_index(&mut self, v: &ValuePtr) -> usize {
        let key = InstanceKey(v.clone());
        if let Some(&index) = self.indirection_map.get(&key) {
            return index;
        }
        self.indirection_table.push(v.clone());
        let index = self.indirection_table.len();
        self.indirection_map.insert(key, index);
        index
    }
}

pub(crate) struct CurrentEncoder {
    frames: Vec<WriteFrame>,
    value_id_index: i32,
    marshaled: HashMap<InstanceKey, i32>,
    type_ids: TypeIdTable,
}

impl CurrentEncoder {
    pub(crate) fn new() -> Self {
        Self {
            frames: Vec::new(),
            value_id_index: 1,
            marshaled: HashMap::new(),
            type_ids: TypeIdTable::default(),
        }
    }

    pub(crate) fn add_slice_flags(&mut self, flags: SliceFlags) {
        if let Some(frame) = self.frames.last_mut() {
            frame.slice_flags |= flags;
        }
    }
}

impl OutputStream {
    fn current_enc_mut(&mut self) -> Result<&mut CurrentEncoder> {
        match &mut self.top_mut().encoder {
            Encoder::Current(e) => Ok(e),
            Encoder::Legacy(_) => Err(MarshalError::EncapsulationStack(
                "1.1 operation on a 1.0 encapsulation",
            )),
        }
    }

    fn write_frame_mut(&mut self) -> Result<&mut WriteFrame> {
        self.current_enc_mut()?
            .frames
            .last_mut()
            .ok_or(MarshalError::NoActiveSlice)
    }

    pub(super) fn write_value_current(&mut self, v: Option<&ValuePtr>) -> Result<()> {
        let Some(v) = v else {
            self.write_size(0);
            return Ok(());
        };
        let sliced = self.top().format == FormatType::Sliced;
        // Inside a sliced-format slice, references go through the slice's
        // indirection table.
        let indexed = match self.write_frame_mut() {
            Ok(frame) if sliced => Some(frame.indirection_index(v)),
            _ => None,
        };
        if let Some(index) = indexed {
            self.write_size(index);
            return Ok(());
        }
        self.write_instance_current(v)
    }

    /// Writes `v` inline on first sight, by id afterwards.
    fn write_instance_current(&mut self, v: &ValuePtr) -> Result<()> {
        let key = InstanceKey(v.clone());
        let e = self.current_enc_mut()?;
        if let Some(&id) = e.marshaled.get(&key) {
            self.write_size(id as usize);
            return Ok(());
        }
        e.value_id_index += 1;
        let id = e.value_id_index;
        e.marshaled.insert(key, id);

        Self::pre_marshal(v);
        self.write_size(1);

        let sliced_data = v.borrow().sliced_data();
        self.current_enc_mut()?
            .frames
            .push(WriteFrame::new(SliceType::Value));
        if let Some(data) = sliced_data {
            self.write_sliced_data(&data)?;
        }
        v.borrow().write_impl(self)?;
        let frame = self
            .current_enc_mut()?
            .frames
            .pop()
            .ok_or(MarshalError::NoActiveSlice)?;
        if !frame.wrote_slice {
            return Err(MarshalError::EmptyInstance(
                v.borrow().wire_type_id().to_owned(),
            ));
        }
        Ok(())
    }

    /// Re-emits preserved slices. The compact format drops them, slicing the
    /// instance down to its most derived known type.
    fn write_sliced_data(&mut self, data: &SlicedData) -> Result<()> {
        if self.top().format != FormatType::Sliced {
            return Ok(());
        }
        for info in &data.slices {
            self.start_slice_current(&info.type_id, info.compact_id, info.is_last_slice)?;
            self.write_blob(&info.bytes);
            let instances = info
                .instances
                .borrow()
                .iter()
                .map(|v| {
                    v.clone().ok_or(MarshalError::IndirectionTable(
                        "preserved slice references an unresolved instance",
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            let frame = self.write_frame_mut()?;
            if info.has_optional_members {
                frame.slice_flags |= SliceFlags::HAS_OPTIONAL_MEMBERS;
            }
            frame.indirection_table.extend(instances);
            self.end_slice_current()?;
        }
        Ok(())
    }

    pub(super) fn write_exception_current(&mut self, ex: &dyn UserException) -> Result<()> {
        self.current_enc_mut()?
            .frames
            .push(WriteFrame::new(SliceType::Exception));
        ex.write_impl(self)?;
        self.current_enc_mut()?.frames.pop();
        Ok(())
    }

    pub(super) fn start_slice_current(
        &mut self,
        type_id: &str,
        compact_id: i32,
        last: bool,
    ) -> Result<()> {
        let sliced = self.top().format == FormatType::Sliced;
        let flags_pos = self.pos();
        let (slice_type, first_slice) = {
            let frame = self.write_frame_mut()?;
            (frame.slice_type, frame.first_slice)
        };

        let mut flags = SliceFlags::empty();
        // Exceptions are always skippable.
        if sliced || slice_type == SliceType::Exception {
            flags |= SliceFlags::HAS_SLICE_SIZE;
        }
        if last {
            flags |= SliceFlags::IS_LAST_SLICE;
        }
        self.write_u8(0);

        if slice_type == SliceType::Value {
            if sliced || first_slice {
                if compact_id >= 0 {
                    flags |= SliceFlags::HAS_TYPE_ID_COMPACT;
                    self.write_size(compact_id as usize);
                } else {
                    match self.current_enc_mut()?.type_ids.register(type_id) {
                        Some(index) => {
                            flags |= SliceFlags::HAS_TYPE_ID_INDEX;
                            self.write_size(index);
                        }
                        None => {
                            flags |= SliceFlags::HAS_TYPE_ID_STRING;
                            self.write_string(type_id);
                        }
                    }
                }
            }
        } else {
            self.write_string(type_id);
        }

        if flags.contains(SliceFlags::HAS_SLICE_SIZE) {
            self.write_i32(0);
        }
        let write_slice = self.pos();
        let frame = self.write_frame_mut()?;
        frame.slice_flags = flags;
        frame.slice_flags_pos = flags_pos;
        frame.write_slice = write_slice;
        frame.first_slice = false;
        frame.wrote_slice = true;
        Ok(())
    }

    pub(super) fn end_slice_current(&mut self) -> Result<()> {
        let (mut flags, flags_pos, write_slice) = {
            let frame = self.write_frame_mut()?;
            (frame.slice_flags, frame.slice_flags_pos, frame.write_slice)
        };

        // Tagged members sit before the indirection table and count
        // towards the slice size.
        if flags.contains(SliceFlags::HAS_OPTIONAL_MEMBERS) {
            self.write_u8(TAGGED_END_MARKER);
        }
        if flags.contains(SliceFlags::HAS_SLICE_SIZE) {
            let size = self.pos() - write_slice + 4;
            self.w.rewrite_i32_at(write_slice - 4, size as i32)?;
        }

        let table = {
            let frame = self.write_frame_mut()?;
            frame.indirection_map.clear();
            std::mem::take(&mut frame.indirection_table)
        };
        if !table.is_empty() {
            flags |= SliceFlags::HAS_INDIRECTION_TABLE;
            self.write_size(table.len());
            for v in &table {
                self.write_instance_current(v)?;
            }
        }

        self.write_frame_mut()?.slice_flags = flags;
        self.w.rewrite_u8_at(flags_pos, flags.bits())?;
        Ok(())
    }
}
