//! Encoder for the 1.0 encoding.

use std::collections::HashMap;

use super::{Encoder, OutputStream, TypeIdTable};
use crate::error::{MarshalError, Result};
use crate::slice::SliceType;
use crate::value::{InstanceKey, UserException, ValuePtr, ROOT_TYPE_ID};

#[derive(Default)]
pub(crate) struct LegacyEncoder {
    slice_type: SliceType,
    /// Position just after the size of the open slice.
    write_slice: usize,
    value_id_index: i32,
    marshaled: HashMap<InstanceKey, i32>,
    to_be_marshaled: HashMap<InstanceKey, i32>,
    // Same entries as `to_be_marshaled`, in id order.
    pending: Vec<(ValuePtr, i32)>,
    type_ids: TypeIdTable,
}

impl LegacyEncoder {
    /// Returns the id of `v`, queueing it for the next batch on first sight.
    fn register_value(&mut self, v: &ValuePtr) -> i32 {
        let key = InstanceKey(v.clone());
        if let Some(&id) = self.to_be_marshaled.get(&key) {
            return id;
        }
        if let Some(&id) = self.marshaled.get(&key) {
            return id;
        }
        self.value_id_index += 1;
        let id = self.value_id_index;
        self.to_be_marshaled.insert(key, id);
        self.pending.push((v.clone(), id));
        id
    }
}

impl OutputStream {
    fn legacy_enc_mut(&mut self) -> Result<&mut LegacyEncoder> {
        match &mut self.top_mut().encoder {
            Encoder::Legacy(e) => Ok(e),
            Encoder::Current(_) => Err(MarshalError::EncapsulationStack(
                "1.0 operation on a 1.1 encapsulation",
            )),
        }
    }

    pub(super) fn write_value_legacy(&mut self, v: Option<&ValuePtr>) -> Result<()> {
        let id = match v {
            Some(v) => self.legacy_enc_mut()?.register_value(v),
            None => 0,
        };
        self.write_i32(-id);
        Ok(())
    }

    /// Flushes queued instances in batches until writing one batch queues
    /// nothing new, then writes the empty terminating batch.
    pub(super) fn write_pending_values_legacy(&mut self) -> Result<()> {
        loop {
            let batch = {
                let e = self.legacy_enc_mut()?;
                let batch = std::mem::take(&mut e.pending);
                // Mark the batch as written before writing it so references
                // from inside the batch do not queue it again.
                for (v, id) in &batch {
                    let key = InstanceKey(v.clone());
                    e.to_be_marshaled.remove(&key);
                    e.marshaled.insert(key, *id);
                }
                batch
            };
            if batch.is_empty() {
                break;
            }
            self.write_size(batch.len());
            for (v, id) in batch {
                self.write_i32(id);
                Self::pre_marshal(&v);
                self.write_instance_legacy(&v)?;
            }
        }
        self.write_size(0);
        Ok(())
    }

    fn write_instance_legacy(&mut self, v: &ValuePtr) -> Result<()> {
        self.legacy_enc_mut()?.slice_type = SliceType::Value;
        v.borrow().write_impl(self)?;
        self.start_slice_legacy(ROOT_TYPE_ID)?;
        // empty facet map
        self.write_size(0);
        self.end_slice_legacy()?;
        self.legacy_enc_mut()?.slice_type = SliceType::None;
        Ok(())
    }

    pub(super) fn write_exception_legacy(&mut self, ex: &dyn UserException) -> Result<()> {
        let uses_classes = ex.uses_classes();
        self.write_bool(uses_classes);
        self.legacy_enc_mut()?.slice_type = SliceType::Exception;
        ex.write_impl(self)?;
        self.legacy_enc_mut()?.slice_type = SliceType::None;
        if uses_classes {
            self.write_pending_values_legacy()?;
        }
        Ok(())
    }

    pub(super) fn start_slice_legacy(&mut self, type_id: &str) -> Result<()> {
        match self.legacy_enc_mut()?.slice_type {
            SliceType::None => return Err(MarshalError::NoActiveSlice),
            SliceType::Value => match self.legacy_enc_mut()?.type_ids.register(type_id) {
                Some(index) => {
                    self.write_bool(true);
                    self.write_size(index);
                }
                None => {
                    self.write_bool(false);
                    self.write_string(type_id);
                }
            },
            SliceType::Exception => self.write_string(type_id),
        }
        self.write_i32(0);
        let pos = self.pos();
        self.legacy_enc_mut()?.write_slice = pos;
        Ok(())
    }

    pub(super) fn end_slice_legacy(&mut self) -> Result<()> {
        let write_slice = self.legacy_enc_mut()?.write_slice;
        let size = self.pos() - write_slice + 4;
        self.w.rewrite_i32_at(write_slice - 4, size as i32)?;
        Ok(())
    }
}
