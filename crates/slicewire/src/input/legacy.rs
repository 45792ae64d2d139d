//! Decoder for the 1.0 encoding.
//!
//! References are negative instance ids written in place; the instances
//! themselves follow later in batches read by
//! [`InputStream::read_pending_values`]. Every slice carries a 4-byte size
//! so unknown slices can always be skipped, and objects end with an empty
//! root slice.

use tracing::debug;

use super::{Decoder, InputStream};
use crate::error::{MarshalError, Result};
use crate::slice::SliceType;
use crate::value::{Patcher, UserException, ROOT_TYPE_ID};

#[derive(Default)]
pub(crate) struct LegacyDecoder {
    slice_type: SliceType,
    skip_first_slice: bool,
    type_id: String,
    slice_size: i32,
    type_ids: Vec<String>,
}

impl InputStream {
    fn legacy_mut(&mut self) -> Result<&mut LegacyDecoder> {
        match &mut self.top_mut().decoder {
            Decoder::Legacy(d) => Ok(d),
            Decoder::Current(_) => Err(MarshalError::EncapsulationStack(
                "1.0 operation on a 1.1 encapsulation",
            )),
        }
    }

    pub(super) fn read_value_legacy(&mut self, patcher: Option<Patcher>) -> Result<()> {
        let index = self.read_i32()?;
        if index > 0 {
            return Err(MarshalError::InvalidInstanceId(index));
        }
        if index == 0 {
            if let Some(patcher) = patcher {
                patcher(None);
            }
            return Ok(());
        }
        self.add_patch_entry(-index, patcher);
        Ok(())
    }

    pub(super) fn read_pending_values_legacy(&mut self) -> Result<()> {
        loop {
            let n = self.read_size()?;
            if n == 0 {
                break;
            }
            for _ in 0..n {
                self.read_instance_legacy()?;
            }
        }
        self.top().resolver.check_resolved()
    }

    fn read_instance_legacy(&mut self) -> Result<()> {
        let id = self.read_i32()?;
        if id <= 0 {
            return Err(MarshalError::InvalidInstanceId(id));
        }
        {
            let d = self.legacy_mut()?;
            d.slice_type = SliceType::Value;
            d.skip_first_slice = false;
        }
        self.read_slice_header_legacy()?;
        let most_derived = self.legacy_mut()?.type_id.clone();

        let value = loop {
            let type_id = self.legacy_mut()?.type_id.clone();
            if type_id == ROOT_TYPE_ID {
                return Err(MarshalError::NoValueFactory {
                    type_id: most_derived,
                    reason: "no slice of the instance is known",
                });
            }
            if let Some(v) = self.registry.create_value(&type_id) {
                break v;
            }
            if !self.config.slice_values {
                return Err(MarshalError::NoValueFactory {
                    type_id,
                    reason: "value slicing is disabled",
                });
            }
            self.skip_slice_legacy()?;
            self.read_slice_header_legacy()?;
        };

        if self.resolver_mut().is_registered(id) {
            return Err(MarshalError::InvalidInstanceId(id));
        }
        let prev = self.resolver_mut().enter_instance(id)?;
        self.unmarshal(id, value)?;
        self.resolver_mut().leave_instance(prev);
        Ok(())
    }

    pub(super) fn read_exception_legacy(&mut self) -> Result<Box<dyn UserException>> {
        let uses_classes = self.read_bool()?;
        {
            let d = self.legacy_mut()?;
            d.slice_type = SliceType::Exception;
            d.skip_first_slice = false;
        }
        self.read_slice_header_legacy()?;
        let most_derived = self.legacy_mut()?.type_id.clone();

        loop {
            let type_id = self.legacy_mut()?.type_id.clone();
            if let Some(factory) = self.registry.lookup_exception(&type_id) {
                let mut ex = factory();
                self.legacy_mut()?.skip_first_slice = true;
                ex.read_impl(self)?;
                if uses_classes {
                    self.read_pending_values_legacy()?;
                }
                self.legacy_mut()?.slice_type = SliceType::None;
                return Ok(ex);
            }
            self.skip_slice_legacy()?;
            // The encoding has no last-slice marker for exceptions: running
            // out of bytes is how the chain ends.
            match self.read_slice_header_legacy() {
                Err(MarshalError::OutOfBounds(_)) => {
                    return Err(MarshalError::UnknownUserException(most_derived));
                }
                other => other?,
            }
        }
    }

    pub(super) fn start_value_legacy(&mut self) -> Result<()> {
        self.legacy_mut()?.skip_first_slice = true;
        Ok(())
    }

    /// Consumes the root slice closing every object.
    pub(super) fn end_value_legacy(&mut self) -> Result<()> {
        if self.legacy_mut()?.slice_type == SliceType::Value {
            self.read_slice_header_legacy()?;
            let facets = self.read_size()?;
            if facets != 0 {
                return Err(MarshalError::InvalidSliceSize(facets as i32));
            }
        }
        self.legacy_mut()?.slice_type = SliceType::None;
        Ok(())
    }

    pub(super) fn start_slice_legacy(&mut self) -> Result<String> {
        let d = self.legacy_mut()?;
        if d.slice_type == SliceType::None {
            return Err(MarshalError::NoActiveSlice);
        }
        if d.skip_first_slice {
            d.skip_first_slice = false;
            return Ok(d.type_id.clone());
        }
        self.read_slice_header_legacy()?;
        Ok(self.legacy_mut()?.type_id.clone())
    }

    fn read_slice_header_legacy(&mut self) -> Result<()> {
        let type_id = match self.legacy_mut()?.slice_type {
            SliceType::Value => {
                let is_index = self.read_bool()?;
                self.read_type_id_legacy(is_index)?
            }
            _ => self.read_string()?,
        };
        let size = self.read_i32()?;
        if size < 4 {
            return Err(MarshalError::InvalidSliceSize(size));
        }
        let d = self.legacy_mut()?;
        d.type_id = type_id;
        d.slice_size = size;
        Ok(())
    }

    fn read_type_id_legacy(&mut self, is_index: bool) -> Result<String> {
        if is_index {
            let index = self.read_size()?;
            let d = self.legacy_mut()?;
            return index
                .checked_sub(1)
                .and_then(|i| d.type_ids.get(i))
                .cloned()
                .ok_or(MarshalError::InvalidTypeIdIndex(index));
        }
        let type_id = self.read_string()?;
        self.legacy_mut()?.type_ids.push(type_id.clone());
        Ok(type_id)
    }

    pub(super) fn skip_slice_legacy(&mut self) -> Result<()> {
        let d = self.legacy_mut()?;
        let size = d.slice_size;
        debug!(type_id = %d.type_id, size, "skipping 1.0 slice");
        self.skip((size - 4) as usize)
    }
}
