//! Polymorphic instances, preserved slices and user exceptions.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::Result;
use crate::input::InputStream;
use crate::output::OutputStream;

/// Type-id of the implicit root slice that closes every legacy object.
pub const ROOT_TYPE_ID: &str = "::Ice::Object";

/// Outcome of a user hook; failures are logged and never abort a decode.
pub type HookResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A class instance that can be marshaled as an ordered chain of slices.
///
/// `write_impl` emits one slice per level of the type's hierarchy, most
/// derived first, each bracketed by [`OutputStream::start_slice`] and
/// [`OutputStream::end_slice`]. `read_impl` mirrors it with
/// [`InputStream::start_slice`] / [`InputStream::end_slice`].
pub trait Value: Any {
    /// Most-derived type-id of this instance.
    fn wire_type_id(&self) -> &str;

    fn write_impl(&self, out: &mut OutputStream) -> Result<()>;

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()>;

    /// Called before the instance is marshaled for the first time.
    fn pre_marshal(&mut self) {}

    /// Called once every reference in the decoded graph has been patched.
    fn post_unmarshal(&mut self) -> HookResult {
        Ok(())
    }

    /// Whether slices of unknown derived types are kept on decode so they
    /// can be re-emitted later.
    fn preserves_slices(&self) -> bool {
        false
    }

    fn sliced_data(&self) -> Option<Rc<SlicedData>> {
        None
    }

    fn set_sliced_data(&mut self, _data: Option<Rc<SlicedData>>) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared handle to a class instance. Identity is the allocation address.
pub type ValuePtr = Rc<RefCell<dyn Value>>;

/// Wraps any concrete value into a [`ValuePtr`].
pub fn value_ptr<V: Value>(v: V) -> ValuePtr {
    Rc::new(RefCell::new(v))
}

/// Identity key for a [`ValuePtr`]: hashes and compares by address only.
#[derive(Clone)]
pub(crate) struct InstanceKey(pub(crate) ValuePtr);

impl InstanceKey {
    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for InstanceKey {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.addr(), other.addr())
    }
}

impl Eq for InstanceKey {}

impl Hash for InstanceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

/// Deferred completion of a reference; receives `None` for a null reference.
pub type Patcher = Box<dyn FnOnce(Option<ValuePtr>)>;

/// A class-typed field. Decoding fills it through a [`Patcher`] which may run
/// long after the owning instance finished reading (forward and cyclic
/// references), so the slot is shared rather than owned by the instance.
#[derive(Clone, Default)]
pub struct InstanceSlot(Rc<RefCell<Option<ValuePtr>>>);

impl InstanceSlot {
    pub fn new(v: Option<ValuePtr>) -> Self {
        Self(Rc::new(RefCell::new(v)))
    }

    pub fn get(&self) -> Option<ValuePtr> {
        self.0.borrow().clone()
    }

    pub fn set(&self, v: Option<ValuePtr>) {
        *self.0.borrow_mut() = v;
    }

    /// A patcher that stores the resolved instance into this slot.
    pub fn patcher(&self) -> Patcher {
        let slot = self.0.clone();
        Box::new(move |v| *slot.borrow_mut() = v)
    }

    /// True when both slots refer to the same instance (or are both empty).
    pub fn same_instance(&self, other: &Option<ValuePtr>) -> bool {
        match (self.get(), other) {
            (Some(a), Some(b)) => Rc::ptr_eq(&a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for InstanceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.borrow().as_ref() {
            Some(v) => write!(f, "InstanceSlot({:p})", Rc::as_ptr(v) as *const ()),
            None => write!(f, "InstanceSlot(null)"),
        }
    }
}

/// A slice kept verbatim because its type was unknown to the decoder.
#[derive(Clone)]
pub struct SliceInfo {
    pub type_id: String,
    /// Compact id, or -1 when the slice carried a string/indexed type-id.
    pub compact_id: i32,
    /// Slice body, excluding the header and any tagged-member end marker.
    pub bytes: Vec<u8>,
    /// Referents of the slice's indirection table, filled in by patching.
    pub instances: Rc<RefCell<Vec<Option<ValuePtr>>>>,
    pub has_optional_members: bool,
    pub is_last_slice: bool,
}

impl fmt::Debug for SliceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceInfo")
            .field("type_id", &self.type_id)
            .field("compact_id", &self.compact_id)
            .field("bytes", &self.bytes.len())
            .field("instances", &self.instances.borrow().len())
            .field("has_optional_members", &self.has_optional_members)
            .field("is_last_slice", &self.is_last_slice)
            .finish()
    }
}

/// Preserved slices of an instance, most derived first.
#[derive(Debug, Clone)]
pub struct SlicedData {
    pub slices: Vec<SliceInfo>,
}

/// Placeholder for an instance none of whose slices could be resolved.
#[derive(Debug)]
pub struct UnknownSlicedValue {
    unknown_type_id: String,
    sliced_data: Option<Rc<SlicedData>>,
}

impl UnknownSlicedValue {
    pub fn new(unknown_type_id: impl Into<String>) -> Self {
        Self {
            unknown_type_id: unknown_type_id.into(),
            sliced_data: None,
        }
    }

    pub fn unknown_type_id(&self) -> &str {
        &self.unknown_type_id
    }
}

impl Value for UnknownSlicedValue {
    fn wire_type_id(&self) -> &str {
        &self.unknown_type_id
    }

    // Everything this instance knows lives in its preserved slices, which the
    // stream re-emits before calling `write_impl`.
    fn write_impl(&self, _out: &mut OutputStream) -> Result<()> {
        Ok(())
    }

    fn read_impl(&mut self, _input: &mut InputStream) -> Result<()> {
        Ok(())
    }

    fn preserves_slices(&self) -> bool {
        true
    }

    fn sliced_data(&self) -> Option<Rc<SlicedData>> {
        self.sliced_data.clone()
    }

    fn set_sliced_data(&mut self, data: Option<Rc<SlicedData>>) {
        self.sliced_data = data;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A user-defined exception, marshaled as a chain of exception slices.
pub trait UserException: fmt::Debug + Any {
    fn wire_type_id(&self) -> &str;

    fn write_impl(&self, out: &mut OutputStream) -> Result<()>;

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()>;

    /// Whether any member (transitively) holds class instances. Only the
    /// legacy encoding consults this.
    fn uses_classes(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}
