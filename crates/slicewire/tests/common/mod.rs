//! Hand-written classes and exceptions shaped like generated marshaling code.

#![allow(dead_code)]

use std::any::Any;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use slicewire::{
    value_ptr, FactoryRegistry, HookResult, InputStream, InstanceSlot, OutputStream, Result,
    SlicedData, UserException, Value, ValuePtr,
};

pub const NODE: &str = "::Demo::Node";
pub const BASE: &str = "::Demo::Base";
pub const DERIVED: &str = "::Demo::Derived";
pub const MARKER: &str = "::Demo::Marker";
pub const COMPACT: &str = "::Demo::Compact";
pub const COMPACT_ID: i32 = 7;
pub const HOOKED: &str = "::Demo::Hooked";
pub const ERROR: &str = "::Demo::Error";
pub const DERIVED_ERROR: &str = "::Demo::DerivedError";
pub const CLASS_ERROR: &str = "::Demo::ClassError";

/// Single-slice class with a reference and a tagged member.
#[derive(Debug, Default)]
pub struct Node {
    pub name: String,
    pub next: InstanceSlot,
    pub weight: Option<i32>,
}

impl Value for Node {
    fn wire_type_id(&self) -> &str {
        NODE
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        out.start_slice(NODE, -1, true)?;
        out.write_string(&self.name);
        out.write_value(self.next.get().as_ref())?;
        out.write_tagged_i32(1, self.weight)?;
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        input.start_slice()?;
        self.name = input.read_string()?;
        input.read_value_into(&self.next)?;
        self.weight = input.read_tagged_i32(1)?;
        input.end_slice()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn node(name: &str, next: Option<ValuePtr>) -> ValuePtr {
    value_ptr(Node {
        name: name.to_owned(),
        next: InstanceSlot::new(next),
        weight: None,
    })
}

/// Base class keeping the slices of derived types it does not know.
#[derive(Debug, Default)]
pub struct Base {
    pub id: i32,
    pub sliced: Option<Rc<SlicedData>>,
}

impl Base {
    fn write_base_slice(id: i32, out: &mut OutputStream) -> Result<()> {
        out.start_slice(BASE, -1, true)?;
        out.write_i32(id);
        out.end_slice()
    }

    fn read_base_slice(input: &mut InputStream) -> Result<i32> {
        input.start_slice()?;
        let id = input.read_i32()?;
        input.end_slice()?;
        Ok(id)
    }
}

impl Value for Base {
    fn wire_type_id(&self) -> &str {
        BASE
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        Self::write_base_slice(self.id, out)
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        self.id = Self::read_base_slice(input)?;
        Ok(())
    }

    fn preserves_slices(&self) -> bool {
        true
    }

    fn sliced_data(&self) -> Option<Rc<SlicedData>> {
        self.sliced.clone()
    }

    fn set_sliced_data(&mut self, data: Option<Rc<SlicedData>>) {
        self.sliced = data;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Derives from [`Base`] and references another instance from its own slice.
#[derive(Debug, Default)]
pub struct Derived {
    pub id: i32,
    pub label: String,
    pub link: InstanceSlot,
}

impl Value for Derived {
    fn wire_type_id(&self) -> &str {
        DERIVED
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        out.start_slice(DERIVED, -1, false)?;
        out.write_string(&self.label);
        out.write_value(self.link.get().as_ref())?;
        out.end_slice()?;
        Base::write_base_slice(self.id, out)
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        input.start_slice()?;
        self.label = input.read_string()?;
        input.read_value_into(&self.link)?;
        input.end_slice()?;
        self.id = Base::read_base_slice(input)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Class whose only slice carries nothing but a tagged member.
#[derive(Debug, Default)]
pub struct Marker {
    pub note: Option<String>,
}

impl Value for Marker {
    fn wire_type_id(&self) -> &str {
        MARKER
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        out.start_slice(MARKER, -1, true)?;
        out.write_tagged_string(1, self.note.as_deref())?;
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        input.start_slice()?;
        self.note = input.read_tagged_string(1)?;
        input.end_slice()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Class identified on the wire by a numeric id.
#[derive(Debug, Default)]
pub struct Compact {
    pub value: i64,
}

impl Value for Compact {
    fn wire_type_id(&self) -> &str {
        COMPACT
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        out.start_slice(COMPACT, COMPACT_ID, true)?;
        out.write_i64(self.value);
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        input.start_slice()?;
        self.value = input.read_i64()?;
        input.end_slice()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub static HOOK_FAILURES: AtomicUsize = AtomicUsize::new(0);

/// Records, from its post-unmarshal hook, whether its reference was
/// already patched.
#[derive(Debug, Default)]
pub struct Hooked {
    pub next: InstanceSlot,
    pub fail: bool,
    pub next_seen_by_hook: Option<bool>,
}

impl Value for Hooked {
    fn wire_type_id(&self) -> &str {
        HOOKED
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        out.start_slice(HOOKED, -1, true)?;
        out.write_bool(self.fail);
        out.write_value(self.next.get().as_ref())?;
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        input.start_slice()?;
        self.fail = input.read_bool()?;
        input.read_value_into(&self.next)?;
        input.end_slice()
    }

    fn post_unmarshal(&mut self) -> HookResult {
        self.next_seen_by_hook = Some(self.next.get().is_some());
        if self.fail {
            HOOK_FAILURES.fetch_add(1, Ordering::SeqCst);
            return Err("hook refused the instance".into());
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct DemoError {
    pub reason: String,
}

impl DemoError {
    fn write_slice(&self, out: &mut OutputStream) -> Result<()> {
        out.start_slice(ERROR, -1, true)?;
        out.write_string(&self.reason);
        out.end_slice()
    }

    fn read_slice(&mut self, input: &mut InputStream) -> Result<()> {
        input.start_slice()?;
        self.reason = input.read_string()?;
        input.end_slice()
    }
}

impl UserException for DemoError {
    fn wire_type_id(&self) -> &str {
        ERROR
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        self.write_slice(out)
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        self.read_slice(input)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct DerivedError {
    pub base: DemoError,
    pub code: i32,
}

impl UserException for DerivedError {
    fn wire_type_id(&self) -> &str {
        DERIVED_ERROR
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        out.start_slice(DERIVED_ERROR, -1, false)?;
        out.write_i32(self.code);
        out.end_slice()?;
        self.base.write_slice(out)
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        input.start_slice()?;
        self.code = input.read_i32()?;
        input.end_slice()?;
        self.base.read_slice(input)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Exception holding a class instance.
#[derive(Debug, Default)]
pub struct ClassError {
    pub held: InstanceSlot,
}

impl UserException for ClassError {
    fn wire_type_id(&self) -> &str {
        CLASS_ERROR
    }

    fn write_impl(&self, out: &mut OutputStream) -> Result<()> {
        out.start_slice(CLASS_ERROR, -1, true)?;
        out.write_value(self.held.get().as_ref())?;
        out.end_slice()
    }

    fn read_impl(&mut self, input: &mut InputStream) -> Result<()> {
        input.start_slice()?;
        input.read_value_into(&self.held)?;
        input.end_slice()
    }

    fn uses_classes(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry knowing every sample type.
pub fn full_registry() -> Arc<FactoryRegistry> {
    let registry = base_registry();
    registry.register_value(DERIVED, |_| Some(value_ptr(Derived::default())));
    registry.register_value(MARKER, |_| Some(value_ptr(Marker::default())));
    registry.register_exception(DERIVED_ERROR, || Box::new(DerivedError::default()));
    registry
}

/// Registry missing [`Derived`], [`Marker`] and [`DerivedError`], as seen
/// by an older peer.
pub fn base_registry() -> Arc<FactoryRegistry> {
    let registry = FactoryRegistry::shared();
    registry.register_value(NODE, |_| Some(value_ptr(Node::default())));
    registry.register_value(BASE, |_| Some(value_ptr(Base::default())));
    registry.register_value(HOOKED, |_| Some(value_ptr(Hooked::default())));
    registry.register_exception(ERROR, || Box::new(DemoError::default()));
    registry.register_exception(CLASS_ERROR, || Box::new(ClassError::default()));
    registry
}

/// Downcasts the instance held by `v`.
pub fn with<T: 'static, R>(v: &ValuePtr, f: impl FnOnce(&T) -> R) -> R {
    let borrowed = v.borrow();
    let concrete = borrowed
        .as_any()
        .downcast_ref::<T>()
        .unwrap_or_else(|| panic!("instance is `{}`", borrowed.wire_type_id()));
    f(concrete)
}
