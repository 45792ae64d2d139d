//! Identity map and deferred reference completion.

use std::collections::HashMap;

use tracing::warn;

use super::InputStream;
use crate::error::{MarshalError, Result};
use crate::value::{Patcher, ValuePtr};

struct PatchEntry {
    patcher: Option<Patcher>,
    /// Graph depth of the instance that held the reference.
    class_graph_depth: usize,
}

/// Tracks decoded instances by id and the callbacks waiting on ids that
/// have not been decoded yet. One per read encapsulation.
pub(crate) struct PatchResolver {
    unmarshaled: HashMap<i32, ValuePtr>,
    patches: HashMap<i32, Vec<PatchEntry>>,
    deferred: Vec<ValuePtr>,
    depth: usize,
    depth_max: usize,
}

impl PatchResolver {
    pub(crate) fn new(depth_max: usize) -> Self {
        Self {
            unmarshaled: HashMap::new(),
            patches: HashMap::new(),
            deferred: Vec::new(),
            depth: 0,
            depth_max,
        }
    }

    /// Completes `patcher` now if `id` is already known, otherwise queues it.
    pub(crate) fn add_patch_entry(&mut self, id: i32, patcher: Option<Patcher>) {
        if let Some(v) = self.unmarshaled.get(&id) {
            if let Some(patcher) = patcher {
                patcher(Some(v.clone()));
            }
            return;
        }
        self.patches.entry(id).or_default().push(PatchEntry {
            patcher,
            class_graph_depth: self.depth,
        });
    }

    /// Enters the instance `id`, returning the depth to restore on exit.
    ///
    /// The depth of an instance is one more than the deepest referrer seen so
    /// far: the enclosing instance when read inline, or any instance that
    /// queued a patch for `id` when read later.
    pub(crate) fn enter_instance(&mut self, id: i32) -> Result<usize> {
        let queued = self
            .patches
            .get(&id)
            .and_then(|entries| entries.iter().map(|e| e.class_graph_depth).max())
            .unwrap_or(0);
        let depth = self.depth.max(queued) + 1;
        if depth > self.depth_max {
            return Err(MarshalError::ClassGraphDepthExceeded {
                max: self.depth_max,
            });
        }
        let prev = self.depth;
        self.depth = depth;
        Ok(prev)
    }

    pub(crate) fn leave_instance(&mut self, prev: usize) {
        self.depth = prev;
    }

    /// Records `id` before its fields are read so self references resolve.
    pub(crate) fn register(&mut self, id: i32, value: ValuePtr) {
        self.unmarshaled.insert(id, value);
    }

    pub(crate) fn is_registered(&self, id: i32) -> bool {
        self.unmarshaled.contains_key(&id)
    }

    /// Runs every callback queued for `id`.
    pub(crate) fn resolve(&mut self, id: i32, value: &ValuePtr) {
        if let Some(entries) = self.patches.remove(&id) {
            for entry in entries {
                if let Some(patcher) = entry.patcher {
                    patcher(Some(value.clone()));
                }
            }
        }
    }

    /// Smallest id still waiting for an instance.
    pub(crate) fn first_unresolved(&self) -> Option<i32> {
        self.patches.keys().min().copied()
    }

    pub(crate) fn check_resolved(&self) -> Result<()> {
        match self.first_unresolved() {
            Some(id) => Err(MarshalError::UnresolvedPatch(id)),
            None => Ok(()),
        }
    }

    /// Runs post-unmarshal hooks once no reference in the graph is pending.
    pub(crate) fn finish(&mut self, value: ValuePtr) {
        if self.patches.is_empty() && self.deferred.is_empty() {
            run_hook(&value);
            return;
        }
        self.deferred.push(value);
        if self.patches.is_empty() {
            for v in self.deferred.drain(..) {
                run_hook(&v);
            }
        }
    }
}

fn run_hook(value: &ValuePtr) {
    let Ok(mut v) = value.try_borrow_mut() else {
        warn!("post_unmarshal skipped: instance is borrowed");
        return;
    };
    if let Err(err) = v.post_unmarshal() {
        warn!(type_id = v.wire_type_id(), %err, "post_unmarshal hook failed");
    }
}

impl InputStream {
    pub(super) fn add_patch_entry(&mut self, id: i32, patcher: Option<Patcher>) {
        self.resolver_mut().add_patch_entry(id, patcher);
    }

    /// Decodes the fields of a freshly instantiated `value` known as `id`,
    /// then completes every reference waiting on it.
    pub(super) fn unmarshal(&mut self, id: i32, value: ValuePtr) -> Result<()> {
        self.resolver_mut().register(id, value.clone());

        self.start_value()?;
        value.borrow_mut().read_impl(self)?;
        let preserve = value.borrow().preserves_slices();
        let sliced = self.end_value(preserve)?;
        if preserve {
            value.borrow_mut().set_sliced_data(sliced);
        }

        let resolver = self.resolver_mut();
        resolver.resolve(id, &value);
        resolver.finish(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{value_ptr, InstanceSlot, UnknownSlicedValue};

    fn sample() -> ValuePtr {
        value_ptr(UnknownSlicedValue::new("::S"))
    }

    #[test]
    fn known_id_patches_immediately() {
        let mut r = PatchResolver::new(10);
        let v = sample();
        r.register(2, v.clone());
        let slot = InstanceSlot::default();
        r.add_patch_entry(2, Some(slot.patcher()));
        assert!(slot.same_instance(&Some(v)));
        assert_eq!(r.first_unresolved(), None);
    }

    #[test]
    fn queued_patches_drain_on_resolve() {
        let mut r = PatchResolver::new(10);
        let a = InstanceSlot::default();
        let b = InstanceSlot::default();
        r.add_patch_entry(3, Some(a.patcher()));
        r.add_patch_entry(3, Some(b.patcher()));
        r.add_patch_entry(4, None);
        assert_eq!(r.first_unresolved(), Some(3));

        let v = sample();
        r.register(3, v.clone());
        r.resolve(3, &v);
        assert!(a.same_instance(&Some(v.clone())));
        assert!(b.same_instance(&Some(v)));
        assert_eq!(r.check_resolved(), Err(MarshalError::UnresolvedPatch(4)));
    }

    #[test]
    fn depth_uses_deepest_referrer() {
        let mut r = PatchResolver::new(3);
        let outer = r.enter_instance(1).unwrap();
        let inner = r.enter_instance(2).unwrap();
        // queued from depth 2
        r.add_patch_entry(9, None);
        r.leave_instance(inner);
        r.leave_instance(outer);

        let prev = r.enter_instance(9).unwrap();
        assert_eq!(r.depth, 3);
        r.leave_instance(prev);

        r.add_patch_entry(10, None);
        r.depth = 3;
        r.add_patch_entry(10, None);
        r.depth = 0;
        assert_eq!(
            r.enter_instance(10),
            Err(MarshalError::ClassGraphDepthExceeded { max: 3 })
        );
        assert_eq!(r.depth, 0);
    }
}
