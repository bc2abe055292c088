//! Collector roots
//!
//! Everything the collector may relocate must be reachable from a [`RootSet`]. The engine's
//! registers are one root set; the [`RootRegistry`] holds the addresses of module globals and
//! other long lived slots registered at module initialisation.

use std::ptr::NonNull;

use crate::boxed::CopyPass;
use crate::value::Value;

/// Source of collector roots
pub trait RootSet {
    /// Replaces every root with its relocated value
    fn visit_roots(&mut self, pass: &mut CopyPass<'_>);
}

impl RootSet for [Value] {
    fn visit_roots(&mut self, pass: &mut CopyPass<'_>) {
        for value in self.iter_mut() {
            pass.visit(value);
        }
    }
}

impl RootSet for Vec<Value> {
    fn visit_roots(&mut self, pass: &mut CopyPass<'_>) {
        self.as_mut_slice().visit_roots(pass)
    }
}

impl RootSet for Value {
    fn visit_roots(&mut self, pass: &mut CopyPass<'_>) {
        pass.visit(self)
    }
}

/// Append-only table of root addresses
#[derive(Default, Debug)]
pub struct RootRegistry {
    addresses: Vec<NonNull<Value>>,
}

impl RootRegistry {
    pub fn new() -> RootRegistry {
        Self::default()
    }

    /// Registers a slot whose contents the collector must keep alive and update
    ///
    /// # Safety
    ///
    /// `slot` must remain valid and must not move for the lifetime of the registry
    pub unsafe fn register(&mut self, slot: NonNull<Value>) {
        self.addresses.push(slot);
    }

    /// Registers every slot of a boxed slice
    ///
    /// # Safety
    ///
    /// The slice's storage must outlive the registry
    pub unsafe fn register_slice(&mut self, slots: &mut [Value]) {
        for slot in slots.iter_mut() {
            self.register(NonNull::from(slot));
        }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl RootSet for RootRegistry {
    fn visit_roots(&mut self, pass: &mut CopyPass<'_>) {
        for address in &self.addresses {
            pass.visit(unsafe { &mut *address.as_ptr() });
        }
    }
}
