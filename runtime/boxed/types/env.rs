use std::cell::Cell;
use std::fmt;

use crate::boxed::refs::Gc;
use crate::boxed::{payload, Header, TypeCode};
use crate::value::Value;

/// Activation record of a function
///
/// Slots hold the parameters followed by the locals. The parent links to the environment of the
/// lexically enclosing activation, or is `null` for top level functions.
#[repr(C)]
pub struct Env {
    header: Header,
    parent: Value,
}

impl Env {
    pub fn record_words(slot_count: usize) -> usize {
        2 + slot_count
    }

    pub fn parent(&self) -> Value {
        self.parent
    }

    pub fn slot_count(&self) -> usize {
        self.header.size() - 1
    }

    pub fn slots(&self) -> &[Cell<Value>] {
        unsafe { payload(self, 1, self.slot_count()) }
    }

    pub fn slot(&self, index: usize) -> Option<Value> {
        self.slots().get(index).map(Cell::get)
    }

    pub fn set_slot(&self, index: usize, value: Value) -> bool {
        match self.slots().get(index) {
            Some(cell) => {
                cell.set(value);
                true
            }
            None => false,
        }
    }

    /// Walks `up` parent links
    pub fn ancestor(&self, up: usize) -> Option<Gc<Env>> {
        let mut current = unsafe { Gc::new(self as *const Env) };
        for _ in 0..up {
            current = current.parent.downcast::<Env>()?;
        }

        Some(current)
    }

    /// Writes an environment with `null` slots to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `Env::record_words(slot_count)` writable words
    pub(crate) unsafe fn init(dest: *mut usize, parent: Value, slot_count: usize) -> Value {
        *dest.add(1) = parent.to_bits();
        for i in 0..slot_count {
            *dest.add(2 + i) = Value::NULL.to_bits();
        }

        *dest = Header::new(TypeCode::Env, 1 + slot_count).to_word();
        Value::from_object_ptr(dest)
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        formatter
            .debug_struct("Env")
            .field("parent", &self.parent)
            .field(
                "slots",
                &self.slots().iter().map(Cell::get).collect::<Vec<Value>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::boxed::DirectTagged;

    #[repr(C, align(16))]
    struct Cells([usize; 8]);

    #[test]
    fn ancestors() {
        let mut outer_cells = Cells([0; 8]);
        let mut inner_cells = Cells([0; 8]);

        let (outer, inner) = unsafe {
            let outer = Env::init(outer_cells.0.as_mut_ptr(), Value::NULL, 1);
            let inner = Env::init(inner_cells.0.as_mut_ptr(), outer, 2);
            (outer, inner)
        };

        let inner_env = inner.downcast::<Env>().unwrap();
        assert_eq!(2, inner_env.slot_count());
        assert_eq!(Some(Value::NULL), inner_env.slot(1));
        assert!(inner_env.set_slot(1, Value::from_int(5)));
        assert!(!inner_env.set_slot(2, Value::from_int(5)));

        assert_eq!(outer, inner_env.ancestor(1).unwrap().as_value());
        assert!(inner_env.ancestor(2).is_none());
    }
}
