use std::cell::Cell;
use std::fmt;

use crate::boxed::{Header, TypeCode};
use crate::value::Value;

/// Constrainable variable
///
/// The hook word belongs to an external constraint solver. The collector copies it untouched and
/// never traces it; instead the hook is told the variable's new location whenever it moves.
#[repr(C)]
pub struct CVar {
    header: Header,
    value: Cell<Value>,
    hook: Cell<Value>,
}

impl CVar {
    pub const RECORD_WORDS: usize = 3;

    pub fn value(&self) -> Value {
        self.value.get()
    }

    pub fn set_value(&self, value: Value) {
        self.value.set(value)
    }

    /// Returns the raw hook word; `null` when no solver is attached
    pub fn hook(&self) -> Value {
        self.hook.get()
    }

    pub(crate) fn set_hook(&self, hook: Value) {
        self.hook.set(hook)
    }

    /// Writes a constrainable variable to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least three writable words
    pub(crate) unsafe fn init(dest: *mut usize, value: Value) -> Value {
        (dest as *mut CVar).write(CVar {
            header: Header::new(TypeCode::CVar, 2),
            value: Cell::new(value),
            hook: Cell::new(Value::NULL),
        });

        Value::from_object_ptr(dest)
    }
}

impl fmt::Debug for CVar {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(formatter, "CVar({:?})", self.value())
    }
}
