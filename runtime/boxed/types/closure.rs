use std::fmt;

use crate::boxed::refs::Gc;
use crate::boxed::{Header, Procedure, TypeCode};
use crate::value::Value;

/// Function value capturing its defining environment
///
/// Nested functions that never escape are called through their procedure descriptor directly;
/// a closure is only built once a function value escapes its defining activation.
#[repr(C)]
pub struct Closure {
    header: Header,
    code: Value,
    env: Value,
}

impl Closure {
    pub const RECORD_WORDS: usize = 3;

    /// Returns the procedure descriptor of the closure's entry point
    pub fn code(&self) -> Value {
        self.code
    }

    pub fn procedure(&self) -> Option<Gc<Procedure>> {
        self.code.downcast::<Procedure>()
    }

    pub fn env(&self) -> Value {
        self.env
    }

    /// Writes a closure to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least three writable words
    pub(crate) unsafe fn init(dest: *mut usize, code: Value, env: Value) -> Value {
        (dest as *mut Closure).write(Closure {
            header: Header::new(TypeCode::Closure, 2),
            code,
            env,
        });

        Value::from_object_ptr(dest)
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Closure) -> bool {
        self as *const _ == other as *const _
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(formatter, "Closure({:p})", self)
    }
}
