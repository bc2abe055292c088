use std::fmt;

use crate::boxed::{Header, TypeCode};
use crate::value::Value;

/// Boxed 64bit floating point value
#[repr(C)]
pub struct Real {
    header: Header,
    value: f64,
}

impl Real {
    pub const RECORD_WORDS: usize = 2;

    /// Returns the unboxed value of this real
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Writes a real to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least two writable words
    pub(crate) unsafe fn init(dest: *mut usize, value: f64) -> Value {
        (dest as *mut Real).write(Real {
            header: Header::new(TypeCode::Real, 1),
            value,
        });

        Value::from_object_ptr(dest)
    }
}

impl PartialEq for Real {
    fn eq(&self, other: &Real) -> bool {
        self.value() == other.value()
    }
}

impl fmt::Debug for Real {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(formatter, "Real({:?})", self.value)
    }
}
