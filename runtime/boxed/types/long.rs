use std::fmt;

use crate::boxed::{Header, TypeCode};
use crate::value::Value;

/// Boxed full-width integer
///
/// Immediates lose two bits to the tag; values that need the whole 64 bits are boxed as longs.
#[repr(C)]
pub struct Long {
    header: Header,
    value: i64,
}

impl Long {
    pub const RECORD_WORDS: usize = 2;

    pub fn value(&self) -> i64 {
        self.value
    }

    /// Writes a long to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least two writable words
    pub(crate) unsafe fn init(dest: *mut usize, value: i64) -> Value {
        (dest as *mut Long).write(Long {
            header: Header::new(TypeCode::Long, 1),
            value,
        });

        Value::from_object_ptr(dest)
    }
}

impl PartialEq for Long {
    fn eq(&self, other: &Long) -> bool {
        self.value() == other.value()
    }
}

impl fmt::Debug for Long {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(formatter, "Long({:?})", self.value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem;

    #[test]
    fn sizes() {
        assert_eq!(
            Long::RECORD_WORDS * mem::size_of::<usize>(),
            mem::size_of::<Long>()
        );
    }
}
