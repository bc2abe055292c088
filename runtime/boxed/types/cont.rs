use std::fmt;

use crate::boxed::{payload, Header, TypeCode};
use crate::value::Value;

const FIXED_FIELDS: usize = 4;

/// Heap-resident snapshot of what to do when a call returns
///
/// Continuations replace native stack frames. The dynamic link chains each continuation to the
/// one that was current when it was captured. Once captured a continuation is never modified, so
/// the same snapshot can be restored by a return and by an exception handler.
#[repr(C)]
pub struct Continuation {
    header: Header,
    link: Value,
    resume: Value,
    env: Value,
    depth: Value,
}

impl Continuation {
    pub fn record_words(depth: usize) -> usize {
        1 + FIXED_FIELDS + depth
    }

    /// Returns the continuation that was current when this one was captured
    pub fn link(&self) -> Value {
        self.link
    }

    /// Returns the procedure descriptor execution resumes at
    pub fn resume(&self) -> Value {
        self.resume
    }

    pub fn env(&self) -> Value {
        self.env
    }

    /// Returns the recorded operand stack depth
    pub fn depth(&self) -> usize {
        self.depth.as_int() as usize
    }

    /// Returns the saved operand stack slots
    pub fn slots(&self) -> &[Value] {
        unsafe { payload(self, FIXED_FIELDS, self.header.size() - FIXED_FIELDS) }
    }

    /// Writes a continuation to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `Continuation::record_words(stack.len())` writable words
    pub(crate) unsafe fn init(
        dest: *mut usize,
        link: Value,
        resume: Value,
        env: Value,
        stack: &[Value],
    ) -> Value {
        *dest.add(1) = link.to_bits();
        *dest.add(2) = resume.to_bits();
        *dest.add(3) = env.to_bits();
        *dest.add(4) = Value::from_int(stack.len() as i64).to_bits();
        std::ptr::copy_nonoverlapping(stack.as_ptr(), dest.add(5) as *mut Value, stack.len());

        *dest = Header::new(TypeCode::Continuation, FIXED_FIELDS + stack.len()).to_word();
        Value::from_object_ptr(dest)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        formatter
            .debug_struct("Continuation")
            .field("link", &self.link)
            .field("resume", &self.resume)
            .field("env", &self.env)
            .field("slots", &self.slots())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[repr(C, align(16))]
    struct Cells([usize; 8]);

    #[test]
    fn saved_slots() {
        let mut cells = Cells([0; 8]);
        let stack = [Value::from_int(1), Value::from_int(2)];

        let boxed = unsafe {
            Continuation::init(cells.0.as_mut_ptr(), Value::NULL, Value::NULL, Value::NULL, &stack)
        };

        let cont = boxed.downcast::<Continuation>().unwrap();
        assert_eq!(2, cont.depth());
        assert_eq!(&stack[..], cont.slots());
        assert_eq!(7, Continuation::record_words(2));
    }
}
