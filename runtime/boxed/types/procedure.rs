use std::borrow::Cow;
use std::fmt;

use crate::boxed::refs::Gc;
use crate::boxed::{Header, TypeCode};
use crate::engine::Engine;
use crate::error::Fatal;
use crate::value::Value;

/// Entry point invoked by the dispatch loop for a procedure descriptor
///
/// Returns `Ok(true)` when the time slice expired and `Ok(false)` when control was transferred
/// to another descriptor or the engine halted.
pub type DispatchFn = fn(&mut Engine, Gc<Procedure>) -> Result<bool, Fatal>;

/// Human readable information about a procedure used in backtraces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    name: Cow<'static, str>,
}

impl DebugInfo {
    pub const fn new(name: &'static str) -> DebugInfo {
        DebugInfo {
            name: Cow::Borrowed(name),
        }
    }

    pub fn owned(name: String) -> DebugInfo {
        DebugInfo {
            name: Cow::Owned(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Program location
///
/// Descriptors are never allocated in a semi-space. They live either in a loaded program's
/// descriptor table or in statics, so the collector passes references to them through unchanged.
#[repr(C, align(16))]
pub struct Procedure {
    header: Header,
    dispatch: DispatchFn,
    debug_info: *const DebugInfo,
    line: usize,
}

// Descriptors are immutable once built and their debug info outlives them
unsafe impl Sync for Procedure {}

impl Procedure {
    /// Builds a descriptor for a static native entry point
    pub const fn native(
        dispatch: DispatchFn,
        debug_info: &'static DebugInfo,
        line: usize,
    ) -> Procedure {
        Procedure {
            header: Header::new(TypeCode::Procedure, 3),
            dispatch,
            debug_info,
            line,
        }
    }

    /// Builds a descriptor whose debug info is owned by the enclosing program
    ///
    /// # Safety
    ///
    /// `debug_info` must outlive the returned descriptor
    pub(crate) unsafe fn with_debug_info(
        dispatch: DispatchFn,
        debug_info: *const DebugInfo,
        line: usize,
    ) -> Procedure {
        Procedure {
            header: Header::new(TypeCode::Procedure, 3),
            dispatch,
            debug_info,
            line,
        }
    }

    pub fn dispatch(&self) -> DispatchFn {
        self.dispatch
    }

    pub fn debug_info(&self) -> &DebugInfo {
        unsafe { &*self.debug_info }
    }

    pub fn name(&self) -> &str {
        self.debug_info().name()
    }

    /// Returns the source line of this location or 0 if unknown
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn as_value(&self) -> Value {
        Value::from_object_ptr(self as *const Procedure as *const usize)
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(formatter, "Procedure({}:{})", self.name(), self.line)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem;

    static TEST_DEBUG_INFO: DebugInfo = DebugInfo::new("test");

    fn never_dispatched(_: &mut Engine, _: Gc<Procedure>) -> Result<bool, Fatal> {
        unreachable!()
    }

    static TEST_PROCEDURE: Procedure = Procedure::native(never_dispatched, &TEST_DEBUG_INFO, 12);

    #[test]
    fn sizes() {
        assert_eq!(4 * mem::size_of::<usize>(), mem::size_of::<Procedure>());
        assert_eq!(
            4,
            Header::new(TypeCode::Procedure, 3).record_words()
        );
    }

    #[test]
    fn static_descriptor() {
        let value = TEST_PROCEDURE.as_value();
        let procedure = value.downcast::<Procedure>().unwrap();

        assert_eq!("test", procedure.name());
        assert_eq!(12, procedure.line());
        assert_eq!("Procedure(test:12)", format!("{:?}", procedure));
    }
}
