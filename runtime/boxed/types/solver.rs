//! Records owned by the constraint solvers
//!
//! The core only knows these records as rows of traced values; their meaning is up to the
//! solvers that allocate them.

use std::cell::Cell;
use std::fmt;

use crate::boxed::{payload, Header, TypeCode};
use crate::value::Value;

macro_rules! define_solver_record {
    ($name:ident) => {
        #[repr(C)]
        pub struct $name {
            header: Header,
        }

        impl $name {
            pub fn record_words(field_count: usize) -> usize {
                1 + field_count
            }

            pub fn fields(&self) -> &[Cell<Value>] {
                unsafe { payload(self, 0, self.header.size()) }
            }

            pub fn field(&self, index: usize) -> Option<Value> {
                self.fields().get(index).map(Cell::get)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
                formatter.write_str(concat!(stringify!($name), "("))?;
                formatter
                    .debug_list()
                    .entries(self.fields().iter().map(Cell::get))
                    .finish()?;
                formatter.write_str(")")
            }
        }
    };
}

define_solver_record!(Variable);
define_solver_record!(Constraint);
define_solver_record!(Method);

/// Returns true if records of this type may be built with [`init`]
pub fn is_solver_record(type_code: TypeCode) -> bool {
    matches!(
        type_code,
        TypeCode::Variable | TypeCode::Constraint | TypeCode::Method
    )
}

/// Writes a solver record to freshly allocated memory
///
/// # Safety
///
/// `dest` must point to at least `1 + fields.len()` writable words and `type_code` must be a
/// solver record type
pub(crate) unsafe fn init(dest: *mut usize, type_code: TypeCode, fields: &[Value]) -> Value {
    debug_assert!(is_solver_record(type_code));

    std::ptr::copy_nonoverlapping(fields.as_ptr(), dest.add(1) as *mut Value, fields.len());
    *dest = Header::new(type_code, fields.len()).to_word();
    Value::from_object_ptr(dest)
}
