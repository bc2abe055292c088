//! Heap records and the object catalog
//!
//! Every heap record other than a [`Pair`] starts with a one word [`Header`] holding a
//! [`TypeCode`] and a size. The type code alone determines how many words follow the header and
//! which of those words are [`Value`]s the collector must trace; that knowledge lives in a single
//! table of [`Shape`]s so the collector is generic over the catalog.

pub(crate) mod heap;
pub mod refs;
pub(crate) mod types;

use std::slice;

use crate::boxed::refs::Gc;
use crate::boxed::types::packed_words;
use crate::value::{Tag, Value, TAG_BITS};

pub use crate::boxed::heap::collect::{BrokenHeart, CopyPass};
pub use crate::boxed::heap::{Heap, HeapStats};
pub use crate::boxed::types::array::{Array, ByteArray, RawArray};
pub use crate::boxed::types::closure::Closure;
pub use crate::boxed::types::cont::Continuation;
pub use crate::boxed::types::cvar::CVar;
pub use crate::boxed::types::env::Env;
pub use crate::boxed::types::long::Long;
pub use crate::boxed::types::pair::{ListIterator, Pair};
pub use crate::boxed::types::procedure::{DebugInfo, DispatchFn, Procedure};
pub use crate::boxed::types::real::Real;
pub use crate::boxed::types::solver::{Constraint, Method, Variable};
pub use crate::boxed::types::str::Str;

/// Marker for types with the layout of a heap record
pub trait Boxed: Sized {}

/// Header-prefixed record with a fixed type code
pub trait DirectTagged: Boxed {
    const TYPE_CODE: TypeCode;

    fn header(&self) -> Header {
        unsafe { *(self as *const Self as *const Header) }
    }

    /// Returns an object reference to this record
    fn as_value(&self) -> Value {
        Value::from_object_ptr(self as *const Self as *const usize)
    }
}

const TYPE_CODE_BITS: u32 = 6;
const TYPE_CODE_MASK: usize = (1 << TYPE_CODE_BITS) - 1;
const SIZE_SHIFT: u32 = TAG_BITS + TYPE_CODE_BITS;

/// First word of every header-prefixed record
///
/// The low bits hold the header tag, followed by a 6 bit type code and the size field. The size
/// is counted in elements for arrays, characters for strings, bytes for binary arrays and payload
/// words for everything else.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Header(usize);

impl Header {
    /// Largest representable size field
    pub const MAX_SIZE: usize = usize::MAX >> SIZE_SHIFT;

    pub const fn new(type_code: TypeCode, size: usize) -> Header {
        Header((size << SIZE_SHIFT) | ((type_code as usize) << TAG_BITS) | (Tag::Header as usize))
    }

    /// Interprets a word read from the heap as a header
    pub fn from_word(word: usize) -> Header {
        debug_assert_eq!(Tag::Header, Tag::of_word(word), "{:#x} is not a header", word);
        Header(word)
    }

    pub fn to_word(self) -> usize {
        self.0
    }

    /// Returns the type code
    ///
    /// Panics on a code outside the catalog; that can only happen on a corrupted heap.
    pub fn type_code(self) -> TypeCode {
        let code = ((self.0 >> TAG_BITS) & TYPE_CODE_MASK) as u8;
        TypeCode::from_u8(code)
            .unwrap_or_else(|| panic!("unrecognised type code {} in header {:#x}", code, self.0))
    }

    pub fn size(self) -> usize {
        self.0 >> SIZE_SHIFT
    }

    pub fn shape(self) -> &'static Shape {
        shape_of(self.type_code())
    }

    /// Returns the number of words in the record including the header
    pub fn record_words(self) -> usize {
        1 + self.shape().payload_words(self.size())
    }

    /// Returns the number of words the record occupies once aligned to an even word boundary
    pub fn allocated_words(self) -> usize {
        round_up_even(self.record_words())
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            formatter,
            "Header({}, {})",
            self.type_code().to_str(),
            self.size()
        )
    }
}

/// Rounds a word count up to the even-word allocation granule
pub fn round_up_even(words: usize) -> usize {
    (words + 1) & !1
}

macro_rules! define_type_codes {
    ($( $name:ident = $code:literal ),*) => {
        #[repr(u8)]
        #[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
        pub enum TypeCode {
            $( $name = $code ),*
        }

        impl TypeCode {
            pub const ALL: &'static [TypeCode] = &[$( TypeCode::$name ),*];

            pub fn from_u8(code: u8) -> Option<TypeCode> {
                match code {
                    $( $code => Some(TypeCode::$name), )*
                    _ => None,
                }
            }

            pub fn to_str(self) -> &'static str {
                match self {
                    $( TypeCode::$name => stringify!($name) ),*
                }
            }
        }

        $(
            impl Boxed for $name {}

            impl DirectTagged for $name {
                const TYPE_CODE: TypeCode = TypeCode::$name;
            }
        )*
    }
}

define_type_codes! {
    BrokenHeart = 0,
    Continuation = 1,
    Procedure = 2,
    Closure = 3,
    Str = 4,
    Real = 5,
    Array = 6,
    RawArray = 7,
    ByteArray = 8,
    Env = 9,
    CVar = 10,
    Constraint = 11,
    Long = 12,
    Variable = 13,
    Method = 14
}

/// How the collector treats the payload of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracing {
    /// The payload holds no values
    Opaque,
    /// Every payload word is a value
    Values,
    /// Only the first `n` payload words are values
    Prefix(usize),
    /// Records of this type are never allocated in a semi-space
    Static,
    /// Forwarding marker left in from-space
    Forward,
}

/// Catalog entry for one type code
pub struct Shape {
    pub type_code: TypeCode,
    pub tracing: Tracing,
    /// The solver hook table must be told when records of this shape move
    pub hooked: bool,
    payload_words: fn(usize) -> usize,
}

impl Shape {
    /// Returns the number of words following the header for the given size field
    pub fn payload_words(&self, size: usize) -> usize {
        (self.payload_words)(size)
    }
}

fn size_in_words(size: usize) -> usize {
    size
}

fn fixed<const N: usize>(_size: usize) -> usize {
    N
}

fn packed_chars(len: usize) -> usize {
    packed_words::<u32>(len)
}

fn packed_bytes(len: usize) -> usize {
    packed_words::<u8>(len)
}

macro_rules! shape {
    ($type_code:ident, $tracing:expr, $payload_words:expr) => {
        shape!($type_code, $tracing, $payload_words, false)
    };
    ($type_code:ident, $tracing:expr, $payload_words:expr, $hooked:expr) => {
        Shape {
            type_code: TypeCode::$type_code,
            tracing: $tracing,
            hooked: $hooked,
            payload_words: $payload_words,
        }
    };
}

/// Object catalog indexed by type code
static CATALOG: [Shape; 15] = [
    shape!(BrokenHeart, Tracing::Forward, fixed::<1>),
    shape!(Continuation, Tracing::Values, size_in_words),
    shape!(Procedure, Tracing::Static, fixed::<3>),
    shape!(Closure, Tracing::Values, size_in_words),
    shape!(Str, Tracing::Opaque, packed_chars),
    shape!(Real, Tracing::Opaque, fixed::<1>),
    shape!(Array, Tracing::Values, size_in_words),
    shape!(RawArray, Tracing::Opaque, size_in_words),
    shape!(ByteArray, Tracing::Opaque, packed_bytes),
    shape!(Env, Tracing::Values, size_in_words),
    shape!(CVar, Tracing::Prefix(1), size_in_words, true),
    shape!(Constraint, Tracing::Values, size_in_words),
    shape!(Long, Tracing::Opaque, fixed::<1>),
    shape!(Variable, Tracing::Values, size_in_words),
    shape!(Method, Tracing::Values, size_in_words),
];

/// Returns the catalog entry for a type code
pub fn shape_of(type_code: TypeCode) -> &'static Shape {
    let shape = &CATALOG[type_code as usize];
    debug_assert_eq!(type_code, shape.type_code);
    shape
}

/// Header-prefixed record of any type
#[repr(C)]
pub struct Any {
    header: Header,
}

impl Boxed for Any {}

impl Any {
    pub fn header(&self) -> Header {
        self.header
    }

    pub fn type_code(&self) -> TypeCode {
        self.header.type_code()
    }

    pub fn downcast_ref<T: DirectTagged>(&self) -> Option<Gc<T>> {
        if self.header.type_code() == T::TYPE_CODE {
            Some(unsafe { Gc::new(self as *const Any as *const T) })
        } else {
            None
        }
    }

    pub fn as_value(&self) -> Value {
        Value::from_object_ptr(self as *const Any as *const usize)
    }
}

impl std::fmt::Debug for Any {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(formatter, "Any({:?})", self.header)
    }
}

/// Returns the `len` payload words of `record` starting `offset` words after its header
///
/// # Safety
///
/// The record must actually have at least `offset + len` payload words of type `T`
pub(crate) unsafe fn payload<R, T>(record: &R, offset: usize, len: usize) -> &[T] {
    let start = (record as *const R as *const usize).add(1 + offset) as *const T;
    slice::from_raw_parts(start, len)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::ValueKind;

    #[test]
    fn header_fields() {
        let header = Header::new(TypeCode::Array, 3);
        assert_eq!(Tag::Header, Tag::of_word(header.to_word()));
        assert_eq!(TypeCode::Array, header.type_code());
        assert_eq!(3, header.size());
        assert_eq!(4, header.record_words());
        assert_eq!(4, header.allocated_words());

        let max = Header::new(TypeCode::ByteArray, Header::MAX_SIZE);
        assert_eq!(Header::MAX_SIZE, max.size());
        assert_eq!(TypeCode::ByteArray, max.type_code());
    }

    #[test]
    fn catalog_is_indexed_by_code() {
        for &type_code in TypeCode::ALL {
            assert_eq!(type_code, shape_of(type_code).type_code);
            assert_eq!(Some(type_code), TypeCode::from_u8(type_code as u8));
        }

        assert_eq!(None, TypeCode::from_u8(TypeCode::ALL.len() as u8));
    }

    #[test]
    fn payload_sizes() {
        assert_eq!(1 + packed_chars(5), Header::new(TypeCode::Str, 5).record_words());
        assert_eq!(2, Header::new(TypeCode::Real, 1).record_words());
        assert_eq!(2, Header::new(TypeCode::ByteArray, 1).record_words());
        assert_eq!(1, Header::new(TypeCode::Array, 0).record_words());
        assert_eq!(2, Header::new(TypeCode::Array, 0).allocated_words());
        assert_eq!(4, Header::new(TypeCode::Procedure, 0).record_words());
    }

    #[test]
    fn fmt_debug() {
        #[repr(C, align(16))]
        struct Cells([usize; 4]);

        let cells = Cells([Header::new(TypeCode::Real, 1).to_word(), 0, 0, 0]);
        let any = unsafe { &*(cells.0.as_ptr() as *const Any) };
        assert_eq!("Any(Header(Real, 1))", format!("{:?}", any));

        match any.as_value().kind() {
            ValueKind::Object(object) => assert_eq!(TypeCode::Real, object.type_code()),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn round_up() {
        assert_eq!(0, round_up_even(0));
        assert_eq!(2, round_up_even(1));
        assert_eq!(2, round_up_even(2));
        assert_eq!(6, round_up_even(5));
    }
}
