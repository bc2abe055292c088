//! One-word encoding of runtime values
//!
//! Every datum a program can reach is a single machine word. The low two bits of the word are a
//! [`Tag`]:
//!
//! * `00` is an immediate: a shifted integer, character or boolean, or the all-zero `null`
//! * `01` is a header; it only ever appears as the first word of a heap record
//! * `10` is a pair: the address of an untagged two word record minus 2
//! * `11` is an object: the address of a header-prefixed record minus 1
//!
//! Heap records are always aligned to two words so the pointer tags can never collide with
//! address bits. The language is statically typed; an immediate's kind is known from its static
//! type so integers, characters and booleans share the immediate tag. Their payload is stored with
//! its top bit flipped, which leaves the all-zero word free for `null`: no integer, character or
//! boolean ever encodes to it.
//!
//! This module and [`Header`](crate::boxed::Header) are the only places that manipulate tag bits.

use std::fmt;
use std::mem;

use crate::boxed::refs::Gc;
use crate::boxed::{Any, DirectTagged, Pair};

/// Number of low bits reserved for the tag
pub const TAG_BITS: u32 = 2;

const TAG_MASK: usize = (1 << TAG_BITS) - 1;

/// Number of payload bits carried by an immediate
pub const PAYLOAD_BITS: u32 = (mem::size_of::<usize>() as u32) * 8 - TAG_BITS;

/// Flipped in every non-null immediate so zero stays reserved for `null`
const IMMEDIATE_BIAS: usize = 1 << (PAYLOAD_BITS + TAG_BITS - 1);

/// Number of distinct integers an immediate can hold
const INT_RANGE: i128 = (1 << PAYLOAD_BITS) - 1;

/// Alignment in bytes of every heap record
pub const RECORD_ALIGN: usize = 2 * mem::size_of::<usize>();

#[repr(usize)]
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Tag {
    Immediate = 0b00,
    Header = 0b01,
    Pair = 0b10,
    Object = 0b11,
}

impl Tag {
    /// Classifies a raw machine word
    pub fn of_word(word: usize) -> Tag {
        match word & TAG_MASK {
            0b00 => Tag::Immediate,
            0b01 => Tag::Header,
            0b10 => Tag::Pair,
            _ => Tag::Object,
        }
    }

    pub(crate) fn bits(self) -> usize {
        self as usize
    }
}

/// Tagged machine word
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Value(usize);

/// Classified view of a [`Value`]
///
/// This is the form values take at the API boundary; the bit-packed [`Value`] is what lives on
/// the heap and the operand stack.
#[derive(Debug, Clone, Copy)]
pub enum ValueKind {
    Immediate(Value),
    Object(Gc<Any>),
    Pair(Gc<Pair>),
}

impl Value {
    pub const NULL: Value = Value(0);
    pub const FALSE: Value = Value(IMMEDIATE_BIAS);
    pub const TRUE: Value = Value(IMMEDIATE_BIAS | (1 << TAG_BITS));

    /// Smallest integer representable as an immediate
    ///
    /// The most negative payload would encode to `null` so it is not an integer.
    pub const MIN_INT: i64 = -(1 << (PAYLOAD_BITS - 1)) + 1;

    /// Largest integer representable as an immediate
    pub const MAX_INT: i64 = (1 << (PAYLOAD_BITS - 1)) - 1;

    /// Encodes an integer
    ///
    /// Integers outside [`MIN_INT`](Self::MIN_INT)..=[`MAX_INT`](Self::MAX_INT) wrap; use
    /// [`try_from_int`](Self::try_from_int) where the range isn't already known.
    pub fn from_int(value: i64) -> Value {
        debug_assert!(
            (Self::MIN_INT..=Self::MAX_INT).contains(&value),
            "integer {} does not fit in an immediate",
            value
        );

        Self::encode(value)
    }

    fn encode(value: i64) -> Value {
        Value((((value as isize) << TAG_BITS) as usize) ^ IMMEDIATE_BIAS)
    }

    /// Encodes an integer if it fits in an immediate
    pub fn try_from_int(value: i64) -> Option<Value> {
        if (Self::MIN_INT..=Self::MAX_INT).contains(&value) {
            Some(Self::from_int(value))
        } else {
            None
        }
    }

    /// Encodes an integer, wrapping it modulo the size of the immediate range
    pub fn from_int_wrapping(value: i64) -> Value {
        let min = i128::from(Self::MIN_INT);
        let wrapped = (i128::from(value) - min).rem_euclid(INT_RANGE) + min;
        Self::encode(wrapped as i64)
    }

    pub fn as_int(self) -> i64 {
        (((self.0 ^ IMMEDIATE_BIAS) as isize) >> TAG_BITS) as i64
    }

    pub fn from_char(value: char) -> Value {
        Self::encode(i64::from(u32::from(value)))
    }

    pub fn as_char(self) -> char {
        std::char::from_u32(self.as_int() as u32).unwrap_or(std::char::REPLACEMENT_CHARACTER)
    }

    pub fn from_bool(value: bool) -> Value {
        if value {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    /// Decodes a boolean; `null` reads as false
    pub fn as_bool(self) -> bool {
        self == Self::TRUE
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the raw machine word
    pub fn to_bits(self) -> usize {
        self.0
    }

    /// Reinterprets a raw machine word as a value
    pub fn from_bits(bits: usize) -> Value {
        Value(bits)
    }

    pub fn tag(self) -> Tag {
        Tag::of_word(self.0)
    }

    pub fn is_immediate(self) -> bool {
        self.tag() == Tag::Immediate
    }

    pub fn is_object(self) -> bool {
        self.tag() == Tag::Object
    }

    pub fn is_pair(self) -> bool {
        self.tag() == Tag::Pair
    }

    /// Builds an object reference from the address of its header
    pub fn from_object_ptr(ptr: *const usize) -> Value {
        debug_assert_eq!(0, ptr as usize % RECORD_ALIGN, "misaligned object record");
        Value(ptr as usize - 1)
    }

    /// Returns the address of an object's header
    pub fn object_ptr(self) -> *mut usize {
        debug_assert!(self.is_object(), "{:?} is not an object", self);
        (self.0 + 1) as *mut usize
    }

    /// Builds a pair reference from the address of its car
    pub fn from_pair_ptr(ptr: *const usize) -> Value {
        debug_assert_eq!(0, ptr as usize % RECORD_ALIGN, "misaligned pair record");
        Value(ptr as usize - 2)
    }

    /// Returns the address of a pair's car
    pub fn pair_ptr(self) -> *mut usize {
        debug_assert!(self.is_pair(), "{:?} is not a pair", self);
        (self.0 + 2) as *mut usize
    }

    pub fn kind(self) -> ValueKind {
        match self.tag() {
            Tag::Immediate => ValueKind::Immediate(self),
            Tag::Object => ValueKind::Object(unsafe { Gc::new(self.object_ptr() as *const Any) }),
            Tag::Pair => ValueKind::Pair(unsafe { Gc::new(self.pair_ptr() as *const Pair) }),
            Tag::Header => unreachable!("header word {:#x} used as a value", self.0),
        }
    }

    /// Returns the object this value refers to
    pub fn as_any(self) -> Option<Gc<Any>> {
        if self.is_object() {
            Some(unsafe { Gc::new(self.object_ptr() as *const Any) })
        } else {
            None
        }
    }

    /// Returns the pair this value refers to
    pub fn as_pair(self) -> Option<Gc<Pair>> {
        if self.is_pair() {
            Some(unsafe { Gc::new(self.pair_ptr() as *const Pair) })
        } else {
            None
        }
    }

    /// Returns the object this value refers to if it has the type `T`
    pub fn downcast<T: DirectTagged>(self) -> Option<Gc<T>> {
        self.as_any().and_then(|any| any.downcast_ref::<T>())
    }
}

impl Default for Value {
    fn default() -> Value {
        Value::NULL
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.tag() {
            Tag::Immediate if self.is_null() => formatter.write_str("Null"),
            Tag::Immediate => write!(formatter, "Immediate({})", self.as_int()),
            Tag::Object => {
                let any = unsafe { &*(self.object_ptr() as *const Any) };
                write!(
                    formatter,
                    "Object({}@{:#x})",
                    any.header().type_code().to_str(),
                    self.0 + 1
                )
            }
            Tag::Pair => write!(formatter, "Pair({:#x})", self.0 + 2),
            Tag::Header => write!(formatter, "Header({:#x})", self.0),
        }
    }
}
