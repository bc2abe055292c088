use std::cell::Cell;
use std::fmt;
use std::iter::FusedIterator;

use crate::boxed::Boxed;
use crate::value::Value;

/// Headerless two word record
///
/// Pairs are told apart from objects by their value tag alone. They make up lists: a list is
/// either `null` or a pair whose cdr is a list.
#[repr(C)]
pub struct Pair {
    car: Cell<Value>,
    cdr: Cell<Value>,
}

impl Boxed for Pair {}

impl Pair {
    /// Number of words in every pair
    pub const WORDS: usize = 2;

    pub fn car(&self) -> Value {
        self.car.get()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.get()
    }

    pub fn set_car(&self, value: Value) {
        self.car.set(value)
    }

    pub fn set_cdr(&self, value: Value) {
        self.cdr.set(value)
    }

    pub fn as_value(&self) -> Value {
        Value::from_pair_ptr(self as *const Pair as *const usize)
    }

    /// Writes a pair to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least two writable words
    pub(crate) unsafe fn init(dest: *mut usize, car: Value, cdr: Value) -> Value {
        *dest = car.to_bits();
        *dest.add(1) = cdr.to_bits();
        Value::from_pair_ptr(dest)
    }
}

impl fmt::Debug for Pair {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(formatter, "Pair({:?}, {:?})", self.car(), self.cdr())
    }
}

/// Iterator over the cars of a `null` terminated list
pub struct ListIterator {
    head: Value,
}

impl ListIterator {
    pub fn new(list: Value) -> ListIterator {
        ListIterator { head: list }
    }
}

impl Iterator for ListIterator {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let pair = self.head.as_pair()?;
        self.head = pair.cdr();
        Some(pair.car())
    }
}

impl FusedIterator for ListIterator {}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem;

    #[repr(C, align(16))]
    struct Cells([usize; 4]);

    #[test]
    fn sizes() {
        assert_eq!(Pair::WORDS * mem::size_of::<usize>(), mem::size_of::<Pair>());
    }

    #[test]
    fn construct_and_iter() {
        let mut cells = Cells([0; 4]);
        let base = cells.0.as_mut_ptr();

        let list = unsafe {
            let tail = Pair::init(base.add(2), Value::from_int(2), Value::NULL);
            Pair::init(base, Value::from_int(1), tail)
        };

        let values: Vec<i64> = ListIterator::new(list).map(Value::as_int).collect();
        assert_eq!(vec![1, 2], values);

        let head = list.as_pair().unwrap();
        head.set_car(Value::from_int(7));
        assert_eq!(7, head.car().as_int());
        assert_eq!(list, head.as_value());
    }
}
