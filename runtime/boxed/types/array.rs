use std::cell::Cell;
use std::fmt;
use std::ptr;

use crate::boxed::types::packed_words;
use crate::boxed::{payload, Header, TypeCode};
use crate::value::Value;

/// Fixed length array of traced values
///
/// Tuples and data variants are arrays too; a variant keeps its discriminant in element 0.
#[repr(C)]
pub struct Array {
    header: Header,
}

impl Array {
    pub fn record_words(len: usize) -> usize {
        1 + len
    }

    pub fn len(&self) -> usize {
        self.header.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> &[Cell<Value>] {
        unsafe { payload(self, 0, self.len()) }
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.values().get(index).map(Cell::get)
    }

    /// Stores a value, returning false if `index` is out of bounds
    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.values().get(index) {
            Some(cell) => {
                cell.set(value);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Value> + '_ {
        self.values().iter().map(Cell::get)
    }

    /// Writes an array to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `Array::record_words(values.len())` writable words
    pub(crate) unsafe fn init(
        dest: *mut usize,
        values: impl ExactSizeIterator<Item = Value>,
    ) -> Value {
        let len = values.len();
        for (i, value) in values.enumerate() {
            *dest.add(1 + i) = value.to_bits();
        }

        *dest = Header::new(TypeCode::Array, len).to_word();
        Value::from_object_ptr(dest)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        formatter.write_str("Array(")?;
        formatter.debug_list().entries(self.iter()).finish()?;
        formatter.write_str(")")
    }
}

/// Fixed length array of untraced machine words
#[repr(C)]
pub struct RawArray {
    header: Header,
}

impl RawArray {
    pub fn record_words(len: usize) -> usize {
        1 + len
    }

    pub fn len(&self) -> usize {
        self.header.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn words(&self) -> &[Cell<usize>] {
        unsafe { payload(self, 0, self.len()) }
    }

    /// Writes a zeroed raw array to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `RawArray::record_words(len)` writable words
    pub(crate) unsafe fn init_zeroed(dest: *mut usize, len: usize) -> Value {
        ptr::write_bytes(dest.add(1), 0, len);
        *dest = Header::new(TypeCode::RawArray, len).to_word();
        Value::from_object_ptr(dest)
    }
}

/// Fixed length array of bytes
#[repr(C)]
pub struct ByteArray {
    header: Header,
}

impl ByteArray {
    pub fn record_words(len: usize) -> usize {
        1 + packed_words::<u8>(len)
    }

    pub fn len(&self) -> usize {
        self.header.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[Cell<u8>] {
        unsafe { payload(self, 0, self.len()) }
    }

    /// Writes a byte array to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `ByteArray::record_words(bytes.len())` writable words
    pub(crate) unsafe fn init(dest: *mut usize, bytes: &[u8]) -> Value {
        ptr::write_bytes(dest.add(1), 0, packed_words::<u8>(bytes.len()));
        ptr::copy_nonoverlapping(bytes.as_ptr(), dest.add(1) as *mut u8, bytes.len());

        *dest = Header::new(TypeCode::ByteArray, bytes.len()).to_word();
        Value::from_object_ptr(dest)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[repr(C, align(16))]
    struct Cells([usize; 8]);

    #[test]
    fn get_and_set() {
        let mut cells = Cells([0; 8]);
        let boxed = unsafe {
            Array::init(
                cells.0.as_mut_ptr(),
                [1, 2, 3].iter().map(|&n| Value::from_int(n)),
            )
        };

        let array = boxed.downcast::<Array>().unwrap();
        assert_eq!(3, array.len());
        assert_eq!(Some(Value::from_int(2)), array.get(1));
        assert_eq!(None, array.get(3));

        assert!(array.set(0, Value::TRUE));
        assert!(!array.set(3, Value::TRUE));
        assert_eq!(Some(Value::TRUE), array.get(0));
    }

    #[test]
    fn fmt_debug() {
        let mut cells = Cells([0; 8]);
        let boxed = unsafe {
            Array::init(
                cells.0.as_mut_ptr(),
                [7].iter().map(|&n| Value::from_int(n)),
            )
        };

        assert_eq!(
            "Array([Immediate(7)])",
            format!("{:?}", boxed.downcast::<Array>().unwrap())
        );
    }

    #[test]
    fn bytes() {
        let mut cells = Cells([usize::MAX; 8]);
        let boxed = unsafe { ByteArray::init(cells.0.as_mut_ptr(), b"abc") };

        let bytes = boxed.downcast::<ByteArray>().unwrap();
        let copied: Vec<u8> = bytes.bytes().iter().map(Cell::get).collect();
        assert_eq!(b"abc".to_vec(), copied);
        assert_eq!(2, ByteArray::record_words(3));
    }

    #[test]
    fn raw_words() {
        let mut cells = Cells([usize::MAX; 8]);
        let boxed = unsafe { RawArray::init_zeroed(cells.0.as_mut_ptr(), 4) };

        let raw = boxed.downcast::<RawArray>().unwrap();
        assert!(raw.words().iter().all(|word| word.get() == 0));
        raw.words()[2].set(0xdead_beef);
        assert_eq!(0xdead_beef, raw.words()[2].get());
    }
}
