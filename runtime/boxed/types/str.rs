use std::fmt;
use std::ptr;

use crate::boxed::types::packed_words;
use crate::boxed::{payload, Header, TypeCode};
use crate::value::Value;

/// Immutable string of Unicode scalar values
///
/// The header's size is the length in characters. Characters are stored as 32 bit code points
/// packed into the payload so any character can be reached in constant time.
#[repr(C)]
pub struct Str {
    header: Header,
}

impl Str {
    /// Returns the number of words a string of `len` characters occupies including its header
    pub fn record_words(len: usize) -> usize {
        1 + packed_words::<u32>(len)
    }

    /// Returns the length in characters
    pub fn len(&self) -> usize {
        self.header.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn code_points(&self) -> &[u32] {
        unsafe { payload(self, 0, self.len()) }
    }

    pub fn chars(&self) -> impl ExactSizeIterator<Item = char> + '_ {
        self.code_points()
            .iter()
            .map(|&c| std::char::from_u32(c).unwrap_or(std::char::REPLACEMENT_CHARACTER))
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        self.code_points()
            .get(index)
            .and_then(|&c| std::char::from_u32(c))
    }

    /// Writes a string to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `Str::record_words(value.chars().count())` writable words
    pub(crate) unsafe fn init(dest: *mut usize, value: &str) -> Value {
        Self::init_from_chars(dest, value.chars().count(), value.chars())
    }

    /// Writes the concatenation of two strings to freshly allocated memory
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `Str::record_words(lhs.len() + rhs.len())` writable words
    pub(crate) unsafe fn init_concat(dest: *mut usize, lhs: &Str, rhs: &Str) -> Value {
        let len = lhs.len() + rhs.len();
        let code_points = dest.add(1) as *mut u32;

        ptr::write_bytes(dest.add(1), 0, packed_words::<u32>(len));
        ptr::copy_nonoverlapping(lhs.code_points().as_ptr(), code_points, lhs.len());
        ptr::copy_nonoverlapping(
            rhs.code_points().as_ptr(),
            code_points.add(lhs.len()),
            rhs.len(),
        );

        *dest = Header::new(TypeCode::Str, len).to_word();
        Value::from_object_ptr(dest)
    }

    unsafe fn init_from_chars(
        dest: *mut usize,
        len: usize,
        chars: impl Iterator<Item = char>,
    ) -> Value {
        let code_points = dest.add(1) as *mut u32;

        // Zero the final word's padding
        ptr::write_bytes(dest.add(1), 0, packed_words::<u32>(len));
        for (i, c) in chars.enumerate() {
            *code_points.add(i) = c as u32;
        }

        *dest = Header::new(TypeCode::Str, len).to_word();
        Value::from_object_ptr(dest)
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Str) -> bool {
        self.code_points() == other.code_points()
    }
}

impl fmt::Display for Str {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use fmt::Write;
        self.chars().try_for_each(|c| formatter.write_char(c))
    }
}

impl fmt::Debug for Str {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(formatter, "Str({:?})", self.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[repr(C, align(16))]
    struct Cells([usize; 16]);

    fn with_str<R>(value: &str, f: impl FnOnce(&Str) -> R) -> R {
        let mut cells = Cells([0; 16]);
        let boxed = unsafe { Str::init(cells.0.as_mut_ptr(), value) };
        f(&boxed.downcast::<Str>().unwrap())
    }

    #[test]
    fn round_trip() {
        for &test_str in &["", "1", "smallinline", "wide chars: é ✓ 🦀"] {
            with_str(test_str, |boxed| {
                assert_eq!(test_str.chars().count(), boxed.len());
                assert_eq!(test_str, boxed.to_string());
            });
        }
    }

    #[test]
    fn char_at() {
        with_str("añb", |boxed| {
            assert_eq!(Some('ñ'), boxed.char_at(1));
            assert_eq!(None, boxed.char_at(3));
        });
    }

    #[test]
    fn concat() {
        let mut lhs_cells = Cells([0; 16]);
        let mut rhs_cells = Cells([0; 16]);
        let mut dest_cells = Cells([0; 16]);

        unsafe {
            let lhs = Str::init(lhs_cells.0.as_mut_ptr(), "null-");
            let rhs = Str::init(rhs_cells.0.as_mut_ptr(), "pointer");
            let joined = Str::init_concat(
                dest_cells.0.as_mut_ptr(),
                &lhs.downcast::<Str>().unwrap(),
                &rhs.downcast::<Str>().unwrap(),
            );

            assert_eq!("null-pointer", joined.downcast::<Str>().unwrap().to_string());
        }
    }

    #[test]
    fn fmt_debug() {
        with_str("one", |boxed| assert_eq!(r#"Str("one")"#, format!("{:?}", boxed)));
    }
}
