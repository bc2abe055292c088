pub mod array;
pub mod closure;
pub mod cont;
pub mod cvar;
pub mod env;
pub mod long;
pub mod pair;
pub mod procedure;
pub mod real;
pub mod solver;
pub mod str;

use std::mem;

/// Returns the number of words needed to pack `len` elements of `T`
pub(crate) fn packed_words<T>(len: usize) -> usize {
    let per_word = mem::size_of::<usize>() / mem::size_of::<T>();
    (len + per_word - 1) / per_word
}
