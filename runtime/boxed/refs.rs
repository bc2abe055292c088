use std::ops::Deref;
use std::ptr;
use std::{fmt, hash};

use crate::boxed::Boxed;

/// Reference to a garbage collected record
///
/// This is not memory safe and does not GC root; it's just sugar for a raw pointer. A `Gc` held
/// across an allocation may be left pointing at from-space; keep the owning [`Value`] in a root
/// instead.
///
/// [`Value`]: crate::value::Value
#[repr(transparent)]
pub struct Gc<T: Boxed> {
    inner: ptr::NonNull<T>,
}

/// Manual Clone implementation to work around Rust issue #26925
impl<T: Boxed> Clone for Gc<T> {
    fn clone(&self) -> Self {
        Gc { inner: self.inner }
    }
}

impl<T: Boxed> Copy for Gc<T> {}

impl<T: Boxed> Deref for Gc<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { self.inner.as_ref() }
    }
}

impl<T: Boxed> Gc<T> {
    /// Wraps a pointer to a record
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and point to a live record of type `T`
    pub unsafe fn new(ptr: *const T) -> Gc<T> {
        Gc {
            inner: ptr::NonNull::new_unchecked(ptr as *mut T),
        }
    }

    /// Reinterprets this reference as another record type
    ///
    /// # Safety
    ///
    /// The record must actually have the layout of `U`
    pub unsafe fn cast<U: Boxed>(self) -> Gc<U> {
        Gc {
            inner: self.inner.cast::<U>(),
        }
    }

    pub fn as_ptr(self) -> *const T {
        self.inner.as_ptr()
    }

    pub(crate) fn as_word_ptr(self) -> *mut usize {
        self.inner.as_ptr() as *mut usize
    }
}

impl<T: Boxed> PartialEq for Gc<T> {
    fn eq(&self, other: &Gc<T>) -> bool {
        self.inner == other.inner
    }
}

impl<T: Boxed> Eq for Gc<T> {}

impl<T: Boxed> hash::Hash for Gc<T> {
    fn hash<H: hash::Hasher>(&self, hasher: &mut H) {
        self.inner.hash(hasher)
    }
}

impl<T: Boxed> fmt::Debug for Gc<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        unsafe { (*self.as_ptr()).fmt(formatter) }
    }
}
