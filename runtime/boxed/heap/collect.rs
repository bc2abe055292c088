//! Copying collection between semi-spaces
//!
//! This is a Cheney style collector: roots are copied first, then to-space is scanned from its
//! base, copying whatever each scanned record refers to. Records copied during the scan extend
//! the region still to be scanned, so the scan is breadth first and needs no mark stack.

use std::ptr;

use crate::boxed::heap::Space;
use crate::boxed::{DirectTagged, Header, Pair, Tracing, TypeCode};
use crate::hook::HookTable;
use crate::value::{Tag, Value};

/// Forwarding marker written over a record once it has been copied
///
/// For a pair the broken heart's header replaces the car and the forward value replaces the cdr.
#[repr(C)]
pub struct BrokenHeart {
    header: Header,
    forward: Value,
}

impl BrokenHeart {
    /// Returns the record's new location
    pub fn forward(&self) -> Value {
        self.forward
    }

    /// Overwrites the first two words of a copied record
    ///
    /// # Safety
    ///
    /// `dest` must point to a from-space record that has already been copied
    unsafe fn write(dest: *mut usize, forward: Value) {
        (dest as *mut BrokenHeart).write(BrokenHeart {
            header: Header::new(TypeCode::BrokenHeart, 1),
            forward,
        });
    }
}

/// One collection pass from a from-space in to a to-space
///
/// [`visit`](CopyPass::visit) should be called for every root. Once all roots have been visited
/// the heap scans the to-space to copy everything the roots refer to.
pub struct CopyPass<'a> {
    from_base: *const usize,
    from_end: *const usize,
    to_space: &'a mut Space,
    hooks: &'a mut HookTable,
    words_copied: usize,
}

impl<'a> CopyPass<'a> {
    pub(super) fn new(
        from_space: &Space,
        to_space: &'a mut Space,
        hooks: &'a mut HookTable,
    ) -> CopyPass<'a> {
        CopyPass {
            from_base: from_space.base(),
            from_end: from_space.end,
            to_space,
            hooks,
            words_copied: 0,
        }
    }

    /// Replaces a root with its relocated value
    pub fn visit(&mut self, value: &mut Value) {
        *value = self.copy(*value);
    }

    /// Returns the relocated value for `value`, copying its record if needed
    pub fn copy(&mut self, value: Value) -> Value {
        match value.tag() {
            Tag::Immediate => value,
            Tag::Pair => self.copy_pair(value),
            Tag::Object => self.copy_object(value),
            Tag::Header => panic!("header word {:#x} found in a value slot", value.to_bits()),
        }
    }

    /// Returns the number of words copied so far
    pub fn words_copied(&self) -> usize {
        self.words_copied
    }

    fn in_from_space(&self, ptr: *const usize) -> bool {
        ptr >= self.from_base && ptr < self.from_end
    }

    fn reserve(&mut self, words: usize) -> *mut usize {
        self.words_copied += words;
        self.to_space
            .bump(words)
            .unwrap_or_else(|| panic!("to-space overflow while copying {} words", words))
    }

    fn copy_pair(&mut self, value: Value) -> Value {
        let old_location = value.pair_ptr();
        if !self.in_from_space(old_location) {
            return value;
        }

        let car_word = unsafe { *old_location };
        if Tag::of_word(car_word) == Tag::Header {
            return forwarded(old_location);
        }

        let new_location = self.reserve(Pair::WORDS);
        unsafe {
            ptr::copy_nonoverlapping(old_location, new_location, Pair::WORDS);
        }

        let new_value = Value::from_pair_ptr(new_location);
        unsafe { BrokenHeart::write(old_location, new_value) };
        new_value
    }

    fn copy_object(&mut self, value: Value) -> Value {
        let old_location = value.object_ptr();
        if !self.in_from_space(old_location) {
            // Static procedure descriptors and other records outside the heap
            return value;
        }

        let header = Header::from_word(unsafe { *old_location });
        let shape = header.shape();

        match shape.tracing {
            Tracing::Forward => return forwarded(old_location),
            Tracing::Static => panic!("{:?} allocated in a semi-space", header),
            Tracing::Opaque | Tracing::Values | Tracing::Prefix(_) => {}
        }

        let record_words = header.record_words();
        let new_location = self.reserve(header.allocated_words());
        unsafe {
            ptr::copy_nonoverlapping(old_location, new_location, record_words);
        }

        let new_value = Value::from_object_ptr(new_location);

        if shape.hooked {
            let hook_word = Value::from_bits(unsafe { *new_location.add(2) });
            self.hooks.relocated(hook_word, new_value);
        }

        unsafe { BrokenHeart::write(old_location, new_value) };
        new_value
    }

    /// Copies everything reachable from the records already in to-space
    pub(super) fn trace(&mut self) {
        let mut scan = self.to_space.base();

        while scan < self.to_space.next {
            let first_word = unsafe { *scan };

            if Tag::of_word(first_word) != Tag::Header {
                // Pairs are the only headerless records
                unsafe {
                    self.visit_word(scan);
                    self.visit_word(scan.add(1));
                    scan = scan.add(Pair::WORDS);
                }
                continue;
            }

            let header = Header::from_word(first_word);
            let shape = header.shape();

            let traced_words = match shape.tracing {
                Tracing::Opaque => 0,
                Tracing::Values => shape.payload_words(header.size()),
                Tracing::Prefix(count) => count,
                Tracing::Forward => panic!("broken heart reached while scanning to-space"),
                Tracing::Static => panic!("{:?} found in to-space", header),
            };

            for i in 0..traced_words {
                unsafe { self.visit_word(scan.add(1 + i)) };
            }

            scan = unsafe { scan.add(header.allocated_words()) };
        }
    }

    unsafe fn visit_word(&mut self, slot: *mut usize) {
        let value = Value::from_bits(*slot);
        *slot = self.copy(value).to_bits();
    }
}

fn forwarded(old_location: *mut usize) -> Value {
    let broken_heart = unsafe { &*(old_location as *const BrokenHeart) };
    debug_assert_eq!(TypeCode::BrokenHeart, broken_heart.header().type_code());

    let forward = broken_heart.forward();
    debug_assert!(
        forward
            .as_any()
            .map(|any| any.type_code() != TypeCode::BrokenHeart)
            .unwrap_or(true),
        "forward pointer to a forward pointer"
    );

    forward
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::boxed::heap::Heap;
    use crate::boxed::{Any, Array, CVar, Env, Procedure, Str};
    use crate::config::HeapConfig;
    use crate::roots::RootSet;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn test_heap() -> Heap {
        Heap::new(HeapConfig {
            initial_words: 256,
            max_words: 256,
            ..HeapConfig::default()
        })
    }

    fn ensure(heap: &mut Heap, words: usize) {
        heap.ensure(words, &mut Vec::<Value>::new(), &mut HookTable::new())
            .expect("heap exhausted");
    }

    fn cons(heap: &mut Heap, car: Value, cdr: Value) -> Value {
        ensure(heap, Pair::WORDS);
        unsafe { Pair::init(heap.allocate(Pair::WORDS), car, cdr) }
    }

    fn int_array(heap: &mut Heap, values: &[i64]) -> Value {
        let words = Array::record_words(values.len());
        ensure(heap, words);
        unsafe {
            Array::init(
                heap.allocate(words),
                values.iter().map(|&n| Value::from_int(n)),
            )
        }
    }

    fn collect(heap: &mut Heap, roots: &mut dyn RootSet) {
        heap.collect(0, roots, &mut HookTable::new());
    }

    #[test]
    fn immediates_unchanged() {
        let mut heap = test_heap();
        let mut roots = vec![Value::from_int(-5), Value::from_char('x'), Value::TRUE, Value::NULL];
        let expected = roots.clone();

        collect(&mut heap, &mut roots);
        assert_eq!(expected, roots);
    }

    #[test]
    fn three_element_array() {
        let mut heap = test_heap();
        let array = int_array(&mut heap, &[1, 2, 3]);
        let mut roots = vec![array];

        collect(&mut heap, &mut roots);

        let moved = roots[0];
        assert_ne!(array, moved);
        assert!(heap.contains(moved));
        assert!(!heap.contains(array));

        let elements: Vec<i64> = moved
            .downcast::<Array>()
            .unwrap()
            .iter()
            .map(Value::as_int)
            .collect();
        assert_eq!(vec![1, 2, 3], elements);

        // The old location now forwards to the new one
        let old = unsafe { &*(array.object_ptr() as *const Any) };
        assert_eq!(TypeCode::BrokenHeart, old.type_code());
        assert_eq!(moved, old.downcast_ref::<BrokenHeart>().unwrap().forward());
    }

    #[test]
    fn forwarding_is_idempotent() {
        let mut heap = test_heap();
        let shared = int_array(&mut heap, &[7]);
        let pair = cons(&mut heap, shared, shared);
        let mut roots = vec![shared, pair, shared, pair];

        collect(&mut heap, &mut roots);

        assert_eq!(roots[0], roots[2]);
        assert_eq!(roots[1], roots[3]);

        let moved_pair = roots[1].as_pair().unwrap();
        assert_eq!(roots[0], moved_pair.car());
        assert_eq!(roots[0], moved_pair.cdr());

        // 2 words for the array and 2 for the pair
        assert_eq!(4, heap.used_words());
    }

    #[test]
    fn cycles_through_pairs_and_envs() {
        let mut heap = test_heap();

        let words = Env::record_words(1);
        ensure(&mut heap, words);
        let env = unsafe { Env::init(heap.allocate(words), Value::NULL, 1) };

        let pair = cons(&mut heap, Value::from_int(1), env);
        env.downcast::<Env>().unwrap().set_slot(0, pair);
        let self_pair = cons(&mut heap, Value::from_int(2), Value::NULL);
        self_pair.as_pair().unwrap().set_cdr(self_pair);

        let mut roots = vec![env, self_pair];
        for _ in 0..3 {
            collect(&mut heap, &mut roots);
        }

        let env = roots[0].downcast::<Env>().unwrap();
        let pair = env.slot(0).unwrap().as_pair().unwrap();
        assert_eq!(1, pair.car().as_int());
        assert_eq!(roots[0], pair.cdr());
        assert!(heap.contains(pair.as_value()));

        let self_pair = roots[1].as_pair().unwrap();
        assert_eq!(roots[1], self_pair.cdr());
        assert_eq!(2, self_pair.car().as_int());
    }

    #[test]
    fn garbage_is_dropped() {
        let mut heap = test_heap();
        let kept = int_array(&mut heap, &[1]);
        for _ in 0..10 {
            int_array(&mut heap, &[0, 0, 0]);
        }

        let mut roots = vec![kept];
        collect(&mut heap, &mut roots);

        assert_eq!(2, heap.used_words());
        assert_eq!(1, heap.stats().collections);
        assert_eq!(40, heap.stats().words_reclaimed);
    }

    #[test]
    fn strings_survive() {
        let mut heap = test_heap();
        let words = Str::record_words(5);
        ensure(&mut heap, words);
        let hello = unsafe { Str::init(heap.allocate(words), "héllo") };

        let mut roots = vec![hello];
        collect(&mut heap, &mut roots);

        assert_eq!("héllo", roots[0].downcast::<Str>().unwrap().to_string());
    }

    #[test]
    fn static_records_stay_put() {
        use crate::boxed::DebugInfo;
        use crate::engine::Engine;
        use crate::error::Fatal;

        static DEBUG_INFO: DebugInfo = DebugInfo::new("static");
        fn dispatch(_: &mut Engine, _: crate::boxed::refs::Gc<Procedure>) -> Result<bool, Fatal> {
            Ok(false)
        }
        static PROCEDURE: Procedure = Procedure::native(dispatch, &DEBUG_INFO, 0);

        let mut heap = test_heap();
        let pair = cons(&mut heap, PROCEDURE.as_value(), Value::NULL);
        let mut roots = vec![PROCEDURE.as_value(), pair];

        collect(&mut heap, &mut roots);
        assert_eq!(PROCEDURE.as_value(), roots[0]);
        assert_eq!(PROCEDURE.as_value(), roots[1].as_pair().unwrap().car());
    }

    #[test]
    fn hooks_see_relocation() {
        let mut heap = test_heap();
        let mut hooks = HookTable::new();

        heap.ensure(CVar::RECORD_WORDS, &mut Vec::<Value>::new(), &mut hooks)
            .unwrap();
        let cvar = unsafe { CVar::init(heap.allocate(CVar::RECORD_WORDS), Value::from_int(3)) };

        let seen = Rc::new(RefCell::new(vec![]));
        let seen_by_hook = seen.clone();
        let hook_word = hooks.attach(Box::new(move |variable: Value| {
            seen_by_hook.borrow_mut().push(variable)
        }));
        cvar.downcast::<CVar>().unwrap().set_hook(hook_word);

        let mut roots = vec![cvar];
        heap.collect(0, &mut roots, &mut hooks);
        heap.collect(0, &mut roots, &mut hooks);

        let moved = roots[0].downcast::<CVar>().unwrap();
        assert_eq!(3, moved.value().as_int());
        assert_eq!(hook_word, moved.hook());
        assert_eq!(2, seen.borrow().len());
        assert_eq!(Some(&roots[0]), seen.borrow().last());

        roots.clear();
        heap.collect(0, &mut roots, &mut hooks);
        assert!(hooks.is_empty());
        assert_eq!(2, seen.borrow().len());
    }
}
