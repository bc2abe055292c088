//! Semi-space heap
//!
//! Allocation bumps a pointer through the active semi-space. When a request doesn't fit the
//! collector copies everything reachable in to the other semi-space and the two swap roles.

pub mod collect;

use std::time::{Duration, Instant};

use crate::boxed::heap::collect::CopyPass;
use crate::boxed::round_up_even;
use crate::config::HeapConfig;
use crate::error::HeapExhausted;
use crate::hook::HookTable;
use crate::roots::RootSet;
use crate::value::Value;

/// Two word allocation granule
///
/// Backing a space with granules keeps every record aligned so the pointer tags never collide
/// with address bits.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Granule([usize; 2]);

/// One semi-space
///
/// This has a pointer-based representation so the bump allocator is a compare and an add.
pub struct Space {
    next: *mut usize,
    end: *mut usize,
    backing: Vec<Granule>,
}

impl Space {
    /// Creates a new space with capacity for `words` words
    fn with_capacity(words: usize) -> Space {
        let mut backing = vec![Granule([0, 0]); round_up_even(words) / 2];
        let next = backing.as_mut_ptr() as *mut usize;

        Space {
            next,
            end: unsafe { next.add(backing.len() * 2) },
            backing,
        }
    }

    fn base(&self) -> *mut usize {
        self.backing.as_ptr() as *mut usize
    }

    pub fn capacity_words(&self) -> usize {
        self.backing.len() * 2
    }

    pub fn used_words(&self) -> usize {
        (self.next as usize - self.base() as usize) / std::mem::size_of::<usize>()
    }

    pub fn free_words(&self) -> usize {
        self.capacity_words() - self.used_words()
    }

    pub fn contains(&self, ptr: *const usize) -> bool {
        ptr >= self.base() as *const usize && ptr < self.end as *const usize
    }

    fn reset(&mut self) {
        self.next = self.base();
    }

    /// Returns contiguous memory for `words` words or `None` if the space is full
    ///
    /// `words` must already be rounded to the allocation granule.
    fn bump(&mut self, words: usize) -> Option<*mut usize> {
        debug_assert_eq!(0, words % 2);

        if words > self.free_words() {
            None
        } else {
            let current_next = self.next;
            self.next = unsafe { self.next.add(words) };
            Some(current_next)
        }
    }
}

/// Collector counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeapStats {
    pub collections: u64,
    pub words_copied: u64,
    pub words_reclaimed: u64,
    pub gc_time: Duration,
    /// Largest semi-space capacity reached
    pub peak_capacity_words: usize,
}

/// Heap of garbage collected records
pub struct Heap {
    spaces: [Space; 2],
    active: usize,
    config: HeapConfig,
    /// Capacity the active space adopts once it becomes inactive
    pending_capacity: Option<usize>,
    /// Words guaranteed by the last successful `ensure`
    ensured: usize,
    gc_messages: bool,
    stats: HeapStats,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Heap {
        let initial_words = config.clamped_initial_words();

        Heap {
            spaces: [
                Space::with_capacity(initial_words),
                Space::with_capacity(initial_words),
            ],
            active: 0,
            config,
            pending_capacity: None,
            ensured: 0,
            gc_messages: false,
            stats: HeapStats {
                peak_capacity_words: initial_words,
                ..HeapStats::default()
            },
        }
    }

    /// Logs every collection at `info` instead of `debug`
    pub fn set_gc_messages(&mut self, gc_messages: bool) {
        self.gc_messages = gc_messages;
    }

    fn active_space(&self) -> &Space {
        &self.spaces[self.active]
    }

    fn inactive_space(&self) -> &Space {
        &self.spaces[1 - self.active]
    }

    pub fn capacity_words(&self) -> usize {
        self.active_space().capacity_words()
    }

    pub fn inactive_capacity_words(&self) -> usize {
        self.inactive_space().capacity_words()
    }

    pub fn used_words(&self) -> usize {
        self.active_space().used_words()
    }

    pub fn free_words(&self) -> usize {
        self.active_space().free_words()
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    /// Returns true if `value` refers to a record in the active space
    pub fn contains(&self, value: Value) -> bool {
        let ptr = if value.is_object() {
            value.object_ptr()
        } else if value.is_pair() {
            value.pair_ptr()
        } else {
            return false;
        };

        self.active_space().contains(ptr)
    }

    /// Allocates space for `words` contiguous words
    ///
    /// The caller initialises every word. This must be preceded by an [`ensure`](Self::ensure)
    /// covering the request.
    pub fn allocate(&mut self, words: usize) -> *mut usize {
        let words = round_up_even(words);
        debug_assert!(
            words <= self.ensured,
            "allocation of {} words exceeds the {} ensured words",
            words,
            self.ensured
        );
        self.ensured = self.ensured.saturating_sub(words);

        let active = self.active;
        self.spaces[active]
            .bump(words)
            .unwrap_or_else(|| panic!("allocation of {} words overflowed the heap", words))
    }

    /// Guarantees that the next `words` words of allocation succeed
    ///
    /// Collects as many times as needed while the heap can still grow. Every value not reachable
    /// from `roots` is invalidated by a collection.
    pub fn ensure(
        &mut self,
        words: usize,
        roots: &mut dyn RootSet,
        hooks: &mut HookTable,
    ) -> Result<(), HeapExhausted> {
        let words = round_up_even(words);

        while self.free_words() < words {
            self.collect(words, roots, hooks);

            if self.free_words() >= words {
                break;
            }

            // Another flip only helps if the other space is now larger
            if self.inactive_capacity_words() <= self.capacity_words() {
                log::debug!(
                    "heap exhausted requesting {} words at capacity {}",
                    words,
                    self.capacity_words()
                );

                return Err(HeapExhausted {
                    requested: words,
                    capacity: self.capacity_words(),
                });
            }
        }

        self.ensured = words;
        Ok(())
    }

    /// Runs a full collection
    ///
    /// `requested` is the size of the allocation that triggered the collection; it counts
    /// towards the occupancy used by the growth policy.
    pub fn collect(&mut self, requested: usize, roots: &mut dyn RootSet, hooks: &mut HookTable) {
        let start = Instant::now();
        let used_before = self.used_words();

        // Flip
        self.active = 1 - self.active;
        self.spaces[self.active].reset();

        let live_words = {
            let [first, second] = &mut self.spaces;
            let (from_space, to_space) = if self.active == 0 {
                (&*second, first)
            } else {
                (&*first, second)
            };

            hooks.begin_collection();

            let mut pass = CopyPass::new(from_space, to_space, hooks);
            roots.visit_roots(&mut pass);
            pass.trace();
            pass.words_copied()
        };

        let dropped_hooks = hooks.finish_collection();
        if dropped_hooks > 0 {
            log::debug!("dropped {} hooks of dead variables", dropped_hooks);
        }

        let inactive = 1 - self.active;
        if let Some(pending) = self.pending_capacity.take() {
            if pending > self.spaces[inactive].capacity_words() {
                self.spaces[inactive] = Space::with_capacity(pending);
            }
        }

        self.apply_growth_policy(live_words, requested);

        let elapsed = start.elapsed();
        self.stats.collections += 1;
        self.stats.words_copied += live_words as u64;
        self.stats.words_reclaimed += used_before.saturating_sub(live_words) as u64;
        self.stats.gc_time += elapsed;
        self.stats.peak_capacity_words = self
            .stats
            .peak_capacity_words
            .max(self.inactive_capacity_words());

        let level = if self.gc_messages {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        log::log!(
            level,
            "collection {}: {} words live of {} used, capacity {}/{} words, {:?}",
            self.stats.collections,
            live_words,
            used_before,
            self.capacity_words(),
            self.inactive_capacity_words(),
            elapsed
        );
    }

    /// Grows the inactive space now and schedules the active space to follow
    fn apply_growth_policy(&mut self, live_words: usize, requested: usize) {
        let HeapConfig {
            max_words,
            grow_increment_words,
            grow_numerator,
            grow_denominator,
            ..
        } = self.config;

        let capacity = self.capacity_words();
        let needed = live_words + requested;

        if needed * grow_denominator <= capacity * grow_numerator || capacity >= max_words {
            return;
        }

        let increment = grow_increment_words.max(needed.saturating_sub(capacity));
        let new_capacity = round_up_even(max_words.min(capacity + increment));

        let inactive = 1 - self.active;
        if new_capacity > self.spaces[inactive].capacity_words() {
            log::debug!(
                "growing heap from {} to {} words for {} needed words",
                capacity,
                new_capacity,
                needed
            );

            self.spaces[inactive] = Space::with_capacity(new_capacity);
        }

        self.pending_capacity = Some(new_capacity);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::boxed::{Header, Pair, TypeCode};

    fn small_config(initial_words: usize, max_words: usize) -> HeapConfig {
        HeapConfig {
            initial_words,
            max_words,
            grow_increment_words: 16,
            ..HeapConfig::default()
        }
    }

    fn alloc_pair(heap: &mut Heap, roots: &mut Vec<Value>, car: Value, cdr: Value) -> Value {
        heap.ensure(Pair::WORDS, roots, &mut HookTable::new())
            .expect("heap exhausted");
        unsafe { Pair::init(heap.allocate(Pair::WORDS), car, cdr) }
    }

    /// Conses `car` on to the list rooted in `roots[0]`
    fn push_rooted(heap: &mut Heap, roots: &mut Vec<Value>, car: Value) {
        heap.ensure(Pair::WORDS, roots, &mut HookTable::new())
            .expect("heap exhausted");

        // The tail may only be read once the collection has moved it
        roots[0] = unsafe { Pair::init(heap.allocate(Pair::WORDS), car, roots[0]) };
    }

    #[test]
    fn bump_alloc() {
        let mut heap = Heap::new(small_config(8, 8));
        let mut roots = vec![];

        let first = alloc_pair(&mut heap, &mut roots, Value::from_int(1), Value::NULL);
        let second = alloc_pair(&mut heap, &mut roots, Value::from_int(2), first);

        assert_eq!(4, heap.used_words());
        assert!(heap.contains(first));
        assert!(heap.contains(second));
        assert!(!heap.contains(Value::from_int(1)));
        assert_eq!(0, heap.stats().collections);
    }

    #[test]
    fn collects_garbage_before_growing() {
        let mut heap = Heap::new(small_config(8, 8));
        let mut roots = vec![];

        for i in 0..100 {
            alloc_pair(&mut heap, &mut roots, Value::from_int(i), Value::NULL);
        }

        assert!(heap.stats().collections > 0);
        assert_eq!(8, heap.capacity_words());
    }

    #[test]
    fn growth_is_monotone_and_bounded() {
        let mut heap = Heap::new(small_config(8, 64));
        let mut roots = vec![Value::NULL];

        let mut last_capacity = heap.capacity_words();
        for i in 0..24 {
            push_rooted(&mut heap, &mut roots, Value::from_int(i));

            assert!(heap.capacity_words() >= last_capacity);
            assert!(heap.capacity_words() <= 64);
            last_capacity = heap.capacity_words();
        }

        // 24 live pairs need 48 words
        assert!(heap.capacity_words() >= 48);
        assert!(heap.stats().peak_capacity_words <= 64);

        let values: Vec<i64> = crate::boxed::ListIterator::new(roots[0])
            .map(Value::as_int)
            .collect();
        assert_eq!((0..24).rev().collect::<Vec<i64>>(), values);
    }

    #[test]
    fn exhausted_at_maximum() {
        let mut heap = Heap::new(small_config(8, 16));
        let mut roots = vec![Value::NULL];

        let mut result = Ok(());
        for i in 0..16 {
            result = heap.ensure(Pair::WORDS, &mut roots, &mut HookTable::new());
            if result.is_err() {
                break;
            }

            roots[0] =
                unsafe { Pair::init(heap.allocate(Pair::WORDS), Value::from_int(i), roots[0]) };
        }

        let err = result.unwrap_err();
        assert_eq!(2, err.requested);
        assert_eq!(16, err.capacity);
    }

    #[test]
    fn oversized_request_fails() {
        let mut heap = Heap::new(small_config(8, 32));
        let result = heap.ensure(
            Header::new(TypeCode::Array, 40).allocated_words(),
            &mut Vec::<Value>::new(),
            &mut HookTable::new(),
        );

        assert!(result.is_err());
        assert_eq!(32, heap.capacity_words());
    }
}
