//! Allocation entry points used by compiled code and the solvers
//!
//! Any of these may collect. Values passed in are kept alive across the collection by pushing
//! them on the operand stack; values held anywhere else that isn't a root are stale afterwards.

use crate::boxed::types::solver;
use crate::boxed::{
    round_up_even, Array, ByteArray, CVar, Closure, Continuation, Env, Long, Pair, RawArray, Real,
    Str, TypeCode,
};
use crate::engine::{Engine, ExceptionName};
use crate::error::Fatal;
use crate::hook::VariableHook;
use crate::value::Value;

impl Engine {
    /// Guarantees that the next `words` words of allocation succeed, collecting if needed
    pub fn ensure(&mut self, words: usize) -> Result<(), Fatal> {
        self.heap
            .ensure(words, &mut self.regs, &mut self.hooks)
            .map_err(Fatal::from)
    }

    /// Ensures `words` words while keeping `values` alive, returning their relocated versions
    fn ensure_preserving<const N: usize>(
        &mut self,
        words: usize,
        values: [Value; N],
    ) -> Result<[Value; N], Fatal> {
        let base = self.regs.stack.len();
        self.regs.stack.extend_from_slice(&values);

        let result = self.ensure(words);

        let mut preserved = [Value::NULL; N];
        preserved.copy_from_slice(&self.regs.stack[base..]);
        self.regs.stack.truncate(base);

        result.map(|()| preserved)
    }

    pub fn alloc_string(&mut self, value: &str) -> Result<Value, Fatal> {
        let words = Str::record_words(value.chars().count());
        self.ensure(words)?;
        Ok(unsafe { Str::init(self.heap.allocate(words), value) })
    }

    pub fn alloc_real(&mut self, value: f64) -> Result<Value, Fatal> {
        self.ensure(Real::RECORD_WORDS)?;
        Ok(unsafe { Real::init(self.heap.allocate(Real::RECORD_WORDS), value) })
    }

    pub fn alloc_long(&mut self, value: i64) -> Result<Value, Fatal> {
        self.ensure(Long::RECORD_WORDS)?;
        Ok(unsafe { Long::init(self.heap.allocate(Long::RECORD_WORDS), value) })
    }

    /// Allocates `len` zeroed untraced words
    pub fn alloc_raw_array(&mut self, len: usize) -> Result<Value, Fatal> {
        let words = RawArray::record_words(len);
        self.ensure(words)?;
        Ok(unsafe { RawArray::init_zeroed(self.heap.allocate(words), len) })
    }

    pub fn alloc_byte_array(&mut self, bytes: &[u8]) -> Result<Value, Fatal> {
        let words = ByteArray::record_words(bytes.len());
        self.ensure(words)?;
        Ok(unsafe { ByteArray::init(self.heap.allocate(words), bytes) })
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> Result<Value, Fatal> {
        let [car, cdr] = self.ensure_preserving(Pair::WORDS, [car, cdr])?;
        Ok(unsafe { Pair::init(self.heap.allocate(Pair::WORDS), car, cdr) })
    }

    /// Builds an array from the top `len` operand stack slots, popping them
    pub fn tuple(&mut self, len: usize) -> Result<Value, Fatal> {
        let words = Array::record_words(len);
        self.ensure(words)?;

        let first = self
            .regs
            .stack
            .len()
            .checked_sub(len)
            .unwrap_or_else(|| panic!("tuple of {} elements on a shorter stack", len));

        let array = unsafe {
            Array::init(
                self.heap.allocate(words),
                self.regs.stack[first..].iter().copied(),
            )
        };

        self.regs.stack.truncate(first);
        Ok(array)
    }

    pub fn alloc_array(&mut self, values: &[Value]) -> Result<Value, Fatal> {
        self.regs.stack.extend_from_slice(values);
        self.tuple(values.len())
    }

    /// Builds an array replacing constrainable variables with their current values
    pub fn alloc_array_coerced(&mut self, values: &[Value]) -> Result<Value, Fatal> {
        self.regs.stack.extend(values.iter().map(|&value| {
            value
                .downcast::<CVar>()
                .map(|cvar| cvar.value())
                .unwrap_or(value)
        }));

        self.tuple(values.len())
    }

    /// Builds a `null` terminated list
    pub fn list_from(&mut self, values: &[Value]) -> Result<Value, Fatal> {
        let base = self.regs.stack.len();
        self.regs.stack.extend_from_slice(values);
        let result = self.ensure(values.len() * Pair::WORDS);

        let mut list = Value::NULL;
        if result.is_ok() {
            for &car in self.regs.stack[base..].iter().rev() {
                list = unsafe { Pair::init(self.heap.allocate(Pair::WORDS), car, list) };
            }
        }

        self.regs.stack.truncate(base);
        result.map(|()| list)
    }

    /// Allocates an environment with `null` slots
    pub fn alloc_env(&mut self, parent: Value, slot_count: usize) -> Result<Value, Fatal> {
        let words = Env::record_words(slot_count);
        let [parent] = self.ensure_preserving(words, [parent])?;
        Ok(unsafe { Env::init(self.heap.allocate(words), parent, slot_count) })
    }

    pub fn alloc_closure(&mut self, code: Value, env: Value) -> Result<Value, Fatal> {
        let [code, env] = self.ensure_preserving(Closure::RECORD_WORDS, [code, env])?;
        Ok(unsafe { Closure::init(self.heap.allocate(Closure::RECORD_WORDS), code, env) })
    }

    pub fn alloc_cvar(&mut self, value: Value) -> Result<Value, Fatal> {
        let [value] = self.ensure_preserving(CVar::RECORD_WORDS, [value])?;
        Ok(unsafe { CVar::init(self.heap.allocate(CVar::RECORD_WORDS), value) })
    }

    /// Attaches a solver hook to a constrainable variable, returning the hook word
    ///
    /// Any hook previously attached to the variable is detached.
    pub fn attach_hook(&mut self, variable: Value, hook: Box<dyn VariableHook>) -> Value {
        let cvar = variable
            .downcast::<CVar>()
            .unwrap_or_else(|| panic!("{:?} is not a constrainable variable", variable));

        self.hooks.detach(cvar.hook());
        let hook_word = self.hooks.attach(hook);
        cvar.set_hook(hook_word);
        hook_word
    }

    /// Allocates a solver record whose fields are all traced values
    pub fn alloc_record(&mut self, type_code: TypeCode, fields: &[Value]) -> Result<Value, Fatal> {
        assert!(
            solver::is_solver_record(type_code),
            "{:?} records can't be built from fields",
            type_code
        );

        let words = 1 + fields.len();
        let base = self.regs.stack.len();
        self.regs.stack.extend_from_slice(fields);
        let result = self.ensure(words);

        let record = result.map(|()| unsafe {
            solver::init(self.heap.allocate(words), type_code, &self.regs.stack[base..])
        });

        self.regs.stack.truncate(base);
        record
    }

    pub fn string_concat(&mut self, lhs: Value, rhs: Value) -> Result<Value, Fatal> {
        let len: usize = [lhs, rhs]
            .iter()
            .map(|value| value.downcast::<Str>().map(|string| string.len()).unwrap_or(0))
            .sum();

        let words = Str::record_words(len);
        let [lhs, rhs] = self.ensure_preserving(words, [lhs, rhs])?;

        match (lhs.downcast::<Str>(), rhs.downcast::<Str>()) {
            (Some(lhs), Some(rhs)) => {
                Ok(unsafe { Str::init_concat(self.heap.allocate(words), &lhs, &rhs) })
            }
            _ => panic!("concatenation of non-strings {:?} and {:?}", lhs, rhs),
        }
    }

    /// Raises `null-pointer` if `value` is `null`
    ///
    /// Returns false if the exception was raised; control has then moved to the handler.
    pub fn check_null(&mut self, value: Value) -> bool {
        if value.is_null() {
            self.raise_builtin(ExceptionName::NullPointer);
            false
        } else {
            true
        }
    }

    /// Raises `index-out-of-range` unless `index` is a valid element of `array`
    ///
    /// Returns false if an exception was raised; control has then moved to the handler.
    pub fn check_index(&mut self, array: Value, index: i64) -> bool {
        if !self.check_null(array) {
            return false;
        }

        let len = match array.downcast::<Array>() {
            Some(array) => array.len(),
            None => {
                self.raise_builtin(ExceptionName::TypeMismatch);
                return false;
            }
        };

        if index < 0 || index as usize >= len {
            self.raise_builtin(ExceptionName::IndexOutOfRange);
            false
        } else {
            true
        }
    }
}

/// Words needed by a continuation of `depth` slots plus `pairs` pairs
pub(crate) fn snapshot_words(depth: usize, pairs: usize) -> usize {
    round_up_even(Continuation::record_words(depth)) + pairs * Pair::WORDS
}
