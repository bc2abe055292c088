//! Solver hooks attached to constrainable variables
//!
//! A constrainable variable's hook word is either `null` or the integer `index + 1` of an entry in
//! the [`HookTable`]. The collector never interprets the word beyond that lookup.
//!
//! Each collection drops the hooks of the variables it did not reach.

use crate::value::Value;

/// Callback owned by a constraint solver
pub trait VariableHook {
    /// Called with the variable's new reference every time the collector moves it
    fn relocated(&mut self, variable: Value);
}

impl<F> VariableHook for F
where
    F: FnMut(Value),
{
    fn relocated(&mut self, variable: Value) {
        self(variable)
    }
}

/// Engine-owned table of solver hooks
#[derive(Default)]
pub struct HookTable {
    hooks: Vec<Option<Box<dyn VariableHook>>>,
    /// Hooks relocated by the collection in progress
    reached: Vec<bool>,
}

impl HookTable {
    pub fn new() -> HookTable {
        Self::default()
    }

    /// Stores a hook and returns the word to place in the variable
    pub fn attach(&mut self, hook: Box<dyn VariableHook>) -> Value {
        let index = match self.hooks.iter().position(Option::is_none) {
            Some(free) => {
                self.hooks[free] = Some(hook);
                free
            }
            None => {
                self.hooks.push(Some(hook));
                self.hooks.len() - 1
            }
        };

        Value::from_int(index as i64 + 1)
    }

    /// Removes the hook referred to by a hook word
    pub fn detach(&mut self, hook_word: Value) -> Option<Box<dyn VariableHook>> {
        let index = Self::index_of(hook_word)?;
        self.hooks.get_mut(index).and_then(Option::take)
    }

    /// Notifies the hook referred to by `hook_word` that its variable moved
    pub fn relocated(&mut self, hook_word: Value, variable: Value) {
        let index = match Self::index_of(hook_word) {
            Some(index) => index,
            None => return,
        };

        if let Some(Some(hook)) = self.hooks.get_mut(index) {
            hook.relocated(variable);
        }

        if let Some(reached) = self.reached.get_mut(index) {
            *reached = true;
        }
    }

    /// Starts tracking which hooks a collection relocates
    pub(crate) fn begin_collection(&mut self) {
        self.reached.clear();
        self.reached.resize(self.hooks.len(), false);
    }

    /// Drops every hook the collection did not relocate, returning how many were dropped
    pub(crate) fn finish_collection(&mut self) -> usize {
        let mut dropped = 0;

        for (hook, reached) in self.hooks.iter_mut().zip(self.reached.drain(..)) {
            if !reached && hook.take().is_some() {
                dropped += 1;
            }
        }

        dropped
    }

    pub fn len(&self) -> usize {
        self.hooks.iter().filter(|hook| hook.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index_of(hook_word: Value) -> Option<usize> {
        if hook_word.is_null() {
            None
        } else {
            Some(hook_word.as_int() as usize - 1)
        }
    }
}
