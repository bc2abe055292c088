//! Exception raising and handling
//!
//! The handler chain is a list of `(snapshot . handler)` pairs. The snapshot is a continuation
//! capturing the operand stack, environment and dynamic link at the point the handler was
//! pushed, so raising restores that state exactly before entering the handler.

use std::fmt;

use crate::boxed::{Continuation, Pair, Procedure, Str};
use crate::engine::alloc::snapshot_words;
use crate::engine::{Engine, State};
use crate::error::Fatal;
use crate::value::Value;

macro_rules! define_exception_names {
    ($( $variant:ident => $name:literal ),*) => {
        /// Exceptions raised by the engine itself
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ExceptionName {
            $( $variant ),*
        }

        impl ExceptionName {
            pub const ALL: &'static [ExceptionName] = &[$( ExceptionName::$variant ),*];
            pub const COUNT: usize = Self::ALL.len();

            /// Returns the text of the pre-built exception string
            pub fn as_str(self) -> &'static str {
                match self {
                    $( ExceptionName::$variant => $name ),*
                }
            }
        }
    }
}

define_exception_names! {
    NullPointer => "null-pointer",
    IndexOutOfRange => "index-out-of-range",
    DataVariant => "data-variant",
    RequireFailed => "require-failed",
    TypeMismatch => "type-mismatch",
    DivideByZero => "divide-by-zero"
}

/// One entry of a backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub line: usize,
}

impl fmt::Display for Frame {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(formatter, "{}", self.name)
        } else {
            write!(formatter, "{}:{}", self.name, self.line)
        }
    }
}

/// Exception that reached the top level without a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtException {
    pub message: String,
    /// Innermost frame first
    pub backtrace: Vec<Frame>,
}

impl fmt::Display for UncaughtException {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "uncaught exception: {}", self.message)?;
        for frame in &self.backtrace {
            write!(formatter, "\n    at {}", frame)?;
        }
        Ok(())
    }
}

impl Engine {
    /// Installs a handler that receives exceptions raised until it is popped
    pub fn push_handler(&mut self, handler: Value) -> Result<(), Fatal> {
        let depth = self.regs.stack.len();
        self.ensure(snapshot_words(depth, 2))?;

        let cont_words = Continuation::record_words(depth);
        let snapshot = unsafe {
            Continuation::init(
                self.heap.allocate(cont_words),
                self.regs.cont,
                handler,
                self.regs.env,
                &self.regs.stack,
            )
        };

        let entry = unsafe { Pair::init(self.heap.allocate(Pair::WORDS), snapshot, handler) };
        self.regs.handlers =
            unsafe { Pair::init(self.heap.allocate(Pair::WORDS), entry, self.regs.handlers) };

        Ok(())
    }

    /// Removes the newest handler
    pub fn pop_handler(&mut self) {
        let handlers = self
            .regs
            .handlers
            .as_pair()
            .unwrap_or_else(|| panic!("popped an empty handler chain"));

        self.regs.handlers = handlers.cdr();
    }

    /// Raises one of the pre-built engine exceptions
    pub fn raise_builtin(&mut self, name: ExceptionName) {
        let exception = self.regs.exception_names[name as usize];
        self.raise(exception);
    }

    /// Transfers control to the newest handler
    ///
    /// The handler's snapshot is restored, the exception is pushed on the restored stack and
    /// left in the accumulator, and the handler becomes the next location. Without a handler the
    /// program halts with an [`UncaughtException`].
    pub fn raise(&mut self, exception: Value) {
        self.set_state(State::Raising);
        self.regs.saved_conts = self.regs.cont;

        let handlers = match self.regs.handlers.as_pair() {
            Some(handlers) => handlers,
            None => {
                let uncaught = UncaughtException {
                    message: describe_exception(exception),
                    backtrace: self.backtrace(),
                };

                log::debug!("{}", uncaught);
                self.halt_uncaught(uncaught);
                return;
            }
        };

        let entry = handlers
            .car()
            .as_pair()
            .unwrap_or_else(|| panic!("malformed handler chain"));
        self.regs.handlers = handlers.cdr();

        let snapshot = entry
            .car()
            .downcast::<Continuation>()
            .unwrap_or_else(|| panic!("handler without a snapshot"));

        self.restore_snapshot(snapshot);
        self.regs.stack.push(exception);
        self.regs.acc = exception;
        self.regs.pc = entry.cdr();
        self.set_state(State::Running);
    }

    /// Returns the frames of the current location and the saved continuation chain
    pub fn backtrace(&self) -> Vec<Frame> {
        let mut frames = vec![];

        if let Some(procedure) = self.regs.pc.downcast::<Procedure>() {
            frames.push(frame_for(&procedure));
        }

        let mut cont = self.regs.saved_conts;
        while let Some(current) = cont.downcast::<Continuation>() {
            if let Some(procedure) = current.resume().downcast::<Procedure>() {
                frames.push(frame_for(&procedure));
            }

            cont = current.link();
        }

        frames
    }
}

fn frame_for(procedure: &Procedure) -> Frame {
    Frame {
        name: procedure.name().to_owned(),
        line: procedure.line(),
    }
}

fn describe_exception(exception: Value) -> String {
    if let Some(string) = exception.downcast::<Str>() {
        string.to_string()
    } else if exception.is_null() {
        "null".to_owned()
    } else if exception.is_immediate() {
        exception.as_int().to_string()
    } else {
        format!("{:?}", exception)
    }
}
