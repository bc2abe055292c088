//! Unrecoverable runtime errors
//!
//! Language level exceptions never surface here; they are raised and handled inside the engine.

use std::error::Error;
use std::{fmt, io};

/// The heap could not satisfy an allocation even at its maximum size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapExhausted {
    /// Words requested by the failed allocation
    pub requested: usize,
    /// Semi-space capacity in words when the allocation failed
    pub capacity: usize,
}

impl fmt::Display for HeapExhausted {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "heap exhausted: cannot allocate {} words with a capacity of {} words",
            self.requested, self.capacity
        )
    }
}

impl Error for HeapExhausted {}

/// Error ending execution of a program
#[derive(Debug)]
pub enum Fatal {
    HeapExhausted(HeapExhausted),
    Output(io::Error),
}

impl Fatal {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fatal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fatal::HeapExhausted(err) => err.fmt(formatter),
            Fatal::Output(err) => write!(formatter, "cannot write program output: {}", err),
        }
    }
}

impl Error for Fatal {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Fatal::HeapExhausted(err) => Some(err),
            Fatal::Output(err) => Some(err),
        }
    }
}

impl From<HeapExhausted> for Fatal {
    fn from(err: HeapExhausted) -> Fatal {
        Fatal::HeapExhausted(err)
    }
}

impl From<io::Error> for Fatal {
    fn from(err: io::Error) -> Fatal {
        Fatal::Output(err)
    }
}
