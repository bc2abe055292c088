//! Managed runtime for compiled programs
//!
//! Values are tagged machine words ([`value`]), heap records are described by a single object
//! catalog ([`boxed`]) and reclaimed by a semi-space copying collector. The [`engine`] executes
//! [`program`]s through a heap resident chain of continuations instead of the native stack.

pub mod bootstrap;
pub mod boxed;
pub mod config;
pub mod engine;
pub mod error;
pub mod hook;
pub mod interp;
pub mod program;
pub mod roots;
pub mod value;
