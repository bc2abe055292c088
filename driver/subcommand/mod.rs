pub mod check;
pub mod run;

use std::{fs, path};

use ansi_term::Colour;

use kestrel_runtime::program::Program;

use crate::asm;
use crate::reporting::{emit_diagnostics_to_stderr, error_to_diagnostic};

/// Process exit code when a program can't be read or assembled
pub const EXIT_LOAD_ERROR: i32 = 2;

/// Reads and assembles a program, reporting any problem to stderr
fn load_program(input_path: &path::Path) -> Option<Program> {
    let source = match fs::read_to_string(input_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!(
                "{}: unable to read {}: {}",
                Colour::Red.bold().paint("error"),
                input_path.display(),
                err
            );
            return None;
        }
    };

    match asm::assemble(&source) {
        Ok(program) => Some(program),
        Err(error) => {
            emit_diagnostics_to_stderr(
                &input_path.to_string_lossy(),
                &source,
                &[error_to_diagnostic(&error)],
            );
            None
        }
    }
}
