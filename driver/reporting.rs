use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term;
use termcolor::{ColorChoice, StandardStream};

use crate::asm;

pub fn error_to_diagnostic(error: &asm::Error) -> Diagnostic<()> {
    Diagnostic::error()
        .with_message(error.to_string())
        .with_labels(vec![Label::primary((), error.span().to_range())])
}

pub fn emit_diagnostics_to_stderr(name: &str, source: &str, diagnostics: &[Diagnostic<()>]) {
    let files = SimpleFile::new(name, source);
    let config = term::Config::default();

    let stderr = StandardStream::stderr(ColorChoice::Auto);
    let mut stderr_lock = stderr.lock();

    for diagnostic in diagnostics {
        // Nothing sensible to do if stderr is gone
        let _ = term::emit(&mut stderr_lock, &config, &files, diagnostic);
    }
}
