use std::{io, path};

use ansi_term::{Colour, Style};

use kestrel_runtime::bootstrap::{self, Outcome};
use kestrel_runtime::engine::{Exit, Stats};

use super::{load_program, EXIT_LOAD_ERROR};
use crate::DriverConfig;

fn report_outcome(outcome: &Outcome) {
    let error_style = Colour::Red.bold();

    match outcome {
        Outcome::Exited(Exit::Halted(_)) => {}
        Outcome::Exited(Exit::Uncaught(uncaught)) => {
            eprintln!(
                "{}: {}",
                error_style.paint("uncaught exception"),
                uncaught.message
            );

            for frame in &uncaught.backtrace {
                eprintln!("    {} {}", Colour::Blue.bold().paint("at"), frame);
            }
        }
        Outcome::Fatal(fatal) => eprintln!("{}: {}", error_style.paint("fatal error"), fatal),
        Outcome::Panicked(message) => {
            eprintln!("{}: {}", error_style.paint("internal error"), message)
        }
    }
}

fn print_stats(stats: &Stats) {
    let heading = Style::new().bold();

    eprintln!("{}", heading.paint("runtime statistics"));
    eprintln!("  collections:       {}", stats.collections);
    eprintln!("  words copied:      {}", stats.words_copied);
    eprintln!("  words reclaimed:   {}", stats.words_reclaimed);
    eprintln!("  peak heap words:   {}", stats.peak_heap_words);
    eprintln!("  continuations:     {}", stats.continuations);
    eprintln!("  time slices:       {}", stats.slices);
    eprintln!("  ticks serviced:    {}", stats.ticks_serviced);
    eprintln!("  signals delivered: {}", stats.signals_delivered);
    eprintln!("  timer callbacks:   {}", stats.timer_callbacks);
    eprintln!("  run time:          {:?}", stats.run_time);
    eprintln!("  collection time:   {:?}", stats.gc_time);
}

/// Runs a program file, returning the process exit code
pub fn run_input_file(cfg: &DriverConfig, input_path: &path::Path) -> i32 {
    let program = match load_program(input_path) {
        Some(program) => program,
        None => return EXIT_LOAD_ERROR,
    };

    let launched = bootstrap::launch(program, cfg.engine.clone(), Box::new(io::stdout()));
    report_outcome(&launched.outcome);

    if cfg.show_stats {
        print_stats(&launched.stats);
    }

    launched.exit_code()
}
