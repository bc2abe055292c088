#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

mod asm;
mod reporting;
mod subcommand;

use std::{path, process};

use clap::{value_t, ArgMatches};

use kestrel_runtime::config::EngineConfig;

pub struct DriverConfig {
    engine: EngineConfig,
    show_stats: bool,
}

fn runtime_args() -> Vec<clap::Arg<'static, 'static>> {
    use clap::Arg;

    vec![
        Arg::with_name("HEAP_SIZE")
            .long("heap-size")
            .value_name("WORDS")
            .help("Initial size of each semi-space"),
        Arg::with_name("MAX_HEAP_SIZE")
            .long("max-heap-size")
            .value_name("WORDS")
            .help("Size each semi-space may grow to"),
        Arg::with_name("TIME_SLICE")
            .long("time-slice")
            .value_name("TICKS")
            .help("Checkpoints between signal and timer polls"),
        Arg::with_name("GC_MESSAGES")
            .long("gc-messages")
            .help("Log every garbage collection"),
        Arg::with_name("STATS")
            .long("stats")
            .help("Print runtime statistics on exit"),
    ]
}

fn engine_config(matches: &ArgMatches<'_>) -> EngineConfig {
    let mut config = EngineConfig::default();

    if matches.is_present("HEAP_SIZE") {
        config.heap.initial_words =
            value_t!(matches, "HEAP_SIZE", usize).unwrap_or_else(|e| e.exit());
    }

    if matches.is_present("MAX_HEAP_SIZE") {
        config.heap.max_words =
            value_t!(matches, "MAX_HEAP_SIZE", usize).unwrap_or_else(|e| e.exit());
    }

    if matches.is_present("TIME_SLICE") {
        config.time_slice = value_t!(matches, "TIME_SLICE", u32).unwrap_or_else(|e| e.exit());
    }

    config.gc_messages = matches.is_present("GC_MESSAGES");
    config.statistics = matches.is_present("STATS");
    config
}

fn init_logging(gc_messages: bool) {
    let default_filter = if gc_messages {
        "kestrel_runtime=info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn main() {
    use clap::{crate_version, App, AppSettings, Arg, SubCommand};

    let matches = App::new("kestrel")
        .version(crate_version!())
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .about("Runs programs on the Kestrel managed runtime")
        .subcommand(
            SubCommand::with_name("run")
                .about("Assembles and runs a program")
                .args(&runtime_args())
                .arg(
                    Arg::with_name("INPUT")
                        .help("Input program")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            SubCommand::with_name("check")
                .about("Assembles a program without running it")
                .arg(
                    Arg::with_name("INPUT")
                        .help("Input program")
                        .required(true)
                        .index(1),
                ),
        )
        .get_matches();

    if let Some(run_matches) = matches.subcommand_matches("run") {
        let cfg = DriverConfig {
            engine: engine_config(run_matches),
            show_stats: run_matches.is_present("STATS"),
        };

        init_logging(cfg.engine.gc_messages);

        let input_path = path::Path::new(run_matches.value_of("INPUT").unwrap());
        process::exit(subcommand::run::run_input_file(&cfg, input_path));
    } else if let Some(check_matches) = matches.subcommand_matches("check") {
        init_logging(false);

        let input_path = path::Path::new(check_matches.value_of("INPUT").unwrap());
        if !subcommand::check::check_input_file(input_path) {
            process::exit(subcommand::EXIT_LOAD_ERROR);
        }
    } else {
        eprintln!("Sub-command not specified");
        process::exit(1);
    }
}
