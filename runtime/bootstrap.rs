//! Launching a program in a fresh engine

use std::io::Write;
use std::panic;

use crate::config::EngineConfig;
use crate::engine::{Engine, Exit, Stats};
use crate::error::Fatal;
use crate::program::Program;

/// Process exit code for an uncaught exception
pub const EXIT_UNCAUGHT: i32 = 1;

/// Process exit code for heap exhaustion and other fatal runtime errors
pub const EXIT_FATAL: i32 = 3;

/// Process exit code for an internal consistency violation
pub const EXIT_INTERNAL: i32 = 4;

/// How a launched program ended
#[derive(Debug)]
pub enum Outcome {
    Exited(Exit),
    Fatal(Fatal),
    /// The runtime panicked; the payload's message if it had one
    Panicked(String),
}

#[derive(Debug)]
pub struct Launched {
    pub outcome: Outcome,
    pub stats: Stats,
}

impl Launched {
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Outcome::Exited(Exit::Halted(code)) => *code as i32,
            Outcome::Exited(Exit::Uncaught(_)) => EXIT_UNCAUGHT,
            Outcome::Fatal(_) => EXIT_FATAL,
            Outcome::Panicked(_) => EXIT_INTERNAL,
        }
    }
}

/// Runs a program to completion in a new engine
pub fn launch(program: Program, config: EngineConfig, output: Box<dyn Write>) -> Launched {
    let mut stats = Stats::default();
    let statistics = config.statistics;

    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        let mut engine = Engine::with_output(config, output)?;
        engine.load(program);

        let result = engine.run();
        stats = engine.stats();
        result
    }));

    let outcome = match result {
        Ok(Ok(exit)) => Outcome::Exited(exit),
        Ok(Err(fatal)) => Outcome::Fatal(fatal),
        Err(payload) => {
            let message = if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else if let Some(message) = payload.downcast_ref::<&'static str>() {
                (*message).to_owned()
            } else {
                "unexpected panic type".to_owned()
            };

            Outcome::Panicked(message)
        }
    };

    if let Outcome::Exited(_) | Outcome::Fatal(_) = outcome {
        let level = if statistics {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        log::log!(
            level,
            "{} collections, {} words copied, {} continuations, {} slices in {:?}",
            stats.collections,
            stats.words_copied,
            stats.continuations,
            stats.slices,
            stats.run_time
        );
    }

    Launched { outcome, stats }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::HeapConfig;
    use crate::program::{Op, ProgramBuilder};

    fn launch_ops(ops: &[Op], config: EngineConfig) -> Launched {
        let mut builder = ProgramBuilder::new();
        let main = builder.label_here();
        for op in ops {
            builder.emit(op.clone());
        }
        builder.entry(main);

        launch(builder.build().unwrap(), config, Box::new(std::io::sink()))
    }

    #[test]
    fn halted_programs_choose_their_exit_code() {
        let launched = launch_ops(&[Op::Int(5), Op::Halt], EngineConfig::default());
        assert_eq!(5, launched.exit_code());
    }

    #[test]
    fn uncaught_exceptions_exit_with_one() {
        let launched = launch_ops(&[Op::Null, Op::Car, Op::Halt], EngineConfig::default());
        assert_eq!(EXIT_UNCAUGHT, launched.exit_code());
    }

    #[test]
    fn heap_exhaustion_is_fatal() {
        let config = EngineConfig {
            heap: HeapConfig {
                initial_words: 64,
                max_words: 64,
                ..HeapConfig::default()
            },
            ..EngineConfig::default()
        };

        // The pre-built exception names leave less room than the array needs
        let mut ops = vec![Op::Push; 20];
        ops.push(Op::MakeArray(20));
        ops.push(Op::Halt);

        let launched = launch_ops(&ops, config);
        assert!(matches!(launched.outcome, Outcome::Fatal(Fatal::HeapExhausted(_))));
        assert_eq!(EXIT_FATAL, launched.exit_code());
    }

    #[test]
    fn panics_are_contained() {
        // Reading a local without an environment is a compiler bug
        let launched = launch_ops(
            &[Op::Local { up: 0, slot: 0 }, Op::Halt],
            EngineConfig::default(),
        );

        assert!(matches!(launched.outcome, Outcome::Panicked(_)));
        assert_eq!(EXIT_INTERNAL, launched.exit_code());
    }
}
