#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use kestrel_runtime::config::{EngineConfig, HeapConfig};
use kestrel_runtime::engine::{Engine, Exit};
use kestrel_runtime::program::ProgramBuilder;

/// Program output captured in memory
#[derive(Clone, Default)]
pub struct SharedOutput(Rc<RefCell<Vec<u8>>>);

impl SharedOutput {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn small_heap_config(initial_words: usize, max_words: usize) -> EngineConfig {
    EngineConfig {
        heap: HeapConfig {
            initial_words,
            max_words,
            grow_increment_words: 1024,
            ..HeapConfig::default()
        },
        ..EngineConfig::default()
    }
}

pub struct Finished {
    pub engine: Engine,
    pub exit: Exit,
    pub output: String,
}

pub fn run_with_config(builder: ProgramBuilder, config: EngineConfig) -> Finished {
    let output = SharedOutput::default();
    let mut engine = Engine::with_output(config, Box::new(output.clone())).unwrap();

    engine.load(builder.build().unwrap());
    let exit = engine.run().unwrap();

    Finished {
        engine,
        exit,
        output: output.text(),
    }
}

pub fn run(builder: ProgramBuilder) -> Finished {
    run_with_config(builder, EngineConfig::default())
}
