//! Execution engine
//!
//! The engine owns the virtual machine registers and drives execution without using the native
//! call stack for program calls. Every resuming call captures a [`Continuation`] on the heap and
//! every return restores one, so the native stack depth stays constant no matter how deeply the
//! program nests its calls. Exceptions and preemption are ordinary control transfers between
//! program locations.

mod alloc;
mod exception;
mod preempt;
pub mod signal;

use std::io::{self, Write};
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::boxed::refs::Gc;
use crate::boxed::{Closure, Continuation, CopyPass, DirectTagged, Env, Heap, Procedure};
use crate::config::EngineConfig;
use crate::error::Fatal;
use crate::hook::HookTable;
use crate::program::{Link, Program};
use crate::roots::{RootRegistry, RootSet};
use crate::value::Value;

pub use self::exception::{ExceptionName, Frame, UncaughtException};

/// Highest signal number a handler may be installed for
pub const MAX_SIGNAL: usize = 63;

/// Protocol the engine is currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Calling,
    Returning,
    Raising,
    Tick,
    Halted,
}

/// How a program finished
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    /// The program halted or returned past its outermost continuation
    Halted(i64),
    Uncaught(UncaughtException),
}

/// Target of a call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Callee {
    /// Known procedure with a statically resolved environment link
    Direct { target: Value, link: Link },
    /// Closure held in the accumulator
    Closure,
}

/// Execution counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub collections: u64,
    pub words_copied: u64,
    pub words_reclaimed: u64,
    pub peak_heap_words: usize,
    pub continuations: u64,
    pub slices: u64,
    pub ticks_serviced: u64,
    pub signals_delivered: u64,
    pub timer_callbacks: u64,
    pub run_time: Duration,
    pub gc_time: Duration,
}

/// Virtual machine registers
///
/// Together with the root registry these are the collector's roots.
pub(crate) struct Registers {
    pub acc: Value,
    pub env: Value,
    pub cont: Value,
    pub pc: Value,
    pub stack: Vec<Value>,
    pub handlers: Value,
    /// Continuation chain current at the most recent raise
    pub saved_conts: Value,
    pub exception_names: [Value; ExceptionName::COUNT],
    pub signal_handlers: Box<[Value]>,
    pub timer_handler: Value,
    pub registry: RootRegistry,
}

impl RootSet for Registers {
    fn visit_roots(&mut self, pass: &mut CopyPass<'_>) {
        pass.visit(&mut self.acc);
        pass.visit(&mut self.env);
        pass.visit(&mut self.cont);
        pass.visit(&mut self.pc);
        self.stack.visit_roots(pass);
        pass.visit(&mut self.handlers);
        pass.visit(&mut self.saved_conts);
        self.exception_names.visit_roots(pass);
        self.signal_handlers.visit_roots(pass);
        pass.visit(&mut self.timer_handler);
        self.registry.visit_roots(pass);
    }
}

pub struct Engine {
    pub(crate) heap: Heap,
    pub(crate) regs: Registers,
    pub(crate) hooks: HookTable,
    program: Option<Rc<Program>>,
    globals: Box<[Value]>,
    module_initialised: Box<[bool]>,
    ticks_remaining: u32,
    slice_started: Instant,
    timer_due: Option<Instant>,
    installed_signals: u64,
    pending_signals: u64,
    exit: Option<Exit>,
    state: State,
    stats: Stats,
    output: Box<dyn Write>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine writing program output to stdout
    pub fn new(config: EngineConfig) -> Result<Engine, Fatal> {
        Self::with_output(config, Box::new(io::stdout()))
    }

    pub fn with_output(config: EngineConfig, output: Box<dyn Write>) -> Result<Engine, Fatal> {
        let mut heap = Heap::new(config.heap.clone());
        heap.set_gc_messages(config.gc_messages);

        let mut engine = Engine {
            heap,
            regs: Registers {
                acc: Value::NULL,
                env: Value::NULL,
                cont: Value::NULL,
                pc: Value::NULL,
                stack: vec![],
                handlers: Value::NULL,
                saved_conts: Value::NULL,
                exception_names: [Value::NULL; ExceptionName::COUNT],
                signal_handlers: vec![Value::NULL; MAX_SIGNAL + 1].into_boxed_slice(),
                timer_handler: Value::NULL,
                registry: RootRegistry::new(),
            },
            hooks: HookTable::new(),
            program: None,
            globals: Box::new([]),
            module_initialised: Box::new([]),
            ticks_remaining: config.time_slice.max(1),
            slice_started: Instant::now(),
            timer_due: None,
            installed_signals: 0,
            pending_signals: 0,
            exit: None,
            state: State::Running,
            stats: Stats::default(),
            output,
            config,
        };

        for &name in ExceptionName::ALL {
            let value = engine.alloc_string(name.as_str())?;
            engine.regs.exception_names[name as usize] = value;
        }

        Ok(engine)
    }

    /// Prepares to run a program from its entry point
    ///
    /// Panics if a program has already been loaded.
    pub fn load(&mut self, program: Program) {
        assert!(self.program.is_none(), "engine already has a program loaded");

        self.globals = vec![Value::NULL; program.global_count()].into_boxed_slice();
        self.module_initialised = vec![false; program.modules().len()].into_boxed_slice();

        self.regs.acc = Value::NULL;
        self.regs.env = Value::NULL;
        self.regs.cont = Value::NULL;
        self.regs.stack.clear();
        self.regs.pc = program.descriptor(program.entry());

        self.program = Some(Rc::new(program));
        self.exit = None;
        self.reset_slice();
    }

    /// Runs the loaded program until it halts
    pub fn run(&mut self) -> Result<Exit, Fatal> {
        let started = Instant::now();
        self.reset_slice();
        self.state = State::Running;

        let result = self.dispatch_loop();

        self.stats.run_time += started.elapsed();
        self.output.flush()?;
        result?;

        Ok(self
            .exit
            .clone()
            .unwrap_or_else(|| panic!("dispatch loop stopped without an exit")))
    }

    fn dispatch_loop(&mut self) -> Result<(), Fatal> {
        while self.exit.is_none() {
            let location = self.current_location();
            let slice_expired = (location.dispatch())(self, location)?;

            if slice_expired && self.exit.is_none() {
                self.account_slice();
                self.enter_preemption()?;
            }
        }

        Ok(())
    }

    fn current_location(&self) -> Gc<Procedure> {
        self.regs
            .pc
            .downcast::<Procedure>()
            .unwrap_or_else(|| panic!("program location {:?} is not a procedure", self.regs.pc))
    }

    pub(crate) fn loaded_program(&self) -> Rc<Program> {
        match &self.program {
            Some(program) => program.clone(),
            None => panic!("no program loaded"),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: State) {
        log::trace!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub fn exit(&self) -> Option<&Exit> {
        self.exit.as_ref()
    }

    /// Stops the program with an exit code
    pub fn halt(&mut self, code: i64) {
        self.set_state(State::Halted);
        self.exit = Some(Exit::Halted(code));
    }

    pub(crate) fn halt_uncaught(&mut self, uncaught: UncaughtException) {
        self.set_state(State::Halted);
        self.exit = Some(Exit::Uncaught(uncaught));
    }

    pub fn is_halted(&self) -> bool {
        self.exit.is_some()
    }

    pub fn acc(&self) -> Value {
        self.regs.acc
    }

    pub fn set_acc(&mut self, value: Value) {
        self.regs.acc = value;
    }

    pub fn env(&self) -> Value {
        self.regs.env
    }

    pub fn cont(&self) -> Value {
        self.regs.cont
    }

    pub fn pc(&self) -> Value {
        self.regs.pc
    }

    pub fn handlers(&self) -> Value {
        self.regs.handlers
    }

    /// Returns the continuation chain that was current at the most recent raise
    pub fn saved_continuations(&self) -> Value {
        self.regs.saved_conts
    }

    pub fn stack(&self) -> &[Value] {
        &self.regs.stack
    }

    /// Pushes a value on the operand stack, rooting it
    pub fn push(&mut self, value: Value) {
        self.regs.stack.push(value);
    }

    /// Pops the operand stack
    ///
    /// Panics on underflow; compiled code always balances its stack.
    pub fn pop(&mut self) -> Value {
        self.regs
            .stack
            .pop()
            .unwrap_or_else(|| panic!("operand stack underflow"))
    }

    /// Discards the top `count` operand stack slots
    pub fn drop_slots(&mut self, count: usize) {
        let len = self.regs.stack.len();
        assert!(count <= len, "operand stack underflow");
        self.regs.stack.truncate(len - count);
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn hooks(&mut self) -> &mut HookTable {
        &mut self.hooks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    pub(crate) fn global(&self, index: usize) -> Value {
        self.globals[index]
    }

    pub(crate) fn set_global(&mut self, index: usize, value: Value) {
        self.globals[index] = value;
    }

    pub(crate) fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    pub fn stats(&self) -> Stats {
        let heap_stats = self.heap.stats();

        Stats {
            collections: heap_stats.collections,
            words_copied: heap_stats.words_copied,
            words_reclaimed: heap_stats.words_reclaimed,
            peak_heap_words: heap_stats.peak_capacity_words,
            gc_time: heap_stats.gc_time,
            ..self.stats.clone()
        }
    }

    /// Runs a full collection immediately
    pub fn collect_garbage(&mut self) {
        self.heap.collect(0, &mut self.regs, &mut self.hooks);
    }

    /// Registers a slot as a collector root
    ///
    /// # Safety
    ///
    /// `slot` must stay valid and must not move for the lifetime of the engine
    pub unsafe fn register_root(&mut self, slot: NonNull<Value>) {
        self.regs.registry.register(slot);
    }

    /// Marks a module as initialised and registers its globals as roots
    ///
    /// Returns false if the module was already initialised; repeated requests are no-ops.
    pub fn init_module(&mut self, module: usize) -> bool {
        if self.module_initialised[module] {
            return false;
        }

        self.module_initialised[module] = true;

        let program = self.loaded_program();
        let globals = program.modules()[module].globals.clone();
        log::debug!(
            "initialising module {} with {} globals",
            program.modules()[module].name,
            globals.len()
        );

        unsafe {
            self.regs.registry.register_slice(&mut self.globals[globals]);
        }

        true
    }

    pub fn is_module_initialised(&self, module: usize) -> bool {
        self.module_initialised[module]
    }

    fn resolve_link(&self, link: Link) -> Value {
        match link {
            Link::Null => Value::NULL,
            Link::Env { up } => self.ancestor_env(up).as_value(),
        }
    }

    /// Returns the environment `up` levels above the current one
    ///
    /// Panics if the chain is shorter; compiled code never reaches past its outermost function.
    pub(crate) fn ancestor_env(&self, up: usize) -> Gc<Env> {
        self.regs
            .env
            .downcast::<Env>()
            .and_then(|env| env.ancestor(up))
            .unwrap_or_else(|| panic!("no environment {} levels up", up))
    }

    /// Transfers control to a callee with `argc` arguments on top of the operand stack
    ///
    /// A resuming call captures everything below the arguments in a new current continuation
    /// that resumes at `resume`. A tail call (`resume` of `None`) discards those slots instead.
    pub fn call(
        &mut self,
        callee: Callee,
        argc: usize,
        resume: Option<Value>,
    ) -> Result<(), Fatal> {
        self.set_state(State::Calling);

        if let Callee::Closure = callee {
            let closure = self.regs.acc;
            if !self.check_null(closure) {
                return Ok(());
            }

            if closure.downcast::<Closure>().is_none() {
                self.raise_builtin(ExceptionName::TypeMismatch);
                return Ok(());
            }
        }

        let depth = self
            .regs
            .stack
            .len()
            .checked_sub(argc)
            .unwrap_or_else(|| panic!("call with {} arguments on a shorter stack", argc));

        match resume {
            Some(resume) => self.save_continuation(resume, depth)?,
            None => {
                self.regs.stack.drain(..depth);
            }
        }

        // The callee is resolved after capture; the capture may have moved its environment
        let (target, env) = match callee {
            Callee::Direct { target, link } => (target, self.resolve_link(link)),
            Callee::Closure => {
                let closure = self
                    .regs
                    .acc
                    .downcast::<Closure>()
                    .unwrap_or_else(|| panic!("closure vanished during call"));
                (closure.code(), closure.env())
            }
        };

        self.regs.env = env;
        self.regs.pc = target;
        self.set_state(State::Running);
        Ok(())
    }

    /// Returns the accumulator to the current continuation
    ///
    /// Returning past the outermost continuation halts with the accumulator as exit code.
    pub fn return_to_caller(&mut self) {
        self.set_state(State::Returning);

        if self.regs.cont.is_null() {
            let code = self.regs.acc.as_int();
            self.halt(code);
            return;
        }

        self.restore_continuation();
        self.set_state(State::Running);
    }

    /// Captures the bottom `depth` operand stack slots as the new current continuation
    ///
    /// The captured slots are removed from the stack; anything above them stays.
    pub fn save_continuation(&mut self, resume: Value, depth: usize) -> Result<(), Fatal> {
        let words = Continuation::record_words(depth);
        self.ensure(words)?;

        let cont = unsafe {
            Continuation::init(
                self.heap.allocate(words),
                self.regs.cont,
                resume,
                self.regs.env,
                &self.regs.stack[..depth],
            )
        };

        self.regs.cont = cont;
        self.regs.stack.drain(..depth);
        self.stats.continuations += 1;
        Ok(())
    }

    /// Restores the current continuation and makes its dynamic link current
    pub fn restore_continuation(&mut self) {
        let cont = self
            .regs
            .cont
            .downcast::<Continuation>()
            .unwrap_or_else(|| panic!("{:?} is not a continuation", self.regs.cont));

        self.restore_snapshot(cont);
        self.regs.pc = cont.resume();
    }

    /// Restores the stack, environment and dynamic link saved in a continuation
    fn restore_snapshot(&mut self, cont: Gc<Continuation>) {
        let slots = cont.slots();
        assert_eq!(
            cont.depth(),
            slots.len(),
            "continuation depth disagrees with its size"
        );

        self.regs.stack.clear();
        self.regs.stack.extend_from_slice(slots);
        self.regs.env = cont.env();
        self.regs.cont = cont.link();
    }

    /// Environment prologue
    ///
    /// Moves the `params` arguments on top of the stack in to a new environment with room for
    /// `locals` more slots, linked to the current environment.
    pub fn enter(&mut self, params: usize, locals: usize) -> Result<(), Fatal> {
        let slot_count = params + locals;
        let words = Env::record_words(slot_count);
        self.ensure(words)?;

        let env = unsafe { Env::init(self.heap.allocate(words), self.regs.env, slot_count) };
        let env_ref = env
            .downcast::<Env>()
            .unwrap_or_else(|| panic!("environment allocation failed"));

        let first_arg = self
            .regs
            .stack
            .len()
            .checked_sub(params)
            .unwrap_or_else(|| panic!("{} parameters on a shorter stack", params));

        for (slot, &arg) in self.regs.stack[first_arg..].iter().enumerate() {
            env_ref.set_slot(slot, arg);
        }

        self.regs.stack.truncate(first_arg);
        self.regs.env = env;
        Ok(())
    }

    /// Writes the accumulator to the program output
    pub fn print(&mut self, kind: crate::program::Kind) -> Result<(), Fatal> {
        let text = describe(self.regs.acc, kind);
        writeln!(self.output(), "{}", text)?;
        Ok(())
    }
}

/// Formats a value given its static kind
pub fn describe(value: Value, kind: crate::program::Kind) -> String {
    use crate::boxed::{Long, Real, Str};
    use crate::program::Kind;

    match kind {
        Kind::Int | Kind::Char if value.is_null() => "null".to_owned(),
        Kind::Int => value.as_int().to_string(),
        Kind::Char => value.as_char().to_string(),
        Kind::Bool => value.as_bool().to_string(),
        Kind::Str => match value.downcast::<Str>() {
            Some(string) => string.to_string(),
            None => "null".to_owned(),
        },
        Kind::Real => match value.downcast::<Real>() {
            Some(real) => real.value().to_string(),
            None => "null".to_owned(),
        },
        Kind::Long => match value.downcast::<Long>() {
            Some(long) => long.value().to_string(),
            None => "null".to_owned(),
        },
        Kind::Value => format!("{:?}", value),
    }
}
