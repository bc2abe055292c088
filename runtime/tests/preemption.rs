mod common;

use kestrel_runtime::boxed::refs::Gc;
use kestrel_runtime::boxed::Procedure;
use kestrel_runtime::config::EngineConfig;
use kestrel_runtime::engine::{Engine, Exit};
use kestrel_runtime::error::Fatal;
use kestrel_runtime::program::{ArithOp, Kind, Label, Link, Op, ProgramBuilder};

use common::run_with_config;

const ITERATIONS: i64 = 100;

fn short_slices() -> EngineConfig {
    EngineConfig {
        time_slice: 10,
        ..EngineConfig::default()
    }
}

fn raise_sigusr1(engine: &mut Engine, _: Gc<Procedure>) -> Result<bool, Fatal> {
    engine.deliver_signal(libc::SIGUSR1);
    engine.return_to_caller();
    Ok(false)
}

/// Counts a local from zero to `ITERATIONS` and halts with it
fn emit_counting_loop(builder: &mut ProgramBuilder) {
    let top = builder.new_label();
    let done = builder.new_label();

    builder.emit(Op::Int(0));
    builder.emit(Op::SetLocal { up: 0, slot: 0 });
    builder.place(top);
    builder.emit(Op::Local { up: 0, slot: 0 });
    builder.emit(Op::Push);
    builder.emit(Op::Int(1));
    builder.emit(Op::Arith(ArithOp::Add));
    builder.emit(Op::SetLocal { up: 0, slot: 0 });
    builder.emit(Op::Push);
    builder.emit(Op::Int(ITERATIONS));
    builder.emit(Op::Arith(ArithOp::Lt));
    builder.emit(Op::JumpIfFalse(done));
    builder.emit(Op::Jump(top));
    builder.place(done);
    builder.emit(Op::Local { up: 0, slot: 0 });
    builder.emit(Op::Halt);
}

fn emit_main_prologue(builder: &mut ProgramBuilder) -> Label {
    builder.func("main");
    let main = builder.label_here();
    builder.emit(Op::Enter {
        params: 0,
        locals: 1,
    });
    builder.entry(main);
    main
}

#[test]
fn signal_handler_runs_once_at_a_tick() {
    let mut builder = ProgramBuilder::new();
    let deliver = builder.native("raise-sigusr1", raise_sigusr1);
    let handler = builder.new_label();

    emit_main_prologue(&mut builder);
    builder.emit(Op::Closure(handler));
    builder.emit(Op::SetSignalHandler(libc::SIGUSR1));
    builder.call(deliver, 0, Link::Null);
    emit_counting_loop(&mut builder);

    builder.func("on-signal");
    builder.place(handler);
    builder.emit(Op::Enter {
        params: 1,
        locals: 0,
    });
    builder.emit(Op::Local { up: 0, slot: 0 });
    builder.emit(Op::Print(Kind::Int));
    builder.emit(Op::Return);

    let finished = run_with_config(builder, short_slices());
    assert_eq!(Exit::Halted(ITERATIONS), finished.exit);
    assert_eq!(format!("{}\n", libc::SIGUSR1), finished.output);

    let stats = finished.engine.stats();
    assert_eq!(1, stats.signals_delivered);
    assert_eq!(1, stats.ticks_serviced);
    assert!(stats.slices >= 9);
}

#[test]
fn due_timer_runs_once() {
    let mut builder = ProgramBuilder::new();
    let handler = builder.new_label();
    let message = builder.string("tick");

    emit_main_prologue(&mut builder);
    builder.emit(Op::Closure(handler));
    builder.emit(Op::SetTimer(0));
    emit_counting_loop(&mut builder);

    builder.func("on-timer");
    builder.place(handler);
    builder.emit(Op::Str(message));
    builder.emit(Op::Print(Kind::Str));
    builder.emit(Op::Return);

    let finished = run_with_config(builder, short_slices());
    assert_eq!(Exit::Halted(ITERATIONS), finished.exit);
    assert_eq!("tick\n", finished.output);
    assert_eq!(1, finished.engine.stats().timer_callbacks);
}

#[test]
fn idle_ticks_do_not_interrupt() {
    let mut builder = ProgramBuilder::new();
    emit_main_prologue(&mut builder);
    emit_counting_loop(&mut builder);

    let finished = run_with_config(builder, short_slices());
    assert_eq!(Exit::Halted(ITERATIONS), finished.exit);

    let stats = finished.engine.stats();
    assert!(stats.slices >= 9);
    assert_eq!(0, stats.ticks_serviced);
    assert_eq!(0, stats.continuations);
}

#[test]
fn pending_timer_is_not_run_early() {
    let mut builder = ProgramBuilder::new();
    let handler = builder.new_label();

    emit_main_prologue(&mut builder);
    builder.emit(Op::Closure(handler));
    builder.emit(Op::SetTimer(60 * 60 * 1000));
    emit_counting_loop(&mut builder);

    builder.place(handler);
    builder.emit(Op::Int(1));
    builder.emit(Op::Halt);

    let finished = run_with_config(builder, short_slices());
    assert_eq!(Exit::Halted(ITERATIONS), finished.exit);
    assert_eq!(0, finished.engine.stats().timer_callbacks);
}

#[test]
fn unhandled_signal_does_not_hold_up_a_due_timer() {
    let mut builder = ProgramBuilder::new();
    let deliver = builder.native("raise-sigusr1", raise_sigusr1);
    let handler = builder.new_label();
    let message = builder.string("tick");

    emit_main_prologue(&mut builder);
    builder.emit(Op::Closure(handler));
    builder.emit(Op::SetTimer(0));
    builder.call(deliver, 0, Link::Null);
    emit_counting_loop(&mut builder);

    builder.func("on-timer");
    builder.place(handler);
    builder.emit(Op::Str(message));
    builder.emit(Op::Print(Kind::Str));
    builder.emit(Op::Return);

    let finished = run_with_config(builder, short_slices());
    assert_eq!(Exit::Halted(ITERATIONS), finished.exit);
    assert_eq!("tick\n", finished.output);

    let stats = finished.engine.stats();
    assert_eq!(0, stats.signals_delivered);
    assert_eq!(1, stats.timer_callbacks);
    assert_eq!(1, stats.ticks_serviced);
}
