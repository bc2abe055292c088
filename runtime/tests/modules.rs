mod common;

use kestrel_runtime::engine::Exit;
use kestrel_runtime::program::{ArithOp, Kind, Op, ProgramBuilder};

use common::{run, run_with_config, small_heap_config};

#[test]
fn initialiser_runs_once() {
    let mut builder = ProgramBuilder::new();
    let init = builder.new_label();
    let (module, counter) = builder.module("counter", 1, init);
    let message = builder.string("init");

    builder.func("main");
    let main = builder.label_here();
    builder.init_module(module);
    builder.init_module(module);
    builder.emit(Op::Global(counter));
    builder.emit(Op::Halt);
    builder.entry(main);

    builder.func("counter-init");
    builder.place(init);
    builder.emit(Op::Str(message));
    builder.emit(Op::Print(Kind::Str));
    builder.emit(Op::Global(counter));
    builder.emit(Op::Push);
    builder.emit(Op::Int(1));
    builder.emit(Op::Arith(ArithOp::Add));
    builder.emit(Op::SetGlobal(counter));
    builder.emit(Op::Return);

    let finished = run(builder);
    assert_eq!(Exit::Halted(1), finished.exit);
    assert_eq!("init\n", finished.output);
    assert!(finished.engine.is_module_initialised(module));
}

#[test]
fn globals_survive_collection() {
    const ITERATIONS: i64 = 1000;

    let mut builder = ProgramBuilder::new();
    let init = builder.new_label();
    let (module, greeting) = builder.module("greeting", 1, init);
    let survivor = builder.string("survivor");
    let garbage = builder.string("garbage that nothing keeps alive");

    builder.func("main");
    let main = builder.label_here();
    builder.emit(Op::Enter {
        params: 0,
        locals: 1,
    });
    builder.init_module(module);

    let top = builder.new_label();
    let done = builder.new_label();
    builder.emit(Op::Int(0));
    builder.emit(Op::SetLocal { up: 0, slot: 0 });
    builder.place(top);
    builder.emit(Op::Str(garbage));
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
    builder.emit(Op::Global(greeting));
    builder.emit(Op::Print(Kind::Str));
    builder.emit(Op::Int(0));
    builder.emit(Op::Halt);
    builder.entry(main);

    builder.func("greeting-init");
    builder.place(init);
    builder.emit(Op::Str(survivor));
    builder.emit(Op::SetGlobal(greeting));
    builder.emit(Op::Return);

    let finished = run_with_config(builder, small_heap_config(256, 4096));
    assert_eq!(Exit::Halted(0), finished.exit);
    assert_eq!("survivor\n", finished.output);
    assert!(finished.engine.stats().collections > 0);
}

#[test]
#[should_panic(expected = "before its module was initialised")]
fn writing_an_uninitialised_global_panics() {
    let mut builder = ProgramBuilder::new();
    let init = builder.new_label();
    let (_, global) = builder.module("lazy", 1, init);

    let main = builder.label_here();
    builder.emit(Op::Int(1));
    builder.emit(Op::SetGlobal(global));
    builder.emit(Op::Halt);
    builder.entry(main);

    builder.place(init);
    builder.emit(Op::Return);

    run(builder);
}
