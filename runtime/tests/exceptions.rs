mod common;

use std::cell::Cell;

use kestrel_runtime::boxed::refs::Gc;
use kestrel_runtime::boxed::{Continuation, ListIterator, Procedure};
use kestrel_runtime::engine::{Engine, Exit};
use kestrel_runtime::error::Fatal;
use kestrel_runtime::program::{ArithOp, Kind, Link, Op, ProgramBuilder};
use kestrel_runtime::value::Value;

use common::run;

thread_local! {
    static HANDLERS_LEFT: Cell<usize> = Cell::new(usize::MAX);
}

fn count_handlers(engine: &mut Engine, _: Gc<Procedure>) -> Result<bool, Fatal> {
    let count = ListIterator::new(engine.handlers()).count();
    HANDLERS_LEFT.with(|left| left.set(count));

    // Only this native's own continuation sits above the restored dynamic link
    let outermost = engine
        .cont()
        .downcast::<Continuation>()
        .map(|cont| cont.link().is_null())
        .unwrap_or(false);

    engine.set_acc(Value::from_bool(outermost));
    engine.return_to_caller();
    Ok(false)
}

#[test]
fn newest_handler_runs_once_with_restored_state() {
    let mut builder = ProgramBuilder::new();
    let handler_counter = builder.native("count-handlers", count_handlers);
    let thrower = builder.new_label();
    let handler_a = builder.new_label();
    let handler_b = builder.new_label();
    let boom = builder.string("boom");
    let a_ran = builder.string("A ran");

    builder.func("main");
    let main = builder.label_here();
    builder.emit(Op::Enter {
        params: 0,
        locals: 1,
    });
    builder.emit(Op::Int(42));
    builder.emit(Op::SetLocal { up: 0, slot: 0 });
    builder.emit(Op::Int(1));
    builder.emit(Op::Push);
    builder.emit(Op::PushHandler(handler_a));
    builder.emit(Op::Int(2));
    builder.emit(Op::Push);
    builder.emit(Op::PushHandler(handler_b));
    builder.emit(Op::Int(3));
    builder.emit(Op::Push);
    builder.call(thrower, 0, Link::Null);
    builder.emit(Op::Int(99));
    builder.emit(Op::Halt);
    builder.entry(main);

    builder.func("thrower");
    builder.place(thrower);
    builder.emit(Op::Enter {
        params: 0,
        locals: 2,
    });
    builder.emit(Op::Int(7));
    builder.emit(Op::Push);
    builder.emit(Op::Str(boom));
    builder.emit(Op::Raise);

    builder.func("handler-b");
    builder.place(handler_b);
    builder.emit(Op::Pop);
    builder.emit(Op::Print(Kind::Str));
    builder.emit(Op::Pop);
    builder.emit(Op::Print(Kind::Int));
    // The environment is main's again
    builder.emit(Op::Local { up: 0, slot: 0 });
    builder.emit(Op::Print(Kind::Int));
    builder.call(handler_counter, 0, Link::Null);
    builder.emit(Op::Print(Kind::Bool));
    builder.emit(Op::Pop);
    builder.emit(Op::Print(Kind::Int));
    builder.emit(Op::Int(0));
    builder.emit(Op::Halt);

    builder.func("handler-a");
    builder.place(handler_a);
    builder.emit(Op::Str(a_ran));
    builder.emit(Op::Print(Kind::Str));
    builder.emit(Op::Int(5));
    builder.emit(Op::Halt);

    let finished = run(builder);
    assert_eq!(Exit::Halted(0), finished.exit);
    assert_eq!("boom\n2\n42\ntrue\n1\n", finished.output);
    assert_eq!(1, HANDLERS_LEFT.with(Cell::get));
}

#[test]
fn builtin_exceptions_are_catchable() {
    let cases: &[(&[Op], &str)] = &[
        (&[Op::Null, Op::Car], "null-pointer"),
        (
            &[
                Op::Int(1),
                Op::Push,
                Op::MakeArray(1),
                Op::Push,
                Op::Int(1),
                Op::ArrayRef,
            ],
            "index-out-of-range",
        ),
        (
            &[Op::Int(1), Op::Push, Op::MakeArray(1), Op::Variant(2)],
            "data-variant",
        ),
        (&[Op::Bool(false), Op::Require], "require-failed"),
        (
            &[Op::Int(1), Op::Push, Op::Int(0), Op::Arith(ArithOp::Div)],
            "divide-by-zero",
        ),
        (&[Op::Int(1), Op::CVarRef], "type-mismatch"),
    ];

    for (ops, expected) in cases {
        let mut builder = ProgramBuilder::new();
        let handler = builder.new_label();

        builder.func("main");
        let main = builder.label_here();
        builder.emit(Op::PushHandler(handler));
        for op in ops.iter() {
            builder.emit(op.clone());
        }
        builder.emit(Op::Int(99));
        builder.emit(Op::Halt);
        builder.entry(main);

        builder.place(handler);
        builder.emit(Op::Print(Kind::Str));
        builder.emit(Op::Int(1));
        builder.emit(Op::Halt);

        let finished = run(builder);
        assert_eq!(Exit::Halted(1), finished.exit, "{}", expected);
        assert_eq!(format!("{}\n", expected), finished.output);
    }
}

#[test]
fn pop_handler_restores_outer_handler() {
    let mut builder = ProgramBuilder::new();
    let outer = builder.new_label();
    let inner = builder.new_label();

    builder.func("main");
    let main = builder.label_here();
    builder.emit(Op::PushHandler(outer));
    builder.emit(Op::PushHandler(inner));
    builder.emit(Op::PopHandler);
    builder.emit(Op::Int(3));
    builder.emit(Op::Raise);
    builder.entry(main);

    builder.place(inner);
    builder.emit(Op::Int(10));
    builder.emit(Op::Halt);

    builder.place(outer);
    builder.emit(Op::Pop);
    builder.emit(Op::Halt);

    assert_eq!(Exit::Halted(3), run(builder).exit);
}

#[test]
fn uncaught_exception_has_backtrace() {
    let mut builder = ProgramBuilder::new();
    let faulty = builder.new_label();

    builder.func("main");
    builder.line(1);
    let main = builder.label_here();
    builder.call(faulty, 0, Link::Null);
    builder.emit(Op::Halt);
    builder.entry(main);

    builder.func("faulty");
    builder.line(7);
    builder.place(faulty);
    builder.emit(Op::Null);
    builder.emit(Op::Cdr);
    builder.emit(Op::Return);

    let finished = run(builder);
    let uncaught = match finished.exit {
        Exit::Uncaught(uncaught) => uncaught,
        other => panic!("unexpected exit {:?}", other),
    };

    assert_eq!("null-pointer", uncaught.message);

    let names: Vec<&str> = uncaught
        .backtrace
        .iter()
        .map(|frame| frame.name.as_str())
        .collect();
    assert_eq!(vec!["faulty", "main"], names);
    assert_eq!(7, uncaught.backtrace[0].line);
    assert!(!finished.engine.saved_continuations().is_null());
}

#[test]
fn backtrace_names_the_label_execution_fell_through_to() {
    let mut builder = ProgramBuilder::new();
    let helper = builder.new_label();

    builder.func("main");
    builder.line(1);
    let main = builder.label_here();
    builder.call(helper, 0, Link::Null);
    builder.line(5);
    builder.label_here();
    builder.emit(Op::Int(3));
    builder.emit(Op::Push);
    builder.emit(Op::Int(0));
    builder.emit(Op::Arith(ArithOp::Div));
    builder.emit(Op::Halt);
    builder.entry(main);

    builder.func("helper");
    builder.line(9);
    builder.place(helper);
    builder.emit(Op::Return);

    let uncaught = match run(builder).exit {
        Exit::Uncaught(uncaught) => uncaught,
        other => panic!("unexpected exit {:?}", other),
    };

    assert_eq!("divide-by-zero", uncaught.message);
    assert_eq!("main", uncaught.backtrace[0].name);
    assert_eq!(5, uncaught.backtrace[0].line);
}

#[test]
fn raised_values_reach_the_top_level() {
    let mut builder = ProgramBuilder::new();
    let main = builder.label_here();
    builder.emit(Op::Int(12));
    builder.emit(Op::Raise);
    builder.entry(main);

    match run(builder).exit {
        Exit::Uncaught(uncaught) => assert_eq!("12", uncaught.message),
        other => panic!("unexpected exit {:?}", other),
    }
}

#[test]
fn null_is_told_apart_from_zero() {
    let mut builder = ProgramBuilder::new();
    let main = builder.label_here();
    for op in vec![Op::Int(0), Op::Bool(false), Op::Char('\0'), Op::Null] {
        builder.emit(op);
        builder.emit(Op::IsNull);
        builder.emit(Op::Print(Kind::Bool));
    }
    builder.emit(Op::Null);
    builder.emit(Op::Print(Kind::Int));
    builder.emit(Op::Int(0));
    builder.emit(Op::Print(Kind::Int));
    builder.emit(Op::Null);
    builder.emit(Op::Raise);
    builder.entry(main);

    let finished = run(builder);
    assert_eq!("false\nfalse\nfalse\ntrue\nnull\n0\n", finished.output);

    match finished.exit {
        Exit::Uncaught(uncaught) => assert_eq!("null", uncaught.message),
        other => panic!("unexpected exit {:?}", other),
    }
}
