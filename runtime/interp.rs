//! Shared dispatch function for compiled code
//!
//! Every code label of a program dispatches here. The interpreter keeps running in-process while
//! control stays inside the program; it returns to the dispatch loop when control reaches a
//! native entry point, when the program halts, or when the time slice runs out at a checkpoint.

use std::rc::Rc;
use std::time::Duration;

use crate::boxed::refs::Gc;
use crate::boxed::{Array, CVar, Procedure, Str};
use crate::engine::{Callee, Engine, ExceptionName};
use crate::error::Fatal;
use crate::program::{ArithOp, Link, Op, Program};
use crate::value::Value;

pub fn interpret(engine: &mut Engine, location: Gc<Procedure>) -> Result<bool, Fatal> {
    let program = engine.loaded_program();
    let mut offset = program
        .offset_of(location)
        .unwrap_or_else(|| panic!("{:?} has no code in the loaded program", location));

    // Moves to the location the engine transferred control to
    macro_rules! transfer {
        () => {
            match resume_offset(engine, &program) {
                Some(next) => {
                    offset = next;
                    continue;
                }
                None => return Ok(false),
            }
        };
    }

    // Transfers control and counts down a tick
    macro_rules! checkpoint {
        () => {{
            if !engine.is_halted() && engine.checkpoint() {
                return Ok(true);
            }
            transfer!();
        }};
    }

    // Follows the handler when a check has already raised
    macro_rules! guard {
        ($check:expr) => {
            if !$check {
                transfer!();
            }
        };
    }

    // Raises a built-in exception unless `$cond` holds
    macro_rules! require {
        ($cond:expr, $name:ident) => {
            if !$cond {
                engine.raise_builtin(ExceptionName::$name);
                transfer!();
            }
        };
    }

    loop {
        // Reaching a label by falling through makes it the current location
        if let Some(label) = program.label_at(offset) {
            engine.regs.pc = program.descriptor(label);
        }

        let op = &program.code()[offset];
        offset += 1;

        match *op {
            Op::Int(value) => engine.regs.acc = Value::from_int(value),
            Op::Char(value) => engine.regs.acc = Value::from_char(value),
            Op::Bool(value) => engine.regs.acc = Value::from_bool(value),
            Op::Null => engine.regs.acc = Value::NULL,
            Op::Str(index) => {
                engine.regs.acc = engine.alloc_string(&program.strings()[index])?;
            }
            Op::Real(value) => engine.regs.acc = engine.alloc_real(value)?,
            Op::Long(value) => engine.regs.acc = engine.alloc_long(value)?,

            Op::Push => {
                let acc = engine.regs.acc;
                engine.push(acc);
            }
            Op::Pop => engine.regs.acc = engine.pop(),
            Op::Drop(count) => engine.drop_slots(count),

            Op::Local { up, slot } => {
                engine.regs.acc = engine
                    .ancestor_env(up)
                    .slot(slot)
                    .unwrap_or_else(|| panic!("no slot {} in environment {} up", slot, up));
            }
            Op::SetLocal { up, slot } => {
                let acc = engine.regs.acc;
                let stored = engine.ancestor_env(up).set_slot(slot, acc);
                assert!(stored, "no slot {} in environment {} up", slot, up);
            }
            Op::Global(index) => engine.regs.acc = engine.global(index),
            Op::SetGlobal(index) => {
                let module = program.module_of_global(index);
                assert!(
                    module.map(|module| engine.is_module_initialised(module)).unwrap_or(false),
                    "global {} written before its module was initialised",
                    index
                );

                let acc = engine.regs.acc;
                engine.set_global(index, acc);
            }

            Op::Arith(arith_op) => {
                let lhs = engine.pop().as_int();
                let rhs = engine.regs.acc.as_int();

                if matches!(arith_op, ArithOp::Div | ArithOp::Rem) {
                    require!(rhs != 0, DivideByZero);
                }

                engine.regs.acc = arith(arith_op, lhs, rhs);
            }
            Op::Neg => {
                let value = engine.regs.acc.as_int();
                engine.regs.acc = Value::from_int_wrapping(value.wrapping_neg());
            }
            Op::Not => {
                let value = engine.regs.acc.as_bool();
                engine.regs.acc = Value::from_bool(!value);
            }

            Op::Cons => {
                let car = engine.pop();
                let cdr = engine.regs.acc;
                engine.regs.acc = engine.cons(car, cdr)?;
            }
            Op::Car | Op::Cdr => {
                let value = engine.regs.acc;
                guard!(engine.check_null(value));

                let pair = value.as_pair();
                require!(pair.is_some(), TypeMismatch);

                if let Some(pair) = pair {
                    engine.regs.acc = if *op == Op::Car { pair.car() } else { pair.cdr() };
                }
            }
            Op::IsNull => engine.regs.acc = Value::from_bool(engine.regs.acc.is_null()),

            Op::MakeArray(len) => engine.regs.acc = engine.tuple(len)?,
            Op::ArrayRef => {
                let index = engine.regs.acc.as_int();
                let array = engine.pop();
                guard!(engine.check_index(array, index));

                if let Some(array) = array.downcast::<Array>() {
                    engine.regs.acc = array.values()[index as usize].get();
                }
            }
            Op::ArraySet => {
                let value = engine.regs.acc;
                let index = engine.pop().as_int();
                let array = engine.pop();
                guard!(engine.check_index(array, index));

                if let Some(array) = array.downcast::<Array>() {
                    array.set(index as usize, value);
                }
            }
            Op::ArrayLen => {
                let value = engine.regs.acc;
                guard!(engine.check_null(value));

                let array = value.downcast::<Array>();
                require!(array.is_some(), TypeMismatch);

                if let Some(array) = array {
                    engine.regs.acc = Value::from_int(array.len() as i64);
                }
            }
            Op::Variant(tag) => {
                let value = engine.regs.acc;
                guard!(engine.check_null(value));

                let discriminant = value.downcast::<Array>().and_then(|array| array.get(0));
                require!(discriminant == Some(Value::from_int(tag)), DataVariant);
            }

            Op::Concat => {
                let lhs = engine.pop();
                let rhs = engine.regs.acc;
                guard!(engine.check_null(lhs) && engine.check_null(rhs));
                require!(
                    lhs.downcast::<Str>().is_some() && rhs.downcast::<Str>().is_some(),
                    TypeMismatch
                );

                engine.regs.acc = engine.string_concat(lhs, rhs)?;
            }

            Op::CVar => {
                let value = engine.regs.acc;
                engine.regs.acc = engine.alloc_cvar(value)?;
            }
            Op::CVarRef => {
                let value = engine.regs.acc;
                guard!(engine.check_null(value));

                let cvar = value.downcast::<CVar>();
                require!(cvar.is_some(), TypeMismatch);

                if let Some(cvar) = cvar {
                    engine.regs.acc = cvar.value();
                }
            }
            Op::CVarSet => {
                let value = engine.regs.acc;
                let target = engine.pop();
                guard!(engine.check_null(target));

                let cvar = target.downcast::<CVar>();
                require!(cvar.is_some(), TypeMismatch);

                if let Some(cvar) = cvar {
                    cvar.set_value(value);
                }
            }

            Op::Require => {
                let value = engine.regs.acc;
                require!(value.as_bool(), RequireFailed);
            }
            Op::Jump(target) => {
                engine.regs.pc = program.descriptor(target);
                if is_backward(&program, target, offset) {
                    checkpoint!();
                }
                transfer!();
            }
            Op::JumpIfFalse(target) => {
                if !engine.regs.acc.as_bool() {
                    engine.regs.pc = program.descriptor(target);
                    if is_backward(&program, target, offset) {
                        checkpoint!();
                    }
                    transfer!();
                }
            }

            Op::Enter { params, locals } => engine.enter(params, locals)?,
            Op::Closure(label) => {
                let env = engine.regs.env;
                engine.regs.acc = engine.alloc_closure(program.descriptor(label), env)?;
            }
            Op::Call {
                target,
                argc,
                link,
                resume,
            } => {
                let callee = Callee::Direct {
                    target: program.descriptor(target),
                    link,
                };
                engine.call(callee, argc, Some(program.descriptor(resume)))?;
                checkpoint!();
            }
            Op::TailCall { target, argc, link } => {
                let callee = Callee::Direct {
                    target: program.descriptor(target),
                    link,
                };
                engine.call(callee, argc, None)?;
                checkpoint!();
            }
            Op::CallClosure { argc, resume } => {
                engine.call(Callee::Closure, argc, Some(program.descriptor(resume)))?;
                checkpoint!();
            }
            Op::TailCallClosure { argc } => {
                engine.call(Callee::Closure, argc, None)?;
                checkpoint!();
            }
            Op::Return => {
                engine.return_to_caller();
                transfer!();
            }

            Op::PushHandler(handler) => engine.push_handler(program.descriptor(handler))?,
            Op::PopHandler => engine.pop_handler(),
            Op::Raise => {
                let exception = engine.regs.acc;
                engine.raise(exception);
                transfer!();
            }

            Op::InitModule { module, resume } => {
                if engine.init_module(module) {
                    let callee = Callee::Direct {
                        target: program.descriptor(program.modules()[module].init),
                        link: Link::Null,
                    };
                    engine.call(callee, 0, Some(program.descriptor(resume)))?;
                    checkpoint!();
                }
            }
            Op::SetSignalHandler(signo) => {
                let handler = engine.regs.acc;
                engine.set_signal_handler(signo, handler);
            }
            Op::SetTimer(millis) => {
                let handler = engine.regs.acc;
                engine.set_timer(Duration::from_millis(millis), handler);
            }

            Op::Print(kind) => engine.print(kind)?,
            Op::Halt => {
                let code = engine.regs.acc.as_int();
                engine.halt(code);
                return Ok(false);
            }
        }
    }
}

/// Returns the instruction offset of the engine's current location if it is code in `program`
fn resume_offset(engine: &Engine, program: &Rc<Program>) -> Option<usize> {
    if engine.is_halted() {
        return None;
    }

    engine
        .pc()
        .downcast::<Procedure>()
        .and_then(|procedure| program.offset_of(procedure))
}

fn is_backward(program: &Program, target: crate::program::Label, next_offset: usize) -> bool {
    program
        .label_offset(target)
        .map(|target_offset| target_offset < next_offset)
        .unwrap_or(false)
}

fn arith(op: ArithOp, lhs: i64, rhs: i64) -> Value {
    match op {
        ArithOp::Add => Value::from_int_wrapping(lhs.wrapping_add(rhs)),
        ArithOp::Sub => Value::from_int_wrapping(lhs.wrapping_sub(rhs)),
        ArithOp::Mul => Value::from_int_wrapping(lhs.wrapping_mul(rhs)),
        ArithOp::Div => Value::from_int_wrapping(lhs.wrapping_div(rhs)),
        ArithOp::Rem => Value::from_int_wrapping(lhs.wrapping_rem(rhs)),
        ArithOp::Lt => Value::from_bool(lhs < rhs),
        ArithOp::Le => Value::from_bool(lhs <= rhs),
        ArithOp::Gt => Value::from_bool(lhs > rhs),
        ArithOp::Ge => Value::from_bool(lhs >= rhs),
        ArithOp::Eq => Value::from_bool(lhs == rhs),
        ArithOp::Ne => Value::from_bool(lhs != rhs),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic() {
        assert_eq!(7, arith(ArithOp::Add, 3, 4).as_int());
        assert_eq!(-1, arith(ArithOp::Sub, 3, 4).as_int());
        assert_eq!(-7, arith(ArithOp::Div, -15, 2).as_int());
        assert_eq!(-1, arith(ArithOp::Rem, -15, 2).as_int());
        assert_eq!(Value::TRUE, arith(ArithOp::Le, 4, 4));
        assert_eq!(Value::FALSE, arith(ArithOp::Ne, 4, 4));
        assert_eq!(Value::MIN_INT, arith(ArithOp::Add, Value::MAX_INT, 1).as_int());
    }
}
