//! Loaded programs
//!
//! A program is a linear instruction stream for an accumulator machine with an operand stack,
//! together with one [`Procedure`] descriptor per label. Descriptors are the engine's program
//! locations: continuations, closures and exception handlers all refer to code by descriptor.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::ops::Range;

use crate::boxed::refs::Gc;
use crate::boxed::{DebugInfo, DispatchFn, Procedure};
use crate::interp;
use crate::value::Value;

/// Symbolic location in a program under construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

impl Label {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Static link of a directly called function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Top level function with no enclosing environment
    Null,
    /// Function nested `up` levels above the current environment
    Env { up: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Static type of the accumulator for `print`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Int,
    Char,
    Bool,
    Str,
    Real,
    Long,
    Value,
}

/// Instruction
///
/// Binary operations take their left operand from the top of the operand stack and their right
/// operand from the accumulator, leaving the result in the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Int(i64),
    Char(char),
    Bool(bool),
    Null,
    Str(usize),
    Real(f64),
    Long(i64),

    Push,
    Pop,
    Drop(usize),

    Local { up: usize, slot: usize },
    SetLocal { up: usize, slot: usize },
    Global(usize),
    SetGlobal(usize),

    Arith(ArithOp),
    Neg,
    Not,

    Cons,
    Car,
    Cdr,
    IsNull,

    MakeArray(usize),
    ArrayRef,
    ArraySet,
    ArrayLen,
    Variant(i64),

    Concat,

    CVar,
    CVarRef,
    CVarSet,

    Require,
    Jump(Label),
    JumpIfFalse(Label),

    Enter { params: usize, locals: usize },
    Closure(Label),
    Call { target: Label, argc: usize, link: Link, resume: Label },
    TailCall { target: Label, argc: usize, link: Link },
    CallClosure { argc: usize, resume: Label },
    TailCallClosure { argc: usize },
    Return,

    PushHandler(Label),
    PopHandler,
    Raise,

    InitModule { module: usize, resume: Label },
    SetSignalHandler(i32),
    SetTimer(u64),

    Print(Kind),
    Halt,
}

impl Op {
    fn for_each_label(&self, mut visit: impl FnMut(Label)) {
        match *self {
            Op::Jump(label)
            | Op::JumpIfFalse(label)
            | Op::Closure(label)
            | Op::PushHandler(label) => visit(label),
            Op::Call { target, resume, .. } => {
                visit(target);
                visit(resume);
            }
            Op::TailCall { target, .. } => visit(target),
            Op::CallClosure { resume, .. } | Op::InitModule { resume, .. } => visit(resume),
            _ => {}
        }
    }

    /// Returns true if control never falls through to the next instruction
    fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Jump(_)
                | Op::TailCall { .. }
                | Op::TailCallClosure { .. }
                | Op::Return
                | Op::Raise
                | Op::Halt
        )
    }
}

/// Separately initialised group of globals
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub globals: Range<usize>,
    pub init: Label,
}

/// Program ready to be loaded in to an engine
pub struct Program {
    descriptors: Box<[Procedure]>,
    /// Owns the debug info the descriptors point to
    _debug_info: Box<[DebugInfo]>,
    label_offsets: Box<[Option<usize>]>,
    /// Label placed at each instruction offset
    label_starts: Box<[Option<Label>]>,
    code: Box<[Op]>,
    strings: Box<[String]>,
    modules: Box<[Module]>,
    global_count: usize,
    entry: Label,
}

impl Program {
    /// Returns the descriptor for a label as a program location
    pub fn descriptor(&self, label: Label) -> Value {
        self.descriptors[label.0].as_value()
    }

    /// Returns the label of a descriptor belonging to this program
    pub fn label_of(&self, procedure: Gc<Procedure>) -> Option<Label> {
        let base = self.descriptors.as_ptr() as usize;
        let address = procedure.as_ptr() as usize;
        let stride = std::mem::size_of::<Procedure>();

        if address < base || address >= base + self.descriptors.len() * stride {
            return None;
        }

        Some(Label((address - base) / stride))
    }

    /// Returns the instruction offset a descriptor starts at, or `None` for natives and foreign
    /// descriptors
    pub fn offset_of(&self, procedure: Gc<Procedure>) -> Option<usize> {
        self.label_of(procedure)
            .and_then(|label| self.label_offsets[label.0])
    }

    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.label_offsets[label.0]
    }

    /// Returns a label placed at `offset`, preferring the one created first
    pub fn label_at(&self, offset: usize) -> Option<Label> {
        self.label_starts.get(offset).copied().flatten()
    }

    pub fn code(&self) -> &[Op] {
        &self.code
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn global_count(&self) -> usize {
        self.global_count
    }

    /// Returns the module owning a global slot
    pub fn module_of_global(&self, global: usize) -> Option<usize> {
        self.modules
            .iter()
            .position(|module| module.globals.contains(&global))
    }

    pub fn entry(&self) -> Label {
        self.entry
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Program")
            .field("labels", &self.descriptors.len())
            .field("code", &self.code.len())
            .field("modules", &self.modules)
            .field("entry", &self.entry)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    MissingEntry,
    UnplacedLabel(Label),
    LabelPlacedTwice(Label),
    /// A label was placed after the final instruction
    DanglingLabel(Label),
    /// The final instruction can fall through past the end of the program
    FallsOffEnd,
    IntOutOfRange(i64),
    UnknownGlobal(usize),
    UnknownString(usize),
    UnknownModule(usize),
    BadSignal(i32),
}

impl fmt::Display for BuildError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::MissingEntry => write!(formatter, "program has no entry point"),
            BuildError::UnplacedLabel(label) => {
                write!(formatter, "label {} is used but never placed", label.0)
            }
            BuildError::LabelPlacedTwice(label) => {
                write!(formatter, "label {} is placed more than once", label.0)
            }
            BuildError::DanglingLabel(label) => {
                write!(formatter, "label {} is not followed by an instruction", label.0)
            }
            BuildError::FallsOffEnd => {
                write!(formatter, "execution can fall off the end of the program")
            }
            BuildError::IntOutOfRange(value) => {
                write!(formatter, "integer {} does not fit in an immediate", value)
            }
            BuildError::UnknownGlobal(index) => write!(formatter, "unknown global {}", index),
            BuildError::UnknownString(index) => write!(formatter, "unknown string {}", index),
            BuildError::UnknownModule(index) => write!(formatter, "unknown module {}", index),
            BuildError::BadSignal(signo) => write!(formatter, "invalid signal number {}", signo),
        }
    }
}

impl Error for BuildError {}

enum Target {
    Code,
    Native(DispatchFn),
}

struct LabelInfo {
    target: Target,
    offset: Option<usize>,
    func: usize,
    line: usize,
}

/// Incrementally assembles a [`Program`]
pub struct ProgramBuilder {
    labels: Vec<LabelInfo>,
    funcs: Vec<DebugInfo>,
    current_func: usize,
    current_line: usize,
    code: Vec<Op>,
    strings: Vec<String>,
    string_indices: HashMap<String, usize>,
    modules: Vec<Module>,
    global_count: usize,
    entry: Option<Label>,
    errors: Vec<BuildError>,
}

impl ProgramBuilder {
    pub fn new() -> ProgramBuilder {
        ProgramBuilder {
            labels: vec![],
            funcs: vec![DebugInfo::new("<toplevel>")],
            current_func: 0,
            current_line: 0,
            code: vec![],
            strings: vec![],
            string_indices: HashMap::new(),
            modules: vec![],
            global_count: 0,
            entry: None,
            errors: vec![],
        }
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelInfo {
            target: Target::Code,
            offset: None,
            func: self.current_func,
            line: self.current_line,
        });

        Label(self.labels.len() - 1)
    }

    /// Places a label at the next instruction
    pub fn place(&mut self, label: Label) {
        let info = &mut self.labels[label.0];
        if info.offset.is_some() {
            self.errors.push(BuildError::LabelPlacedTwice(label));
            return;
        }

        info.offset = Some(self.code.len());
        info.func = self.current_func;
        info.line = self.current_line;
    }

    /// Creates and places a new label
    pub fn label_here(&mut self) -> Label {
        let label = self.new_label();
        self.place(label);
        label
    }

    /// Starts a function; labels placed from now on are reported under `name`
    pub fn func(&mut self, name: impl Into<String>) {
        self.funcs.push(DebugInfo::owned(name.into()));
        self.current_func = self.funcs.len() - 1;
    }

    /// Sets the source line reported for labels placed from now on
    pub fn line(&mut self, line: usize) {
        self.current_line = line;
    }

    pub fn emit(&mut self, op: Op) {
        self.code.push(op);
    }

    /// Emits a resuming call followed by its implicit resume label
    pub fn call(&mut self, target: Label, argc: usize, link: Link) {
        let resume = self.new_label();
        self.emit(Op::Call {
            target,
            argc,
            link,
            resume,
        });
        self.place(resume);
    }

    /// Emits a resuming closure call followed by its implicit resume label
    pub fn call_closure(&mut self, argc: usize) {
        let resume = self.new_label();
        self.emit(Op::CallClosure { argc, resume });
        self.place(resume);
    }

    /// Emits a guarded module initialisation followed by its implicit resume label
    pub fn init_module(&mut self, module: usize) {
        let resume = self.new_label();
        self.emit(Op::InitModule { module, resume });
        self.place(resume);
    }

    /// Declares a native entry point
    pub fn native(&mut self, name: &str, dispatch: DispatchFn) -> Label {
        self.funcs.push(DebugInfo::owned(name.to_owned()));
        self.labels.push(LabelInfo {
            target: Target::Native(dispatch),
            offset: None,
            func: self.funcs.len() - 1,
            line: 0,
        });

        Label(self.labels.len() - 1)
    }

    /// Interns a string constant
    pub fn string(&mut self, value: &str) -> usize {
        if let Some(&index) = self.string_indices.get(value) {
            return index;
        }

        self.strings.push(value.to_owned());
        self.string_indices
            .insert(value.to_owned(), self.strings.len() - 1);
        self.strings.len() - 1
    }

    /// Declares a module owning `global_count` new globals
    ///
    /// Returns the module's index and the index of its first global.
    pub fn module(&mut self, name: &str, global_count: usize, init: Label) -> (usize, usize) {
        let first_global = self.global_count;
        self.global_count += global_count;

        self.modules.push(Module {
            name: name.to_owned(),
            globals: first_global..self.global_count,
            init,
        });

        (self.modules.len() - 1, first_global)
    }

    pub fn entry(&mut self, label: Label) {
        self.entry = Some(label);
    }

    fn validate(&self) -> Result<(), BuildError> {
        if let Some(error) = self.errors.first() {
            return Err(error.clone());
        }

        for (index, info) in self.labels.iter().enumerate() {
            if info.offset == Some(self.code.len()) {
                return Err(BuildError::DanglingLabel(Label(index)));
            }
        }

        match self.code.last() {
            Some(last) if last.is_terminator() => {}
            _ => return Err(BuildError::FallsOffEnd),
        }

        let is_placed = |label: Label| match self.labels[label.0].target {
            Target::Code => self.labels[label.0].offset.is_some(),
            Target::Native(_) => true,
        };

        for op in &self.code {
            let mut unplaced = None;
            op.for_each_label(|label| {
                if !is_placed(label) {
                    unplaced = Some(label);
                }
            });

            if let Some(label) = unplaced {
                return Err(BuildError::UnplacedLabel(label));
            }

            match *op {
                Op::Int(value) | Op::Variant(value) if Value::try_from_int(value).is_none() => {
                    return Err(BuildError::IntOutOfRange(value));
                }
                Op::Global(index) | Op::SetGlobal(index) if index >= self.global_count => {
                    return Err(BuildError::UnknownGlobal(index));
                }
                Op::Str(index) if index >= self.strings.len() => {
                    return Err(BuildError::UnknownString(index));
                }
                Op::InitModule { module, .. } if module >= self.modules.len() => {
                    return Err(BuildError::UnknownModule(module));
                }
                Op::SetSignalHandler(signo) if !(1..64).contains(&signo) => {
                    return Err(BuildError::BadSignal(signo));
                }
                _ => {}
            }
        }

        for module in &self.modules {
            if !is_placed(module.init) {
                return Err(BuildError::UnplacedLabel(module.init));
            }
        }

        match self.entry {
            Some(entry) if is_placed(entry) => Ok(()),
            Some(entry) => Err(BuildError::UnplacedLabel(entry)),
            None => Err(BuildError::MissingEntry),
        }
    }

    pub fn build(self) -> Result<Program, BuildError> {
        self.validate()?;

        let debug_info = self.funcs.into_boxed_slice();
        let descriptors = self
            .labels
            .iter()
            .map(|info| {
                let dispatch = match info.target {
                    Target::Code => interp::interpret as DispatchFn,
                    Target::Native(dispatch) => dispatch,
                };

                // The boxed slice's contents don't move when the program does
                unsafe { Procedure::with_debug_info(dispatch, &debug_info[info.func], info.line) }
            })
            .collect::<Vec<Procedure>>()
            .into_boxed_slice();

        let label_offsets = self.labels.iter().map(|info| info.offset).collect();

        let mut label_starts = vec![None; self.code.len()];
        for (index, info) in self.labels.iter().enumerate() {
            if let Some(start) = info.offset.and_then(|offset| label_starts.get_mut(offset)) {
                start.get_or_insert(Label(index));
            }
        }

        Ok(Program {
            descriptors,
            _debug_info: debug_info,
            label_offsets,
            label_starts: label_starts.into_boxed_slice(),
            code: self.code.into_boxed_slice(),
            strings: self.strings.into_boxed_slice(),
            modules: self.modules.into_boxed_slice(),
            global_count: self.global_count,
            // Validated above
            entry: self.entry.ok_or(BuildError::MissingEntry)?,
        })
    }
}

impl Default for ProgramBuilder {
    fn default() -> ProgramBuilder {
        ProgramBuilder::new()
    }
}
