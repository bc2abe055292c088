//! Textual program loader
//!
//! Programs are written one instruction per line. A line may begin with a `label:` and `;`
//! starts a comment running to the end of the line. Directives start with a dot:
//!
//! ```text
//! .module NAME GLOBALS INIT-LABEL
//! .func NAME
//! .line N
//! .entry LABEL
//! ```
//!
//! Without an `.entry` directive execution starts at the `main` label.

use std::collections::HashMap;
use std::ops::Range;
use std::{error, fmt, result, slice};

use kestrel_runtime::engine::MAX_SIGNAL;
use kestrel_runtime::program::{ArithOp, BuildError, Kind, Label, Link, Op, Program, ProgramBuilder};
use kestrel_runtime::value::Value;

/// Byte range in the program text
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub struct Span {
    start: u32,
    end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Span {
        Span { start, end }
    }

    fn from_offsets(start: usize, end: usize) -> Span {
        Span::new(start as u32, end as u32)
    }

    pub fn start(self) -> u32 {
        self.start
    }

    pub fn end(self) -> u32 {
        self.end
    }

    pub fn to_range(self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "Span[]")
        } else {
            write!(f, "Span[{}:{}]", self.start, self.end)
        }
    }
}

/// Spanned loader error
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    span: Span,
    kind: ErrorKind,
}

impl Error {
    pub fn new(span: Span, kind: ErrorKind) -> Error {
        Error { span, kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind().message())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    UnknownInstruction(String),
    UnknownDirective(String),
    MissingOperand(&'static str),
    UnexpectedOperand,
    InvalidInteger,
    IntegerOutOfRange,
    InvalidFloat,
    InvalidBool,
    InvalidChar,
    UnsupportedStringEscape,
    UnterminatedLiteral,
    UnknownKind(String),
    DuplicateLabel(String),
    UndefinedLabel(String),
    DuplicateModule(String),
    UnknownModule(String),
    GlobalOutOfRange { module: String, count: usize },
    InvalidSignal,
    MissingEntry,
    Build(BuildError),
}

impl ErrorKind {
    /// Returns a string describing the error
    pub fn message(&self) -> String {
        match self {
            ErrorKind::UnknownInstruction(name) => format!("unknown instruction `{}`", name),
            ErrorKind::UnknownDirective(name) => format!("unknown directive `.{}`", name),
            ErrorKind::MissingOperand(expected) => format!("expected {}", expected),
            ErrorKind::UnexpectedOperand => "unexpected operand".to_owned(),
            ErrorKind::InvalidInteger => "invalid integer literal".to_owned(),
            ErrorKind::IntegerOutOfRange => "integer does not fit in an immediate".to_owned(),
            ErrorKind::InvalidFloat => "unable to parse float".to_owned(),
            ErrorKind::InvalidBool => "expected `true` or `false`".to_owned(),
            ErrorKind::InvalidChar => "character literal must contain one character".to_owned(),
            ErrorKind::UnsupportedStringEscape => "unsupported escape".to_owned(),
            ErrorKind::UnterminatedLiteral => "unterminated literal".to_owned(),
            ErrorKind::UnknownKind(name) => format!("unknown print kind `{}`", name),
            ErrorKind::DuplicateLabel(name) => {
                format!("label `{}` is defined more than once", name)
            }
            ErrorKind::UndefinedLabel(name) => format!("label `{}` is never defined", name),
            ErrorKind::DuplicateModule(name) => {
                format!("module `{}` is declared more than once", name)
            }
            ErrorKind::UnknownModule(name) => format!("unknown module `{}`", name),
            ErrorKind::GlobalOutOfRange { module, count } => {
                format!("module `{}` only has {} globals", module, count)
            }
            ErrorKind::InvalidSignal => format!("signal numbers range from 1 to {}", MAX_SIGNAL),
            ErrorKind::MissingEntry => {
                "program has no `main` label or `.entry` directive".to_owned()
            }
            ErrorKind::Build(error) => error.to_string(),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, PartialEq)]
enum TokenKind<'src> {
    Word(&'src str),
    Str(String),
    Char(String),
}

#[derive(Debug, PartialEq)]
struct Token<'src> {
    span: Span,
    kind: TokenKind<'src>,
}

/// Splits a line in to tokens; `offset` is the line's position in the whole text
fn tokenise_line(line: &str, offset: usize) -> Result<Vec<Token<'_>>> {
    let mut tokens = vec![];
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == ';' {
            break;
        }

        if c == '"' || c == '\'' {
            chars.next();

            let mut contents = String::new();
            let end = loop {
                match chars.next() {
                    Some((index, next)) if next == c => break index + 1,
                    Some((index, '\\')) => match chars.next() {
                        Some((_, 'n')) => contents.push('\n'),
                        Some((_, 't')) => contents.push('\t'),
                        Some((_, 's')) => contents.push(' '),
                        Some((_, escaped @ '\\'))
                        | Some((_, escaped @ '"'))
                        | Some((_, escaped @ '\'')) => contents.push(escaped),
                        Some((escape_end, escaped)) => {
                            return Err(Error::new(
                                Span::from_offsets(
                                    offset + index,
                                    offset + escape_end + escaped.len_utf8(),
                                ),
                                ErrorKind::UnsupportedStringEscape,
                            ));
                        }
                        None => break line.len() + 1,
                    },
                    Some((_, other)) => contents.push(other),
                    None => break line.len() + 1,
                }
            };

            if end > line.len() {
                return Err(Error::new(
                    Span::from_offsets(offset + start, offset + line.len()),
                    ErrorKind::UnterminatedLiteral,
                ));
            }

            let kind = if c == '"' {
                TokenKind::Str(contents)
            } else {
                TokenKind::Char(contents)
            };

            tokens.push(Token {
                span: Span::from_offsets(offset + start, offset + end),
                kind,
            });
            continue;
        }

        let mut end = start;
        while let Some(&(index, next)) = chars.peek() {
            if next.is_whitespace() || next == ';' || next == '"' {
                break;
            }

            end = index + next.len_utf8();
            chars.next();
        }

        tokens.push(Token {
            span: Span::from_offsets(offset + start, offset + end),
            kind: TokenKind::Word(&line[start..end]),
        });
    }

    Ok(tokens)
}

/// Operands following a mnemonic
struct Operands<'t, 'src> {
    tokens: slice::Iter<'t, Token<'src>>,
    /// Reported when an operand is missing
    end_span: Span,
}

impl<'t, 'src> Operands<'t, 'src> {
    fn new(tokens: &'t [Token<'src>], mnemonic_span: Span) -> Self {
        let end = tokens
            .last()
            .map(|token| token.span.end())
            .unwrap_or_else(|| mnemonic_span.end());

        Operands {
            tokens: tokens.iter(),
            end_span: Span::new(end, end),
        }
    }

    fn next(&mut self, expected: &'static str) -> Result<&'t Token<'src>> {
        self.tokens
            .next()
            .ok_or_else(|| Error::new(self.end_span, ErrorKind::MissingOperand(expected)))
    }

    fn word(&mut self, expected: &'static str) -> Result<(Span, &'src str)> {
        let token = self.next(expected)?;
        match token.kind {
            TokenKind::Word(word) => Ok((token.span, word)),
            _ => Err(Error::new(token.span, ErrorKind::MissingOperand(expected))),
        }
    }

    fn has_more(&self) -> bool {
        !self.tokens.as_slice().is_empty()
    }

    fn usize(&mut self, expected: &'static str) -> Result<usize> {
        let (span, word) = self.word(expected)?;
        word.parse()
            .map_err(|_| Error::new(span, ErrorKind::InvalidInteger))
    }

    fn i64(&mut self, expected: &'static str) -> Result<i64> {
        let (span, word) = self.word(expected)?;
        word.parse()
            .map_err(|_| Error::new(span, ErrorKind::InvalidInteger))
    }

    /// Parses an integer that must fit in an immediate value
    fn immediate(&mut self) -> Result<i64> {
        let (span, word) = self.word("integer")?;
        let value = word
            .parse()
            .map_err(|_| Error::new(span, ErrorKind::InvalidInteger))?;

        match Value::try_from_int(value) {
            Some(_) => Ok(value),
            None => Err(Error::new(span, ErrorKind::IntegerOutOfRange)),
        }
    }

    fn string(&mut self) -> Result<&'t str> {
        let token = self.next("string literal")?;
        match &token.kind {
            TokenKind::Str(contents) => Ok(contents.as_str()),
            _ => Err(Error::new(token.span, ErrorKind::MissingOperand("string literal"))),
        }
    }

    fn char(&mut self) -> Result<char> {
        let token = self.next("character literal")?;
        let contents = match &token.kind {
            TokenKind::Char(contents) => contents,
            _ => {
                return Err(Error::new(
                    token.span,
                    ErrorKind::MissingOperand("character literal"),
                ))
            }
        };

        let mut chars = contents.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(Error::new(token.span, ErrorKind::InvalidChar)),
        }
    }

    fn finish(mut self) -> Result<()> {
        match self.tokens.next() {
            Some(token) => Err(Error::new(token.span, ErrorKind::UnexpectedOperand)),
            None => Ok(()),
        }
    }
}

struct LabelEntry {
    label: Label,
    defined: Option<Span>,
    first_use: Span,
}

struct ModuleEntry {
    index: usize,
    first_global: usize,
    global_count: usize,
}

struct Assembler {
    builder: ProgramBuilder,
    labels: HashMap<String, LabelEntry>,
    modules: HashMap<String, ModuleEntry>,
    entry: Option<(String, Span)>,
    last_instruction: Option<Span>,
    end_span: Span,
}

/// Assembles program text in to a loadable program
pub fn assemble(source: &str) -> Result<Program> {
    let end = source.len() as u32;
    let mut assembler = Assembler {
        builder: ProgramBuilder::new(),
        labels: HashMap::new(),
        modules: HashMap::new(),
        entry: None,
        last_instruction: None,
        end_span: Span::new(end, end),
    };

    let mut offset = 0;
    for line in source.split('\n') {
        assembler.assemble_line(line.trim_end_matches('\r'), offset)?;
        offset += line.len() + 1;
    }

    assembler.finish()
}

impl Assembler {
    fn label_ref(&mut self, name: &str, span: Span) -> Label {
        if let Some(entry) = self.labels.get(name) {
            return entry.label;
        }

        let label = self.builder.new_label();
        self.labels.insert(
            name.to_owned(),
            LabelEntry {
                label,
                defined: None,
                first_use: span,
            },
        );

        label
    }

    fn define_label(&mut self, name: &str, span: Span) -> Result<()> {
        let label = self.label_ref(name, span);

        let entry = self
            .labels
            .get_mut(name)
            .unwrap_or_else(|| panic!("label `{}` vanished", name));

        if entry.defined.is_some() {
            return Err(Error::new(span, ErrorKind::DuplicateLabel(name.to_owned())));
        }

        entry.defined = Some(span);
        self.builder.place(label);
        Ok(())
    }

    fn label_operand(&mut self, operands: &mut Operands<'_, '_>) -> Result<Label> {
        let (span, name) = operands.word("label")?;
        Ok(self.label_ref(name, span))
    }

    fn module_operand(&self, operands: &mut Operands<'_, '_>) -> Result<&ModuleEntry> {
        let (span, name) = operands.word("module name")?;
        self.modules
            .get(name)
            .ok_or_else(|| Error::new(span, ErrorKind::UnknownModule(name.to_owned())))
    }

    /// Parses `MODULE INDEX` in to a global slot
    fn global_operand(&self, operands: &mut Operands<'_, '_>) -> Result<usize> {
        let (module_span, module_name) = operands.word("module name")?;
        let module = self.modules.get(module_name).ok_or_else(|| {
            Error::new(module_span, ErrorKind::UnknownModule(module_name.to_owned()))
        })?;

        let (index_span, index) = operands.word("global index")?;
        let index: usize = index
            .parse()
            .map_err(|_| Error::new(index_span, ErrorKind::InvalidInteger))?;

        if index >= module.global_count {
            return Err(Error::new(
                index_span,
                ErrorKind::GlobalOutOfRange {
                    module: module_name.to_owned(),
                    count: module.global_count,
                },
            ));
        }

        Ok(module.first_global + index)
    }

    /// Parses `TARGET ARGC [UP]`
    fn call_operands(&mut self, operands: &mut Operands<'_, '_>) -> Result<(Label, usize, Link)> {
        let target = self.label_operand(operands)?;
        let argc = operands.usize("argument count")?;

        let link = if operands.has_more() {
            Link::Env {
                up: operands.usize("environment depth")?,
            }
        } else {
            Link::Null
        };

        Ok((target, argc, link))
    }

    fn assemble_line(&mut self, line: &str, offset: usize) -> Result<()> {
        let tokens = tokenise_line(line, offset)?;
        let mut rest = &tokens[..];

        if let Some(Token {
            span,
            kind: TokenKind::Word(word),
        }) = rest.first()
        {
            if let Some(name) = word.strip_suffix(':') {
                self.define_label(name, *span)?;
                rest = &rest[1..];
            }
        }

        let (first, operand_tokens) = match rest.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };

        let mnemonic = match first.kind {
            TokenKind::Word(word) => word,
            _ => return Err(Error::new(first.span, ErrorKind::MissingOperand("instruction"))),
        };

        let mut operands = Operands::new(operand_tokens, first.span);

        if let Some(directive) = mnemonic.strip_prefix('.') {
            self.directive(first.span, directive, &mut operands)?;
        } else {
            self.instruction(first.span, mnemonic, &mut operands)?;
            self.last_instruction = Some(first.span);
        }

        operands.finish()
    }

    fn directive(
        &mut self,
        span: Span,
        directive: &str,
        operands: &mut Operands<'_, '_>,
    ) -> Result<()> {
        match directive {
            "func" => {
                let (_, name) = operands.word("function name")?;
                self.builder.func(name);
            }
            "line" => {
                let line = operands.usize("line number")?;
                self.builder.line(line);
            }
            "module" => {
                let (name_span, name) = operands.word("module name")?;
                let global_count = operands.usize("global count")?;
                let init = self.label_operand(operands)?;

                if self.modules.contains_key(name) {
                    return Err(Error::new(
                        name_span,
                        ErrorKind::DuplicateModule(name.to_owned()),
                    ));
                }

                let (index, first_global) = self.builder.module(name, global_count, init);
                self.modules.insert(
                    name.to_owned(),
                    ModuleEntry {
                        index,
                        first_global,
                        global_count,
                    },
                );
            }
            "entry" => {
                let (label_span, name) = operands.word("entry label")?;
                self.entry = Some((name.to_owned(), label_span));
            }
            other => {
                return Err(Error::new(
                    span,
                    ErrorKind::UnknownDirective(other.to_owned()),
                ))
            }
        }

        Ok(())
    }

    fn instruction(
        &mut self,
        span: Span,
        mnemonic: &str,
        operands: &mut Operands<'_, '_>,
    ) -> Result<()> {
        let op = match mnemonic {
            "int" => Op::Int(operands.immediate()?),
            "char" => Op::Char(operands.char()?),
            "bool" => {
                let (bool_span, word) = operands.word("boolean")?;
                match word {
                    "true" => Op::Bool(true),
                    "false" => Op::Bool(false),
                    _ => return Err(Error::new(bool_span, ErrorKind::InvalidBool)),
                }
            }
            "null" => Op::Null,
            "str" => {
                let contents = operands.string()?;
                Op::Str(self.builder.string(contents))
            }
            "real" => {
                let (real_span, word) = operands.word("float")?;
                Op::Real(
                    word.parse()
                        .map_err(|_| Error::new(real_span, ErrorKind::InvalidFloat))?,
                )
            }
            "long" => Op::Long(operands.i64("integer")?),

            "push" => Op::Push,
            "pop" => Op::Pop,
            "drop" => Op::Drop(operands.usize("slot count")?),

            "local" | "set-local" => {
                let up = operands.usize("environment depth")?;
                let slot = operands.usize("slot index")?;

                if mnemonic == "local" {
                    Op::Local { up, slot }
                } else {
                    Op::SetLocal { up, slot }
                }
            }
            "global" => Op::Global(self.global_operand(operands)?),
            "set-global" => Op::SetGlobal(self.global_operand(operands)?),

            "add" => Op::Arith(ArithOp::Add),
            "sub" => Op::Arith(ArithOp::Sub),
            "mul" => Op::Arith(ArithOp::Mul),
            "div" => Op::Arith(ArithOp::Div),
            "rem" => Op::Arith(ArithOp::Rem),
            "lt" => Op::Arith(ArithOp::Lt),
            "le" => Op::Arith(ArithOp::Le),
            "gt" => Op::Arith(ArithOp::Gt),
            "ge" => Op::Arith(ArithOp::Ge),
            "eq" => Op::Arith(ArithOp::Eq),
            "ne" => Op::Arith(ArithOp::Ne),
            "neg" => Op::Neg,
            "not" => Op::Not,

            "cons" => Op::Cons,
            "car" => Op::Car,
            "cdr" => Op::Cdr,
            "null?" => Op::IsNull,

            "array" => Op::MakeArray(operands.usize("element count")?),
            "array-ref" => Op::ArrayRef,
            "array-set" => Op::ArraySet,
            "array-len" => Op::ArrayLen,
            "variant" => Op::Variant(operands.immediate()?),

            "concat" => Op::Concat,

            "cvar" => Op::CVar,
            "cvar-ref" => Op::CVarRef,
            "cvar-set" => Op::CVarSet,

            "require" => Op::Require,
            "jump" => Op::Jump(self.label_operand(operands)?),
            "jump-if-false" => Op::JumpIfFalse(self.label_operand(operands)?),

            "enter" => Op::Enter {
                params: operands.usize("parameter count")?,
                locals: operands.usize("local count")?,
            },
            "closure" => Op::Closure(self.label_operand(operands)?),
            "call" => {
                let (target, argc, link) = self.call_operands(operands)?;
                self.builder.call(target, argc, link);
                return Ok(());
            }
            "tail-call" => {
                let (target, argc, link) = self.call_operands(operands)?;
                Op::TailCall { target, argc, link }
            }
            "call-closure" => {
                let argc = operands.usize("argument count")?;
                self.builder.call_closure(argc);
                return Ok(());
            }
            "tail-call-closure" => Op::TailCallClosure {
                argc: operands.usize("argument count")?,
            },
            "return" => Op::Return,

            "push-handler" => Op::PushHandler(self.label_operand(operands)?),
            "pop-handler" => Op::PopHandler,
            "raise" => Op::Raise,

            "init-module" => {
                let module = self.module_operand(operands)?.index;
                self.builder.init_module(module);
                return Ok(());
            }
            "set-signal-handler" => {
                let (signo_span, word) = operands.word("signal number")?;
                let signo: i32 = word
                    .parse()
                    .map_err(|_| Error::new(signo_span, ErrorKind::InvalidInteger))?;

                if !(1..=MAX_SIGNAL as i32).contains(&signo) {
                    return Err(Error::new(signo_span, ErrorKind::InvalidSignal));
                }

                Op::SetSignalHandler(signo)
            }
            "set-timer" => {
                let (millis_span, word) = operands.word("delay in milliseconds")?;
                Op::SetTimer(
                    word.parse()
                        .map_err(|_| Error::new(millis_span, ErrorKind::InvalidInteger))?,
                )
            }

            "print" => {
                let (kind_span, word) = operands.word("print kind")?;
                Op::Print(parse_kind(word).ok_or_else(|| {
                    Error::new(kind_span, ErrorKind::UnknownKind(word.to_owned()))
                })?)
            }
            "halt" => Op::Halt,

            other => {
                return Err(Error::new(
                    span,
                    ErrorKind::UnknownInstruction(other.to_owned()),
                ))
            }
        };

        self.builder.emit(op);
        Ok(())
    }

    fn finish(self) -> Result<Program> {
        let Assembler {
            mut builder,
            labels,
            entry,
            last_instruction,
            end_span,
            ..
        } = self;

        let undefined = labels
            .iter()
            .filter(|(_, entry)| entry.defined.is_none())
            .min_by_key(|(_, entry)| entry.first_use.start());

        if let Some((name, entry)) = undefined {
            return Err(Error::new(
                entry.first_use,
                ErrorKind::UndefinedLabel(name.clone()),
            ));
        }

        let entry_label = match entry {
            Some((name, span)) => labels
                .get(&name)
                .map(|entry| entry.label)
                .ok_or_else(|| Error::new(span, ErrorKind::UndefinedLabel(name.clone())))?,
            None => labels
                .get("main")
                .map(|entry| entry.label)
                .ok_or_else(|| Error::new(end_span, ErrorKind::MissingEntry))?,
        };

        builder.entry(entry_label);

        builder.build().map_err(|error| {
            let span = match &error {
                BuildError::FallsOffEnd => last_instruction.unwrap_or(end_span),
                BuildError::DanglingLabel(label) => labels
                    .values()
                    .find(|entry| entry.label == *label)
                    .and_then(|entry| entry.defined)
                    .unwrap_or(end_span),
                _ => end_span,
            };

            Error::new(span, ErrorKind::Build(error))
        })
    }
}

fn parse_kind(word: &str) -> Option<Kind> {
    Some(match word {
        "int" => Kind::Int,
        "char" => Kind::Char,
        "bool" => Kind::Bool,
        "str" => Kind::Str,
        "real" => Kind::Real,
        "long" => Kind::Long,
        "value" => Kind::Value,
        _ => return None,
    })
}
