//! Compile Quo source held in a memory window into WebAssembly text.
//!
//! A compilation goes through the same steps a host driving the compiled
//! runtime would take:
//!
//! 1. the source is written NUL terminated somewhere outside of the heap;
//! 2. [`Compiler::init`] sets up the heap window and the symbol tables;
//! 3. one `compile_*` call per unit, each continuing where the previous one
//!    stopped reading;
//! 4. [`Compiler::clean_up`] frees everything but the results.
//!
//! ```
//! use quo::{compiler::Compiler, memory::Memory, stage::Stage};
//!
//! let mut memory = Memory::new(1 << 16);
//! memory.write_raw_str(0, b"1 + 2").unwrap();
//! let mut compiler = Compiler::init(&mut memory, Stage::One, 0, 256, 1 << 16).unwrap();
//! let mut result = compiler.compile_expr().unwrap();
//! compiler.clean_up().unwrap();
//!
//! result.flatten(&mut memory).unwrap();
//! assert_eq!(result.text(&memory).unwrap(), "(i32.add (i32.const 1) (i32.const 2))");
//! assert_eq!(memory.used_chunks(), 2);
//! ```
use core::fmt;
use std::str::FromStr;

use tracing::debug;

pub mod backend;
pub mod codegen;
pub mod pool;

use backend::{Backend, HostBackend, RuntimeBackend};
use codegen::{Codegen, Unit};
use pool::StringPool;

use crate::{
    error::Error,
    lexer::{Lexeme, Lexer, LexerState},
    memory::{Memory, MemoryError, GRANULE},
    parser::Parser,
    runtime::Str,
    stage::Stage,
};

/// Output of one `compile_*` call.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum Compiled {
    /// Stage zero output: a NUL terminated span in its own chunk.
    Raw(u32),
    Rope(Str),
}

impl Compiled {
    /// Address a host would receive.
    pub fn address(&self) -> u32 {
        match self {
            Compiled::Raw(address) => *address,
            Compiled::Rope(text) => text.as_ptr(),
        }
    }

    pub fn flatten(&mut self, memory: &mut Memory) -> Result<(), Error> {
        if let Compiled::Rope(text) = self {
            text.flatten(memory)?;
        }
        Ok(())
    }

    pub fn text(&self, memory: &Memory) -> Result<String, Error> {
        Ok(match self {
            Compiled::Raw(address) => {
                String::from_utf8_lossy(memory.read_raw_str(*address)?).into_owned()
            }
            Compiled::Rope(text) => text.to_string(memory),
        })
    }

    pub fn delete(self, memory: &mut Memory) -> Result<(), Error> {
        match self {
            Compiled::Raw(address) => memory.free(address)?,
            Compiled::Rope(text) => text.delete(memory)?,
        }
        Ok(())
    }
}

/// The unit a `compile_*` entry point reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    Expression,
    Statement,
    Block,
    Function,
    Class,
    #[default]
    Module,
}

impl Granularity {
    pub const ALL: [Granularity; 6] = [
        Granularity::Expression,
        Granularity::Statement,
        Granularity::Block,
        Granularity::Function,
        Granularity::Class,
        Granularity::Module,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Expression => "expr",
            Granularity::Statement => "stmt",
            Granularity::Block => "block",
            Granularity::Function => "fn",
            Granularity::Class => "class",
            Granularity::Module => "module",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown granularity `{0}`, expected expr, stmt, block, fn, class or module")]
pub struct UnknownGranularity(pub Box<str>);

impl FromStr for Granularity {
    type Err = UnknownGranularity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|granularity| granularity.as_str() == s)
            .ok_or_else(|| UnknownGranularity(Box::from(s)))
    }
}

/// Window layout used by [`compile_source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Size of the whole memory.
    pub memory_size: u32,
    /// End of the heap window. String literals are placed from here on.
    pub heap_end: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            memory_size: 16 * 1024 * 1024,
            heap_end: 15 * 1024 * 1024,
        }
    }
}

enum Target<'m> {
    Host(HostBackend<'m>),
    Runtime(RuntimeBackend<'m>),
}

/// One compilation, owning the memory window until [`Self::clean_up`].
pub struct Compiler<'m> {
    stage: Stage,
    source: Box<str>,
    cursor: LexerState,
    pool: StringPool,
    target: Target<'m>,
}

impl<'m> Compiler<'m> {
    /// Reads the NUL terminated source at `input` and sets up the heap
    /// window `[heap_start, heap_end)`, which must not overlap it.
    pub fn init(
        memory: &'m mut Memory,
        stage: Stage,
        input: u32,
        heap_start: u32,
        heap_end: u32,
    ) -> Result<Self, Error> {
        let bytes = memory.read_raw_str(input)?;
        let input_end = input.saturating_add(bytes.len() as u32 + 1);
        if input < heap_end && input_end > heap_start {
            return Err(Error::InputOverlapsHeap {
                input,
                heap_start,
                heap_end,
            });
        }
        let source = Box::from(String::from_utf8_lossy(bytes));
        memory.init(heap_start, heap_end)?;

        let target = if stage.uses_runtime() {
            Target::Runtime(RuntimeBackend::new(memory)?)
        } else {
            Target::Host(HostBackend::new(memory))
        };
        debug!(%stage, input, heap_start, heap_end, "compiler initialized");
        Ok(Self {
            stage,
            source,
            cursor: LexerState::default(),
            pool: StringPool::new(heap_end),
            target,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Byte offset of the next unread token.
    pub fn offset(&self) -> usize {
        self.cursor.offset()
    }

    pub fn memory(&self) -> &Memory {
        match &self.target {
            Target::Host(backend) => backend.memory(),
            Target::Runtime(backend) => backend.memory(),
        }
    }

    fn memory_mut(&mut self) -> &mut Memory {
        match &mut self.target {
            Target::Host(backend) => backend.memory_mut(),
            Target::Runtime(backend) => backend.memory_mut(),
        }
    }

    /// Runs `parse` from the cursor and moves the cursor past what it consumed.
    fn parse<T>(
        &mut self,
        parse: impl FnOnce(&mut Parser<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let lexer = Lexer::resume(&self.source, self.stage, self.cursor);
        let mut parser = Parser::new(lexer);
        let parsed = parse(&mut parser)?;
        self.cursor = parser.resume_state();
        Ok(parsed)
    }

    fn lower(&mut self, unit: Unit) -> Result<Compiled, Error> {
        match &mut self.target {
            Target::Host(backend) => lower_with(backend, &mut self.pool, &unit),
            Target::Runtime(backend) => lower_with(backend, &mut self.pool, &unit),
        }
    }

    pub fn compile_expr(&mut self) -> Result<Compiled, Error> {
        let expr = self.parse(|parser| parser.expression())?;
        debug!(offset = self.offset(), "compiling expression");
        self.lower(Unit::Expression(expr))
    }

    pub fn compile_stmt(&mut self, indent: usize) -> Result<Compiled, Error> {
        let stmt = self.parse(|parser| parser.statement())?;
        debug!(offset = self.offset(), indent, "compiling statement");
        self.lower(Unit::Statement { stmt, indent })
    }

    pub fn compile_block(&mut self, indent: usize) -> Result<Compiled, Error> {
        let stmts = self.parse(|parser| parser.block())?;
        debug!(offset = self.offset(), indent, "compiling block");
        self.lower(Unit::Block { stmts, indent })
    }

    pub fn compile_fn(&mut self) -> Result<Compiled, Error> {
        let function = self.parse(|parser| parser.function())?;
        debug!(name = &*function.name, "compiling function");
        self.lower(Unit::Function(function))
    }

    pub fn compile_class(&mut self) -> Result<Compiled, Error> {
        let class = self.parse(|parser| parser.class())?;
        debug!(name = &*class.name, "compiling class");
        self.lower(Unit::Class(class))
    }

    /// Compiles everything up to the end of the input.
    pub fn compile_module(&mut self) -> Result<Compiled, Error> {
        let items = self.parse(|parser| {
            let items = parser.module()?;
            parser.expect_end()?;
            Ok(items)
        })?;
        debug!(items = items.len(), literals = self.pool.len(), "compiling module");
        self.lower(Unit::Module(items))
    }

    /// Dispatches to the entry point for `granularity`, at indent 0.
    pub fn compile(&mut self, granularity: Granularity) -> Result<Compiled, Error> {
        match granularity {
            Granularity::Expression => self.compile_expr(),
            Granularity::Statement => self.compile_stmt(0),
            Granularity::Block => self.compile_block(0),
            Granularity::Function => self.compile_fn(),
            Granularity::Class => self.compile_class(),
            Granularity::Module => self.compile_module(),
        }
    }

    /// Reads one token and moves the cursor past it.
    pub fn next_token(&mut self) -> Result<Lexeme, Error> {
        let mut lexer = Lexer::resume(&self.source, self.stage, self.cursor);
        let lexeme = lexer.next_token()?;
        self.cursor = lexer.state();
        Ok(lexeme)
    }

    /// Reads one token, replaces the contents of `value` with its text and
    /// returns its type code.
    pub fn next_token_into(&mut self, value: &mut Str) -> Result<u32, Error> {
        let lexeme = self.next_token()?;
        let memory = self.memory_mut();
        value.clear(memory)?;
        value.push_str(memory, &lexeme.value)?;
        Ok(lexeme.kind.code())
    }

    /// Frees the symbol tables. Results handed out so far stay valid.
    pub fn clean_up(self) -> Result<(), Error> {
        match self.target {
            Target::Host(_) => {}
            Target::Runtime(backend) => backend.clean_up()?,
        }
        debug!(stage = %self.stage, "compiler cleaned up");
        Ok(())
    }
}

fn lower_with<B: Backend>(
    backend: &mut B,
    pool: &mut StringPool,
    unit: &Unit,
) -> Result<Compiled, Error> {
    let text = Codegen::new(backend, pool).lower(unit)?;
    backend.finish(text)
}

/// Compiles `source` in a fresh memory laid out by `options`: the source at
/// address 0, the heap right after it.
pub fn compile_source(
    stage: Stage,
    granularity: Granularity,
    source: &str,
    options: &Options,
) -> Result<String, Error> {
    let too_big = MemoryError::OutOfBounds {
        address: 0,
        len: u32::MAX,
    };
    let len = u32::try_from(source.len()).map_err(|_| too_big.clone())?;
    let heap_start = len
        .checked_add(1)
        .and_then(|end| end.checked_next_multiple_of(GRANULE))
        .ok_or(too_big)?;

    let mut memory = Memory::new(options.memory_size);
    memory.write_raw_str(0, source.as_bytes())?;
    let mut compiler = Compiler::init(&mut memory, stage, 0, heap_start, options.heap_end)?;
    let mut result = compiler.compile(granularity)?;
    compiler.clean_up()?;
    result.flatten(&mut memory)?;
    result.text(&memory)
}

#[cfg(test)]
mod tests {
    use super::{compile_source, Compiled, Compiler, Granularity, Options};
    use crate::{error::Error, memory::Memory, runtime::Str, stage::Stage};
    use assert2::{check, let_assert};

    const HEAP_START: u32 = 4096;
    const HEAP_END: u32 = 15 * 1024 * 1024;
    const MEMORY: u32 = 16 * 1024 * 1024;

    /// Compiles `source` the way a host would, checking that only the result
    /// is left allocated afterwards.
    fn compile(stage: Stage, granularity: Granularity, source: &str) -> Result<String, Error> {
        let mut memory = Memory::new(MEMORY);
        memory.write_raw_str(0, source.as_bytes())?;
        let mut compiler = Compiler::init(&mut memory, stage, 0, HEAP_START, HEAP_END)?;
        let mut result = compiler.compile(granularity)?;
        compiler.clean_up()?;
        result.flatten(&mut memory)?;
        let expected_chunks = match result {
            Compiled::Raw(_) => 1,
            Compiled::Rope(_) => 2,
        };
        check!(memory.used_chunks() == expected_chunks, "leaked memory compiling {source:?}");
        result.text(&memory)
    }

    fn expr(source: &str) -> Result<String, Error> {
        let outputs = Stage::ALL.map(|stage| compile(stage, Granularity::Expression, source));
        check!(outputs[0] == outputs[1], "stage 0 and 1 disagree on {source:?}");
        check!(outputs[1] == outputs[2], "stage 1 and 2 disagree on {source:?}");
        outputs[2].clone()
    }

    fn stmt(source: &str) -> Result<String, Error> {
        let outputs = Stage::ALL.map(|stage| compile(stage, Granularity::Statement, source));
        check!(outputs[0] == outputs[1]);
        check!(outputs[1] == outputs[2]);
        outputs[2].clone()
    }

    fn ok(text: &str) -> Result<String, Error> {
        Ok(String::from(text))
    }

    #[test]
    fn literals_and_calls() {
        check!(expr("-100") == ok("(i32.const -100)"));
        check!(expr("(32)") == ok("(i32.const 32)"));
        check!(expr(r#""hello""#) == ok("(i32.const 15728640)"));
        check!(expr("hello()") == ok("(call $hello)"));
        check!(expr("hello(1, 2)") == ok("(call $hello (i32.const 1) (i32.const 2))"));
        check!(expr("x") == ok("(global.get $x)"));
    }

    #[test]
    fn operators() {
        check!(expr("-(3)") == ok("(i32.neg (i32.const 3))"));
        check!(expr("!0") == ok("(i32.eqz (i32.const 0))"));
        check!(expr("7 % 2") == ok("(i32.rem_s (i32.const 7) (i32.const 2))"));
        check!(expr("2 ** 3") == ok("(call $pow (i32.const 2) (i32.const 3))"));
        check!(
            expr("1 / 2 * 3 / 4")
                == ok("(i32.div_s (i32.mul (i32.div_s (i32.const 1) (i32.const 2)) (i32.const 3)) (i32.const 4))")
        );
        check!(
            expr("1 - 2 * 3 + 4")
                == ok("(i32.add (i32.sub (i32.const 1) (i32.mul (i32.const 2) (i32.const 3))) (i32.const 4))")
        );
        check!(
            expr("(1 >= 2) > (0 <= 1)")
                == ok("(i32.gt_s (i32.ge_s (i32.const 1) (i32.const 2)) (i32.le_s (i32.const 0) (i32.const 1)))")
        );
        check!(
            expr("1 || 3 == 4 && 5 == 6 || 7")
                == ok("(call $or (call $or (i32.const 1) (call $and (i32.eq (i32.const 3) (i32.const 4)) (i32.eq (i32.const 5) (i32.const 6)))) (i32.const 7))")
        );
        check!(
            expr("!(1 == 2 && 3 >= 4)")
                == ok("(i32.eqz (call $and (i32.eq (i32.const 1) (i32.const 2)) (i32.ge_s (i32.const 3) (i32.const 4))))")
        );
    }

    #[test]
    fn invalid_expressions() {
        for stage in Stage::ALL {
            let_assert!(Err(Error::Syntax { .. }) = compile(stage, Granularity::Expression, ";"));
            let_assert!(Err(Error::Syntax { .. }) = compile(stage, Granularity::Expression, "(3"));
        }
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        for stage in Stage::ALL {
            check!(compile(stage, Granularity::Expression, &shallow) == ok("(i32.const 1)"));
            let_assert!(
                Err(Error::NestingTooDeep { limit: 64, .. }) =
                    compile(stage, Granularity::Expression, &deep)
            );
        }
    }

    #[test]
    fn statement_ignores_bad_input_after_it() {
        for stage in Stage::ALL {
            check!(compile(stage, Granularity::Statement, "42; \"oops") == ok("(drop (i32.const 42))"));
        }
    }

    #[test]
    fn stage_zero_expression_limit() {
        let short = format!("{}1", "1 + ".repeat(10));
        let long = format!("{}1", "1 + ".repeat(100));
        check!(compile(Stage::Zero, Granularity::Expression, &short).is_ok());
        let_assert!(
            Err(Error::ExpressionTooLong { limit: 1024 }) =
                compile(Stage::Zero, Granularity::Expression, &long)
        );
        check!(compile(Stage::One, Granularity::Expression, &long).is_ok());
    }

    #[test]
    fn statements() {
        check!(stmt("42;") == ok("(drop (i32.const 42))"));
        check!(stmt("let x, y, z;") == ok("(local $x i32) (local $y i32) (local $z i32)"));
        check!(stmt("let x = 1, y;") == ok("(local $x i32) (local.set $x (i32.const 1)) (local $y i32)"));
        check!(stmt("x = 1;") == ok("(global.set $x (i32.const 1))"));
        check!(stmt("return;") == ok("(return (i32.const 0))"));
        check!(stmt("return 10 * 5;") == ok("(return (i32.mul (i32.const 10) (i32.const 5)))"));
        check!(stmt("if (1) {}") == ok("(if (i32.const 1)\n  (then\n  )\n)"));
        check!(
            stmt("if (1 > 0) { foo(); } else { bar(); }")
                == ok(concat!(
                    "(if (i32.gt_s (i32.const 1) (i32.const 0))\n",
                    "  (then\n",
                    "    (drop (call $foo))\n",
                    "  )\n",
                    "  (else\n",
                    "    (drop (call $bar))\n",
                    "  )\n",
                    ")",
                ))
        );
    }

    #[test]
    fn nested_loops() {
        check!(
            stmt("while (1) { foo(); while (2) { if (3) continue; break; } }")
                == ok(concat!(
                    "(block $loop_1_end (loop $loop_1\n",
                    "  (br_if $loop_1_end (i32.eqz (i32.const 1)))\n",
                    "  (drop (call $foo))\n",
                    "  (block $loop_2_end (loop $loop_2\n",
                    "    (br_if $loop_2_end (i32.eqz (i32.const 2)))\n",
                    "    (if (i32.const 3)\n",
                    "      (then\n",
                    "        (br $loop_2)\n",
                    "      )\n",
                    "    )\n",
                    "    (br $loop_2_end)\n",
                    "    (br $loop_2)\n",
                    "  ))\n",
                    "  (br $loop_1)\n",
                    "))",
                ))
        );
        for stage in Stage::ALL {
            let_assert!(
                Err(Error::LoopControlOutsideLoop("break")) =
                    compile(stage, Granularity::Statement, "break;")
            );
        }
    }

    #[test]
    fn blocks_and_assignments() {
        for stage in Stage::ALL {
            check!(compile(stage, Granularity::Block, "{ }") == ok(""));
            check!(
                compile(stage, Granularity::Block, "{ let x; x = x + 1; }")
                    == ok("(local $x i32)\n(local.set $x (i32.add (local.get $x) (i32.const 1)))\n")
            );
            check!(
                compile(stage, Granularity::Block, "{ let x; f(x = 2); g = 3; h(g = 4); }")
                    == ok(concat!(
                        "(local $x i32)\n",
                        "(drop (call $f (local.tee $x (i32.const 2))))\n",
                        "(global.set $g (i32.const 3))\n",
                        "(drop (call $h (block (result i32) (global.set $g (i32.const 4)) (global.get $g))))\n",
                    ))
            );
            let_assert!(
                Err(Error::Redeclared(name)) = compile(stage, Granularity::Block, "{ let x; let x; }")
            );
            check!(&*name == "x");
        }
    }

    #[test]
    fn functions() {
        for stage in Stage::ALL {
            check!(
                compile(stage, Granularity::Function, "fn foo(x, y) {}")
                    == ok(concat!(
                        "  (func $foo (param $x i32) (param $y i32) (result i32)\n",
                        "    (i32.const 0)\n",
                        "  )\n",
                        "  (export \"foo\" (func $foo))\n",
                    ))
            );
            check!(
                compile(stage, Granularity::Function, "fn foo(x): Int { return x; }")
                    == ok(concat!(
                        "  (func $foo (param $x i32) (result i32)\n",
                        "    (return (local.get $x))\n",
                        "    (i32.const 0)\n",
                        "  )\n",
                        "  (export \"foo\" (func $foo))\n",
                    ))
            );
        }
    }

    #[test]
    fn modules() {
        for stage in Stage::ALL {
            check!(compile(stage, Granularity::Module, "// empty module") == ok(""));
            check!(
                compile(stage, Granularity::Module, "let x, y;")
                    == ok("  (global $x (mut i32) (i32.const 0)) (global $y (mut i32) (i32.const 0))\n")
            );
            check!(
                compile(stage, Granularity::Module, r#"let s = "hi\n"; fn f() { return s; }"#)
                    == ok(concat!(
                        "  (global $s (mut i32) (i32.const 15728640))\n",
                        "  (func $f (result i32)\n",
                        "    (return (global.get $s))\n",
                        "    (i32.const 0)\n",
                        "  )\n",
                        "  (export \"f\" (func $f))\n",
                        "  (data (i32.const 15728640) \"hi\\0a\\00\")\n",
                    ))
            );
            let_assert!(
                Err(Error::NonConstantGlobal(_)) = compile(stage, Granularity::Module, "let x = 1 + 2;")
            );
            // spacing decides whether the minus belongs to the literal, not the value
            for source in ["let n = -7;", "let n = - 7;"] {
                check!(
                    compile(stage, Granularity::Module, source)
                        == ok("  (global $n (mut i32) (i32.const -7))\n")
                );
            }
            let_assert!(
                Err(Error::NonConstantGlobal(_)) = compile(stage, Granularity::Module, "let n = -x;")
            );
            let_assert!(Err(Error::Redeclared(_)) = compile(stage, Granularity::Module, "let x; let x;"));
        }
    }

    #[test]
    fn classes() {
        let class = |source| compile(Stage::Two, Granularity::Class, source);
        check!(class("class A {}") == ok("  (type $A (struct (field $_header (mut i32))))\n"));
        check!(
            class("class A { x; y: Y; }")
                == ok("  (type $A (struct (field $_header (mut i32)) (field $x (mut i32)) (field $y (mut (ref $Y)))))\n")
        );
        let_assert!(Err(Error::Unsupported { .. }) = compile(Stage::One, Granularity::Class, "class A {}"));
    }

    #[test]
    fn objects() {
        let module = |source| compile(Stage::Two, Granularity::Module, source);
        check!(
            module("class P { x; next: P; } fn f(p: P) { p.next.x = new P(); return p.x; }")
                == ok(concat!(
                    "  (type $P (struct (field $_header (mut i32)) (field $x (mut i32)) (field $next (mut (ref $P)))))\n",
                    "  (func $f (param $p i32) (result i32)\n",
                    "    (i32.store offset=4 (i32.load offset=8 (local.get $p)) (call $_malloc (i32.const 12)))\n",
                    "    (return (i32.load offset=4 (local.get $p)))\n",
                    "    (i32.const 0)\n",
                    "  )\n",
                    "  (export \"f\" (func $f))\n",
                ))
        );
        check!(
            module("class P { x; } fn f(a: Array<P>) { a[0] = a[1]; return a[2].x; }")
                == ok(concat!(
                    "  (type $P (struct (field $_header (mut i32)) (field $x (mut i32))))\n",
                    "  (func $f (param $a i32) (result i32)\n",
                    "    (drop (call $_arrSet (local.get $a) (i32.const 0) (call $_arrGet (local.get $a) (i32.const 1))))\n",
                    "    (return (i32.load offset=4 (call $_arrGet (local.get $a) (i32.const 2))))\n",
                    "    (i32.const 0)\n",
                    "  )\n",
                    "  (export \"f\" (func $f))\n",
                ))
        );
        let_assert!(Err(Error::UntypedReceiver { .. }) = module("fn f(p) { return p.x; }"));
        let_assert!(Err(Error::UnknownField { .. }) = module("class P {} fn f(p: P) { return p.x; }"));
        let_assert!(Err(Error::UnknownClass(_)) = module("fn f() { return new Q(); }"));
        let_assert!(
            Err(Error::AssignmentNotAValue(_)) = module("class P { x; } fn f(p: P) { return p.x = 1; }")
        );
        check!(module(r#"import "std"; let a: P;"#) == ok("  (global $a (mut i32) (i32.const 0))\n"));
    }

    #[test]
    fn units_continue_where_the_previous_stopped() {
        let mut memory = Memory::new(MEMORY);
        memory.write_raw_str(0, b"while (1) break; while (2) continue;").unwrap();
        let mut compiler = Compiler::init(&mut memory, Stage::One, 0, HEAP_START, HEAP_END).unwrap();
        let first = compiler.compile_stmt(2).unwrap();
        let second = compiler.compile_stmt(2).unwrap();
        check!(compiler.offset() == 36);
        check!(
            first.text(compiler.memory()).unwrap()
                == "(block $loop_1_end (loop $loop_1\n    (br_if $loop_1_end (i32.eqz (i32.const 1)))\n    (br $loop_1_end)\n    (br $loop_1)\n  ))"
        );
        check!(second.text(compiler.memory()).unwrap().contains("(br $loop_2)\n    (br $loop_2)"));
        compiler.clean_up().unwrap();
        first.delete(&mut memory).unwrap();
        second.delete(&mut memory).unwrap();
        check!(memory.used_chunks() == 0);
    }

    #[test]
    fn token_protocol() {
        let mut memory = Memory::new(MEMORY);
        memory.write_raw_str(0, br#"let s = "a b";"#).unwrap();
        let mut compiler = Compiler::init(&mut memory, Stage::One, 0, HEAP_START, HEAP_END).unwrap();
        let mut codes = vec![];
        loop {
            let code = compiler.next_token().unwrap().kind.code();
            codes.push(code);
            if code == 0 {
                break;
            }
        }
        check!(codes == [5, 3, 61, 2, 59, 0]);
        check!(compiler.next_token().map(|t| t.kind.code()) == Ok(0));
    }

    #[test]
    fn tokens_into_runtime_strings() {
        let mut memory = Memory::new(MEMORY);
        memory.write_raw_str(0, br#"x "a b" 12"#).unwrap();
        let mut compiler = Compiler::init(&mut memory, Stage::One, 0, HEAP_START, HEAP_END).unwrap();
        let mut value = Str::from_str(compiler.memory_mut(), "stale").unwrap();
        let mut seen = vec![];
        loop {
            let code = compiler.next_token_into(&mut value).unwrap();
            seen.push((code, value.to_string(compiler.memory())));
            if code == 0 {
                break;
            }
        }
        check!(
            seen == [
                (3, String::from("x")),
                (2, String::from("a b")),
                (1, String::from("12")),
                (0, String::new()),
            ]
        );
        value.delete(compiler.memory_mut()).unwrap();
        compiler.clean_up().unwrap();
        check!(memory.used_chunks() == 0);
    }

    #[test]
    fn input_must_not_overlap_the_heap() {
        let mut memory = Memory::new(MEMORY);
        memory.write_raw_str(HEAP_START + 8, b"1").unwrap();
        let_assert!(
            Err(Error::InputOverlapsHeap { .. }) =
                Compiler::init(&mut memory, Stage::One, HEAP_START + 8, HEAP_START, HEAP_END)
        );
    }

    #[test]
    fn compile_source_with_default_options() {
        let options = Options::default();
        check!(
            compile_source(Stage::One, Granularity::Statement, "42;", &options)
                == ok("(drop (i32.const 42))")
        );
        check!("fn".parse() == Ok(Granularity::Function));
        check!("function".parse::<Granularity>().is_err());
    }
}
