use crate::{
    lexer::{LexerError, Span},
    memory::{Memory, MemoryError},
    runtime::RuntimeError,
    stage::{Feature, Stage},
};

/// Everything that can make a compilation fail.
///
/// There is no recovery: after an error the memory window should be
/// re-initialized before it is used again.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{error} at {}..{}", .span.start, .span.end)]
    Lex {
        #[source]
        error: LexerError,
        span: Span,
    },
    #[error("unexpected {found} at {}..{}, expected {}", .span.start, .span.end, .expected.join(" or "))]
    Syntax {
        found: Box<str>,
        expected: Vec<&'static str>,
        span: Span,
    },
    #[error("{feature} not available before stage {}, this is stage {stage}", .feature.introduced_in())]
    Unsupported {
        feature: Feature,
        stage: Stage,
        span: Span,
    },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("`{0}` is already declared in this scope")]
    Redeclared(Box<str>),
    #[error("class `{0}` needs a backend with object support")]
    NoClassSupport(Box<str>),
    #[error("unknown class `{0}`")]
    UnknownClass(Box<str>),
    #[error("class `{class}` has no field `{field}`")]
    UnknownField { class: Box<str>, field: Box<str> },
    #[error("cannot access `.{field}` on an expression without a class type")]
    UntypedReceiver { field: Box<str> },
    #[error("`{0}` outside of a loop")]
    LoopControlOutsideLoop(&'static str),
    #[error("only variables, fields and elements can be assigned to")]
    InvalidAssignmentTarget { span: Span },
    #[error("assignment to `{0}` cannot be used as a value")]
    AssignmentNotAValue(Box<str>),
    #[error("global `{0}` can only be initialized with a literal")]
    NonConstantGlobal(Box<str>),
    #[error("nesting deeper than {limit} levels at {}..{}", .span.start, .span.end)]
    NestingTooDeep { limit: usize, span: Span },
    #[error("expression output exceeds {limit} bytes")]
    ExpressionTooLong { limit: usize },
    #[error("input at {input} overlaps the heap [{heap_start}, {heap_end})")]
    InputOverlapsHeap {
        input: u32,
        heap_start: u32,
        heap_end: u32,
    },
}

impl Error {
    /// Source span the error points at, if it has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Lex { span, .. }
            | Error::Syntax { span, .. }
            | Error::Unsupported { span, .. }
            | Error::NestingTooDeep { span, .. }
            | Error::InvalidAssignmentTarget { span } => Some(span.clone()),
            _ => None,
        }
    }

    /// Writes the message NUL terminated at `address`, for hosts that read
    /// errors out of the window.
    pub fn write_message(&self, memory: &mut Memory, address: u32) -> Result<(), MemoryError> {
        memory.write_raw_str(address, self.to_string().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::{lexer::LexerError, memory::Memory};
    use assert2::check;

    #[test]
    fn messages() {
        let error = Error::Syntax {
            found: Box::from("`;`"),
            expected: vec!["expression", "`(`"],
            span: 3..4,
        };
        check!(error.to_string() == "unexpected `;` at 3..4, expected expression or `(`");
        check!(error.span() == Some(3..4));

        let lex = Error::Lex {
            error: LexerError::UnterminatedString,
            span: 0..6,
        };
        check!(lex.to_string() == "unterminated string literal at 0..6");
    }

    #[test]
    fn message_into_memory() {
        let mut memory = Memory::new(256);
        let error = Error::UnknownClass(Box::from("Foo"));
        error.write_message(&mut memory, 16).unwrap();
        check!(memory.read_raw_str(16) == Ok(&b"unknown class `Foo`"[..]));
    }
}
